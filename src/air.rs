//! 라디오 매체 구현
//!
//! - `Ether` / `LoopbackTx` / `LoopbackRx`: 프로세스 내 공유 매체, 손실/비트 오류 주입
//! - `UdpAirTx` / `UdpAirRx`: 로컬 UDP 소켓으로 노드 프로세스 간 매체 흉내
//!
//! 두 매체 모두 수신기가 "듣는 중"이고 프레임의 채널에 튜닝되어 있을 때만 전달

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::Channel;
use crate::frame::PeerTag;
use crate::radio::{RadioRx, RadioTx};
use crate::{Error, Result};

/// 매체 위 전송 단위
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AirEnvelope {
    channel: Channel,
    frame: Vec<u8>,
}

/// 채널 필터 + 수신 대기 프레임 하나
///
/// 두 수신기 구현이 공유하는 튜닝 상태
#[derive(Debug)]
struct Tuner {
    channel: Channel,
    listening: bool,
    pending: Option<Bytes>,
}

impl Tuner {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            listening: false,
            pending: None,
        }
    }

    /// 튜닝된 채널이면 대기 프레임으로 받아들임
    fn offer(&mut self, channel: Channel, frame: Bytes) -> bool {
        if !self.listening || channel != self.channel {
            return false;
        }
        self.pending = Some(frame);
        true
    }

    fn retune(&mut self, channel: Channel) {
        self.channel = channel;
        self.pending = None;
    }

    fn stop(&mut self) {
        self.listening = false;
        self.pending = None;
    }
}

// ============================================================
// 프로세스 내 매체
// ============================================================

struct Station {
    id: usize,
    tx: Sender<AirEnvelope>,
}

/// 프로세스 내 공유 라디오 매체
pub struct Ether {
    stations: Mutex<Vec<Station>>,

    /// 프레임 손실 확률
    loss: f64,

    /// 단일 비트 오류 확률
    corruption: f64,
}

impl Ether {
    /// 손실 없는 매체
    pub fn new() -> Arc<Self> {
        Self::with_impairments(0.0, 0.0)
    }

    /// 수신기별로 독립적인 손실/비트 오류 적용
    pub fn with_impairments(loss: f64, corruption: f64) -> Arc<Self> {
        Arc::new(Self {
            stations: Mutex::new(Vec::new()),
            loss: loss.clamp(0.0, 1.0),
            corruption: corruption.clamp(0.0, 1.0),
        })
    }

    /// 송신기/수신기 한 쌍 연결
    pub fn attach(self: &Arc<Self>, tx_channel: Channel, rx_channel: Channel) -> (LoopbackTx, LoopbackRx) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = {
            let mut stations = self.stations.lock();
            let id = stations.len();
            stations.push(Station { id, tx });
            id
        };

        let sender = LoopbackTx {
            ether: self.clone(),
            id,
            channel: tx_channel,
        };
        let receiver = LoopbackRx {
            rx,
            tuner: Tuner::new(rx_channel),
        };
        (sender, receiver)
    }

    /// 자기 자신을 뺀 모든 스테이션에 전파
    fn broadcast(&self, from: usize, channel: Channel, frame: &[u8]) {
        let mut rng = rand::thread_rng();
        let stations = self.stations.lock();

        for station in stations.iter().filter(|s| s.id != from) {
            if self.loss > 0.0 && rng.gen_bool(self.loss) {
                trace!("매체 손실: station={}", station.id);
                continue;
            }

            let mut frame = frame.to_vec();
            if self.corruption > 0.0 && !frame.is_empty() && rng.gen_bool(self.corruption) {
                let bit = rng.gen_range(0..frame.len() * 8);
                frame[bit / 8] ^= 1 << (bit % 8);
            }

            // 수신측이 사라졌으면 무시
            let _ = station.tx.send(AirEnvelope { channel, frame });
        }
    }
}

/// 프로세스 내 매체 송신기
pub struct LoopbackTx {
    ether: Arc<Ether>,
    id: usize,
    channel: Channel,
}

impl LoopbackTx {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl RadioTx for LoopbackTx {
    fn poll_tx_ready(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.ether.broadcast(self.id, self.channel, frame);
        Ok(())
    }
}

/// 프로세스 내 매체 수신기
pub struct LoopbackRx {
    rx: Receiver<AirEnvelope>,
    tuner: Tuner,
}

impl RadioRx for LoopbackRx {
    fn channel(&self) -> Channel {
        self.tuner.channel
    }

    fn start_listening(&mut self) -> Result<()> {
        // 듣기 전에 쌓인 전파는 받지 못한 것으로 처리
        while self.rx.try_recv().is_ok() {}
        self.tuner.listening = true;
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<()> {
        self.tuner.stop();
        Ok(())
    }

    fn retune(&mut self, channel: Channel) -> Result<()> {
        self.tuner.retune(channel);
        Ok(())
    }

    fn poll_available(&mut self, timeout: Duration) -> Result<bool> {
        if self.tuner.pending.is_some() {
            return Ok(true);
        }
        if !self.tuner.listening {
            // 듣지 않는 동안의 전파는 버림
            while self.rx.try_recv().is_ok() {}
            std::thread::sleep(timeout);
            return Ok(false);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(envelope) => {
                    if self.tuner.offer(envelope.channel, Bytes::from(envelope.frame)) {
                        return Ok(true);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return Ok(false)
                }
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        Ok(self.tuner.pending.take())
    }
}

// ============================================================
// UDP 매체
// ============================================================

/// 노드 태그의 수신 포트
pub fn node_port(base_port: u16, tag: PeerTag) -> Result<u16> {
    base_port.checked_add(u16::from(tag.bits())).ok_or_else(|| {
        Error::InvalidConfig(format!("기준 포트 범위 초과: {} + {}", base_port, tag.bits()))
    })
}

/// UDP 매체 송신기: 다른 모든 노드 포트로 봉투 전송
pub struct UdpAirTx {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    channel: Channel,
}

impl UdpAirTx {
    pub fn bind(base_port: u16, local: PeerTag, channel: Channel) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        let targets = PeerTag::ALL
            .into_iter()
            .filter(|&tag| tag != local)
            .map(|tag| Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, node_port(base_port, tag)?))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            socket,
            targets,
            channel,
        })
    }
}

impl RadioTx for UdpAirTx {
    fn poll_tx_ready(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let envelope = bincode::serialize(&AirEnvelope {
            channel: self.channel,
            frame: frame.to_vec(),
        })?;

        for target in &self.targets {
            // 상대 노드가 아직 안 떠 있으면 ICMP 에러가 올 수 있음, 매체 손실로 취급
            if let Err(e) = self.socket.send_to(&envelope, target) {
                trace!("UDP 송신 실패 {}: {}", target, e);
            }
        }
        Ok(())
    }
}

/// UDP 매체 수신기
pub struct UdpAirRx {
    socket: UdpSocket,
    tuner: Tuner,
    buf: Vec<u8>,
}

impl UdpAirRx {
    pub fn bind(base_port: u16, local: PeerTag, channel: Channel) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, node_port(base_port, local)?))?;
        Ok(Self {
            socket,
            tuner: Tuner::new(channel),
            buf: vec![0u8; 512],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl RadioRx for UdpAirRx {
    fn channel(&self) -> Channel {
        self.tuner.channel
    }

    fn start_listening(&mut self) -> Result<()> {
        // 쌓인 데이터그램 폐기
        self.socket.set_nonblocking(true)?;
        while self.socket.recv_from(&mut self.buf).is_ok() {}
        self.socket.set_nonblocking(false)?;
        self.tuner.listening = true;
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<()> {
        self.tuner.stop();
        Ok(())
    }

    fn retune(&mut self, channel: Channel) -> Result<()> {
        self.tuner.retune(channel);
        Ok(())
    }

    fn poll_available(&mut self, timeout: Duration) -> Result<bool> {
        if self.tuner.pending.is_some() {
            return Ok(true);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let len = match self.socket.recv_from(&mut self.buf) {
                Ok((len, _)) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(false)
                }
                Err(e) => return Err(e.into()),
            };

            // 깨진 봉투는 매체 잡음
            let Ok(envelope) = bincode::deserialize::<AirEnvelope>(&self.buf[..len]) else {
                continue;
            };
            if self.tuner.offer(envelope.channel, Bytes::from(envelope.frame)) {
                return Ok(true);
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Bytes>> {
        Ok(self.tuner.pending.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_loopback_delivers_on_tuned_channel() {
        let ether = Ether::new();
        let (mut tx_a, _rx_a) = ether.attach(0x10, 0x30);
        let (_tx_c, mut rx_c) = ether.attach(0x30, 0x10);

        rx_c.start_listening().unwrap();
        tx_a.send(b"frame").unwrap();

        assert!(rx_c.poll_available(SHORT).unwrap());
        assert_eq!(rx_c.receive().unwrap().unwrap().as_ref(), b"frame");
        assert!(rx_c.receive().unwrap().is_none());
    }

    #[test]
    fn test_loopback_filters_other_channels() {
        let ether = Ether::new();
        let (mut tx_a, _rx_a) = ether.attach(0x10, 0x30);
        let (_tx_c, mut rx_c) = ether.attach(0x30, 0x20);

        rx_c.start_listening().unwrap();
        tx_a.send(b"frame").unwrap();
        assert!(!rx_c.poll_available(SHORT).unwrap());

        // 듣지 않는 동안 온 전파는 놓침
        rx_c.stop_listening().unwrap();
        rx_c.retune(0x10).unwrap();
        tx_a.send(b"missed").unwrap();
        rx_c.start_listening().unwrap();
        assert!(!rx_c.poll_available(SHORT).unwrap());
    }

    #[test]
    fn test_loopback_sender_does_not_hear_itself() {
        let ether = Ether::new();
        let (mut tx_a, mut rx_a) = ether.attach(0x10, 0x10);
        rx_a.start_listening().unwrap();
        tx_a.send(b"echo").unwrap();
        assert!(!rx_a.poll_available(SHORT).unwrap());
    }

    #[test]
    fn test_loopback_total_loss() {
        let ether = Ether::with_impairments(1.0, 0.0);
        let (mut tx_a, _rx_a) = ether.attach(0x10, 0x30);
        let (_tx_c, mut rx_c) = ether.attach(0x30, 0x10);
        rx_c.start_listening().unwrap();
        tx_a.send(b"lost").unwrap();
        assert!(!rx_c.poll_available(SHORT).unwrap());
    }

    #[test]
    fn test_loopback_corruption_flips_one_bit() {
        let ether = Ether::with_impairments(0.0, 1.0);
        let (mut tx_a, _rx_a) = ether.attach(0x10, 0x30);
        let (_tx_c, mut rx_c) = ether.attach(0x30, 0x10);
        rx_c.start_listening().unwrap();

        let original = [0u8; 16];
        tx_a.send(&original).unwrap();
        assert!(rx_c.poll_available(SHORT).unwrap());
        let received = rx_c.receive().unwrap().unwrap();
        let flipped: u32 = received.iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
    }

    #[test]
    fn test_loopback_discards_while_not_listening() {
        let ether = Ether::new();
        let (mut tx_a, _rx_a) = ether.attach(0x10, 0x30);
        let (_tx_c, mut rx_c) = ether.attach(0x30, 0x10);

        for _ in 0..100 {
            tx_a.send(b"unheard").unwrap();
        }
        assert_eq!(rx_c.rx.len(), 100);
        assert!(!rx_c.poll_available(Duration::from_millis(1)).unwrap());
        assert!(rx_c.rx.is_empty());
    }

    #[test]
    fn test_node_port_overflow_rejected() {
        assert_eq!(node_port(47_000, PeerTag::D).unwrap(), 47_003);
        assert_eq!(node_port(65_532, PeerTag::D).unwrap(), 65_535);
        assert!(matches!(
            node_port(65_533, PeerTag::D),
            Err(Error::InvalidConfig(_))
        ));
        assert!(UdpAirTx::bind(65_534, PeerTag::A, 0x10).is_err());
        assert!(UdpAirRx::bind(65_534, PeerTag::C, 0x10).is_err());
    }

    #[test]
    fn test_udp_air_round_trip() {
        // 다른 테스트와 겹치지 않는 포트 대역
        let base_port = 47_310;
        let mut tx_a = UdpAirTx::bind(base_port, PeerTag::A, 0x10).unwrap();
        let mut rx_c = UdpAirRx::bind(base_port, PeerTag::C, 0x10).unwrap();
        rx_c.start_listening().unwrap();

        tx_a.send(b"over udp").unwrap();
        assert!(rx_c.poll_available(Duration::from_millis(500)).unwrap());
        assert_eq!(rx_c.receive().unwrap().unwrap().as_ref(), b"over udp");

        rx_c.retune(0x20).unwrap();
        tx_a.send(b"filtered").unwrap();
        assert!(!rx_c.poll_available(Duration::from_millis(50)).unwrap());
    }
}
