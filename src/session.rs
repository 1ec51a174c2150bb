//! 세션 컨트롤러
//!
//! 단일 스레드 협력 루프, 한 회전마다:
//! 1. 인박스 비우기 → 검증 → 재조립
//! 2. 송신 슬롯이 비어 있으면 프레임 하나 송신 (라운드로빈)
//! 3. `rescan_interval`회마다 수신 주파수 스캔
//! 4. 종료 조건 확인 (전원 수신 완료 / 시간 예산 / 반복 한도)
//!
//! 종료 후 미완료 세션은 부분 확정, 태그 순서로 압축 해제 → 저장

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, error, info, trace, warn};

use crate::codec::Codec;
use crate::config::{Channel, Config};
use crate::frame::{FrameToSend, Framer, PeerTag};
use crate::radio::{with_retry, RadioRx, RadioTx, SharedRx};
use crate::reassembly::{Reassembler, StoreOutcome};
use crate::receiver::{inbox, InboundFrame, InboxConsumer, ReceiveScanner, RxPump, ScanStep};
use crate::scheduler::TransmitScheduler;
use crate::stats::{SessionClock, SessionStats};
use crate::store::StreamStore;
use crate::validator::FrameValidator;
use crate::{Error, Result};

/// 세션 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 모든 피어 스트림 수신 완료
    AllReceived,

    /// 시간 예산 소진
    BudgetExceeded,

    /// 반복 한도 도달
    IterationLimit,
}

/// 피어별 최종 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    Completed,

    /// 일부 슬롯만 채워진 채 확정
    Partial,

    /// 프레임을 하나도 받지 못함 (저장 안 함)
    Unseen,
}

/// 피어 하나의 수신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    pub tag: PeerTag,
    pub outcome: PeerOutcome,
    pub slots_filled: usize,
    pub total_count: usize,

    /// 재조립된 (압축 상태) 바이트 수
    pub assembled_len: usize,

    /// 저장소에 넘긴 바이트 수
    pub stored_len: usize,

    /// 압축 해제 성공 여부 (실패 시 원본 저장)
    pub decoded: bool,

    pub store_error: Option<String>,
}

impl PeerReport {
    fn unseen(tag: PeerTag) -> Self {
        Self {
            tag,
            outcome: PeerOutcome::Unseen,
            slots_filled: 0,
            total_count: 0,
            assembled_len: 0,
            stored_len: 0,
            decoded: false,
            store_error: None,
        }
    }
}

/// 세션 결과 보고
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub local_tag: PeerTag,
    pub termination: Termination,
    pub iterations: u64,
    pub elapsed: Duration,
    pub stats: SessionStats,

    /// 태그 순서
    pub peers: Vec<PeerReport>,
}

impl SessionReport {
    pub fn all_completed(&self) -> bool {
        self.peers
            .iter()
            .all(|p| p.outcome == PeerOutcome::Completed)
    }

    pub fn peer(&self, tag: PeerTag) -> Option<&PeerReport> {
        self.peers.iter().find(|p| p.tag == tag)
    }

    /// 한 줄 요약
    pub fn summary(&self) -> String {
        let peers: Vec<String> = self
            .peers
            .iter()
            .map(|p| match p.outcome {
                PeerOutcome::Unseen => format!("{}=unseen", p.tag),
                _ => format!(
                    "{}={}/{}{}",
                    p.tag,
                    p.slots_filled,
                    p.total_count,
                    if p.decoded { "" } else { " raw" }
                ),
            })
            .collect();
        format!(
            "[{}] {:?} after {} iterations | {} | {}",
            self.local_tag,
            self.termination,
            self.iterations,
            peers.join(" "),
            self.stats.summary(self.elapsed)
        )
    }
}

/// 노드 한 대의 송수신 세션
pub struct SessionController<T, R, C, S> {
    config: Config,
    tx: T,
    rx: SharedRx<R>,
    codec: C,
    store: S,

    framer: Framer,
    validator: FrameValidator,
    scheduler: TransmitScheduler,
    scanner: ReceiveScanner,
    reassembler: Reassembler,
    stats: SessionStats,

    /// 수신기가 듣는 중인지
    listening: bool,
}

impl<T, R, C, S> SessionController<T, R, C, S>
where
    T: RadioTx,
    R: RadioRx + 'static,
    C: Codec,
    S: StreamStore,
{
    /// 새 세션 생성 (설정 검증 포함)
    pub fn new(config: Config, tx: T, rx: R, codec: C, store: S) -> Result<Self> {
        config.validate()?;

        let framer = Framer::new(config.payload_size(), config.frame_counting)?;
        let validator = FrameValidator::new(config.local_tag, config.frame_size);
        let scanner = ReceiveScanner::new(config.peers.clone());

        Ok(Self {
            config,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            codec,
            store,
            framer,
            validator,
            scheduler: TransmitScheduler::new(),
            scanner,
            reassembler: Reassembler::new(),
            stats: SessionStats::new(),
            listening: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// 송신 큐에 들어간 전체 프레임 수
    pub fn queued_frames(&self) -> usize {
        self.scheduler.total_frames()
    }

    /// 목적지 피어별 송신 스트림 등록
    ///
    /// 압축과 프레이밍은 피어별로 병렬 처리
    pub fn queue_outbound(&mut self, outbound: &BTreeMap<PeerTag, Bytes>) -> Result<()> {
        if let Some(tag) = outbound
            .keys()
            .find(|&&tag| self.config.channel_of(tag).is_none())
        {
            return Err(Error::InvalidConfig(format!(
                "설정에 없는 목적지 피어: {}",
                tag
            )));
        }

        let codec = &self.codec;
        let framer = &self.framer;
        let queues = outbound
            .par_iter()
            .map(|(&tag, data)| -> Result<(PeerTag, usize, Vec<Bytes>)> {
                let compressed = codec.compress(data)?;
                let frames = framer.split_into_frames(tag, &compressed)?;
                let encoded: Vec<Bytes> = frames.iter().map(FrameToSend::encode).collect();
                Ok((tag, data.len(), encoded))
            })
            .collect::<Result<Vec<_>>>()?;

        for (tag, len, frames) in queues {
            debug!("송신 큐 등록: peer={}, {} bytes → {} 프레임", tag, len, frames.len());
            self.scheduler.set_queue(tag, frames);
        }
        Ok(())
    }

    /// 세션 실행
    ///
    /// 재시도 한도를 넘긴 라디오 실패만 에러로 반환
    pub async fn run(mut self) -> Result<SessionReport> {
        info!(
            "세션 시작: local={}, peers={}, 송신 프레임 {}, budget={:?}",
            self.config.local_tag,
            self.config.peers.len(),
            self.scheduler.total_frames(),
            self.config.session_budget
        );

        let (producer, consumer) = inbox(self.config.inbox_capacity, self.config.overflow_policy);
        let mut clock = SessionClock::start(self.config.session_budget, self.config.max_iterations);

        if let Some(first) = self.scanner.current() {
            self.tune(first.channel).await?;
        }
        let pump = RxPump::spawn(self.rx.clone(), producer, self.config.poll_timeout);

        let outcome = self.drive(&mut clock, &consumer).await;

        let pumped = pump.stop().await;
        self.drain_inbox(&consumer);
        self.stats.inbox_dropped = consumer.dropped();
        debug!("수신 펌프 정지: {} 프레임 인박스 적재", pumped);

        if self.listening {
            if let Err(e) = self.rx.lock().stop_listening() {
                warn!("수신 종료 실패: {}", e);
            }
            self.listening = false;
        }

        let termination = match outcome {
            Ok(termination) => termination,
            Err(e) => {
                error!("세션 중단: {}", e);
                return Err(e);
            }
        };
        Ok(self.finish(termination, &clock))
    }

    /// 메인 루프
    async fn drive(
        &mut self,
        clock: &mut SessionClock,
        consumer: &InboxConsumer,
    ) -> Result<Termination> {
        let rescan_interval = u64::from(self.config.rescan_interval);

        loop {
            self.drain_inbox(consumer);
            if let Some(termination) = self.termination(clock) {
                return Ok(termination);
            }

            let iteration = clock.tick();
            self.transmit()?;
            pace(self.config.frame_gap).await;

            if iteration % rescan_interval == 0 {
                self.rescan().await?;
            }
        }
    }

    fn all_received(&self) -> bool {
        self.config
            .peers
            .iter()
            .all(|peer| self.reassembler.is_completed(peer.tag))
    }

    fn termination(&self, clock: &SessionClock) -> Option<Termination> {
        if self.config.stop_when_all_received && self.all_received() {
            Some(Termination::AllReceived)
        } else if clock.budget_exceeded() {
            Some(Termination::BudgetExceeded)
        } else if clock.iteration_limit_reached() {
            Some(Termination::IterationLimit)
        } else {
            None
        }
    }

    /// 인박스의 프레임을 검증해 재조립기로 넘김
    fn drain_inbox(&mut self, consumer: &InboxConsumer) {
        for InboundFrame { channel, bytes } in consumer.drain() {
            self.stats.frames_received += 1;

            // 송신 피어는 수신 당시 튜닝된 채널로 결정
            let Some(source) = self.config.peer_on_channel(channel) else {
                self.stats.unknown_channel += 1;
                continue;
            };

            match self.validator.validate(&bytes, self.reassembler.session(source)) {
                Ok(parsed) => {
                    self.stats.frames_accepted += 1;
                    if self.reassembler.on_parsed(source, parsed) == StoreOutcome::Overwritten {
                        self.stats.duplicates += 1;
                    }
                }
                Err(rejection) => {
                    trace!("프레임 거부: peer={}, {:?}", source, rejection);
                    self.stats.record_rejection(rejection);
                }
            }
        }
    }

    /// 프레임 하나 송신
    ///
    /// 송신 슬롯이 바쁘면 이번 회전은 건너뛰고 커서도 그대로 둠
    fn transmit(&mut self) -> Result<()> {
        if self.scheduler.peek().is_none() {
            return Ok(());
        }

        let retry_limit = self.config.radio_retry_limit;
        let timeout = self.config.tx_ready_timeout;
        let tx = &mut self.tx;
        let ready = with_retry("poll_tx_ready", retry_limit, &mut self.stats, || {
            tx.poll_tx_ready(timeout)
        })?;
        if !ready {
            self.stats.tx_busy += 1;
            return Ok(());
        }

        let Some((peer, frame)) = self.scheduler.next_frame() else {
            return Ok(());
        };
        let tx = &mut self.tx;
        with_retry("send", retry_limit, &mut self.stats, || tx.send(&frame))?;
        self.stats.frames_sent += 1;
        trace!("송신: peer={}, {} bytes", peer, frame.len());
        Ok(())
    }

    /// 다음 미완료 피어로 수신 주파수 이동
    async fn rescan(&mut self) -> Result<()> {
        let reassembler = &self.reassembler;
        let step = self.scanner.advance(|tag| reassembler.is_completed(tag));
        match step {
            ScanStep::Retune(peer) => {
                self.tune(peer.channel).await?;
                self.stats.retunes += 1;
                debug!("수신 채널 변경: peer={}, channel={:#04x}", peer.tag, peer.channel);
            }
            ScanStep::Stay(peer) => {
                trace!("남은 피어 {} 하나, 채널 유지", peer.tag);
            }
            ScanStep::AllReceived => {
                if self.listening {
                    let rx = self.rx.clone();
                    with_retry(
                        "stop_listening",
                        self.config.radio_retry_limit,
                        &mut self.stats,
                        || rx.lock().stop_listening(),
                    )?;
                    self.listening = false;
                    info!("모든 피어 수신 완료, 스캔 중지");
                }
            }
        }
        Ok(())
    }

    /// 수신 중지 → 안정화 → 채널 변경 → 수신 시작 → 안정화
    async fn tune(&mut self, channel: Channel) -> Result<()> {
        let retry_limit = self.config.radio_retry_limit;
        let settle = self.config.retune_settle;
        let rx = self.rx.clone();

        if self.listening {
            with_retry("stop_listening", retry_limit, &mut self.stats, || {
                rx.lock().stop_listening()
            })?;
            self.listening = false;
            pace(settle).await;
        }

        with_retry("retune", retry_limit, &mut self.stats, || {
            rx.lock().retune(channel)
        })?;
        with_retry("start_listening", retry_limit, &mut self.stats, || {
            rx.lock().start_listening()
        })?;
        self.listening = true;
        pace(settle).await;
        Ok(())
    }

    /// 종료 처리: 부분 확정 → 압축 해제 → 저장 (태그 순서)
    fn finish(mut self, termination: Termination, clock: &SessionClock) -> SessionReport {
        let mut tags: Vec<PeerTag> = self.config.peers.iter().map(|p| p.tag).collect();
        tags.sort();

        let peers = tags.into_iter().map(|tag| self.deliver(tag)).collect();
        let report = SessionReport {
            local_tag: self.config.local_tag,
            termination,
            iterations: clock.iterations(),
            elapsed: clock.elapsed(),
            stats: self.stats.clone(),
            peers,
        };

        info!("세션 종료: {}", report.summary());
        report
    }

    fn deliver(&mut self, tag: PeerTag) -> PeerReport {
        let outcome = match self.reassembler.session(tag) {
            None => {
                warn!("피어 {}에게서 받은 프레임 없음", tag);
                return PeerReport::unseen(tag);
            }
            Some(session) if session.is_completed() => PeerOutcome::Completed,
            Some(_) => PeerOutcome::Partial,
        };
        if outcome == PeerOutcome::Partial {
            self.reassembler.finalize_partial(tag);
        }

        let Some(session) = self.reassembler.session(tag) else {
            return PeerReport::unseen(tag);
        };
        if outcome == PeerOutcome::Partial {
            warn!(
                "피어 {} 부분 확정: {}/{} 슬롯, 누락 {:?}",
                tag,
                session.filled_count(),
                session.total_count(),
                session.missing_slots()
            );
        }

        let assembled = session.assembled().cloned().unwrap_or_default();
        let (payload, decoded) = match self.codec.decompress(&assembled) {
            Ok(payload) => (payload, true),
            Err(e) => {
                warn!("피어 {} 압축 해제 실패, 원본 그대로 저장: {}", tag, e);
                (assembled.clone(), false)
            }
        };

        let store_error = match self.store.store(tag, &payload) {
            Ok(()) => None,
            Err(e) => {
                error!("피어 {} 저장 실패: {}", tag, e);
                Some(e.to_string())
            }
        };

        PeerReport {
            tag,
            outcome,
            slots_filled: session.filled_count(),
            total_count: session.total_count(),
            assembled_len: assembled.len(),
            stored_len: payload.len(),
            decoded,
            store_error,
        }
    }
}

/// 회전 간 대기 (0이면 양보만)
async fn pace(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}
