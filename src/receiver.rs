//! 수신측 구성 요소
//!
//! - 인박스: 수신 펌프(인터럽트 컨텍스트) → 메인 루프 단방향 큐
//! - 수신 펌프: 원시 바이트만 인박스에 넣음, 프로토콜 상태는 건드리지 않음
//! - ReceiveScanner: 다음에 들을 피어 주파수 결정

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Channel, OverflowPolicy, PeerConfig};
use crate::frame::PeerTag;
use crate::radio::{RadioRx, SharedRx};

/// 인박스 항목: 수신 당시 채널과 원시 바이트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub channel: Channel,
    pub bytes: Bytes,
}

/// push 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedNewest,
    DroppedOldest,
}

/// 인박스 생성 (단일 프로듀서 / 단일 컨슈머)
pub fn inbox(capacity: usize, policy: OverflowPolicy) -> (InboxProducer, InboxConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let producer = InboxProducer {
        tx,
        evict: rx.clone(),
        policy,
        dropped: dropped.clone(),
    };
    let consumer = InboxConsumer { rx, dropped };
    (producer, consumer)
}

/// 인박스 프로듀서 (수신 펌프 전용)
pub struct InboxProducer {
    tx: Sender<InboundFrame>,
    /// DropOldest용 축출 핸들
    evict: Receiver<InboundFrame>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl InboxProducer {
    /// 블로킹 없이 프레임 추가
    pub fn push(&self, frame: InboundFrame) -> PushOutcome {
        // 축출 핸들이 채널을 잡고 있으므로 Disconnected는 발생하지 않음
        let frame = match self.tx.try_send(frame) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Full(frame)) | Err(TrySendError::Disconnected(frame)) => frame,
        };

        match self.policy {
            OverflowPolicy::DropNewest => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedNewest
            }
            OverflowPolicy::DropOldest => {
                // 컨슈머가 그 사이 비웠으면 축출 없이 들어감
                let evicted = self.evict.try_recv().is_ok();
                if evicted {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                match self.tx.try_send(frame) {
                    Ok(()) if evicted => PushOutcome::DroppedOldest,
                    Ok(()) => PushOutcome::Queued,
                    Err(_) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        PushOutcome::DroppedNewest
                    }
                }
            }
        }
    }
}

/// 인박스 컨슈머 (메인 루프 전용)
pub struct InboxConsumer {
    rx: Receiver<InboundFrame>,
    dropped: Arc<AtomicU64>,
}

impl InboxConsumer {
    /// 현재 쌓인 프레임 모두 꺼내기 (블로킹 없음)
    pub fn drain(&self) -> Vec<InboundFrame> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// overflow로 버린 누적 프레임 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 수신 펌프 핸들
pub struct RxPump {
    running: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl RxPump {
    /// 수신 펌프 시작
    ///
    /// 블로킹 스레드에서 `poll_available` → `receive` → 인박스 push 반복
    pub fn spawn<R: RadioRx + 'static>(
        radio: SharedRx<R>,
        producer: InboxProducer,
        poll_timeout: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_pump = running.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut pushed = 0u64;

            while running_pump.load(Ordering::SeqCst) {
                let received = {
                    let mut radio = radio.lock();
                    match radio.poll_available(poll_timeout) {
                        Ok(true) => {
                            let channel = radio.channel();
                            radio
                                .receive()
                                .map(|bytes| bytes.map(|bytes| InboundFrame { channel, bytes }))
                        }
                        Ok(false) => Ok(None),
                        Err(e) => Err(e),
                    }
                };

                match received {
                    Ok(Some(frame)) => {
                        producer.push(frame);
                        pushed += 1;
                    }
                    Ok(None) => std::thread::yield_now(),
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        std::thread::sleep(poll_timeout);
                    }
                }
            }

            debug!("수신 펌프 종료: {} 프레임", pushed);
            pushed
        });

        Self { running, handle }
    }

    /// 정지 후 인박스에 넣은 프레임 수 반환
    pub async fn stop(self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.await {
            Ok(pushed) => pushed,
            Err(e) => {
                warn!("수신 펌프 비정상 종료: {}", e);
                0
            }
        }
    }
}

/// 스캔 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// 다른 피어 주파수로 이동
    Retune(PeerConfig),

    /// 남은 미완료 피어가 현재 피어뿐
    Stay(PeerConfig),

    /// 모든 피어 수신 완료, 스캔 중지
    AllReceived,
}

/// 수신 주파수 스캐너
#[derive(Debug, Clone)]
pub struct ReceiveScanner {
    peers: Vec<PeerConfig>,
    current: usize,
    finished: bool,
}

impl ReceiveScanner {
    /// 첫 번째 피어 주파수에서 시작
    pub fn new(peers: Vec<PeerConfig>) -> Self {
        Self {
            peers,
            current: 0,
            finished: false,
        }
    }

    pub fn current(&self) -> Option<PeerConfig> {
        self.peers.get(self.current).copied()
    }

    /// 모든 피어 완료로 스캔이 멈췄는지
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 다음 미완료 피어로 이동 (완료 피어는 건너뜀)
    ///
    /// 피어 수만큼만 순회하므로 항상 종료됨
    pub fn advance(&mut self, is_completed: impl Fn(PeerTag) -> bool) -> ScanStep {
        let count = self.peers.len();
        if self.finished || count == 0 {
            self.finished = true;
            return ScanStep::AllReceived;
        }

        for step in 1..=count {
            let idx = (self.current + step) % count;
            let peer = self.peers[idx];
            if is_completed(peer.tag) {
                continue;
            }

            let moved = idx != self.current;
            self.current = idx;
            return if moved {
                ScanStep::Retune(peer)
            } else {
                ScanStep::Stay(peer)
            };
        }

        self.finished = true;
        ScanStep::AllReceived
    }
}
