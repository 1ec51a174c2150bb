//! 송신 스케줄러
//!
//! - 목적지 피어별 프레임 큐
//! - 큐 하나를 끝까지 보낸 뒤 다음 피어로 (라운드로빈)
//! - ACK 없음: 큐가 끝나면 처음부터 다시 반복해 중복성 확보

use bytes::Bytes;

use crate::frame::PeerTag;

/// 목적지 피어 하나의 송신 큐
#[derive(Debug, Clone)]
struct PeerQueue {
    peer: PeerTag,
    frames: Vec<Bytes>,
}

/// 라운드로빈 송신 스케줄러
#[derive(Debug, Clone, Default)]
pub struct TransmitScheduler {
    queues: Vec<PeerQueue>,

    /// 현재 피어 인덱스
    peer_index: usize,

    /// 현재 피어 큐 내 프레임 인덱스
    frame_index: usize,
}

impl TransmitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 피어 큐 등록 (같은 피어면 교체)
    pub fn set_queue(&mut self, peer: PeerTag, frames: Vec<Bytes>) {
        match self.queues.iter_mut().find(|q| q.peer == peer) {
            Some(queue) => queue.frames = frames,
            None => self.queues.push(PeerQueue { peer, frames }),
        }
    }

    /// 등록된 피어 수
    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }

    /// 전체 큐잉된 프레임 수
    pub fn total_frames(&self) -> usize {
        self.queues.iter().map(|q| q.frames.len()).sum()
    }

    /// 다음에 보낼 프레임을 커서 이동 없이 확인
    pub fn peek(&self) -> Option<(PeerTag, &Bytes)> {
        let (peer_index, frame_index) = self.resolve()?;
        let queue = &self.queues[peer_index];
        Some((queue.peer, &queue.frames[frame_index]))
    }

    /// 다음 프레임 반환 후 커서 이동
    ///
    /// 빈 큐는 건너뜀, 모든 큐가 비었으면 None
    pub fn next_frame(&mut self) -> Option<(PeerTag, Bytes)> {
        let (peer_index, frame_index) = self.resolve()?;
        self.peer_index = peer_index;
        self.frame_index = frame_index + 1;

        let queue = &self.queues[peer_index];
        Some((queue.peer, queue.frames[frame_index].clone()))
    }

    /// 현재 커서가 가리키는 유효 위치 계산 (피어 수만큼만 순회)
    fn resolve(&self) -> Option<(usize, usize)> {
        let count = self.queues.len();
        if count == 0 {
            return None;
        }

        let mut peer_index = self.peer_index % count;
        let mut frame_index = self.frame_index;
        for _ in 0..=count {
            if frame_index < self.queues[peer_index].frames.len() {
                return Some((peer_index, frame_index));
            }
            frame_index = 0;
            peer_index = (peer_index + 1) % count;
        }
        None
    }
}
