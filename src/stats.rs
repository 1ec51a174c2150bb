//! 세션 진단 통계

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::validator::Rejection;

/// 세션 전체 카운터
///
/// 메인 루프만 갱신함 (인박스 드롭 수는 프로듀서 쪽 원자 카운터에서 복사)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// 송신한 프레임 수
    pub frames_sent: u64,

    /// 송신 슬롯이 없어 건너뛴 틱 수
    pub tx_busy: u64,

    /// 인박스에서 꺼낸 프레임 수
    pub frames_received: u64,

    /// 재조립기로 넘어간 프레임 수
    pub frames_accepted: u64,

    /// 이미 채워진 슬롯을 덮어쓴 수 (재전송 중복)
    pub duplicates: u64,

    /// 체크섬 불일치
    pub checksum_failures: u64,

    /// 다른 노드 대상 프레임
    pub misdelivered: u64,

    /// 크기/필드 오류
    pub malformed: u64,

    /// 이미 종료된 세션으로 온 늦은 프레임
    pub late_frames: u64,

    /// 피어 채널이 아닌 곳에서 받은 프레임
    pub unknown_channel: u64,

    /// 인박스 overflow로 버려진 프레임
    pub inbox_dropped: u64,

    /// 수신 채널 전환 횟수
    pub retunes: u64,

    /// 라디오 조작 재시도 횟수
    pub radio_retries: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 검증 거부 기록
    pub fn record_rejection(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Undersized { .. } | Rejection::Malformed(_) => self.malformed += 1,
            Rejection::ChecksumMismatch { .. } => self.checksum_failures += 1,
            Rejection::Misdelivered { .. } => self.misdelivered += 1,
            Rejection::SessionFinished => self.late_frames += 1,
        }
    }

    /// 버려진 수신 프레임 총합
    pub fn total_discarded(&self) -> u64 {
        self.checksum_failures
            + self.misdelivered
            + self.malformed
            + self.late_frames
            + self.unknown_channel
            + self.inbox_dropped
    }

    /// 수신 프레임 중 채택 비율
    pub fn acceptance_ratio(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.frames_accepted as f64 / self.frames_received as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self, elapsed: Duration) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} | Received: {} | Accepted: {} ({:.1}%) | CRC fail: {} | Misdelivered: {} | Late: {} | Dropped: {} | Retunes: {}",
            elapsed.as_secs_f64(),
            self.frames_sent,
            self.frames_received,
            self.frames_accepted,
            self.acceptance_ratio() * 100.0,
            self.checksum_failures,
            self.misdelivered,
            self.late_frames,
            self.inbox_dropped,
            self.retunes,
        )
    }
}

/// 세션 시간/반복 카운터
#[derive(Debug, Clone)]
pub struct SessionClock {
    started_at: Instant,
    budget: Duration,
    max_iterations: Option<u64>,
    iterations: u64,
}

impl SessionClock {
    pub fn start(budget: Duration, max_iterations: Option<u64>) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
            max_iterations,
            iterations: 0,
        }
    }

    /// 반복 1회 기록, 새 반복 번호 반환
    pub fn tick(&mut self) -> u64 {
        self.iterations += 1;
        self.iterations
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn budget_exceeded(&self) -> bool {
        self.elapsed() >= self.budget
    }

    pub fn iteration_limit_reached(&self) -> bool {
        self.max_iterations
            .map_or(false, |max| self.iterations >= max)
    }
}
