//! 라디오 협력자 인터페이스
//!
//! 트랜시버 드라이버는 범위 밖, 여기서는 조작만 정의함.
//! 원 하드웨어처럼 송신기와 수신기는 별도 장치로 취급

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::Channel;
use crate::stats::SessionStats;
use crate::{Error, Result};

/// 송신 라디오
pub trait RadioTx: Send {
    /// 송신 슬롯이 빌 때까지 최대 `timeout` 대기
    fn poll_tx_ready(&mut self, timeout: Duration) -> Result<bool>;

    /// 프레임 한 개 송신
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// 수신 라디오
pub trait RadioRx: Send {
    /// 현재 튜닝된 채널
    fn channel(&self) -> Channel;

    fn start_listening(&mut self) -> Result<()>;

    fn stop_listening(&mut self) -> Result<()>;

    /// 채널 변경
    fn retune(&mut self, channel: Channel) -> Result<()>;

    /// 수신 데이터가 생길 때까지 최대 `timeout` 대기
    fn poll_available(&mut self, timeout: Duration) -> Result<bool>;

    /// 수신된 프레임 하나 읽기
    fn receive(&mut self) -> Result<Option<Bytes>>;
}

/// 수신 펌프와 컨트롤러가 공유하는 수신 라디오 핸들
pub type SharedRx<R> = Arc<Mutex<R>>;

/// 라디오 조작 재시도
///
/// 최초 시도 + `retry_limit`회 재시도 후에도 실패하면 `SessionAborted`
pub fn with_retry<T>(
    op: &'static str,
    retry_limit: u32,
    stats: &mut SessionStats,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let attempts = retry_limit + 1;
    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("라디오 {} 실패 ({}/{}): {}", op, attempt, attempts, e);
                if attempt < attempts {
                    stats.radio_retries += 1;
                }
            }
        }
    }
    Err(Error::SessionAborted { op, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_recovers() {
        let mut stats = SessionStats::new();
        let mut calls = 0;
        let result = with_retry("send", 3, &mut stats, || {
            calls += 1;
            if calls < 3 {
                Err(Error::radio("send", "busy"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(stats.radio_retries, 2);
    }

    #[test]
    fn test_retry_gives_up() {
        let mut stats = SessionStats::new();
        let mut calls = 0;
        let result: Result<()> = with_retry("retune", 2, &mut stats, || {
            calls += 1;
            Err(Error::radio("retune", "spi fault"))
        });
        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(Error::SessionAborted { op: "retune", attempts: 3 })
        ));
    }
}
