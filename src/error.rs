//! 에러 타입 정의

use thiserror::Error;

/// HopNet 프로토콜 에러 타입
///
/// 프레임 검증 실패는 여기에 없음 (`validator::Rejection`으로 집계만 함)
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("페이로드 크기 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("스트림이 너무 김: {frames} 프레임 필요 (최대 {max})")]
    StreamTooLong { frames: usize, max: usize },

    #[error("유효하지 않은 피어 태그: {0}")]
    InvalidPeerTag(u8),

    #[error("라디오 에러 ({op}): {reason}")]
    Radio { op: &'static str, reason: String },

    #[error("세션 중단: {op} {attempts}회 실패")]
    SessionAborted { op: &'static str, attempts: u32 },

    #[error("코덱 에러: {0}")]
    Codec(String),

    #[error("저장 실패: peer={peer}, {reason}")]
    Store { peer: u8, reason: String },
}

impl Error {
    /// 라디오 에러 생성 헬퍼
    pub fn radio(op: &'static str, reason: impl ToString) -> Self {
        Error::Radio {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
