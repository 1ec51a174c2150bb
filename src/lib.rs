//! # HopNet
//!
//! 반이중 소형 페이로드 패킷 라디오 위의 주파수 호핑 다자간 대량 전송 프로토콜
//!
//! ## 핵심 특징
//! - **ACK 없음**: 프레임 큐를 라운드로빈으로 무한 반복해 손실 보정
//! - **주파수 = 송신자**: 각 노드는 자기 주파수로만 송신, 수신측은 피어 주파수를 순회
//! - **슬롯 재조립**: 순서 무관, 중복 허용, 시간 초과 시 부분 확정
//! - **CRC-16/XMODEM**: 프레임 단위 무결성 검증
//! - **병렬 준비**: 피어별 압축/프레이밍을 rayon으로 병렬 처리
//!
//! ## 프레임 형식
//! ```text
//! [crc16 BE (2)][tag:2 | seq:6 (1)][total (1)][payload (≤ frame_size - 4)]
//! ```

pub mod air;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod radio;
pub mod reassembly;
pub mod receiver;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod store;
pub mod validator;

pub use air::{Ether, LoopbackRx, LoopbackTx, UdpAirRx, UdpAirTx};
pub use codec::{Codec, IdentityCodec};
pub use config::{Channel, Config, FrameCounting, OverflowPolicy, PeerConfig};
pub use error::{Error, Result};
pub use frame::{ControlField, FrameToSend, Framer, ParsedFrame, PeerTag};
pub use radio::{RadioRx, RadioTx};
pub use reassembly::{PeerSession, Reassembler, SessionState};
pub use receiver::ReceiveScanner;
pub use scheduler::TransmitScheduler;
pub use session::{PeerOutcome, PeerReport, SessionController, SessionReport, Termination};
pub use stats::SessionStats;
pub use store::{FileStore, MemoryStore, StreamStore};
pub use validator::{FrameValidator, Rejection};

/// 헤더 크기 (CRC 2 + 제어 필드 2)
pub const HEADER_SIZE: usize = 4;

/// 기본 프레임 크기 (라디오 최대 페이로드)
pub const DEFAULT_FRAME_SIZE: usize = 32;

/// 기본 프레임당 페이로드 크기
pub const MAX_PAYLOAD: usize = DEFAULT_FRAME_SIZE - HEADER_SIZE;

/// 스트림당 최대 프레임 수 (6비트 시퀀스)
pub const MAX_FRAMES_PER_STREAM: usize = 64;
