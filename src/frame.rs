//! 프레임 와이어 포맷과 Framer
//!
//! ```text
//! | 0-1 integrity (CRC-16/XMODEM, BE) | 2 tag(2b) + seq(6b) | 3 total | 4.. payload |
//! ```
//!
//! - 무결성 체크섬은 바이트 2..끝(제어 + 페이로드)을 덮음
//! - 프레임 길이는 가변 (마지막 프레임만 짧음), 패딩 없음

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_XMODEM};
use serde::{Deserialize, Serialize};

use crate::config::FrameCounting;
use crate::{Error, Result, HEADER_SIZE, MAX_FRAMES_PER_STREAM};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/XMODEM 계산
pub fn checksum(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}

/// 2비트 피어 식별자 (최대 4 피어)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PeerTag(u8);

impl PeerTag {
    pub const A: PeerTag = PeerTag(0b00);
    pub const B: PeerTag = PeerTag(0b01);
    pub const C: PeerTag = PeerTag(0b10);
    pub const D: PeerTag = PeerTag(0b11);

    /// 가능한 모든 태그 (태그 순서)
    pub const ALL: [PeerTag; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn new(bits: u8) -> Result<Self> {
        if bits > 0b11 {
            return Err(Error::InvalidPeerTag(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// 사람이 읽는 이름 ('A' ~ 'D')
    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }
}

impl TryFrom<u8> for PeerTag {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<PeerTag> for u8 {
    fn from(tag: PeerTag) -> u8 {
        tag.0
    }
}

impl fmt::Display for PeerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// 제어 필드 (2바이트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField {
    /// 목적지 피어 태그
    pub peer_tag: PeerTag,

    /// 스트림 내 프레임 인덱스 (0-63)
    pub sequence: u8,

    /// 스트림 전체 프레임 수
    pub total_count: u8,
}

impl ControlField {
    pub fn to_bytes(&self) -> [u8; 2] {
        [(self.peer_tag.bits() << 6) | (self.sequence & 0x3F), self.total_count]
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            // 상위 2비트만 남으므로 항상 유효
            peer_tag: PeerTag(bytes[0] >> 6),
            sequence: bytes[0] & 0x3F,
            total_count: bytes[1],
        }
    }
}

/// 송신용 프레임 (체크섬 계산 전)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameToSend {
    pub control: ControlField,
    pub payload: Bytes,
}

impl FrameToSend {
    /// 새 송신 프레임 생성
    ///
    /// 페이로드가 `max_payload`보다 크면 거부
    pub fn new(control: ControlField, payload: Bytes, max_payload: usize) -> Result<Self> {
        if payload.len() > max_payload {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }
        Ok(Self { control, payload })
    }

    /// 와이어 바이트로 인코딩 (체크섬 prepend)
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(2 + self.payload.len());
        body.put_slice(&self.control.to_bytes());
        body.put_slice(&self.payload);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16(checksum(&body));
        buf.put_slice(&body);
        buf.freeze()
    }
}

/// 수신 검증을 통과한 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub integrity: u16,
    pub control: ControlField,
    pub payload: Bytes,
}

impl ParsedFrame {
    pub fn sequence(&self) -> usize {
        self.control.sequence as usize
    }

    pub fn total_count(&self) -> usize {
        self.control.total_count as usize
    }
}

/// 스트림 → 프레임 분할기 (송신측)
#[derive(Debug, Clone)]
pub struct Framer {
    payload_size: usize,
    counting: FrameCounting,
}

impl Framer {
    /// 페이로드 크기가 0이면 거부
    pub fn new(payload_size: usize, counting: FrameCounting) -> Result<Self> {
        if payload_size == 0 {
            return Err(Error::InvalidConfig("페이로드 크기는 0일 수 없음".into()));
        }
        Ok(Self {
            payload_size,
            counting,
        })
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// 선언할 total_count 계산
    pub fn frame_count(&self, len: usize) -> usize {
        match self.counting {
            // 기존 노드와 비트 호환: 정확히 나누어 떨어지면 1개 초과
            FrameCounting::Legacy => len / self.payload_size + 1,
            FrameCounting::Exact => (len + self.payload_size - 1) / self.payload_size,
        }
    }

    /// 스트림을 목적지 태그가 찍힌 프레임들로 분할
    pub fn split_into_frames(&self, peer_tag: PeerTag, data: &[u8]) -> Result<Vec<FrameToSend>> {
        let total = self.frame_count(data.len());
        if total > MAX_FRAMES_PER_STREAM {
            return Err(Error::StreamTooLong {
                frames: total,
                max: MAX_FRAMES_PER_STREAM,
            });
        }

        let control = |sequence: usize| ControlField {
            peer_tag,
            sequence: sequence as u8,
            total_count: total as u8,
        };

        let mut frames = data
            .chunks(self.payload_size)
            .enumerate()
            .map(|(idx, chunk)| {
                FrameToSend::new(control(idx), Bytes::copy_from_slice(chunk), self.payload_size)
            })
            .collect::<Result<Vec<_>>>()?;

        // Legacy 카운팅의 초과 선언 슬롯은 빈 페이로드 프레임으로 채움
        if frames.len() < total {
            frames.push(FrameToSend::new(control(frames.len()), Bytes::new(), self.payload_size)?);
        }

        Ok(frames)
    }
}
