//! 수신 프레임 검증
//!
//! 검증 실패는 에러가 아니라 `Rejection`으로 반환, 호출측이 통계에 집계

use bytes::Bytes;

use crate::frame::{checksum, ControlField, ParsedFrame, PeerTag};
use crate::reassembly::PeerSession;
use crate::HEADER_SIZE;

/// 프레임 거부 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// 헤더보다 짧음
    Undersized { len: usize },

    /// 필드/크기 불일치
    Malformed(&'static str),

    /// CRC 불일치
    ChecksumMismatch { expected: u16, got: u16 },

    /// 다른 노드 대상
    Misdelivered { tag: PeerTag },

    /// 이미 종료된 세션 (늦은 중복)
    SessionFinished,
}

/// 프레임 검증기
#[derive(Debug, Clone)]
pub struct FrameValidator {
    local_tag: PeerTag,
    frame_size: usize,
}

impl FrameValidator {
    pub fn new(local_tag: PeerTag, frame_size: usize) -> Self {
        Self {
            local_tag,
            frame_size,
        }
    }

    /// 원시 바이트 검증
    ///
    /// `session`은 이 프레임의 송신 피어 세션 (아직 없으면 None)
    pub fn validate(
        &self,
        raw: &[u8],
        session: Option<&PeerSession>,
    ) -> std::result::Result<ParsedFrame, Rejection> {
        if raw.len() < HEADER_SIZE {
            return Err(Rejection::Undersized { len: raw.len() });
        }
        if raw.len() > self.frame_size {
            return Err(Rejection::Malformed("프레임 크기 초과"));
        }

        let expected = u16::from_be_bytes([raw[0], raw[1]]);
        let got = checksum(&raw[2..]);
        if expected != got {
            return Err(Rejection::ChecksumMismatch { expected, got });
        }

        let control = ControlField::from_bytes([raw[2], raw[3]]);
        if control.peer_tag != self.local_tag {
            return Err(Rejection::Misdelivered {
                tag: control.peer_tag,
            });
        }
        if control.sequence >= control.total_count {
            return Err(Rejection::Malformed("sequence >= total_count"));
        }

        if let Some(session) = session {
            if session.is_finished() {
                return Err(Rejection::SessionFinished);
            }
            if session.total_count() != control.total_count as usize {
                return Err(Rejection::Malformed("total_count 불일치"));
            }
        }

        Ok(ParsedFrame {
            integrity: expected,
            control,
            payload: Bytes::copy_from_slice(&raw[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameCounting;
    use crate::frame::Framer;
    use rand::Rng;

    fn wire_frames(tag: PeerTag, data: &[u8]) -> Vec<Bytes> {
        Framer::new(28, FrameCounting::Legacy)
            .unwrap()
            .split_into_frames(tag, data)
            .unwrap()
            .iter()
            .map(|f| f.encode())
            .collect()
    }

    #[test]
    fn test_accepts_valid_frame() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        let frames = wire_frames(PeerTag::C, b"hello world");

        let parsed = validator.validate(&frames[0], None).unwrap();
        assert_eq!(parsed.sequence(), 0);
        assert_eq!(parsed.total_count(), 1);
        assert_eq!(parsed.payload.as_ref(), b"hello world");
    }

    #[test]
    fn test_rejects_undersized_and_oversized() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        assert_eq!(
            validator.validate(&[0x00, 0x01, 0x02], None),
            Err(Rejection::Undersized { len: 3 })
        );
        assert!(matches!(
            validator.validate(&[0u8; 33], None),
            Err(Rejection::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_misdelivered() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        let frames = wire_frames(PeerTag::A, b"not for us");
        assert_eq!(
            validator.validate(&frames[0], None),
            Err(Rejection::Misdelivered { tag: PeerTag::A })
        );
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        let mut rng = rand::thread_rng();
        let data: Vec<u8> = (0..200).map(|_| rng.gen()).collect();

        for frame in wire_frames(PeerTag::C, &data) {
            // CRC-16은 모든 단일 비트 오류를 검출
            for bit in 0..frame.len() * 8 {
                let mut corrupted = frame.to_vec();
                corrupted[bit / 8] ^= 1 << (bit % 8);
                assert!(
                    matches!(
                        validator.validate(&corrupted, None),
                        Err(Rejection::ChecksumMismatch { .. })
                    ),
                    "bit {} 뒤집힘이 통과함",
                    bit
                );
            }
        }
    }

    #[test]
    fn test_rejects_sequence_out_of_range() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        let control = ControlField {
            peer_tag: PeerTag::C,
            sequence: 3,
            total_count: 3,
        };
        let frame = crate::frame::FrameToSend::new(control, Bytes::from_static(b"x"), 28)
            .unwrap()
            .encode();
        assert!(matches!(
            validator.validate(&frame, None),
            Err(Rejection::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_finished_session_and_count_mismatch() {
        let validator = FrameValidator::new(PeerTag::C, 32);
        let frames = wire_frames(PeerTag::C, &[1u8; 40]);

        let mut session = PeerSession::new(PeerTag::A, 2);
        let parsed = validator.validate(&frames[0], Some(&session)).unwrap();
        session.store(parsed.sequence(), parsed.payload);

        let other = wire_frames(PeerTag::C, &[1u8; 100]);
        assert!(matches!(
            validator.validate(&other[0], Some(&session)),
            Err(Rejection::Malformed(_))
        ));

        let parsed = validator.validate(&frames[1], Some(&session)).unwrap();
        session.store(parsed.sequence(), parsed.payload);
        assert!(session.is_finished());
        assert_eq!(
            validator.validate(&frames[0], Some(&session)),
            Err(Rejection::SessionFinished)
        );
    }
}
