//! 피어별 스트림 재조립
//!
//! - PeerSession: 피어 하나의 슬롯 퍼즐
//! - Reassembler: 송신 피어 태그별 세션 관리
//!
//! 세션 상태: `Receiving → Completed` 또는 `Receiving → PartiallyFinalized`
//! (둘 다 종료 상태, 서로 배타적)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::frame::{ParsedFrame, PeerTag};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Completed,
    PartiallyFinalized,
}

/// 슬롯 저장 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// 빈 슬롯에 저장
    Stored,

    /// 이미 채워진 슬롯 덮어씀 (마지막 쓰기 우선)
    Overwritten,

    /// 이 저장으로 모든 슬롯이 채워짐
    Completed,

    /// 종료된 세션이거나 범위 밖 인덱스
    Ignored,
}

/// 송신 피어 하나의 수신 세션
#[derive(Debug, Clone)]
pub struct PeerSession {
    peer: PeerTag,
    slots: Vec<Option<Bytes>>,
    filled: usize,
    state: SessionState,
    assembled: Option<Bytes>,
    created_at: Instant,
}

impl PeerSession {
    /// 첫 프레임의 total_count로 세션 생성
    pub fn new(peer: PeerTag, total_count: usize) -> Self {
        Self {
            peer,
            slots: vec![None; total_count],
            filled: 0,
            state: SessionState::Receiving,
            assembled: None,
            created_at: Instant::now(),
        }
    }

    pub fn peer(&self) -> PeerTag {
        self.peer
    }

    pub fn total_count(&self) -> usize {
        self.slots.len()
    }

    pub fn filled_count(&self) -> usize {
        self.filled
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn slots(&self) -> &[Option<Bytes>] {
        &self.slots
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// 완료 또는 부분 확정됨 (더 이상 변경 없음)
    pub fn is_finished(&self) -> bool {
        self.state != SessionState::Receiving
    }

    /// 조립된 스트림 (종료 후에만 Some)
    pub fn assembled(&self) -> Option<&Bytes> {
        self.assembled.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// 누락 슬롯 인덱스
    pub fn missing_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// 슬롯에 페이로드 저장
    pub fn store(&mut self, sequence: usize, payload: Bytes) -> StoreOutcome {
        if self.is_finished() {
            return StoreOutcome::Ignored;
        }
        let Some(slot) = self.slots.get_mut(sequence) else {
            return StoreOutcome::Ignored;
        };

        let overwritten = slot.replace(payload).is_some();
        if overwritten {
            return StoreOutcome::Overwritten;
        }

        self.filled += 1;
        if self.filled == self.slots.len() {
            self.assembled = Some(self.concat_filled());
            self.state = SessionState::Completed;
            return StoreOutcome::Completed;
        }
        StoreOutcome::Stored
    }

    /// 세션 종료 시 부분 확정 (빈 슬롯은 건너뜀, 패딩 없음)
    ///
    /// 이미 종료된 세션이면 false
    pub fn finalize_partial(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.assembled = Some(self.concat_filled());
        self.state = SessionState::PartiallyFinalized;
        true
    }

    fn concat_filled(&self) -> Bytes {
        let len = self.slots.iter().flatten().map(|b| b.len()).sum();
        let mut buf = BytesMut::with_capacity(len);
        for payload in self.slots.iter().flatten() {
            buf.extend_from_slice(payload);
        }
        buf.freeze()
    }
}

/// 피어별 재조립기
#[derive(Debug, Default)]
pub struct Reassembler {
    sessions: BTreeMap<PeerTag, PeerSession>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 검증된 프레임 저장
    ///
    /// 처음 보는 피어면 프레임의 total_count로 세션을 만듦
    pub fn on_accepted_frame(
        &mut self,
        source: PeerTag,
        sequence: usize,
        total_count: usize,
        payload: Bytes,
    ) -> StoreOutcome {
        let session = self
            .sessions
            .entry(source)
            .or_insert_with(|| PeerSession::new(source, total_count));

        let outcome = session.store(sequence, payload);
        match outcome {
            StoreOutcome::Completed => {
                info!(
                    "피어 {} 스트림 완료: {} 프레임, {} bytes, {:.2}s",
                    source,
                    session.total_count(),
                    session.assembled().map_or(0, |b| b.len()),
                    session.age().as_secs_f64()
                );
            }
            StoreOutcome::Stored | StoreOutcome::Overwritten => {
                debug!(
                    "저장: peer={}, seq={}, {}/{}",
                    source,
                    sequence,
                    session.filled_count(),
                    session.total_count()
                );
            }
            StoreOutcome::Ignored => {}
        }
        outcome
    }

    /// ParsedFrame 편의 래퍼
    pub fn on_parsed(&mut self, source: PeerTag, frame: ParsedFrame) -> StoreOutcome {
        let sequence = frame.sequence();
        let total_count = frame.total_count();
        self.on_accepted_frame(source, sequence, total_count, frame.payload)
    }

    /// 미완료 세션 부분 확정
    pub fn finalize_partial(&mut self, source: PeerTag) -> bool {
        self.sessions
            .get_mut(&source)
            .map_or(false, PeerSession::finalize_partial)
    }

    pub fn session(&self, source: PeerTag) -> Option<&PeerSession> {
        self.sessions.get(&source)
    }

    pub fn is_completed(&self, source: PeerTag) -> bool {
        self.session(source).map_or(false, PeerSession::is_completed)
    }

    /// 태그 순서로 세션 순회
    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameCounting;
    use crate::frame::Framer;
    use crate::validator::FrameValidator;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn feed(reassembler: &mut Reassembler, source: PeerTag, wire: &[Bytes]) {
        let validator = FrameValidator::new(PeerTag::C, 32);
        for raw in wire {
            if let Ok(parsed) = validator.validate(raw, reassembler.session(source)) {
                reassembler.on_parsed(source, parsed);
            }
        }
    }

    fn encode_all(counting: FrameCounting, data: &[u8]) -> Vec<Bytes> {
        Framer::new(28, counting)
            .unwrap()
            .split_into_frames(PeerTag::C, data)
            .unwrap()
            .iter()
            .map(|f| f.encode())
            .collect()
    }

    #[test]
    fn test_round_trip_any_permutation_with_duplicates() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let mut len = rng.gen_range(1..28 * 60);
            if len % 28 == 0 {
                len += 1;
            }
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut wire = encode_all(FrameCounting::Legacy, &data);

            let dups: Vec<Bytes> = wire.choose_multiple(&mut rng, 3).cloned().collect();
            wire.extend(dups);
            wire.shuffle(&mut rng);

            let mut reassembler = Reassembler::new();
            feed(&mut reassembler, PeerTag::A, &wire);

            let session = reassembler.session(PeerTag::A).unwrap();
            assert!(session.is_completed());
            assert_eq!(session.assembled().unwrap().as_ref(), data.as_slice());
        }
    }

    #[test]
    fn test_end_to_end_100_bytes_reverse_order() {
        let data: Vec<u8> = (0..100).collect();
        let mut wire = encode_all(FrameCounting::Legacy, &data);
        assert_eq!(wire.len(), 4);
        wire.reverse();

        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, PeerTag::B, &wire);

        let session = reassembler.session(PeerTag::B).unwrap();
        assert_eq!(session.total_count(), 4);
        assert!(session.is_completed());
        assert_eq!(session.assembled().unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_exact_multiple_legacy_boundary() {
        let data: Vec<u8> = (0..112).map(|i| i as u8).collect();
        let wire = encode_all(FrameCounting::Legacy, &data);
        assert_eq!(wire.len(), 5);

        // 빈 trailing 프레임까지 받으면 완료
        let mut full = Reassembler::new();
        feed(&mut full, PeerTag::A, &wire);
        assert!(full.is_completed(PeerTag::A));
        assert_eq!(full.session(PeerTag::A).unwrap().assembled().unwrap().as_ref(), &data[..]);

        // trailing 프레임을 놓치면 슬롯 4가 비고, 부분 확정으로 원본 복원
        let mut lossy = Reassembler::new();
        feed(&mut lossy, PeerTag::A, &wire[..4]);
        assert!(!lossy.is_completed(PeerTag::A));
        assert_eq!(lossy.session(PeerTag::A).unwrap().missing_slots(), vec![4]);
        assert!(lossy.finalize_partial(PeerTag::A));
        let session = lossy.session(PeerTag::A).unwrap();
        assert_eq!(session.state(), SessionState::PartiallyFinalized);
        assert_eq!(session.assembled().unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_exact_multiple_exact_counting() {
        let data = vec![9u8; 112];
        let wire = encode_all(FrameCounting::Exact, &data);
        assert_eq!(wire.len(), 4);

        let mut reassembler = Reassembler::new();
        feed(&mut reassembler, PeerTag::D, &wire);
        assert!(reassembler.is_completed(PeerTag::D));
        assert_eq!(
            reassembler.session(PeerTag::D).unwrap().assembled().unwrap().len(),
            112
        );
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let data: Vec<u8> = (0..80).collect();
        let wire = encode_all(FrameCounting::Legacy, &data);

        let mut once = Reassembler::new();
        feed(&mut once, PeerTag::A, &wire[..1]);
        let mut twice = Reassembler::new();
        feed(&mut twice, PeerTag::A, &[wire[0].clone(), wire[0].clone()]);

        let a = once.session(PeerTag::A).unwrap();
        let b = twice.session(PeerTag::A).unwrap();
        assert_eq!(a.slots(), b.slots());
        assert_eq!(a.state(), b.state());
        assert_eq!(a.filled_count(), b.filled_count());
    }

    #[test]
    fn test_partial_finalize_skips_gaps() {
        let mut session = PeerSession::new(PeerTag::A, 5);
        session.store(0, Bytes::from_static(b"s0-"));
        session.store(2, Bytes::from_static(b"s2-"));
        session.store(4, Bytes::from_static(b"s4"));

        assert!(session.finalize_partial());
        assert_eq!(session.assembled().unwrap().as_ref(), b"s0-s2-s4");

        // 종료 상태는 변경 불가, 확정은 한 번만
        assert_eq!(session.store(1, Bytes::from_static(b"late")), StoreOutcome::Ignored);
        assert!(!session.finalize_partial());
        assert_eq!(session.assembled().unwrap().as_ref(), b"s0-s2-s4");
    }

    #[test]
    fn test_completed_session_is_immutable() {
        let mut session = PeerSession::new(PeerTag::B, 2);
        assert_eq!(session.store(1, Bytes::from_static(b"b")), StoreOutcome::Stored);
        assert_eq!(session.store(1, Bytes::from_static(b"B")), StoreOutcome::Overwritten);
        assert_eq!(session.store(0, Bytes::from_static(b"a")), StoreOutcome::Completed);
        assert_eq!(session.assembled().unwrap().as_ref(), b"aB");

        assert_eq!(session.store(0, Bytes::from_static(b"x")), StoreOutcome::Ignored);
        assert!(!session.finalize_partial());
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn test_sessions_are_independent_per_source() {
        let mut reassembler = Reassembler::new();
        reassembler.on_accepted_frame(PeerTag::D, 0, 1, Bytes::from_static(b"d"));
        reassembler.on_accepted_frame(PeerTag::A, 1, 2, Bytes::from_static(b"a1"));

        assert!(reassembler.is_completed(PeerTag::D));
        assert!(!reassembler.is_completed(PeerTag::A));
        let order: Vec<PeerTag> = reassembler.sessions().map(|s| s.peer()).collect();
        assert_eq!(order, vec![PeerTag::A, PeerTag::D]);
        assert!(!reassembler.finalize_partial(PeerTag::B));
    }
}
