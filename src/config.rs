//! 프로토콜 설정

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::PeerTag;
use crate::{Error, Result, DEFAULT_FRAME_SIZE, HEADER_SIZE};

/// 라디오 채널 번호 (nRF24 RF_CH)
pub type Channel = u8;

/// total_count 계산 규칙
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameCounting {
    /// `floor(len / payload) + 1` (기존 노드와 비트 호환)
    Legacy,

    /// `ceil(len / payload)`
    Exact,
}

/// 인박스가 가득 찼을 때 버릴 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    DropNewest,
    DropOldest,
}

/// 원격 피어 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// 피어 태그
    pub tag: PeerTag,

    /// 이 피어가 송신하는 고정 주파수
    pub channel: Channel,
}

impl PeerConfig {
    pub fn new(tag: PeerTag, channel: Channel) -> Self {
        Self { tag, channel }
    }
}

/// HopNet 노드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 이 노드의 태그 (수신 프레임의 목적지 태그와 비교)
    pub local_tag: PeerTag,

    /// 이 노드의 송신 주파수
    pub tx_channel: Channel,

    /// 원격 피어 목록 (태그 순서 유지)
    pub peers: Vec<PeerConfig>,

    /// 프레임 최대 크기 (헤더 포함, 바이트)
    pub frame_size: usize,

    /// total_count 계산 규칙
    pub frame_counting: FrameCounting,

    /// 수신 채널 전환 주기 (송신 반복 횟수 K)
    pub rescan_interval: u32,

    /// 프레임 송신 후 대기
    pub frame_gap: Duration,

    /// 재튜닝 전후 안정화 대기
    pub retune_settle: Duration,

    /// 전체 세션 시간 예산
    pub session_budget: Duration,

    /// 반복 횟수 상한 (선택)
    pub max_iterations: Option<u64>,

    /// 모든 피어 수신 완료 시 송신도 종료할지 여부
    /// false면 시간 예산이 끝날 때까지 계속 송신
    pub stop_when_all_received: bool,

    /// 수신 폴링 타임아웃
    pub poll_timeout: Duration,

    /// 송신 슬롯 대기 타임아웃
    pub tx_ready_timeout: Duration,

    /// 수신 인박스 용량 (프레임 수)
    pub inbox_capacity: usize,

    /// 인박스 overflow 정책
    pub overflow_policy: OverflowPolicy,

    /// 라디오 조작 재시도 횟수
    pub radio_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_tag: PeerTag::C,
            tx_channel: 0x30,
            peers: vec![
                PeerConfig::new(PeerTag::A, 0x10),
                PeerConfig::new(PeerTag::B, 0x20),
                PeerConfig::new(PeerTag::D, 0x40),
            ],
            frame_size: DEFAULT_FRAME_SIZE,
            frame_counting: FrameCounting::Legacy,
            rescan_interval: 200,
            frame_gap: Duration::from_millis(10),
            retune_settle: Duration::from_millis(100),
            session_budget: Duration::from_secs(100),
            max_iterations: None,
            stop_when_all_received: true,
            poll_timeout: Duration::from_micros(2500), // 1/400 s
            tx_ready_timeout: Duration::from_millis(5),
            inbox_capacity: 64,
            overflow_policy: OverflowPolicy::DropOldest,
            radio_retry_limit: 3,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 4태그 기본 주파수 배치에서 `local_tag` 노드용 설정
    ///
    /// 태그 n의 주파수는 `0x10 * (n + 1)`
    pub fn for_node(local_tag: PeerTag) -> Self {
        let channel_of = |tag: PeerTag| 0x10 * (tag.bits() + 1);
        Self {
            local_tag,
            tx_channel: channel_of(local_tag),
            peers: PeerTag::ALL
                .into_iter()
                .filter(|&tag| tag != local_tag)
                .map(|tag| PeerConfig::new(tag, channel_of(tag)))
                .collect(),
            ..Self::default()
        }
    }

    /// 기존 노드와 동작까지 호환되는 설정
    pub fn legacy() -> Self {
        Self {
            frame_counting: FrameCounting::Legacy,
            stop_when_all_received: false,
            ..Self::default()
        }
    }

    /// 시뮬레이션용 짧은 세션 설정
    pub fn quick() -> Self {
        Self {
            rescan_interval: 20,
            frame_gap: Duration::from_micros(200),
            retune_settle: Duration::from_millis(1),
            session_budget: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(1),
            tx_ready_timeout: Duration::from_millis(1),
            inbox_capacity: 256,
            ..Self::default()
        }
    }

    /// 프레임당 페이로드 크기
    pub fn payload_size(&self) -> usize {
        self.frame_size - HEADER_SIZE
    }

    /// 채널 → 피어 태그
    pub fn peer_on_channel(&self, channel: Channel) -> Option<PeerTag> {
        self.peers.iter().find(|p| p.channel == channel).map(|p| p.tag)
    }

    /// 피어 태그 → 채널
    pub fn channel_of(&self, tag: PeerTag) -> Option<Channel> {
        self.peers.iter().find(|p| p.tag == tag).map(|p| p.channel)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(Error::InvalidConfig("피어가 없음".into()));
        }
        if self.peers.len() > PeerTag::ALL.len() - 1 {
            return Err(Error::InvalidConfig(format!(
                "피어 수 초과: {} (최대 {})",
                self.peers.len(),
                PeerTag::ALL.len() - 1
            )));
        }

        let mut tags = HashSet::new();
        let mut channels = HashSet::new();
        for peer in &self.peers {
            if peer.tag == self.local_tag {
                return Err(Error::InvalidConfig(format!(
                    "피어 태그 {}가 로컬 태그와 같음",
                    peer.tag
                )));
            }
            if !tags.insert(peer.tag) {
                return Err(Error::InvalidConfig(format!("중복 피어 태그: {}", peer.tag)));
            }
            if !channels.insert(peer.channel) {
                return Err(Error::InvalidConfig(format!(
                    "중복 채널: {:#04x}",
                    peer.channel
                )));
            }
            // 수신 프레임의 송신자는 채널로 결정하므로 겹치면 안 됨
            if peer.channel == self.tx_channel {
                return Err(Error::InvalidConfig(format!(
                    "피어 {} 채널이 송신 채널과 같음: {:#04x}",
                    peer.tag, peer.channel
                )));
            }
        }

        if !(HEADER_SIZE + 1..=255).contains(&self.frame_size) {
            return Err(Error::InvalidConfig(format!(
                "프레임 크기 범위 오류: {}",
                self.frame_size
            )));
        }
        if self.rescan_interval == 0 {
            return Err(Error::InvalidConfig("rescan_interval은 0일 수 없음".into()));
        }
        if self.inbox_capacity == 0 {
            return Err(Error::InvalidConfig("inbox_capacity는 0일 수 없음".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.payload_size(), 28);
        assert_eq!(config.peer_on_channel(0x20), Some(PeerTag::B));
        assert_eq!(config.channel_of(PeerTag::D), Some(0x40));
        assert_eq!(config.peer_on_channel(0x30), None);
    }

    #[test]
    fn test_for_node_layout() {
        let config = Config::for_node(PeerTag::A);
        config.validate().unwrap();
        assert_eq!(config.tx_channel, 0x10);
        let tags: Vec<PeerTag> = config.peers.iter().map(|p| p.tag).collect();
        assert_eq!(tags, vec![PeerTag::B, PeerTag::C, PeerTag::D]);
        assert_eq!(config.channel_of(PeerTag::C), Some(0x30));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Config::default();
        config.peers.push(PeerConfig::new(PeerTag::C, 0x50));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.peers[1].tag = PeerTag::A;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.peers[1].channel = 0x10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.frame_size = HEADER_SIZE;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rescan_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.peers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tx_channel_overlap() {
        let mut config = Config::default();
        config.tx_channel = 0x20;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        for tag in PeerTag::ALL {
            Config::for_node(tag).validate().unwrap();
        }
    }

    #[test]
    fn test_config_serde() {
        let config = Config::quick();
        let bytes = bincode::serialize(&config).unwrap();
        let restored: Config = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.peers, config.peers);
        assert_eq!(restored.session_budget, config.session_budget);
    }
}
