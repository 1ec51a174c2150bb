//! 재조립 스트림 저장소 협력자

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::frame::PeerTag;
use crate::{Error, Result};

/// 재조립된 스트림 저장 (완료 또는 부분)
pub trait StreamStore: Send + Sync {
    fn store(&self, peer: PeerTag, data: &[u8]) -> Result<()>;
}

/// 디렉터리에 피어별 파일로 저장
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// 디렉터리가 없으면 생성
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// 피어 스트림 파일 경로
    pub fn path_for(&self, peer: PeerTag) -> PathBuf {
        self.dir.join(format!("received_from_{}.bin", peer))
    }
}

impl StreamStore for FileStore {
    fn store(&self, peer: PeerTag, data: &[u8]) -> Result<()> {
        std::fs::write(self.path_for(peer), data).map_err(|e| Error::Store {
            peer: peer.bits(),
            reason: e.to_string(),
        })
    }
}

/// 메모리 저장소 (시뮬레이션/테스트용)
#[derive(Debug, Default)]
pub struct MemoryStore {
    streams: Mutex<BTreeMap<PeerTag, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: PeerTag) -> Option<Bytes> {
        self.streams.lock().get(&peer).cloned()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }
}

impl StreamStore for MemoryStore {
    fn store(&self, peer: PeerTag, data: &[u8]) -> Result<()> {
        self.streams.lock().insert(peer, Bytes::copy_from_slice(data));
        Ok(())
    }
}

impl<S: StreamStore + ?Sized> StreamStore for std::sync::Arc<S> {
    fn store(&self, peer: PeerTag, data: &[u8]) -> Result<()> {
        (**self).store(peer, data)
    }
}
