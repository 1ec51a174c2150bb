//! 압축 코덱 협력자
//!
//! 범용 압축기는 범위 밖, 스트림 단위 `compress`/`decompress`만 정의

use bytes::Bytes;

use crate::Result;

/// 스트림 압축 코덱
///
/// 피어별 스트림을 병렬로 압축하므로 `Sync` 필요
pub trait Codec: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Bytes>;

    fn decompress(&self, data: &[u8]) -> Result<Bytes>;
}

/// 압축하지 않는 코덱
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}
