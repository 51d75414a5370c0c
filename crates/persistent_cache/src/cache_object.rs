//! On-disk layout of one cache entry: a fixed header, the key, then the value.

use bytemuck::{Pod, Zeroable};

use crate::PersistentCacheError;

pub const CACHE_OBJECT_SIGNATURE: u32 = 0xA869_593F;
pub const CACHE_OBJECT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CacheObjectHeader {
    signature: u32,
    version: u32,
    key_size: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<CacheObjectHeader>();

pub fn build_cache_object(key: &[u8], value: &[u8]) -> Result<Vec<u8>, PersistentCacheError> {
    let key_size = u32::try_from(key.len()).map_err(|_| PersistentCacheError::KeyTooLarge(key.len()))?;
    let header = CacheObjectHeader {
        signature: CACHE_OBJECT_SIGNATURE,
        version: CACHE_OBJECT_VERSION,
        key_size,
    };
    let mut object = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    object.extend_from_slice(bytemuck::bytes_of(&header));
    object.extend_from_slice(key);
    object.extend_from_slice(value);
    Ok(object)
}

/// Splits a cache object into `(key, value)`.
pub fn parse_cache_object(data: &[u8]) -> Result<(&[u8], &[u8]), PersistentCacheError> {
    let header_bytes = data
        .get(..HEADER_SIZE)
        .ok_or(PersistentCacheError::InvalidCacheObject("truncated header"))?;
    let header: CacheObjectHeader = bytemuck::pod_read_unaligned(header_bytes);
    if header.signature != CACHE_OBJECT_SIGNATURE {
        return Err(PersistentCacheError::InvalidCacheObject("bad signature"));
    }
    if header.version != CACHE_OBJECT_VERSION {
        return Err(PersistentCacheError::InvalidCacheObject("unsupported version"));
    }
    let rest = &data[HEADER_SIZE..];
    let key_size = header.key_size as usize;
    if rest.len() < key_size {
        return Err(PersistentCacheError::InvalidCacheObject("truncated key"));
    }
    Ok(rest.split_at(key_size))
}
