//! Codec for the `index` metadata file.
//!
//! Layout: `[magic: 4][version: u16][payload_len: u64][payload][blake3: 32]`, all
//! integers little endian. The payload is the bincode encoding of
//! [`IndexManifest`]. Files are replaced by writing a sibling staging file and
//! renaming it over the target, so readers only ever see a complete snapshot.

use std::io::{Read, Write};
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};

use crate::constants::{
    INDEX_CHECKSUM_SIZE, INDEX_FORMAT_VERSION, INDEX_HEADER_SIZE, INDEX_MAGIC,
    MAX_INDEX_PAYLOAD_BYTES,
};
use crate::error::{CorporaError, Result};
use crate::types::IndexManifest;

fn index_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

pub struct IndexFileCodec;

impl IndexFileCodec {
    pub fn encode(manifest: &IndexManifest) -> Result<Vec<u8>> {
        let payload = encode_to_vec(manifest, index_config())?;
        let mut bytes = Vec::with_capacity(INDEX_HEADER_SIZE + payload.len() + INDEX_CHECKSUM_SIZE);
        bytes.extend_from_slice(&INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(blake3::hash(&payload).as_bytes());
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<IndexManifest> {
        let header = bytes
            .get(..INDEX_HEADER_SIZE)
            .ok_or_else(|| invalid("file shorter than header"))?;
        if header[..4] != INDEX_MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != INDEX_FORMAT_VERSION {
            return Err(invalid(format!("unsupported format version {version}")));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[6..14]);
        let payload_len = u64::from_le_bytes(len_bytes);
        if payload_len > MAX_INDEX_PAYLOAD_BYTES {
            return Err(invalid(format!("payload length {payload_len} exceeds limit")));
        }
        let payload_len =
            usize::try_from(payload_len).map_err(|_| invalid("payload length too large"))?;

        let expected_len = INDEX_HEADER_SIZE + payload_len + INDEX_CHECKSUM_SIZE;
        if bytes.len() != expected_len {
            return Err(invalid(format!(
                "expected {expected_len} bytes, found {}",
                bytes.len()
            )));
        }
        let payload = &bytes[INDEX_HEADER_SIZE..INDEX_HEADER_SIZE + payload_len];
        let checksum = &bytes[INDEX_HEADER_SIZE + payload_len..];
        if blake3::hash(payload).as_bytes() != checksum {
            return Err(invalid("checksum mismatch"));
        }

        let (manifest, consumed) = decode_from_slice::<IndexManifest, _>(payload, index_config())?;
        if consumed != payload.len() {
            return Err(invalid("trailing bytes after manifest payload"));
        }
        Ok(manifest)
    }

    pub fn read(path: &Path) -> Result<IndexManifest> {
        let mut file = fs_err::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    /// Write `manifest` to `swap_path`, fsync it, and rename it over `target`.
    pub fn write_atomic(manifest: &IndexManifest, swap_path: &Path, target: &Path) -> Result<()> {
        let bytes = Self::encode(manifest)?;
        {
            let mut file = fs_err::File::create(swap_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs_err::rename(swap_path, target)?;
        sync_parent_dir(target);
        if swap_path.exists() {
            fs_err::remove_file(swap_path)?;
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> CorporaError {
    CorporaError::InvalidIndex {
        reason: reason.into(),
    }
}

// Makes the rename itself durable. Directories cannot be opened for sync on
// every platform, so failures are only logged.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(error = %err, dir = %parent.display(), "directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
