//! Content-addressed cache keys and their on-disk locations
//!
//! A key is derived from the absolute source path, the stored edge length
//! and the crop flag. The format is stable and shared with external tools:
//! `hex(sha1(path)) + "-" + size`, with an `F` suffix when the thumbnail is
//! *not* cropped.

use std::fs;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

/// Derive the cache key for a `(source path, size, crop)` triple.
///
/// Two paths map to the same key exactly when their UTF-8 byte sequences
/// are equal. The hash is a fingerprint, not a security boundary.
pub fn cache_key(source_path: &str, size: u32, crop: bool) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{digest}-{size}{}", if crop { "" } else { "F" })
}

/// The path of a cache entry below `root`: a two-character shard directory
/// followed by the full key. With `create_shard` the shard directory is
/// created if missing; creation is idempotent and failures surface later
/// when the entry itself is opened.
pub fn cache_entry_path(root: &Path, key: &str, create_shard: bool) -> PathBuf {
    let shard = root.join(&key[..2]);
    if create_shard {
        let _ = fs::create_dir_all(&shard);
    }
    shard.join(key)
}
