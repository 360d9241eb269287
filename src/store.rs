//! The on-disk associative file behind a swap map.
//!
//! One backing file holds both the entry map (stored key → opaque JSON
//! value) and the key index (hash → canonical key encoding) inside a
//! checksummed envelope. The whole structure is loaded when a gated
//! section first touches it and rewritten atomically when the outermost
//! section releases, so composed operations see one consistent state
//! and pay the open/close cost once.
//!
//! Envelope layout, little-endian:
//!
//! ```text
//! magic "SWAPMAP\0" | version u16 | payload len u32 | crc32 u32 | JSON payload
//! ```

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::types::{Result, SwapError};

const MAGIC: &[u8; 8] = b"SWAPMAP\0";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 18;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Payload {
    entries: BTreeMap<String, Value>,
    key_index: BTreeMap<String, String>,
}

/// In-memory handle on the backing file for the duration of one gated
/// critical section.
///
/// All access assumes the caller holds the access gate; nothing here
/// synchronizes on its own.
#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    payload: Payload,
    dirty: bool,
}

impl StoreFile {
    /// Writes a fresh, empty backing file at `path`.
    pub fn create(path: &Path) -> Result<()> {
        write_envelope(path, &Payload::default())
    }

    /// Loads and verifies the backing file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let payload = read_envelope(&bytes)?;
        Ok(Self {
            path: path.to_owned(),
            payload,
            dirty: false,
        })
    }

    /// Looks up the value stored under `stored`.
    pub fn get(&self, stored: &str) -> Result<&Value> {
        self.payload.entries.get(stored).ok_or(SwapError::KeyNotFound)
    }

    /// Inserts or overwrites the value stored under `stored`.
    pub fn set(&mut self, stored: String, value: Value) {
        self.payload.entries.insert(stored, value);
        self.dirty = true;
    }

    /// Removes the entry stored under `stored`.
    pub fn delete(&mut self, stored: &str) -> Result<()> {
        if self.payload.entries.remove(stored).is_none() {
            return Err(SwapError::KeyNotFound);
        }
        self.dirty = true;
        Ok(())
    }

    /// Number of entries in the backing file.
    pub fn count(&self) -> usize {
        self.payload.entries.len()
    }

    /// All stored keys.
    pub fn stored_keys(&self) -> impl Iterator<Item = &str> {
        self.payload.entries.keys().map(String::as_str)
    }

    /// All stored values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.payload.entries.values()
    }

    /// All (stored key, value) pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.payload
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v))
    }

    /// The canonical key encoding recorded for `stored`, if `stored` is
    /// a hashed key.
    pub fn canonical_for(&self, stored: &str) -> Option<&str> {
        self.payload.key_index.get(stored).map(String::as_str)
    }

    /// Whether the key index knows `hash`.
    pub fn knows_key(&self, hash: &str) -> bool {
        self.payload.key_index.contains_key(hash)
    }

    /// Records `hash -> canonical` in the key index on first use.
    /// Idempotent: an existing mapping is left untouched.
    pub fn record_key(&mut self, hash: &str, canonical: &str) {
        if !self.payload.key_index.contains_key(hash) {
            self.payload
                .key_index
                .insert(hash.to_owned(), canonical.to_owned());
            self.dirty = true;
        }
    }

    /// Drops the key index entry for `hash`, if present.
    pub fn forget_key(&mut self, hash: &str) {
        if self.payload.key_index.remove(hash).is_some() {
            self.dirty = true;
        }
    }

    /// Rewrites the backing file if any mutation happened in this
    /// section.
    pub fn flush_if_dirty(self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_envelope(&self.path, &self.payload)
    }
}

fn write_envelope(path: &Path, payload: &Payload) -> Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| SwapError::Serialization(err.to_string()))?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| SwapError::InvalidArgument("backing file payload exceeds 4 GiB".into()))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&body_len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    buf.extend_from_slice(&body);

    // Write-temp-then-rename so readers never observe a torn file.
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&buf)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| SwapError::Io(err.error))?;
    Ok(())
}

fn read_envelope(bytes: &[u8]) -> Result<Payload> {
    if bytes.len() < HEADER_LEN {
        return Err(SwapError::Corruption(
            "backing file shorter than envelope header".into(),
        ));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(SwapError::Corruption("invalid backing file magic".into()));
    }
    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != FORMAT_VERSION {
        return Err(SwapError::Corruption(format!(
            "unsupported backing file version {version}"
        )));
    }
    let len = u32::from_le_bytes(bytes[10..14].try_into().expect("slice is 4 bytes")) as usize;
    let crc = u32::from_le_bytes(bytes[14..18].try_into().expect("slice is 4 bytes"));
    let body = bytes
        .get(HEADER_LEN..HEADER_LEN + len)
        .ok_or_else(|| SwapError::Corruption("backing file payload truncated".into()))?;
    if crc32fast::hash(body) != crc {
        return Err(SwapError::Corruption(
            "backing file checksum mismatch".into(),
        ));
    }
    serde_json::from_slice(body).map_err(|err| {
        SwapError::Corruption(format!("backing file payload does not decode: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_is_empty() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.swp");
        StoreFile::create(&path)?;
        let store = StoreFile::load(&path)?;
        assert_eq!(store.count(), 0);
        Ok(())
    }

    #[test]
    fn mutations_survive_flush_and_reload() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.swp");
        StoreFile::create(&path)?;

        let mut store = StoreFile::load(&path)?;
        store.set("alpha".into(), json!(1));
        store.record_key("xdeadbeef00000000", "99");
        store.set("xdeadbeef00000000".into(), json!("ninety-nine"));
        store.flush_if_dirty()?;

        let store = StoreFile::load(&path)?;
        assert_eq!(store.count(), 2);
        assert_eq!(store.get("alpha")?, &json!(1));
        assert_eq!(store.canonical_for("xdeadbeef00000000"), Some("99"));
        Ok(())
    }

    #[test]
    fn delete_of_absent_key_fails() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.swp");
        StoreFile::create(&path)?;
        let mut store = StoreFile::load(&path)?;
        assert!(matches!(
            store.delete("missing"),
            Err(SwapError::KeyNotFound)
        ));
        Ok(())
    }

    #[test]
    fn record_key_is_idempotent() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idem.swp");
        StoreFile::create(&path)?;
        let mut store = StoreFile::load(&path)?;
        store.record_key("xab", "1");
        store.record_key("xab", "2");
        assert_eq!(store.canonical_for("xab"), Some("1"));
        Ok(())
    }

    #[test]
    fn clean_store_does_not_rewrite() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.swp");
        StoreFile::create(&path)?;
        let before = fs::metadata(&path)?.modified()?;
        let store = StoreFile::load(&path)?;
        store.flush_if_dirty()?;
        assert_eq!(fs::metadata(&path)?.modified()?, before);
        Ok(())
    }

    #[test]
    fn corrupted_payload_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.swp");
        StoreFile::create(&path)?;
        let mut store = StoreFile::load(&path)?;
        store.set("k".into(), json!("v"));
        store.flush_if_dirty()?;

        let mut bytes = fs::read(&path)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes)?;

        assert!(matches!(
            StoreFile::load(&path),
            Err(SwapError::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn foreign_file_is_rejected() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.swp");
        fs::write(&path, b"definitely not a swap file")?;
        assert!(matches!(
            StoreFile::load(&path),
            Err(SwapError::Corruption(_))
        ));
        Ok(())
    }
}
