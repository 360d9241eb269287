//! Key normalization for the backing format.
//!
//! The backing file only stores string keys. Key types that *are*
//! strings pass through untouched; every other key type is rendered to
//! a canonical JSON encoding and addressed by a deterministic content
//! hash of that encoding. The hash-to-canonical mapping lives in the
//! key index persisted next to the entries, so original keys can be
//! reconstructed by any process sharing the backing files.
//!
//! Canonical scheme: `serde_json::to_string(key)`, hashed with xxh64
//! (seed 0) and rendered as 16 lowercase hex digits behind an `x`
//! prefix. The prefix keeps hashed keys out of the way of ordinary
//! string keys.

use serde::de::DeserializeOwned;
use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::types::{Result, SwapError};

/// A type usable as a swap map key.
///
/// The two hooks implement the native-versus-hashed capability check:
/// a type that can expose itself as a string is stored natively, and
/// everything else goes through the canonical hash. The defaults mark
/// the type as hashed; string types override both.
pub trait SwapKey: Serialize + DeserializeOwned {
    /// The key's native string form, if the type has one.
    fn as_native_str(&self) -> Option<&str> {
        None
    }

    /// Rebuilds a key from a native stored string, if the type has a
    /// native form.
    fn from_native_str(_stored: &str) -> Option<Self> {
        None
    }
}

impl SwapKey for String {
    fn as_native_str(&self) -> Option<&str> {
        Some(self)
    }

    fn from_native_str(stored: &str) -> Option<Self> {
        Some(stored.to_owned())
    }
}

macro_rules! hashed_swap_key {
    ($($ty:ty),* $(,)?) => {
        $(impl SwapKey for $ty {})*
    };
}

hashed_swap_key!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
);

impl<A: SwapKey, B: SwapKey> SwapKey for (A, B) {}
impl<A: SwapKey, B: SwapKey, C: SwapKey> SwapKey for (A, B, C) {}

/// Storage-safe form of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredKey {
    /// A string key stored as-is.
    Native(String),
    /// A non-string key addressed by the hash of its canonical
    /// encoding.
    Hashed {
        /// Stored key: `x` followed by 16 hex digits of xxh64.
        hash: String,
        /// Canonical JSON encoding of the original key, recorded in the
        /// key index on first use.
        canonical: String,
    },
}

impl StoredKey {
    /// Normalizes a key into its storage-safe form.
    pub fn encode<K: SwapKey>(key: &K) -> Result<Self> {
        if let Some(native) = key.as_native_str() {
            return Ok(StoredKey::Native(native.to_owned()));
        }
        let canonical = serde_json::to_string(key)
            .map_err(|err| SwapError::Serialization(format!("unsupported key: {err}")))?;
        let hash = format!("x{:016x}", xxh64(canonical.as_bytes(), 0));
        Ok(StoredKey::Hashed { hash, canonical })
    }

    /// The string actually used to address the backing file entry.
    pub fn as_str(&self) -> &str {
        match self {
            StoredKey::Native(s) => s,
            StoredKey::Hashed { hash, .. } => hash,
        }
    }
}

/// Reconstructs an original key from its stored form.
///
/// `canonical` is the key-index entry for `stored`, when one exists; a
/// miss means the stored key was native.
pub fn decode_key<K: SwapKey>(stored: &str, canonical: Option<&str>) -> Result<K> {
    match canonical {
        Some(canonical) => serde_json::from_str(canonical).map_err(|err| {
            SwapError::Serialization(format!("key index entry does not decode: {err}"))
        }),
        None => K::from_native_str(stored).ok_or_else(|| {
            SwapError::Serialization(format!(
                "stored key {stored:?} has no index entry and the key type is not native"
            ))
        }),
    }
}
