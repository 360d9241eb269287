//! The public swap map facade.
//!
//! [`SwapMap`] composes the access gate, the key codec, and the backing
//! store into a map-like interface with an explicit lifecycle: backing
//! files are created at construction and removed at [`SwapMap::close`]
//! (or on drop, best effort). Every public operation is exactly one
//! gated critical section; composed reads such as
//! [`SwapMap::iter_snapshot`] never span two independently gated calls.

use std::cell::RefMut;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{decode_key, StoredKey, SwapKey};
use crate::gate::{AccessGate, GateGuard};
use crate::store::StoreFile;
use crate::types::{Result, SwapError};

/// Extension of the data file, appended to the base name.
pub const DATA_EXT: &str = "swp";
/// Extension of the lock file, appended to the base name.
pub const LOCK_EXT: &str = "lock";

/// Construction options for [`SwapMap`].
#[derive(Debug, Clone)]
pub struct SwapMapOptions {
    base_name: Option<PathBuf>,
    dir: Option<PathBuf>,
    delete_existing: bool,
}

impl Default for SwapMapOptions {
    fn default() -> Self {
        Self {
            base_name: None,
            dir: None,
            delete_existing: true,
        }
    }
}

impl SwapMapOptions {
    /// Options with a generated base name, the system temp directory,
    /// and `delete_existing` enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Base name shared by all backing files. An absolute path is used
    /// as-is; a relative one is joined onto the directory. Without a
    /// base name a random `swapmap-<suffix>` is generated.
    pub fn base_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.base_name = Some(name.into());
        self
    }

    /// Directory for the backing files. Defaults to the system temp
    /// directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Whether construction may replace an existing backing file with
    /// the same base name. When `false`, a collision fails with
    /// [`SwapError::FileCollision`]. Defaults to `true`.
    pub fn delete_existing(mut self, delete: bool) -> Self {
        self.delete_existing = delete;
        self
    }

    fn resolve_base(&self) -> PathBuf {
        let dir = self.dir.clone().unwrap_or_else(std::env::temp_dir);
        match &self.base_name {
            Some(name) if name.is_absolute() => name.clone(),
            Some(name) => dir.join(name),
            None => dir.join(generated_base_name()),
        }
    }
}

fn generated_base_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("swapmap-{suffix}")
}

fn sibling(base: &Path, ext: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(ext);
    base.with_file_name(name)
}

/// A key-value map whose entries live in on-disk storage, safe for use
/// by multiple threads and, through the shared lock file, multiple
/// cooperating processes.
///
/// Keys go through [`SwapKey`] normalization; values are any
/// serde-serializable payload, stored opaquely as JSON. All operations
/// on one map instance are serialized by its [`AccessGate`]; within a
/// process every thread must use the same instance (OS file locks are
/// process-scoped, so a second instance on the same base name gives no
/// intra-process exclusion).
#[derive(Debug)]
pub struct SwapMap<K, V> {
    gate: AccessGate<StoreFile>,
    base: PathBuf,
    data_path: PathBuf,
    lock_path: PathBuf,
    closed: AtomicBool,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> SwapMap<K, V>
where
    K: SwapKey,
    V: Serialize + DeserializeOwned,
{
    /// Creates a swap map with fresh backing files.
    ///
    /// Fails with [`SwapError::FileCollision`] if a data file with the
    /// resolved base name already exists and the options forbid
    /// replacing it.
    pub fn create(options: SwapMapOptions) -> Result<Self> {
        let base = options.resolve_base();
        let data_path = sibling(&base, DATA_EXT);
        let lock_path = sibling(&base, LOCK_EXT);
        if data_path.exists() && !options.delete_existing {
            return Err(SwapError::FileCollision(data_path));
        }
        let gate = AccessGate::open(&lock_path)?;
        {
            let _section = gate.enter()?;
            if data_path.exists() {
                fs::remove_file(&data_path)?;
            }
            StoreFile::create(&data_path)?;
        }
        debug!(base = %base.display(), "created swap map backing files");
        Ok(Self {
            gate,
            base,
            data_path,
            lock_path,
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    /// Creates a swap map and populates it from `seed` inside a single
    /// outer critical section. Seed order does not affect the final
    /// state; a duplicated key keeps the last value.
    pub fn create_with_seed<I>(options: SwapMapOptions, seed: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let map = Self::create(options)?;
        map.with_section(|_section| {
            for (key, value) in seed {
                map.set(&key, &value)?;
            }
            Ok(())
        })?;
        Ok(map)
    }

    /// Attaches to the backing files of an existing swap map, the entry
    /// point for a cooperating process. The files are verified but not
    /// wiped. Requires an explicit base name.
    pub fn attach(options: SwapMapOptions) -> Result<Self> {
        if options.base_name.is_none() {
            return Err(SwapError::InvalidArgument(
                "attach requires an explicit base name".into(),
            ));
        }
        let base = options.resolve_base();
        let data_path = sibling(&base, DATA_EXT);
        let lock_path = sibling(&base, LOCK_EXT);
        let gate = AccessGate::open(&lock_path)?;
        {
            let _section = gate.enter()?;
            StoreFile::load(&data_path)?;
        }
        Ok(Self {
            gate,
            base,
            data_path,
            lock_path,
            closed: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    /// Stores `value` under `key`, inserting or overwriting.
    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        self.with_section(|section| {
            let mut store = self.store(section)?;
            let stored = StoredKey::encode(key)?;
            let payload = serde_json::to_value(value)
                .map_err(|err| SwapError::Serialization(format!("unsupported value: {err}")))?;
            if let StoredKey::Hashed { hash, canonical } = &stored {
                store.record_key(hash, canonical);
            }
            store.set(stored.as_str().to_owned(), payload);
            Ok(())
        })
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<V> {
        self.with_section(|section| {
            let store = self.store(section)?;
            let stored = StoredKey::encode(key)?;
            if let StoredKey::Hashed { hash, .. } = &stored {
                if !store.knows_key(hash) {
                    return Err(SwapError::KeyNotFound);
                }
            }
            let value = store.get(stored.as_str())?.clone();
            decode_value(value)
        })
    }

    /// Removes the entry stored under `key`. The key-index entry of a
    /// hashed key is removed in the same critical section.
    pub fn delete(&self, key: &K) -> Result<()> {
        self.with_section(|section| {
            let mut store = self.store(section)?;
            let stored = StoredKey::encode(key)?;
            if let StoredKey::Hashed { hash, .. } = &stored {
                if !store.knows_key(hash) {
                    return Err(SwapError::KeyNotFound);
                }
            }
            store.delete(stored.as_str())?;
            if let StoredKey::Hashed { hash, .. } = &stored {
                store.forget_key(hash);
            }
            Ok(())
        })
    }

    /// All original keys, denormalized through the key index.
    pub fn keys(&self) -> Result<Vec<K>> {
        self.with_section(|section| {
            let store = self.store(section)?;
            store
                .stored_keys()
                .map(|stored| decode_key(stored, store.canonical_for(stored)))
                .collect()
        })
    }

    /// All stored values.
    pub fn values(&self) -> Result<Vec<V>> {
        self.with_section(|section| {
            let store = self.store(section)?;
            store
                .values()
                .map(|value| decode_value(value.clone()))
                .collect()
        })
    }

    /// One consistent snapshot of all entries, taken in a single gated
    /// critical section. The result is a materialized copy, not a live
    /// view; later mutations do not affect it.
    pub fn iter_snapshot(&self) -> Result<Vec<(K, V)>> {
        self.with_section(|section| {
            let store = self.store(section)?;
            store
                .entries()
                .map(|(stored, value)| {
                    let key = decode_key(stored, store.canonical_for(stored))?;
                    let value = decode_value(value.clone())?;
                    Ok((key, value))
                })
                .collect()
        })
    }
}

impl<K, V> SwapMap<K, V> {
    /// Number of entries in the map.
    pub fn len(&self) -> Result<usize> {
        self.with_section(|section| Ok(self.store(section)?.count()))
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Debug rendering of the raw stored entries.
    pub fn snapshot_debug(&self) -> Result<String> {
        self.with_section(|section| {
            let store = self.store(section)?;
            let rendered: BTreeMap<&str, &Value> = store.entries().collect();
            Ok(format!("{rendered:?}"))
        })
    }

    /// The base path shared by this map's backing files.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Removes all backing files sharing the base name and retires the
    /// map. Idempotent: repeated calls, and files already removed by a
    /// cooperating process, are fine.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let _section = self.gate.enter()?;
            remove_quietly(&self.data_path);
        }
        remove_quietly(&self.lock_path);
        debug!(base = %self.base.display(), "removed swap map backing files");
        Ok(())
    }

    /// Runs `op` inside one gated critical section and, when this is
    /// the outermost section of the call chain, flushes the store
    /// before the gate is released.
    fn with_section<R>(&self, op: impl FnOnce(&GateGuard<'_, StoreFile>) -> Result<R>) -> Result<R> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwapError::InvalidArgument(
                "operation on a closed swap map".into(),
            ));
        }
        let section = self.gate.enter()?;
        let out = op(&section);
        if !section.is_outermost() {
            return out;
        }
        let flushed = match section.take_slot() {
            Some(store) => store.flush_if_dirty(),
            None => Ok(()),
        };
        match (out, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(flush_err)) => Err(flush_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(flush_err)) => {
                warn!("flush after failed operation also failed: {flush_err}");
                Err(err)
            }
        }
    }

    /// The open store handle of the current section, loading the
    /// backing file on first access.
    fn store<'g>(&self, section: &'g GateGuard<'_, StoreFile>) -> Result<RefMut<'g, StoreFile>> {
        let mut slot = section.slot();
        if slot.is_none() {
            *slot = Some(StoreFile::load(&self.data_path)?);
        }
        Ok(RefMut::map(slot, |slot| {
            slot.as_mut().expect("slot populated above")
        }))
    }
}

impl<K, V> Drop for SwapMap<K, V> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(base = %self.base.display(), "swap map teardown failed: {err}");
        }
    }
}

fn decode_value<V: DeserializeOwned>(value: Value) -> Result<V> {
    serde_json::from_value(value)
        .map_err(|err| SwapError::Serialization(format!("stored value does not decode: {err}")))
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => debug!(path = %path.display(), "ignoring cleanup failure: {err}"),
    }
}
