//! Disk-backed key-value map with thread- and process-level mutual
//! exclusion.
//!
//! A [`SwapMap`] keeps its entries in on-disk backing files instead of
//! process memory. Every operation runs inside one gated critical
//! section: a process-local reentrant lock plus a cross-process file
//! lock serialize all access to the backing storage, because the
//! backing format itself is not safe for concurrent use. Arbitrary key
//! types are normalized to string keys through [`SwapKey`]; values are
//! any serde-serializable payload.
//!
//! ```no_run
//! use swapmap::{Result, SwapMap, SwapMapOptions};
//!
//! fn main() -> Result<()> {
//!     let map: SwapMap<u64, String> = SwapMap::create(SwapMapOptions::new())?;
//!     map.set(&7, &"seven".to_owned())?;
//!     assert_eq!(map.get(&7)?, "seven");
//!     assert_eq!(map.len()?, 1);
//!     map.close()?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod gate;
pub mod logging;
pub mod map;
pub mod store;
pub mod types;

pub use codec::{decode_key, StoredKey, SwapKey};
pub use map::{SwapMap, SwapMapOptions};
pub use types::{Result, SwapError};
