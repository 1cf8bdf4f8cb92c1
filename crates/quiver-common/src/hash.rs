//! Fast non-cryptographic hashing.
//!
//! Identifier keys are small integers, so FxHash beats SipHash by a wide
//! margin on every map in the hot path.

pub use rustc_hash::FxHasher;

/// A `HashMap` using FxHash.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A `HashSet` using FxHash.
pub type FxHashSet<T> = rustc_hash::FxHashSet<T>;
