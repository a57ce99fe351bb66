//! [`HashMap`] and [`HashSet`] based on [hashbrown]'s implementations.
//! Unlike the `std` versions, these default to [`FixedHasher`] instead of
//! `RandomState`, trading denial-of-service resistance (irrelevant for a
//! checker operating on local files) for deterministic iteration.

use crate::hash::FixedHasher;

/// A [`hashbrown::HashMap`] with a deterministic default hasher
pub type HashMap<K, V, S = FixedHasher> = hashbrown::HashMap<K, V, S>;

/// A [`hashbrown::HashSet`] with a deterministic default hasher
pub type HashSet<T, S = FixedHasher> = hashbrown::HashSet<T, S>;

/// Shorthand for an entry of [`HashMap`]
pub use hashbrown::hash_map::Entry;
