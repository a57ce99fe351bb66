//! Foundation utilities shared by the `tempo` crates: deterministic
//! collections, saturating temporal arithmetic and the polled [`Deadline`].

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod collections;
pub mod deadline;
pub mod hash;
pub mod weight;

pub use deadline::Deadline;
pub use weight::{INF, NEG_INF, Weight};
