//! # Formats Module
//!
//! Serialization formats for tracking records.
//!
//! Only the byte-level format lives here; reading and writing files is the
//! job of the stores in [`crate::store`].

mod persistence;

pub use persistence::*;
