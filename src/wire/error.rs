//! Re-exports the wire error type from the crate-wide taxonomy.
//!
//! Kept as its own module (rather than inlining uses of `crate::error`
//! everywhere under `wire::`) so callers can `use roomcore::wire::WireError`
//! without reaching into `roomcore::error`.

pub use crate::error::WireError;
