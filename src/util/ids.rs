//! Process-unique identifiers for stages, actors, sessions and timers.
//!
//! §3 calls for several distinct 64-bit id spaces: stage ids, session ids
//! and timer ids are all "process-unique monotonic"; account ids come from
//! the token issuer and are opaque i64s we never generate ourselves. Each
//! id space gets its own newtype so the compiler catches cross-space
//! mixups (passing a `SessionId` where a `StageId` is expected).

// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicI64, Ordering};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// A monotonically increasing 64-bit id generator, process-wide.
///
/// Used for `StageId`, `SessionId` and `TimerId`: each must be
/// "process-unique monotonic 64-bit" and "never reused in this process"
/// (§4.10).
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
}

impl IdGenerator {
    /// Create a generator that will hand out `1, 2, 3, ...`.
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Allocate the next id in the sequence.
    pub fn next(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! id_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            /// Build from a raw value (used when decoding from the wire or a token).
            pub const fn from_raw(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw numeric value.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

id_newtype!(StageId, "Unique stage (room) identifier, stable for the process lifetime of the stage.");
id_newtype!(SessionId, "Unique transport-connection identifier, stable for the lifetime of the connection.");
id_newtype!(TimerId, "Unique timer identifier, stable for the lifetime of the timer record.");
id_newtype!(AccountId, "Account identifier issued by the external auth service; opaque to the core.");
