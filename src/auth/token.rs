//! Room Token contract (§3, §6).

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::util::ids::AccountId;

/// Where the Actor should join: a specific existing stage, or a request to
/// have the factory mint a new one of the named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageTarget {
    Existing(i64),
    CreateNew,
}

/// The verified claims carried by a Room Token, per §6.
#[derive(Debug, Clone)]
pub struct RoomTokenClaims {
    pub account_id: AccountId,
    pub stage_target: StageTarget,
    pub stage_type: String,
    pub user_info: Bytes,
    pub expires_at: DateTime<Utc>,
}

/// Why token verification failed, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFailureReason {
    Expired,
    Signature,
    Malformed,
    NotYetValid,
}

impl std::fmt::Display for TokenFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Expired => "expired",
            Self::Signature => "bad signature",
            Self::Malformed => "malformed",
            Self::NotYetValid => "not yet valid",
        };
        write!(f, "{s}")
    }
}

/// Wire-shape of the claims blob the reference `HmacTokenVerifier` signs
/// and verifies. An issuer using a different verifier implementation need
/// not use this shape at all; it exists only to back `HmacTokenVerifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignedClaimsBody {
    pub account_id: i64,
    pub stage_id: Option<i64>,
    pub stage_type: String,
    #[serde(with = "base64_bytes")]
    pub user_info: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        base64::engine::general_purpose::STANDARD
            .encode(value)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
