//! Crate-wide error taxonomy.
//!
//! `ErrorCode` is the u16 wire taxonomy from the protocol (§6): it travels
//! inside a `Packet` header and is the only error representation that ever
//! crosses the wire. The `thiserror` enums alongside it are Rust-side error
//! types for each component; most of them carry an `ErrorCode` so a
//! component error can be turned into a reply without a second mapping
//! table.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Layer 3: Internal module imports
use crate::util::ids::{SessionId, StageId};

/// Wire-level error code, carried in every `Packet` header.
///
/// `0` means success. Values `>= 2000` are reserved for user stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    Unknown = 1,
    InvalidPacket = 2,
    Timeout = 3,
    StageNotFound = 4,
    ActorNotFound = 5,
    Unauthorized = 6,
    InternalError = 7,
    InvalidState = 8,
    RateLimitExceeded = 9,
    StageFull = 1000,
    StageAlreadyExists = 1001,
    AlreadyInStage = 1002,
    NotInStage = 1003,
    StageClosed = 1004,
    StageOverloaded = 1005,
}

impl ErrorCode {
    /// Reconstruct a code from its raw wire value.
    ///
    /// Unknown codes (including all user-defined `>= 2000` codes) decode to
    /// `Unknown` here; callers that need to preserve an arbitrary
    /// user-defined code should carry the raw `u16` separately rather than
    /// relying on this enum, which only models the reserved range.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::Unknown,
            2 => Self::InvalidPacket,
            3 => Self::Timeout,
            4 => Self::StageNotFound,
            5 => Self::ActorNotFound,
            6 => Self::Unauthorized,
            7 => Self::InternalError,
            8 => Self::InvalidState,
            9 => Self::RateLimitExceeded,
            1000 => Self::StageFull,
            1001 => Self::StageAlreadyExists,
            1002 => Self::AlreadyInStage,
            1003 => Self::NotInStage,
            1004 => Self::StageClosed,
            1005 => Self::StageOverloaded,
            _ => Self::Unknown,
        }
    }

    /// The raw wire value.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// `true` for `Success` (value `0`).
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.as_u16())
    }
}

/// Wire/framing errors. Per §7, all of these are fatal to the session.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame exceeds maximum total length: {actual} > {max}")]
    FrameTooLarge { actual: u32, max: u32 },

    #[error("msg_id_len {0} exceeds 255")]
    MsgIdTooLong(usize),

    #[error("payload_len {declared} does not reconcile with total_length (header_consumed={header_consumed}, total_length={total_length})")]
    LengthMismatch {
        declared: u32,
        header_consumed: u32,
        total_length: u32,
    },

    #[error("msg_id is empty")]
    EmptyMsgId,

    #[error("declared uncompressed_len {declared} does not match decompressed size {actual}")]
    CompressionLengthMismatch { declared: u32, actual: u32 },

    #[error("compressed payload failed to decompress: {0}")]
    DecompressionFailed(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub const fn error_code(&self) -> ErrorCode {
        ErrorCode::InvalidPacket
    }
}

/// Errors from the Stage Mailbox and related queue plumbing.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("stage {0} mailbox is closed")]
    Closed(StageId),

    #[error("stage {stage_id} mailbox overloaded: {depth} entries >= high watermark {high_watermark}")]
    Overloaded {
        stage_id: StageId,
        depth: usize,
        high_watermark: usize,
    },
}

impl MailboxError {
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Closed(_) => ErrorCode::StageClosed,
            Self::Overloaded { .. } => ErrorCode::StageOverloaded,
        }
    }
}

/// Routing failures: unknown stage or actor for an inbound packet.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("stage {0} not found")]
    StageNotFound(StageId),

    #[error("actor for account {0} not found in stage {1}")]
    ActorNotFound(i64, StageId),

    #[error("stage {0} already exists")]
    StageAlreadyExists(StageId),

    #[error("account {0} already in stage {1}")]
    AlreadyInStage(i64, StageId),
}

impl RoutingError {
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::StageNotFound(_) => ErrorCode::StageNotFound,
            Self::ActorNotFound(..) => ErrorCode::ActorNotFound,
            Self::StageAlreadyExists(_) => ErrorCode::StageAlreadyExists,
            Self::AlreadyInStage(..) => ErrorCode::AlreadyInStage,
        }
    }
}

/// Session-level errors (§4.2, §4.3).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is not authenticated")]
    Unauthenticated(SessionId),

    #[error("session {0} exceeded protocol violation threshold")]
    ProtocolViolation(SessionId),

    #[error("token verification failed: {0}")]
    Unauthorized(String),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("send queue for session {0} is closed")]
    QueueClosed(SessionId),
}

impl SessionError {
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) | Self::ProtocolViolation(_) | Self::Unauthorized(_) => {
                ErrorCode::Unauthorized
            }
            Self::Network(_) | Self::QueueClosed(_) => ErrorCode::InternalError,
        }
    }
}

/// Top-level runtime wiring / lifecycle errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("stage type {0} is not registered")]
    UnknownStageType(String),

    #[error("stage type registration is closed after start")]
    RegistrationClosed,

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shutdown already in progress")]
    ShutdownInProgress,

    #[error("graceful shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrips_known_values() {
        for raw in [0u16, 1, 2, 3, 4, 5, 6, 7, 8, 9, 1000, 1001, 1002, 1003, 1004, 1005] {
            assert_eq!(ErrorCode::from_raw(raw).as_u16(), raw);
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_unknown() {
        assert_eq!(ErrorCode::from_raw(2000).as_u16(), 1);
        assert_eq!(ErrorCode::from_raw(65535).as_u16(), 1);
    }

    #[test]
    fn success_is_recognized() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Unknown.is_success());
    }

    #[test]
    fn mailbox_error_maps_to_expected_wire_code() {
        let e = MailboxError::Overloaded {
            stage_id: StageId::from_raw(1),
            depth: 10_001,
            high_watermark: 10_000,
        };
        assert_eq!(e.error_code(), ErrorCode::StageOverloaded);
    }
}
