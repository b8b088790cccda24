//! `Packet`: the wire and in-process message unit (§3, §4.1).

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use bytes::Bytes;

// Layer 3: Internal module imports
use crate::error::ErrorCode;
use crate::util::ids::StageId;

/// Maximum payload size accepted on the wire, per §4.1.
pub const MAX_PAYLOAD_LEN: usize = 2 * 1024 * 1024;

/// Maximum length of the `msg_id` tag, per §4.1.
pub const MAX_MSG_ID_LEN: usize = 255;

bitflags::bitflags! {
    /// Header flags (§4.1): bit0 compressed, bit1 is_reply, bit2 heartbeat.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const COMPRESSED = 0b0000_0001;
        const IS_REPLY   = 0b0000_0010;
        const HEARTBEAT  = 0b0000_0100;
    }
}

/// A parsed frame, immutable once constructed.
///
/// Packets are handed around by value; the `Bytes` payload is reference
/// counted so cloning a `Packet` to fan it out to several sessions (the
/// Broadcast Engine, §4.9) does not copy the payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    msg_id: Box<str>,
    msg_seq: u16,
    stage_id: StageId,
    error_code: u16,
    flags: PacketFlags,
    payload: Bytes,
}

impl Packet {
    /// Build a packet, validating `msg_id` length per §4.1. `stage_id`
    /// may be zero for packets constructed before a stage is known (e.g.
    /// the initial `ConnectWithToken`).
    pub fn new(
        msg_id: impl Into<Box<str>>,
        msg_seq: u16,
        stage_id: StageId,
        error_code: u16,
        flags: PacketFlags,
        payload: Bytes,
    ) -> Result<Self, crate::error::WireError> {
        let msg_id = msg_id.into();
        if msg_id.is_empty() {
            return Err(crate::error::WireError::EmptyMsgId);
        }
        if msg_id.len() > MAX_MSG_ID_LEN {
            return Err(crate::error::WireError::MsgIdTooLong(msg_id.len()));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(crate::error::WireError::FrameTooLarge {
                actual: payload.len() as u32,
                max: MAX_PAYLOAD_LEN as u32,
            });
        }
        Ok(Self {
            msg_id,
            msg_seq,
            stage_id,
            error_code,
            flags,
            payload,
        })
    }

    /// Build a fire-and-forget packet (`msg_seq == 0`).
    pub fn fire_and_forget(
        msg_id: impl Into<Box<str>>,
        stage_id: StageId,
        payload: Bytes,
    ) -> Result<Self, crate::error::WireError> {
        Self::new(msg_id, 0, stage_id, 0, PacketFlags::empty(), payload)
    }

    /// Build a success reply to `request`, bearing the same `msg_seq`.
    pub fn reply_ok(
        request: &Packet,
        msg_id: impl Into<Box<str>>,
        payload: Bytes,
    ) -> Result<Self, crate::error::WireError> {
        Self::new(
            msg_id,
            request.msg_seq,
            request.stage_id,
            ErrorCode::Success.as_u16(),
            PacketFlags::IS_REPLY,
            payload,
        )
    }

    /// Build an error reply to `request`.
    pub fn reply_error(
        request: &Packet,
        code: ErrorCode,
    ) -> Result<Self, crate::error::WireError> {
        Self::new(
            "Error",
            request.msg_seq,
            request.stage_id,
            code.as_u16(),
            PacketFlags::IS_REPLY,
            Bytes::new(),
        )
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub const fn msg_seq(&self) -> u16 {
        self.msg_seq
    }

    /// `true` when this packet does not expect a reply.
    pub const fn is_fire_and_forget(&self) -> bool {
        self.msg_seq == 0
    }

    pub const fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn with_stage_id(mut self, stage_id: StageId) -> Self {
        self.stage_id = stage_id;
        self
    }

    pub const fn error_code(&self) -> u16 {
        self.error_code
    }

    pub const fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub const fn is_reply(&self) -> bool {
        self.flags.contains(PacketFlags::IS_REPLY)
    }

    pub const fn is_heartbeat(&self) -> bool {
        self.flags.contains(PacketFlags::HEARTBEAT)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet{{msg_id={}, msg_seq={}, stage_id={}, error_code={}, payload_len={}}}",
            self.msg_id,
            self.msg_seq,
            self.stage_id,
            self.error_code,
            self.payload.len()
        )
    }
}
