//! The transport adapter boundary.
//!
//! Socket I/O is treated as an external collaborator, with only
//! `OnAccept`/`Close` specified at the edge. `TransportSink` is the narrow
//! seam a `Session` uses to actually push framed bytes out and to tear
//! down the underlying connection; no `TcpListener`/WebSocket accept loop
//! lives in this crate.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::wire::Packet;

/// One live transport connection's write half, from the core's point of
/// view. A bootstrap binary implements this over a real TCP or WebSocket
/// socket and hands it to `Session::new`.
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Encode and write `packet` to the peer. Errors are treated as a dead
    /// socket by the caller (§4.2 "a dead socket surfaces as
    /// `Close(NetworkError)`").
    async fn send_frame(&self, packet: Packet) -> std::io::Result<()>;

    /// Tear down the underlying connection. Best-effort; the session is
    /// considered closed regardless of the outcome.
    async fn close(&self);
}
