//! Framer: parsing and producing length-prefixed binary packets (§4.1).

pub mod codec;
pub mod compress;
pub mod error;
pub mod packet;
pub mod pool;

pub use codec::PacketCodec;
pub use error::WireError;
pub use packet::{Packet, PacketFlags, MAX_MSG_ID_LEN, MAX_PAYLOAD_LEN};
pub use pool::{BufferPool, PooledBuffer};
