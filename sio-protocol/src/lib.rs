//! sio-protocol - the wire data model and codec contract (§3, §6.2).
//!
//! `sio-client` depends on this crate for the `Packet`/`PacketType` data
//! model and the `Encoder`/`Decoder` traits, so the codec can be swapped
//! out independently of the connection/reconnection machinery.

pub mod codec;
pub mod packet;

pub use codec::{DefaultCodec, Decoder, Encoder, Frame, StreamDecoder};
pub use packet::{EventArg, Packet, PacketOptions, PacketType};
