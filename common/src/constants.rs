use crate::messages::ClientId;

/// Fixed wire header: u16 payload length, u8 type, u8 content type, i16 sender id.
pub const HEADER_LEN: usize = 6;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = i16::MAX as usize;

/// Sender id of a peer that has not completed the handshake. Valid only on HELLO.
pub const UNREGISTERED_ID: ClientId = -1;

/// Sender id carried by every frame the relay originates.
pub const RELAY_SENDER_ID: ClientId = -666;

/// Payload size used when chunking a file upload into FILE_TRANSFER frames.
pub const FILE_CHUNK_LEN: usize = 8 * 1024;
