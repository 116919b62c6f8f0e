use crate::constants::{HEADER_LEN, MAX_PAYLOAD_LEN, RELAY_SENDER_ID, UNREGISTERED_ID};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

pub type ClientId = i16;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    StdIo(#[from] io::Error),
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
    #[error("frame needs {needed} bytes but only {available} are available")]
    TruncatedFrame { needed: usize, available: usize },
    #[error("declared payload length {0} exceeds the protocol maximum")]
    MalformedFrame(u16),
    #[error("encountered invalid message type {0}")]
    BadMessageType(u8),
    #[error("encountered invalid content type {0}")]
    BadContentType(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Debug = 0,
    Hello = 1,
    HelloResponse = 2,
    NewFile = 3,
    FileTransfer = 4,
    UserInfo = 5,
}

impl MessageType {
    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Debug),
            1 => Ok(Self::Hello),
            2 => Ok(Self::HelloResponse),
            3 => Ok(Self::NewFile),
            4 => Ok(Self::FileTransfer),
            5 => Ok(Self::UserInfo),
            by => Err(Error::BadMessageType(by)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    Text = 0,
    Binary = 1,
}

impl ContentType {
    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Binary),
            by => Err(Error::BadContentType(by)),
        }
    }
}

/// One wire frame. The payload length field is implicit in `payload.len()`
/// and is validated against [`MAX_PAYLOAD_LEN`] at encode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub content_type: ContentType,
    pub sender_id: ClientId,
    pub payload: Vec<u8>,
}

impl Message {
    /// Handshake opener. `sender_id` is a previously assigned id, or
    /// [`UNREGISTERED_ID`] on a first-ever connection.
    pub fn hello(sender_id: ClientId) -> Self {
        Self {
            kind: MessageType::Hello,
            content_type: ContentType::Binary,
            sender_id,
            payload: Vec::new(),
        }
    }

    /// Relay reply to HELLO carrying the assigned id as decimal text.
    pub fn hello_response(id: ClientId) -> Self {
        Self {
            kind: MessageType::HelloResponse,
            content_type: ContentType::Text,
            sender_id: RELAY_SENDER_ID,
            payload: id.to_string().into_bytes(),
        }
    }

    /// Peer request for its session info (the relay answers with the friend token).
    pub fn user_info_request(sender_id: ClientId) -> Self {
        Self {
            kind: MessageType::UserInfo,
            content_type: ContentType::Text,
            sender_id,
            payload: Vec::new(),
        }
    }

    /// Relay reply to USER_INFO carrying the session's friend token.
    pub fn user_info(token: &str) -> Self {
        Self {
            kind: MessageType::UserInfo,
            content_type: ContentType::Text,
            sender_id: RELAY_SENDER_ID,
            payload: token.as_bytes().to_vec(),
        }
    }

    /// Opens a transfer: the payload is the target file name.
    pub fn new_file(sender_id: ClientId, file_name: &str) -> Self {
        Self {
            kind: MessageType::NewFile,
            content_type: ContentType::Text,
            sender_id,
            payload: file_name.as_bytes().to_vec(),
        }
    }

    /// One chunk of an ongoing transfer.
    pub fn file_chunk(sender_id: ClientId, chunk: Vec<u8>) -> Self {
        Self {
            kind: MessageType::FileTransfer,
            content_type: ContentType::Binary,
            sender_id,
            payload: chunk,
        }
    }

    /// Free-form text frame, accepted in any state and only ever logged.
    pub fn debug_text(sender_id: ClientId, text: &str) -> Self {
        Self {
            kind: MessageType::Debug,
            content_type: ContentType::Text,
            sender_id,
            payload: text.as_bytes().to_vec(),
        }
    }

    pub fn is_unregistered_sender(&self) -> bool {
        self.sender_id == UNREGISTERED_ID
    }

    /// Number of bytes this message occupies on the wire.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(self.payload.len()));
        }

        let mut cursor = Cursor::new(Vec::with_capacity(self.frame_len()));
        cursor.write_u16::<BigEndian>(self.payload.len() as u16)?;
        cursor.write_u8(self.kind as u8)?;
        cursor.write_u8(self.content_type as u8)?;
        cursor.write_i16::<BigEndian>(self.sender_id)?;
        cursor.write_all(&self.payload)?;
        Ok(cursor.into_inner())
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// `buf` need not be exactly frame-sized: trailing bytes (the next frame,
    /// or stale data in a reused receive buffer) are ignored. If fewer than
    /// `HEADER_LEN + payloadLength` bytes are available the frame is reported
    /// as [`Error::TruncatedFrame`] so the caller can wait for more input.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TruncatedFrame {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let mut cursor = Cursor::new(buf);
        let payload_len = cursor.read_u16::<BigEndian>()? as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::MalformedFrame(payload_len as u16));
        }

        let kind = MessageType::from_u8(cursor.read_u8()?)?;
        let content_type = ContentType::from_u8(cursor.read_u8()?)?;
        let sender_id = cursor.read_i16::<BigEndian>()?;

        let needed = HEADER_LEN + payload_len;
        if buf.len() < needed {
            return Err(Error::TruncatedFrame {
                needed,
                available: buf.len(),
            });
        }

        let mut payload = vec![0u8; payload_len];
        cursor.read_exact(&mut payload)?;

        Ok(Self {
            kind,
            content_type,
            sender_id,
            payload,
        })
    }
}
