use common::messages::{Error as CodecError, Message};
use log::{debug, error, warn};
use std::{
    fmt::Display,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

const READ_BUFFER_LEN: usize = 2048;
const INIT_ACCUMULATION_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    AwaitingHandshake = 0,
    Connected = 1,
    Disconnected = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AwaitingHandshake,
            1 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

/// Receives every message decoded by a session's receive loop.
///
/// Replies pushed into `write` are sent back over the same socket before the
/// next message is dispatched. Returning an error drops the message but keeps
/// the connection: only I/O failures terminate a session.
pub trait SessionHandler: Send + 'static {
    type Error: Display;

    fn handle(&mut self, message: Message, write: &mut Vec<Message>) -> Result<(), Self::Error>;

    /// Called exactly once, after the receive loop has exited.
    fn disconnected(&mut self) {}
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("session is disconnected")]
    Disconnected,
    #[error("failed to encode frame: {0}")]
    Encode(CodecError),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// One end of a connection: owns the socket, its state, and a write lock so
/// concurrent senders never interleave frame bytes.
pub struct Session {
    stream: TcpStream,
    addr: Option<SocketAddr>,
    write_lock: Mutex<()>,
    state: AtomicU8,
}

impl Session {
    pub fn new(stream: TcpStream) -> Arc<Self> {
        let addr = stream.peer_addr().ok();
        Arc::new(Self {
            stream,
            addr,
            write_lock: Mutex::new(()),
            state: AtomicU8::new(SessionState::AwaitingHandshake as u8),
        })
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Arc<Self>> {
        Ok(Self::new(TcpStream::connect(addr)?))
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Encodes and writes one frame. Safe to call from any thread; writes are
    /// serialized per session. Fails fast once the session has disconnected,
    /// and a write failure transitions the session to `Disconnected`.
    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        if self.state() == SessionState::Disconnected {
            return Err(SendError::Disconnected);
        }

        let bytes = message.encode().map_err(SendError::Encode)?;

        let guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = (&self.stream).write_all(&bytes);
        drop(guard);

        if let Err(error) = result {
            self.close();
            return Err(SendError::Io(error));
        }
        Ok(())
    }

    /// Moves the session to `Disconnected` and shuts the socket down, which
    /// also unblocks a receive loop parked in `read`.
    pub fn close(&self) {
        self.state
            .store(SessionState::Disconnected as u8, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Marks the session `Connected` and spawns its receive loop. Dropping
    /// the returned handle detaches the loop; it exits on its own when the
    /// socket errors, reaches EOF, or the session is closed.
    pub fn start<H: SessionHandler>(self: &Arc<Self>, handler: H) -> JoinHandle<()> {
        self.state
            .store(SessionState::Connected as u8, Ordering::Release);
        let session = Arc::clone(self);
        thread::spawn(move || read_loop(session, handler))
    }
}

/// The receive loop. TCP is a byte stream: one read may contain a partial
/// frame, several frames, or a frame split across reads, so bytes accumulate
/// in `buffer` and every complete frame is drained before the next read.
fn read_loop<H: SessionHandler>(session: Arc<Session>, mut handler: H) {
    let mut chunk = [0u8; READ_BUFFER_LEN];
    let mut buffer: Vec<u8> = Vec::with_capacity(INIT_ACCUMULATION_CAPACITY);
    let mut write = Vec::new();

    'read: while session.state() == SessionState::Connected {
        let count = match (&session.stream).read(&mut chunk) {
            // EOF: the remote half closed cleanly
            Ok(0) => break 'read,
            Ok(count) => count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue 'read,
            Err(error) => {
                if session.state() == SessionState::Connected {
                    error!("read failed on session {:?}: {}", session.peer_addr(), error);
                }
                break 'read;
            }
        };
        buffer.extend_from_slice(&chunk[.. count]);

        loop {
            let message = match Message::decode(&buffer) {
                Ok(message) => message,
                Err(CodecError::TruncatedFrame { .. }) => continue 'read,
                Err(error) => {
                    // The declared length can no longer be trusted, so the
                    // remaining buffered bytes are unrecoverable
                    warn!(
                        "dropping {} buffered bytes from {:?}: {}",
                        buffer.len(),
                        session.peer_addr(),
                        error
                    );
                    buffer.clear();
                    continue 'read;
                }
            };
            buffer.drain(.. message.frame_len());

            if let Err(error) = handler.handle(message, &mut write) {
                warn!("session {:?}: {}", session.peer_addr(), error);
            }
            for reply in write.drain(..) {
                if let Err(error) = session.send(&reply) {
                    debug!("dropped reply to {:?}: {}", session.peer_addr(), error);
                }
            }

            if session.state() != SessionState::Connected {
                break 'read;
            }
        }
    }

    session.close();
    handler.disconnected();
}
