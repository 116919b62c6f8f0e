#![deny(rust_2018_idioms)]

pub mod handler;
pub mod store;

pub use handler::{HandlerError, PeerEvent, PeerHandler};
pub use store::{ClientIdStore, FsClientIdStore};

use common::{
    constants::{FILE_CHUNK_LEN, UNREGISTERED_ID},
    messages::{ClientId, Message},
    sync::JoinOnDrop,
};
use crossbeam_channel::{unbounded, Receiver};
use io::{SendError, Session, SessionState};
use std::{
    io::{self, Read},
    net::ToSocketAddrs,
    sync::{
        atomic::{AtomicI16, Ordering},
        Arc,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("not registered with the relay yet")]
    NotRegistered,
}

/// A connection to the relay: the session, its receive loop, and the event
/// stream the control-plane consumes.
///
/// Dropping the peer closes the session and joins the receive loop.
pub struct Peer {
    session: Arc<Session>,
    client_id: Arc<AtomicI16>,
    events: Receiver<PeerEvent>,
    _reader: JoinOnDrop<()>,
}

impl Peer {
    /// Connects to the relay and opens the handshake. The HELLO carries a
    /// previously persisted client id when the store has one.
    pub fn connect<A, S>(addr: A, store: S) -> Result<Self, PeerError>
    where
        A: ToSocketAddrs,
        S: ClientIdStore,
    {
        let session = Session::connect(addr)?;
        let client_id = Arc::new(AtomicI16::new(store.load().unwrap_or(UNREGISTERED_ID)));

        let (events_tx, events) = unbounded();
        let handler = PeerHandler::new(store, Arc::clone(&client_id), events_tx);
        let reader = JoinOnDrop::new(session.start(handler));

        session.send(&Message::hello(client_id.load(Ordering::Acquire)))?;

        Ok(Self {
            session,
            client_id,
            events,
            _reader: reader,
        })
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The id assigned by the relay, once the handshake has completed.
    pub fn client_id(&self) -> Option<ClientId> {
        match self.client_id.load(Ordering::Acquire) {
            UNREGISTERED_ID => None,
            id => Some(id),
        }
    }

    /// Events emitted by the protocol handler, in arrival order.
    pub fn events(&self) -> &Receiver<PeerEvent> {
        &self.events
    }

    /// Streams `reader` to the relay under the given file name: one NEW_FILE
    /// frame, then a FILE_TRANSFER frame per chunk. Returns the number of
    /// payload bytes sent.
    pub fn send_file<R: Read>(&self, file_name: &str, reader: &mut R) -> Result<u64, PeerError> {
        let id = self.client_id().ok_or(PeerError::NotRegistered)?;

        self.session.send(&Message::new_file(id, file_name))?;

        let mut chunk = vec![0u8; FILE_CHUNK_LEN];
        let mut total = 0u64;
        loop {
            let count = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            self.session
                .send(&Message::file_chunk(id, chunk[.. count].to_vec()))?;
            total += count as u64;
        }
        Ok(total)
    }

    /// Sends a free-form debug frame; the relay only logs these.
    pub fn send_debug(&self, text: &str) -> Result<(), PeerError> {
        let id = self.client_id.load(Ordering::Acquire);
        self.session.send(&Message::debug_text(id, text))?;
        Ok(())
    }

    pub fn close(&self) {
        self.session.close();
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.session.close();
    }
}
