use crate::{
    fs::{Storage, WriteBuffer},
    registry::{Registry, RegistryFull},
};
use common::messages::{ClientId, Message, MessageType};
use io::{Session, SessionHandler};
use log::{debug, error, info};
use ring::rand::{SecureRandom, SystemRandom};
use std::{fmt::Write as _, io as std_io, str, sync::Arc};

const FRIEND_TOKEN_LEN: usize = 8;

#[derive(Copy, Clone, Debug)]
pub enum State {
    Unregistered,
    Registered,
    Transferring,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unregistered sender may not send {0:?}")]
    ProtocolViolation(MessageType),
    #[error("invalid message {0:?} for state {1:?}")]
    WrongMessageForState(MessageType, State),
    #[error("malformed {0:?} payload: {1}")]
    BadPayload(MessageType, &'static str),
    #[error(transparent)]
    Registry(#[from] RegistryFull),
    #[error("storage append for {file:?} failed: {error}")]
    Storage {
        file: String,
        error: std_io::Error,
    },
}

/// Accepting-side protocol state machine, one per connection. Owns the
/// session's registry entry and its at-most-one transfer buffer; both are
/// released when the receive loop reports the disconnect.
pub struct RelayHandler {
    session: Arc<Session>,
    registry: Arc<Registry>,
    storage: Arc<dyn Storage>,
    state: State,
    client_id: Option<ClientId>,
    friend_token: Option<String>,
    transfer: Option<WriteBuffer>,
}

impl RelayHandler {
    pub fn new(session: Arc<Session>, registry: Arc<Registry>, storage: Arc<dyn Storage>) -> Self {
        Self {
            session,
            registry,
            storage,
            state: State::Unregistered,
            client_id: None,
            friend_token: None,
            transfer: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Allocates an id on the first HELLO; a repeated HELLO echoes the id the
    /// session already holds.
    fn register(&mut self) -> Result<ClientId, RegistryFull> {
        match self.client_id {
            Some(id) => Ok(id),
            None => {
                let id = self.registry.register(Arc::clone(&self.session))?;
                self.client_id = Some(id);
                self.state = State::Registered;
                info!(
                    "registered client {id} from {:?}",
                    self.session.peer_addr()
                );
                Ok(id)
            }
        }
    }

    fn friend_token(&mut self) -> &str {
        self.friend_token.get_or_insert_with(generate_friend_token)
    }

    fn flush_transfer(&mut self) -> Result<(), HandlerError> {
        match self.transfer.as_mut() {
            Some(buffer) => buffer
                .flush(self.storage.as_ref())
                .map_err(|error| HandlerError::Storage {
                    file: buffer.file_name().to_owned(),
                    error,
                }),
            None => Ok(()),
        }
    }

    fn handle_new_file(&mut self, message: &Message) -> Result<(), HandlerError> {
        // An upload already in flight is flushed before being replaced so its
        // trailing bytes are not silently lost
        self.flush_transfer()?;

        let file_name = str::from_utf8(&message.payload)
            .map_err(|_| HandlerError::BadPayload(MessageType::NewFile, "file name is not UTF-8"))?;

        debug!(
            "client {:?} opens transfer into {file_name:?}",
            self.client_id
        );
        self.transfer = Some(WriteBuffer::new(file_name.to_owned()));
        self.state = State::Transferring;
        Ok(())
    }

    fn handle_file_chunk(&mut self, message: &Message) -> Result<(), HandlerError> {
        let buffer = match self.transfer.as_mut() {
            Some(buffer) => buffer,
            None => {
                return Err(HandlerError::WrongMessageForState(
                    MessageType::FileTransfer,
                    self.state,
                ))
            }
        };

        buffer
            .append(self.storage.as_ref(), &message.payload)
            .map_err(|error| HandlerError::Storage {
                file: buffer.file_name().to_owned(),
                error,
            })
    }
}

impl SessionHandler for RelayHandler {
    type Error = HandlerError;

    fn handle(&mut self, message: Message, write: &mut Vec<Message>) -> Result<(), HandlerError> {
        // Everything except the handshake opener requires an identified sender
        if message.is_unregistered_sender() && message.kind != MessageType::Hello {
            return Err(HandlerError::ProtocolViolation(message.kind));
        }

        match message.kind {
            MessageType::Hello => {
                let id = self.register()?;
                write.push(Message::hello_response(id));
                Ok(())
            }

            MessageType::UserInfo => match self.state {
                State::Unregistered => Err(HandlerError::WrongMessageForState(
                    MessageType::UserInfo,
                    self.state,
                )),
                _ => {
                    let token = self.friend_token().to_owned();
                    write.push(Message::user_info(&token));
                    Ok(())
                }
            },

            MessageType::NewFile => match self.state {
                State::Unregistered => Err(HandlerError::WrongMessageForState(
                    MessageType::NewFile,
                    self.state,
                )),
                _ => self.handle_new_file(&message),
            },

            MessageType::FileTransfer => self.handle_file_chunk(&message),

            MessageType::Debug => {
                debug!(
                    "client {:?}: {}",
                    self.client_id,
                    String::from_utf8_lossy(&message.payload)
                );
                Ok(())
            }

            kind @ MessageType::HelloResponse => {
                Err(HandlerError::WrongMessageForState(kind, self.state))
            }
        }
    }

    fn disconnected(&mut self) {
        if let Err(flush_error) = self.flush_transfer() {
            error!("final flush failed: {flush_error}");
        }
        self.transfer = None;

        if let Some(id) = self.client_id.take() {
            self.registry.unregister(id);
            info!("client {id} disconnected");
        }
        self.state = State::Unregistered;
    }
}

fn generate_friend_token() -> String {
    let mut bytes = [0u8; FRIEND_TOKEN_LEN];
    SystemRandom::new().fill(&mut bytes).unwrap();
    bytes.iter().fold(
        String::with_capacity(FRIEND_TOKEN_LEN * 2),
        |mut token, byte| {
            let _ = write!(token, "{byte:02x}");
            token
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::MockStorage;
    use common::constants::{RELAY_SENDER_ID, UNREGISTERED_ID};
    use io::SessionState;
    use std::net::{TcpListener, TcpStream};

    fn test_session() -> Arc<Session> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _remote = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        Session::new(accepted)
    }

    struct Fixture {
        handler: RelayHandler,
        registry: Arc<Registry>,
        storage: Arc<MockStorage>,
        session: Arc<Session>,
    }

    fn fixture() -> Fixture {
        let session = test_session();
        let registry = Arc::new(Registry::new());
        let storage = Arc::new(MockStorage::default());
        let handler = RelayHandler::new(
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&storage) as Arc<dyn Storage>,
        );
        Fixture {
            handler,
            registry,
            storage,
            session,
        }
    }

    fn registered_fixture() -> (Fixture, ClientId) {
        let mut fix = fixture();
        let mut write = Vec::new();
        fix.handler
            .handle(Message::hello(UNREGISTERED_ID), &mut write)
            .unwrap();
        let id = fix.handler.client_id.unwrap();
        (fix, id)
    }

    #[test]
    fn test_hello_registers_and_replies_with_id() {
        let mut fix = fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::hello(UNREGISTERED_ID), &mut write)
            .unwrap();

        let id = fix.handler.client_id.expect("id should be assigned");
        assert_eq!(write, vec![Message::hello_response(id)]);
        assert!(fix.registry.lookup(id).is_some());
        assert!(matches!(fix.handler.state(), State::Registered));
    }

    #[test]
    fn test_repeated_hello_echoes_same_id() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler.handle(Message::hello(id), &mut write).unwrap();

        assert_eq!(write, vec![Message::hello_response(id)]);
        assert_eq!(fix.registry.len(), 1);
    }

    #[test]
    fn test_user_info_returns_stable_friend_token() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::user_info_request(id), &mut write)
            .unwrap();
        fix.handler
            .handle(Message::user_info_request(id), &mut write)
            .unwrap();

        assert_eq!(write.len(), 2);
        assert_eq!(write[0], write[1], "token must be stable for the session");
        assert_eq!(write[0].sender_id, RELAY_SENDER_ID);
        assert!(!write[0].payload.is_empty());
    }

    #[test]
    fn test_unregistered_sender_is_rejected_without_side_effects() {
        let mut fix = fixture();
        let mut write = Vec::new();

        let result = fix.handler.handle(
            Message::file_chunk(UNREGISTERED_ID, vec![1, 2, 3]),
            &mut write,
        );

        assert!(matches!(
            result,
            Err(HandlerError::ProtocolViolation(MessageType::FileTransfer))
        ));
        assert!(write.is_empty());
        assert!(fix.handler.transfer.is_none());
        assert!(fix.registry.is_empty());
        assert_eq!(fix.session.state(), SessionState::AwaitingHandshake);
    }

    #[test]
    fn test_transfer_flushes_at_capacity_then_remainder() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::new_file(id, "report.txt"), &mut write)
            .unwrap();
        assert!(matches!(fix.handler.state(), State::Transferring));

        let data: Vec<u8> = (0 .. 20_000u32).map(|value| value as u8).collect();
        for chunk in data.chunks(4_000) {
            fix.handler
                .handle(Message::file_chunk(id, chunk.to_vec()), &mut write)
                .unwrap();
        }
        fix.handler.disconnected();

        assert_eq!(
            fix.storage.flush_sizes("report.txt"),
            vec![16_384, 20_000 - 16_384]
        );
        assert_eq!(fix.storage.contents("report.txt"), data);
    }

    #[test]
    fn test_new_file_flushes_previous_transfer() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::new_file(id, "first.bin"), &mut write)
            .unwrap();
        fix.handler
            .handle(Message::file_chunk(id, vec![0xAA; 100]), &mut write)
            .unwrap();

        fix.handler
            .handle(Message::new_file(id, "second.bin"), &mut write)
            .unwrap();

        assert_eq!(fix.storage.flush_sizes("first.bin"), vec![100]);
        assert_eq!(
            fix.handler.transfer.as_ref().unwrap().file_name(),
            "second.bin"
        );
    }

    #[test]
    fn test_chunk_without_transfer_is_rejected() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        let result = fix
            .handler
            .handle(Message::file_chunk(id, vec![1]), &mut write);

        assert!(matches!(
            result,
            Err(HandlerError::WrongMessageForState(
                MessageType::FileTransfer,
                State::Registered
            ))
        ));
        assert!(fix.storage.flush_sizes("report.txt").is_empty());
    }

    #[test]
    fn test_disconnect_releases_id_and_flushes() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::new_file(id, "tail.bin"), &mut write)
            .unwrap();
        fix.handler
            .handle(Message::file_chunk(id, vec![7u8; 42]), &mut write)
            .unwrap();

        fix.handler.disconnected();

        assert!(fix.registry.is_empty());
        assert_eq!(fix.storage.flush_sizes("tail.bin"), vec![42]);
    }

    #[test]
    fn test_debug_has_no_side_effects() {
        let (mut fix, id) = registered_fixture();
        let mut write = Vec::new();

        fix.handler
            .handle(Message::debug_text(id, "ping"), &mut write)
            .unwrap();

        assert!(write.is_empty());
        assert!(fix.handler.transfer.is_none());
    }
}
