use crate::store::ClientIdStore;
use common::messages::{ClientId, Message, MessageType};
use crossbeam_channel::Sender;
use io::SessionHandler;
use log::{debug, warn};
use std::{
    str,
    sync::{
        atomic::{AtomicI16, Ordering},
        Arc,
    },
};

#[derive(Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// The relay assigned (or re-confirmed) our client id.
    Registered(ClientId),
    /// The relay shared this session's friend token.
    FriendToken(String),
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unexpected {0:?} from the relay")]
    UnexpectedMessage(MessageType),
    #[error("malformed {0:?} payload: {1}")]
    BadPayload(MessageType, &'static str),
}

/// Initiating-side protocol state machine. The handshake is driven by the
/// relay's replies: HELLO_RESPONSE assigns our id and triggers the USER_INFO
/// request, whose reply delivers the friend token.
pub struct PeerHandler<S> {
    store: S,
    client_id: Arc<AtomicI16>,
    events: Sender<PeerEvent>,
}

impl<S: ClientIdStore> PeerHandler<S> {
    pub fn new(store: S, client_id: Arc<AtomicI16>, events: Sender<PeerEvent>) -> Self {
        Self {
            store,
            client_id,
            events,
        }
    }

    fn handle_hello_response(
        &mut self,
        message: &Message,
        write: &mut Vec<Message>,
    ) -> Result<(), HandlerError> {
        let text = str::from_utf8(&message.payload)
            .map_err(|_| HandlerError::BadPayload(MessageType::HelloResponse, "not UTF-8"))?;
        let id: ClientId = text
            .trim()
            .parse()
            .map_err(|_| HandlerError::BadPayload(MessageType::HelloResponse, "not a client id"))?;

        self.client_id.store(id, Ordering::Release);
        if let Err(error) = self.store.save(id) {
            warn!("failed to persist client id {id}: {error}");
        }
        debug!("relay assigned client id {id}");

        write.push(Message::user_info_request(id));
        let _ = self.events.send(PeerEvent::Registered(id));
        Ok(())
    }

    fn handle_user_info(&mut self, message: &Message) -> Result<(), HandlerError> {
        let token = str::from_utf8(&message.payload)
            .map_err(|_| HandlerError::BadPayload(MessageType::UserInfo, "not UTF-8"))?;
        debug!("received friend token from relay");
        let _ = self.events.send(PeerEvent::FriendToken(token.to_owned()));
        Ok(())
    }
}

impl<S: ClientIdStore> SessionHandler for PeerHandler<S> {
    type Error = HandlerError;

    fn handle(&mut self, message: Message, write: &mut Vec<Message>) -> Result<(), HandlerError> {
        match message.kind {
            MessageType::HelloResponse => self.handle_hello_response(&message, write),
            MessageType::UserInfo => self.handle_user_info(&message),
            MessageType::Debug => {
                debug!("relay: {}", String::from_utf8_lossy(&message.payload));
                Ok(())
            }
            kind => Err(HandlerError::UnexpectedMessage(kind)),
        }
    }

    fn disconnected(&mut self) {
        let _ = self.events.send(PeerEvent::Disconnected);
    }
}
