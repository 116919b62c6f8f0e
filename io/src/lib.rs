#![deny(rust_2018_idioms)]

pub mod listener;
pub mod session;

pub use listener::Listener;
pub use session::{SendError, Session, SessionHandler, SessionState};
