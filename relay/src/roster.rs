use crate::{fs::Storage, logging, registry::Registry};
use common::sync::JoinOnDrop;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::{fmt::Write as _, sync::Arc, thread, time::Duration};

const ROSTER_FILE: &str = "clients.txt";

/// Handle for the snapshot thread; dropping it stops the thread promptly.
pub struct RosterTask {
    _stop: Sender<()>,
    _handle: JoinOnDrop<()>,
}

/// Periodically persists a human-readable roster of registered clients.
pub fn spawn(registry: Arc<Registry>, storage: Arc<dyn Storage>, interval: Duration) -> RosterTask {
    let (stop, stopped) = bounded::<()>(0);

    let handle = thread::spawn(move || loop {
        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => write_snapshot(&registry, storage.as_ref()),
            _ => return,
        }
    });

    RosterTask {
        _stop: stop,
        _handle: JoinOnDrop::new(handle),
    }
}

fn write_snapshot(registry: &Registry, storage: &dyn Storage) {
    let entries = registry.snapshot();

    let mut text = String::new();
    for entry in &entries {
        let addr = entry
            .addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        let _ = writeln!(
            text,
            "{},{},{:?},{}",
            entry.id,
            addr,
            entry.state,
            logging::try_localize(entry.registered_at)
        );
    }

    match storage.write(ROSTER_FILE, text.as_bytes()) {
        Ok(()) => debug!("persisted roster of {} clients", entries.len()),
        Err(error) => warn!("failed to persist roster: {error}"),
    }
}
