mod config;
mod fs;
mod handler;
mod logging;
mod registry;
mod roster;

pub use config::Config;

use crate::{
    fs::{FsStorage, Storage},
    handler::RelayHandler,
    registry::Registry,
};
use anyhow::Context;
use crossbeam_channel::{bounded, Receiver};
use io::{Listener, Session};
use log::{error, info, warn};
use std::{sync::Arc, thread};

pub type HashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

fn main() {
    let config = match Config::get_or_try_init() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to initialize config: {error}");
            return;
        }
    };

    if let Err(error) = logging::init_logger("relay") {
        eprintln!("Failed to initialize logger: {error}");
        return;
    }

    if let Err(error) = run(config) {
        error!("Relay terminated with an error: {error:#}");
    }

    logging::cleanup();
    println!();
}

fn run(config: &'static Config) -> anyhow::Result<()> {
    let storage =
        Arc::new(FsStorage::new(&config.data_dir).context("Failed to initialize storage")?);
    let registry = Arc::new(Registry::new());

    let listener = Arc::new(
        Listener::bind(("0.0.0.0", config.tcp_port))
            .with_context(|| format!("Failed to bind TCP port {}", config.tcp_port))?,
    );
    info!("Listening on {}", listener.local_addr());

    let _roster = roster::spawn(
        Arc::clone(&registry),
        Arc::clone(&storage) as Arc<dyn Storage>,
        config.roster_interval,
    );

    let accept = thread::spawn({
        let listener = Arc::clone(&listener);
        move || accept_loop(listener, registry, storage)
    });

    shutdown_signal().recv().ok();
    info!("Shutting down");

    listener.shutdown();
    let _ = accept.join();
    Ok(())
}

fn accept_loop(listener: Arc<Listener>, registry: Arc<Registry>, storage: Arc<FsStorage>) {
    while let Some(incoming) = listener.accept() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(error) => {
                warn!("Failed to accept connection: {error}");
                continue;
            }
        };

        let session = Session::new(stream);
        info!("New client connected from {:?}", session.peer_addr());

        let handler = RelayHandler::new(
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&storage) as Arc<dyn Storage>,
        );
        // Detached: the receive loop exits on its own and the handler
        // releases the registry entry when it does
        drop(session.start(handler));
    }
}

fn shutdown_signal() -> Receiver<()> {
    let (sender, receiver) = bounded(1);

    let set_handler_result = ctrlc::set_handler({
        let mut sender = Some(sender);
        move || {
            if let Some(sender) = sender.take() {
                let _ = sender.send(());
            }
        }
    });

    if let Err(error) = set_handler_result {
        error!("Failed to set shutdown hook: {error}");
        // The sender has been dropped, so the caller's recv returns immediately
    }

    receiver
}
