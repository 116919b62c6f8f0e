use common::sync::JoinOnDrop;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts connections on a dedicated thread and hands them over through a
/// channel, so whoever consumes them never blocks the accept loop itself.
pub struct Listener {
    running: Arc<AtomicBool>,
    incoming: Receiver<io::Result<TcpStream>>,
    local_addr: SocketAddr,
    _handle: JoinOnDrop<()>,
}

impl Listener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        // Non-blocking so the accept thread can notice shutdown
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let running = Arc::new(AtomicBool::new(true));
        let (sender, incoming) = unbounded();
        let handle = thread::spawn({
            let running = Arc::clone(&running);
            move || listen(listener, sender, running)
        });

        Ok(Self {
            running,
            incoming,
            local_addr,
            _handle: JoinOnDrop::new(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until the next connection attempt, returning `None` once the
    /// listener has shut down.
    pub fn accept(&self) -> Option<io::Result<TcpStream>> {
        self.incoming.recv().ok()
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen(
    listener: TcpListener,
    sender: Sender<io::Result<TcpStream>>,
    running: Arc<AtomicBool>,
) {
    for stream in listener.incoming() {
        if !running.load(Ordering::Relaxed) {
            break;
        }

        match stream {
            Err(error) if error.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }

            stream => {
                // Accepted sockets must not inherit the listener's
                // non-blocking mode
                if let Ok(stream) = &stream {
                    let _ = stream.set_nonblocking(false);
                }
                if sender.send(stream).is_err() {
                    break;
                }
            }
        }
    }
}
