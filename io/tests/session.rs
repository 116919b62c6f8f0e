use common::{
    constants::HEADER_LEN,
    messages::{Message, MessageType},
};
use crossbeam_channel::{unbounded, Sender};
use io::{Listener, SendError, Session, SessionHandler};
use std::{
    convert::Infallible,
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    time::Duration,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

enum Received {
    Message(Message),
    Disconnected,
}

struct Collector {
    sender: Sender<Received>,
}

impl SessionHandler for Collector {
    type Error = Infallible;

    fn handle(&mut self, message: Message, _write: &mut Vec<Message>) -> Result<(), Infallible> {
        self.sender.send(Received::Message(message)).unwrap();
        Ok(())
    }

    fn disconnected(&mut self) {
        let _ = self.sender.send(Received::Disconnected);
    }
}

/// Echoes every payload back as a debug frame.
struct Echo;

impl SessionHandler for Echo {
    type Error = Infallible;

    fn handle(&mut self, message: Message, write: &mut Vec<Message>) -> Result<(), Infallible> {
        write.push(Message::file_chunk(message.sender_id, message.payload));
        Ok(())
    }
}

fn connected_pair() -> (Arc<Session>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let remote = TcpStream::connect(addr).unwrap();
    let (accepted, _) = listener.accept().unwrap();
    (Session::new(accepted), remote)
}

fn sample_messages() -> Vec<Message> {
    vec![
        Message::hello(-1),
        Message::new_file(4, "report.txt"),
        Message::file_chunk(4, (0 .. 255).collect()),
        Message::file_chunk(4, vec![0x42; 5000]),
        Message::user_info_request(4),
    ]
}

fn run_chunked(chunk_len: usize) -> Vec<Message> {
    let (session, mut remote) = connected_pair();
    let (sender, receiver) = unbounded();
    let _reader = session.start(Collector { sender });

    let mut bytes = Vec::new();
    for message in &sample_messages() {
        bytes.extend_from_slice(&message.encode().unwrap());
    }
    for chunk in bytes.chunks(chunk_len) {
        remote.write_all(chunk).unwrap();
    }
    drop(remote);

    let mut received = Vec::new();
    loop {
        match receiver.recv_timeout(RECV_TIMEOUT).unwrap() {
            Received::Message(message) => received.push(message),
            Received::Disconnected => return received,
        }
    }
}

#[test]
fn test_framing_is_chunk_size_independent() {
    let expected = sample_messages();
    let contiguous = run_chunked(usize::MAX);
    let byte_at_a_time = run_chunked(1);
    let small_chunks = run_chunked(7);

    assert_eq!(contiguous, expected);
    assert_eq!(byte_at_a_time, expected);
    assert_eq!(small_chunks, expected);
}

#[test]
fn test_replies_are_framed() {
    let (session, mut remote) = connected_pair();
    let _reader = session.start(Echo);

    let payload: Vec<u8> = (0 .. 100).collect();
    remote
        .write_all(&Message::file_chunk(9, payload.clone()).encode().unwrap())
        .unwrap();

    let reply = read_frame(&mut remote);
    assert_eq!(reply.kind, MessageType::FileTransfer);
    assert_eq!(reply.sender_id, 9);
    assert_eq!(reply.payload, payload);
}

#[test]
fn test_send_fails_fast_after_close() {
    let (session, _remote) = connected_pair();
    session.close();
    assert!(matches!(
        session.send(&Message::hello(-1)),
        Err(SendError::Disconnected)
    ));
}

#[test]
fn test_handler_observes_remote_disconnect() {
    let (session, remote) = connected_pair();
    let (sender, receiver) = unbounded();
    let _reader = session.start(Collector { sender });

    drop(remote);
    assert!(matches!(
        receiver.recv_timeout(RECV_TIMEOUT).unwrap(),
        Received::Disconnected
    ));
}

#[test]
fn test_concurrent_sends_never_interleave() {
    let (session, mut remote) = connected_pair();
    session.start(Echo); // marks the session connected

    // Small enough in total that loopback buffering absorbs every send
    let threads: Vec<_> = (0 .. 4)
        .map(|thread_id: u8| {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                for _ in 0 .. 25 {
                    let payload = vec![thread_id; 128];
                    session
                        .send(&Message::file_chunk(thread_id as i16, payload))
                        .unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // Every frame must parse cleanly and carry a single writer's payload
    for _ in 0 .. 4 * 25 {
        let frame = read_frame(&mut remote);
        assert_eq!(frame.payload.len(), 128);
        let writer = frame.payload[0];
        assert_eq!(frame.sender_id, writer as i16);
        assert!(frame.payload.iter().all(|&byte| byte == writer));
    }
}

#[test]
fn test_listener_hands_over_connections() {
    let listener = Listener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr();

    let _remote = TcpStream::connect(addr).unwrap();
    let accepted = listener.accept().unwrap().unwrap();
    assert_eq!(accepted.local_addr().unwrap().port(), addr.port());

    listener.shutdown();
    assert!(listener.accept().is_none());
}

fn read_frame(stream: &mut TcpStream) -> Message {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).unwrap();
    let payload_len = u16::from_be_bytes([header[0], header[1]]) as usize;

    let mut frame = header.to_vec();
    frame.resize(HEADER_LEN + payload_len, 0);
    stream.read_exact(&mut frame[HEADER_LEN ..]).unwrap();
    Message::decode(&frame).unwrap()
}
