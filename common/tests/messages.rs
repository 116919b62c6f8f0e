use common::{
    constants::{HEADER_LEN, MAX_PAYLOAD_LEN, RELAY_SENDER_ID, UNREGISTERED_ID},
    messages::{ContentType, Error, Message, MessageType},
};

fn test_round_trip(message: &Message) {
    let bytes = message.encode().unwrap();
    assert_eq!(bytes.len(), message.frame_len(), "frame length");
    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(&decoded, message, "round trip");
}

#[test]
fn test_hello_bytes() {
    let bytes = Message::hello(UNREGISTERED_ID).encode().unwrap();
    assert_eq!(bytes, [0x00, 0x00, 0x01, 0x01, 0xFF, 0xFF]);
}

#[test]
fn test_debug_bytes() {
    let bytes = Message::debug_text(7, "abc").encode().unwrap();
    assert_eq!(
        bytes,
        [0x00, 0x03, 0x00, 0x00, 0x00, 0x07, b'a', b'b', b'c']
    );
}

#[test]
fn test_hello_response() {
    let message = Message::hello_response(742);
    assert_eq!(message.kind, MessageType::HelloResponse);
    assert_eq!(message.content_type, ContentType::Text);
    assert_eq!(message.sender_id, RELAY_SENDER_ID);
    assert_eq!(message.payload, b"742");
    test_round_trip(&message);
}

#[test]
fn test_round_trips() {
    test_round_trip(&Message::hello(UNREGISTERED_ID));
    test_round_trip(&Message::hello(12));
    test_round_trip(&Message::user_info_request(12));
    test_round_trip(&Message::user_info("1.52fa90b1dp30"));
    test_round_trip(&Message::new_file(12, "report.txt"));
    test_round_trip(&Message::file_chunk(12, vec![0xAB; 1000]));
    test_round_trip(&Message::debug_text(12, "ping"));
}

#[test]
fn test_trailing_bytes_ignored() {
    let message = Message::new_file(3, "notes.md");
    let mut bytes = message.encode().unwrap();
    bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(Message::decode(&bytes).unwrap(), message);
}

#[test]
fn test_truncated_header() {
    let bytes = Message::hello(1).encode().unwrap();
    for len in 0 .. HEADER_LEN {
        match Message::decode(&bytes[.. len]) {
            Err(Error::TruncatedFrame { needed, available }) => {
                assert_eq!(needed, HEADER_LEN);
                assert_eq!(available, len);
            }
            other => panic!("expected TruncatedFrame, got {other:?}"),
        }
    }
}

#[test]
fn test_truncated_payload() {
    let bytes = Message::file_chunk(5, vec![1, 2, 3, 4]).encode().unwrap();
    match Message::decode(&bytes[.. bytes.len() - 1]) {
        Err(Error::TruncatedFrame { needed, available }) => {
            assert_eq!(needed, bytes.len());
            assert_eq!(available, bytes.len() - 1);
        }
        other => panic!("expected TruncatedFrame, got {other:?}"),
    }
}

#[test]
fn test_max_payload() {
    let message = Message::file_chunk(5, vec![0x55; MAX_PAYLOAD_LEN]);
    test_round_trip(&message);
}

#[test]
fn test_payload_too_large() {
    let message = Message::file_chunk(5, vec![0u8; MAX_PAYLOAD_LEN + 1]);
    assert!(matches!(
        message.encode(),
        Err(Error::PayloadTooLarge(len)) if len == MAX_PAYLOAD_LEN + 1
    ));
}

#[test]
fn test_malformed_length() {
    // Declared length 0x8000 is above the protocol maximum
    let bytes = [0x80, 0x00, 0x01, 0x01, 0x00, 0x01];
    assert!(matches!(
        Message::decode(&bytes),
        Err(Error::MalformedFrame(0x8000))
    ));
}

#[test]
fn test_bad_message_type() {
    let bytes = [0x00, 0x00, 0x09, 0x01, 0x00, 0x01];
    assert!(matches!(
        Message::decode(&bytes),
        Err(Error::BadMessageType(9))
    ));
}

#[test]
fn test_bad_content_type() {
    let bytes = [0x00, 0x00, 0x01, 0x07, 0x00, 0x01];
    assert!(matches!(
        Message::decode(&bytes),
        Err(Error::BadContentType(7))
    ));
}
