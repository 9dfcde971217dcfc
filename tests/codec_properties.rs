//! Property tests for checksums, address packing and stream resynchronisation

use std::io;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use rs_trackside::codec::{crc16, xor, StreamDecoder, CRC16_BLOCK};
use rs_trackside::protocol::diy::{DiyCodec, IoState, LocoAddress, Message};

/// Opcode that no DIY frame starts with.
const GARBAGE: u8 = 0x77;

fn encode(messages: &[Message]) -> Vec<u8> {
    let mut out = Vec::new();
    for message in messages {
        out.extend_from_slice(message.to_frame().as_bytes());
    }
    out
}

fn io_state() -> impl Strategy<Value = IoState> {
    prop_oneof![Just(IoState::False), Just(IoState::True), Just(IoState::Invalid)]
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Heartbeat),
        any::<u16>().prop_map(|address| Message::GetInputState { address }),
        (any::<u16>(), io_state()).prop_map(|(address, state)| Message::SetInputState { address, state }),
        (any::<u16>(), io_state()).prop_map(|(address, state)| Message::SetOutputState { address, state }),
    ]
}

proptest! {
    #[test]
    fn xor_of_data_and_checksum_is_zero(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut framed = data.clone();
        framed.push(xor(&data));
        prop_assert_eq!(xor(&framed), 0);
    }

    #[test]
    fn flipped_bit_fails_checksum(
        address in any::<u16>(),
        state in io_state(),
        byte in 1usize..4,
        bit in 0u8..8,
    ) {
        let mut frame = Message::SetOutputState { address, state }.to_frame();
        prop_assert!(frame.is_checksum_valid());
        frame.as_bytes_mut()[byte] ^= 1 << bit;
        prop_assert!(!frame.is_checksum_valid());
        frame.update_checksum();
        prop_assert!(frame.is_checksum_valid());
    }

    #[test]
    fn crc_ignores_explicit_zero_padding(data in prop::collection::vec(any::<u8>(), 1..64)) {
        let mut padded = data.clone();
        while padded.len() % CRC16_BLOCK != 0 {
            padded.push(0);
        }
        prop_assert_eq!(crc16(&data), crc16(&padded));
    }

    #[test]
    fn loco_address_survives_packing(address in 0u16..=0x3FFF, long: bool, subscribe: bool) {
        let packed = LocoAddress::new(address, long).encode(subscribe);
        let (decoded, flag) = LocoAddress::decode(packed);
        prop_assert_eq!(decoded, LocoAddress::new(address, long));
        prop_assert_eq!(flag, subscribe);
    }

    #[test]
    fn garbage_is_skipped_and_counted(
        garbage in 0usize..40,
        messages in prop::collection::vec(message(), 1..8),
    ) {
        let mut bytes = vec![GARBAGE; garbage];
        bytes.extend(encode(&messages));

        let mut decoder = StreamDecoder::<DiyCodec>::new();
        let mut received = Vec::new();
        let dropped = decoder.feed(&bytes, |m| received.push(m));

        prop_assert_eq!(dropped, garbage);
        prop_assert_eq!(received, messages);
        prop_assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn split_points_do_not_matter(
        messages in prop::collection::vec(message(), 1..8),
        chunk in 1usize..16,
    ) {
        let bytes = encode(&messages);
        let mut decoder = StreamDecoder::<DiyCodec>::new();
        let mut received = Vec::new();
        for piece in bytes.chunks(chunk) {
            prop_assert_eq!(decoder.feed(piece, |m| received.push(m)), 0);
        }
        prop_assert_eq!(received, messages);
    }
}

/// Log sink shared with a test subscriber.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn dropped_bytes_are_logged_with_count_and_dump() {
    let log = CapturedLog::default();
    let sink = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || sink.clone())
        .finish();

    let mut bytes = vec![GARBAGE, GARBAGE, GARBAGE];
    bytes.extend(encode(&[Message::Heartbeat]));

    let mut decoder = StreamDecoder::<DiyCodec>::new();
    let mut received = Vec::new();
    let dropped = tracing::subscriber::with_default(subscriber, || {
        decoder.feed(&bytes, |m| received.push(m))
    });

    assert_eq!(dropped, 3);
    assert_eq!(received, vec![Message::Heartbeat]);
    let text = log.text();
    assert!(text.contains("WARN"), "{text}");
    assert!(text.contains("dropped 3 bytes: 77 77 77"), "{text}");
}

#[test]
fn clean_stream_logs_nothing() {
    let log = CapturedLog::default();
    let sink = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    let bytes = encode(&[Message::Heartbeat, Message::GetInputState { address: 4 }]);
    let mut decoder = StreamDecoder::<DiyCodec>::new();
    let dropped = tracing::subscriber::with_default(subscriber, || decoder.feed(&bytes, |_| {}));

    assert_eq!(dropped, 0);
    assert!(!log.text().contains("malformed"));
}
