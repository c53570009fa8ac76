#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Codec boundary conditions: empty fields, limits, malformed input and stream splits

use bytes::BytesMut;
use channel_relay::config::MAX_FIELD_SIZE;
use channel_relay::core::codec::PacketCodec;
use channel_relay::error::ProtocolError;
use channel_relay::{ConnectionError, Packet};
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// WHOLE-BUFFER DECODING
// ============================================================================

#[test]
fn test_empty_channel_and_body() {
    let packet = Packet::message("", "");
    let bytes = packet.to_bytes().unwrap();
    assert_eq!(bytes.len(), 9);
    assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
}

#[test]
fn test_empty_input_is_truncated() {
    assert!(matches!(
        Packet::from_bytes(&[]),
        Err(ProtocolError::Truncated { needed: 1, available: 0 })
    ));
}

#[test]
fn test_unknown_tag_rejected() {
    assert_eq!(
        Packet::from_bytes(&[9, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(ProtocolError::UnknownPacketType(9))
    );
}

#[test]
fn test_body_length_beyond_input() {
    let result = Packet::from_bytes(&[0, 0, 0, 0, 1, b'c', 0, 0, 0, 10, b'a', b'b', b'c']);
    assert!(matches!(
        result,
        Err(ProtocolError::Truncated { needed: 20, available: 13 })
    ));
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = Packet::message("a", "b").to_bytes().unwrap().to_vec();
    bytes.extend_from_slice(&[1, 2]);
    assert_eq!(Packet::from_bytes(&bytes), Err(ProtocolError::TrailingBytes(2)));
}

#[test]
fn test_invalid_utf8_channel() {
    let bytes = [0, 0, 0, 0, 2, 0xC3, 0x28, 0, 0, 0, 0];
    assert_eq!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::InvalidUtf8 { field: "channel" })
    );
}

#[test]
fn test_oversized_length_prefix_rejected_without_payload() {
    // Claims a 4 GB channel; only the header is present
    let bytes = [0, 0xFF, 0xFF, 0xFF, 0xFF];
    match Packet::from_bytes(&bytes) {
        Err(ProtocolError::OversizedField { field, len, max }) => {
            assert_eq!(field, "channel");
            assert_eq!(len, u32::MAX as usize);
            assert_eq!(max, MAX_FIELD_SIZE);
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_encode_refuses_field_over_limit() {
    let mut codec = PacketCodec::new(1024);
    let mut buf = BytesMut::new();
    let result = codec.encode(Packet::message("c", "x".repeat(1025)), &mut buf);
    assert!(matches!(
        result,
        Err(ConnectionError::Protocol(ProtocolError::OversizedField { field: "body", .. }))
    ));
    assert!(buf.is_empty(), "nothing may be written for a refused packet");
}

// ============================================================================
// STREAMING DECODER
// ============================================================================

#[test]
fn test_byte_at_a_time_delivery() {
    let packet = Packet::message("chat", "héllo wörld");
    let bytes = packet.to_bytes().unwrap();

    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();
    let mut decoded = None;
    for (i, byte) in bytes.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        let result = codec.decode(&mut buf).unwrap();
        if i + 1 < bytes.len() {
            assert!(result.is_none(), "frame complete too early at byte {i}");
        } else {
            decoded = result;
        }
    }
    assert_eq!(decoded, Some(packet));
    assert!(buf.is_empty());
}

#[test]
fn test_eof_mid_frame_is_truncated() {
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 1, b'c', 0, 0, 0, 10, b'a', b'b', b'c'][..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(ConnectionError::Protocol(ProtocolError::Truncated { .. }))
    ));
}

#[test]
fn test_eof_on_frame_boundary_is_clean() {
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();
    codec.encode(Packet::message("a", "b"), &mut buf).unwrap();

    assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Packet::message("a", "b")));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

#[test]
fn test_streaming_limit_is_per_codec() {
    let mut small = PacketCodec::new(1024);
    let mut buf = BytesMut::new();
    PacketCodec::default()
        .encode(Packet::message("c", "x".repeat(2048)), &mut buf)
        .unwrap();

    assert!(matches!(
        small.decode(&mut buf),
        Err(ConnectionError::Protocol(ProtocolError::OversizedField { len: 2048, max: 1024, .. }))
    ));
}

#[test]
fn test_encoded_frame_matches_packet_bytes() {
    let codec = PacketCodec::default();
    let packet = Packet::message("news", "body");
    let frame = codec.encode_frame(&packet).unwrap();
    assert_eq!(frame.as_bytes(), &packet.to_bytes().unwrap()[..]);
    assert_eq!(frame.len(), packet.encoded_len());
}
