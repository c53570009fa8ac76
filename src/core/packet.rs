//! Packet model and the frame layout shared by the whole-buffer and streaming decoders.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{FRAME_HEADER_LEN, MAX_FIELD_SIZE, PACKET_TYPE_MESSAGE};
use crate::error::constants::{FIELD_BODY, FIELD_CHANNEL};
use crate::error::ProtocolError;

/// A typed unit of exchange between peers and the relay.
///
/// Every variant owns its own type tag on the wire. Adding a variant means extending
/// [`Packet::type_tag`], [`scan_frame`] and [`parse_frame`]; the exhaustive matches
/// make a forgotten case a compile error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Packet {
    /// A message published on a named channel.
    Message { channel: String, body: String },
}

impl Packet {
    /// Build a [`Packet::Message`].
    pub fn message(channel: impl Into<String>, body: impl Into<String>) -> Self {
        Packet::Message {
            channel: channel.into(),
            body: body.into(),
        }
    }

    /// Wire discriminator of this packet kind
    pub fn type_tag(&self) -> u8 {
        match self {
            Packet::Message { .. } => PACKET_TYPE_MESSAGE,
        }
    }

    /// Exact number of bytes this packet occupies on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Message { channel, body } => FRAME_HEADER_LEN + channel.len() + body.len(),
        }
    }

    /// Encode into a standalone frame, refusing fields above [`MAX_FIELD_SIZE`].
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        write_frame(self, &mut buf, MAX_FIELD_SIZE)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame occupying the whole of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        match scan_frame(data, MAX_FIELD_SIZE)? {
            FrameScan::Incomplete { needed } => Err(ProtocolError::Truncated {
                needed,
                available: data.len(),
            }),
            FrameScan::Complete(len) if len < data.len() => {
                Err(ProtocolError::TrailingBytes(data.len() - len))
            }
            FrameScan::Complete(len) => parse_frame(&data[..len]),
        }
    }
}

/// Outcome of looking for a frame boundary at the start of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameScan {
    /// A full frame of this many bytes is available
    Complete(usize),
    /// At least `needed` bytes in total are required before the frame can be judged
    Incomplete { needed: usize },
}

/// Find the length of the frame at the start of `buf` without copying anything.
///
/// Rejects unknown tags and oversized length prefixes as soon as they are visible, so a
/// hostile length never drives an allocation.
pub(crate) fn scan_frame(buf: &[u8], max_field_size: usize) -> Result<FrameScan, ProtocolError> {
    let Some(&tag) = buf.first() else {
        return Ok(FrameScan::Incomplete { needed: 1 });
    };

    match tag {
        PACKET_TYPE_MESSAGE => {
            let mut offset = 1;
            for field in [FIELD_CHANNEL, FIELD_BODY] {
                let Some(len) = read_len(buf, offset) else {
                    return Ok(FrameScan::Incomplete { needed: offset + 4 });
                };
                if len > max_field_size {
                    return Err(ProtocolError::OversizedField {
                        field,
                        len,
                        max: max_field_size,
                    });
                }
                offset += 4 + len;
            }
            if buf.len() < offset {
                Ok(FrameScan::Incomplete { needed: offset })
            } else {
                Ok(FrameScan::Complete(offset))
            }
        }
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

/// Decode a buffer already known to hold exactly one complete frame.
pub(crate) fn parse_frame(frame: &[u8]) -> Result<Packet, ProtocolError> {
    let tag = frame.first().copied().ok_or(ProtocolError::Truncated {
        needed: 1,
        available: 0,
    })?;

    match tag {
        PACKET_TYPE_MESSAGE => {
            let (channel, rest) = read_field(frame, 1, FIELD_CHANNEL)?;
            let (body, _) = read_field(frame, rest, FIELD_BODY)?;
            Ok(Packet::Message { channel, body })
        }
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

/// Append the frame for `packet` to `dst`.
pub(crate) fn write_frame(
    packet: &Packet,
    dst: &mut BytesMut,
    max_field_size: usize,
) -> Result<(), ProtocolError> {
    match packet {
        Packet::Message { channel, body } => {
            check_len(FIELD_CHANNEL, channel.len(), max_field_size)?;
            check_len(FIELD_BODY, body.len(), max_field_size)?;

            dst.reserve(packet.encoded_len());
            dst.put_u8(PACKET_TYPE_MESSAGE);
            dst.put_u32(channel.len() as u32);
            dst.put_slice(channel.as_bytes());
            dst.put_u32(body.len() as u32);
            dst.put_slice(body.as_bytes());
            Ok(())
        }
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    // Length prefixes are u32 regardless of the configured maximum
    let max = max.min(u32::MAX as usize);
    if len > max {
        return Err(ProtocolError::OversizedField { field, len, max });
    }
    Ok(())
}

fn read_len(buf: &[u8], offset: usize) -> Option<usize> {
    let bytes = buf.get(offset..offset + 4)?;
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(bytes);
    Some(u32::from_be_bytes(prefix) as usize)
}

fn read_field(
    frame: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<(String, usize), ProtocolError> {
    let len = read_len(frame, offset).ok_or(ProtocolError::Truncated {
        needed: offset + 4,
        available: frame.len(),
    })?;
    let start = offset + 4;
    let bytes = frame
        .get(start..start + len)
        .ok_or(ProtocolError::Truncated {
            needed: start + len,
            available: frame.len(),
        })?;
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 { field })?;
    Ok((text.to_owned(), start + len))
}
