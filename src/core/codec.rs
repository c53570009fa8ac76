use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FIELD_SIZE;
use crate::core::packet::{parse_frame, scan_frame, write_frame, FrameScan, Packet};
use crate::error::{ConnectionError, ProtocolError};

/// Tokio codec turning a byte stream into [`Packet`]s and back.
///
/// Frames are self-delimiting, so no outer length prefix is needed. Any decode error is a
/// stream-wide condition: the caller must drop the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    max_field_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_FIELD_SIZE)
    }
}

impl PacketCodec {
    pub fn new(max_field_size: usize) -> Self {
        Self { max_field_size }
    }

    pub fn max_field_size(&self) -> usize {
        self.max_field_size
    }

    /// Encode `packet` once so the same bytes can be written to many connections.
    pub fn encode_frame(&self, packet: &Packet) -> Result<EncodedFrame, ProtocolError> {
        let mut buf = BytesMut::with_capacity(packet.encoded_len());
        write_frame(packet, &mut buf, self.max_field_size)?;
        Ok(EncodedFrame(buf.freeze()))
    }
}

/// A complete, validated frame ready to be written verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Bytes);

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match scan_frame(&src[..], self.max_field_size)? {
            FrameScan::Incomplete { needed } => {
                src.reserve(needed.saturating_sub(src.len()));
                Ok(None)
            }
            FrameScan::Complete(len) => {
                let frame = src.split_to(len);
                Ok(Some(parse_frame(&frame)?))
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(packet) = self.decode(buf)? {
            return Ok(Some(packet));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // The stream ended inside a frame
        let needed = match scan_frame(&buf[..], self.max_field_size)? {
            FrameScan::Incomplete { needed } => needed,
            FrameScan::Complete(len) => len,
        };
        Err(ProtocolError::Truncated {
            needed,
            available: buf.len(),
        }
        .into())
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ConnectionError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst, self.max_field_size)?;
        Ok(())
    }
}

impl Encoder<EncodedFrame> for PacketCodec {
    type Error = ConnectionError;

    fn encode(&mut self, item: EncodedFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.0);
        Ok(())
    }
}
