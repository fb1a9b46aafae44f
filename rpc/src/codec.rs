use std::io;
use std::io::Cursor;

use bytes::Buf;
use bytes::BytesMut;
use rmp_serde::decode::Error as DecodeError;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;

use crate::error::RpcError;
use crate::message::RpcMessage;

/// Upper bound on the bytes buffered for a single message. Whole-buffer
/// reads of very large files stay well below this.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Reads and writes MessagePack values back to back with no framing of
/// their own, the way Neovim speaks msgpack-rpc over stdio and sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

/// The value was cut short by the end of the buffer rather than malformed.
fn is_incomplete(err: &DecodeError) -> bool {
    match err {
        DecodeError::InvalidMarkerRead(err) | DecodeError::InvalidDataRead(err) => {
            err.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

impl Decoder for MessageCodec {
    type Item = RpcMessage;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcMessage>, RpcError> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        match rmp_serde::from_read::<_, RpcMessage>(&mut cursor) {
            Ok(message) => {
                let consumed = usize::try_from(cursor.position()).unwrap_or(src.len());
                src.advance(consumed);
                Ok(Some(message))
            }
            Err(err) if is_incomplete(&err) => {
                if src.len() >= MAX_FRAME_LENGTH {
                    return Err(RpcError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("message exceeds {MAX_FRAME_LENGTH} bytes"),
                    )));
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Encoder<RpcMessage> for MessageCodec {
    type Error = RpcError;

    fn encode(&mut self, item: RpcMessage, dst: &mut BytesMut) -> Result<(), RpcError> {
        let payload = rmp_serde::to_vec(&item)?;
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
