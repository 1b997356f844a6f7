//! Frame reading from a TCP byte stream

use std::io;

use bytes::BytesMut;
use doip_wire::{DecodeError, DoipFrame, DoipHeader, DoipTcpMessage, HEADER_LEN};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound for any declared payload length on a data connection
pub const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Read the next complete frame.
///
/// The header is validated as soon as its 8 bytes are buffered, so a bad
/// sync pattern or an oversized length is reported without waiting for the
/// payload. Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut BytesMut,
) -> Result<Option<DoipFrame<DoipTcpMessage>>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if buffer.len() >= HEADER_LEN {
            let header = DoipHeader::parse(&buffer[..])?;
            header.check_max_length(MAX_FRAME_PAYLOAD)?;

            let total = HEADER_LEN + header.payload_length as usize;
            if buffer.len() >= total {
                let frame = buffer.split_to(total);
                let payload = &frame[HEADER_LEN..];
                return Ok(Some(DoipFrame::decode_payload(&header, payload)?));
            }
            buffer.reserve(total - buffer.len());
        }

        if reader.read_buf(buffer).await? == 0 {
            return if buffer.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed with partial frame",
                )
                .into())
            };
        }
    }
}
