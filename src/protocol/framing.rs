//! Content-Length framing for automation messages.
//!
//! Wire format: `Content-Length: N\r\n\r\n{json}`. Extra header lines are
//! tolerated and ignored; only Content-Length is required.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::Message;

const CONTENT_LENGTH: &str = "Content-Length:";

/// Upper bound for a single frame body. Anything larger is treated as a
/// corrupted stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Upper bound for one header line, terminator included.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Encode a message into a complete frame (header and body).
pub fn encode_frame(message: &Message) -> io::Result<Vec<u8>> {
    let body = serde_json::to_vec(message).map_err(io::Error::other)?;
    let mut frame = format!("{} {}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads frames from a byte stream.
///
/// Owns its `BufReader` so bytes buffered past one frame are kept for the
/// next call.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `UnexpectedEof` when the stream ends, including a clean end
    /// between frames; `InvalidData` for malformed or oversized headers.
    pub async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut content_length = None;

        let len = loop {
            let mut line = String::new();
            let mut limited = (&mut self.inner).take(MAX_HEADER_LINE as u64 + 1);
            let read = limited.read_line(&mut line).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed while reading frame header",
                ));
            }
            if read > MAX_HEADER_LINE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("header line exceeds limit of {} bytes", MAX_HEADER_LINE),
                ));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if let Some(len) = content_length {
                    break len;
                }
                // Stray blank line between frames
                continue;
            }

            if let Some(value) = line.strip_prefix(CONTENT_LENGTH) {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid Content-Length {:?}: {}", value.trim(), e),
                    )
                })?;
                content_length = Some(len);
            }
        };

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN),
            ));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Read and decode the next message.
    pub async fn read_message(&mut self) -> io::Result<Message> {
        let body = self.read_frame().await?;
        decode_body(&body)
    }
}

/// Decode a frame body into a message.
pub fn decode_body(body: &[u8]) -> io::Result<Message> {
    serde_json::from_slice(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
