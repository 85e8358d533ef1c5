//! Message codec: a closed set of typed messages, one message per
//! line, framed the way the teacher's IPC protocol frames requests — a
//! self-describing tagged JSON record — except the wire delimiter here is a
//! trailing `\n` rather than a length prefix, because that framing
//! is a named external contract of this system.

mod message;

pub use message::{
    CompletedJobsResponse, ManagerStatus, Message, TesterStatus,
};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode a message as a `\n`-terminated JSON line.
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = serde_json::to_vec(msg)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Decode a single `\n`-terminated (or bare) JSON line into a [`Message`].
pub fn decode(line: &[u8]) -> Result<Message, ProtocolError> {
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    Ok(serde_json::from_slice(trimmed)?)
}

/// Read one frame from `reader`. Every read reads up to and including `\n`;
/// a clean EOF with no bytes read is reported as [`ProtocolError::ConnectionClosed`]
/// rather than a parse error.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<Message, ProtocolError>
where
R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    decode(&line)
}

/// Write one frame to `writer` and flush it immediately — frames must not be
/// interleaved or left partially buffered across suspension points.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
W: tokio::io::AsyncWrite + Unpin,
{
    let bytes = encode(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
