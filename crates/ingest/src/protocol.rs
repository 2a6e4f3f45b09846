//! Socket wire format.
//!
//! Request: a big-endian `u16` byte length, that many bytes of UTF-8 file
//! name, then the file's bytes until the client half-closes. Response: one
//! line.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read the length-prefixed file name at the head of a request.
///
/// # Errors
///
/// Returns [`Framing`](ErrorKind::Framing) if the stream ends before the
/// name does, or the name is empty or not UTF-8.
pub async fn read_name<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = reader
        .read_u16()
        .await
        .or_raise(|| ErrorKind::Framing("stream ended before name length".to_string()))?;
    if len == 0 {
        exn::bail!(ErrorKind::Framing("empty file name".to_string()));
    }
    let mut name = vec![0; usize::from(len)];
    reader
        .read_exact(&mut name)
        .await
        .or_raise(|| ErrorKind::Framing(format!("stream ended before {len}-byte name")))?;
    String::from_utf8(name).or_raise(|| ErrorKind::Framing("file name is not UTF-8".to_string()))
}

/// The single line a socket client gets back.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Reply {
    #[display("UPLOAD_SUCCESS:{_0}")]
    Success(String),
    #[display("UPLOAD_FAILED")]
    Failed,
    #[display("QUEUE_FULL")]
    QueueFull,
}
impl Reply {
    /// Send the reply and flush. One attempt only.
    pub async fn send<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let line = format!("{self}\n");
        writer.write_all(line.as_bytes()).await.or_raise(|| ErrorKind::Respond)?;
        writer.flush().await.or_raise(|| ErrorKind::Respond)
    }
}
