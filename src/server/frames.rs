//! Wire frames: one JSON object per line, tagged by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Code, KeeperError, Result, Status};
use crate::rpc::Metadata;

/// Upper bound on a single frame, newline included.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Call {
        method: String,
        #[serde(default)]
        metadata: Metadata,
        #[serde(default)]
        body: Value,
    },
    UploadChunk {
        body: Value,
    },
    UploadEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply { body: Value },
    DownloadChunk { body: Value },
    Error { code: Code, message: String },
}

impl ServerFrame {
    pub fn error(status: Status) -> Self {
        ServerFrame::Error {
            code: status.code,
            message: status.message,
        }
    }
}

/// Serialize `frame` and write it followed by a newline.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame.  `Ok(None)` means the peer closed the stream
/// cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R, line: &mut String) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_FRAME_LEN as u64)
        .read_line(line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && n >= MAX_FRAME_LEN {
        return Err(KeeperError::Transport("frame too large".into()));
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| KeeperError::Transport(format!("malformed frame: {e}")))
}
