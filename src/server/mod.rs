//! TCP transport.
//!
//! Each accepted connection gets its own task.  Calls on one connection
//! are handled one after another; every call goes through the shared
//! [`Pipeline`].
//!
//! Streaming calls:
//! - `Upload`: the `call` frame carries the first message, then the client
//!   sends `upload_chunk` frames and a closing `upload_end`.  The frames
//!   are always drained up to `upload_end`, even when the handler has
//!   already given up, so the connection stays in sync.
//! - `Download`: the server writes `download_chunk` frames while the
//!   handler runs, then the final `reply`.

pub mod frames;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{Code, KeeperError, Result, Status};
use crate::rpc::messages::{DownloadChunk, UploadRequest};
use crate::rpc::{Call, CallKind, Method, Pipeline, Streams};
use frames::{read_frame, write_frame, ClientFrame, ServerFrame};

pub use frames::MAX_FRAME_LEN;

#[derive(Clone)]
pub struct Server {
    pipeline: Arc<Pipeline>,
    stream_depth: usize,
}

impl Server {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            stream_depth: crate::service::DEFAULT_CONDUIT_DEPTH,
        }
    }

    /// Buffer depth of the channels bridging frames and stream handlers.
    pub fn with_stream_depth(mut self, depth: usize) -> Self {
        self.stream_depth = depth.max(1);
        self
    }

    /// Accept connections until `shutdown` resolves.  Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer).await {
                            warn!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        debug!(%peer, "connection accepted");
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            let frame = match read_frame::<_, ClientFrame>(&mut reader, &mut line).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    let status = Status::new(Code::InvalidArgument, "malformed frame");
                    let _ = write_frame(&mut writer, &ServerFrame::error(status)).await;
                    return Err(e);
                }
            };

            let (method, metadata, body) = match frame {
                ClientFrame::Call {
                    method,
                    metadata,
                    body,
                } => (method, metadata, body),
                other => {
                    let status = Status::new(Code::InvalidArgument, "expected a call frame");
                    let _ = write_frame(&mut writer, &ServerFrame::error(status)).await;
                    return Err(KeeperError::Transport(format!("unexpected frame {other:?}")));
                }
            };

            let method = match method.parse::<Method>() {
                Ok(m) => m,
                Err(e) => {
                    warn!(%peer, method = %method, "unknown method");
                    write_frame(&mut writer, &ServerFrame::error(Status::from(&e))).await?;
                    continue;
                }
            };

            let mut call = Call::new(method, body);
            call.metadata = metadata;

            let result = match method.kind() {
                CallKind::Unary => self.pipeline.dispatch(call).await,
                CallKind::ClientStreaming => self.run_upload(call, &mut reader, &mut line).await?,
                CallKind::ServerStreaming => self.run_download(call, &mut writer).await?,
            };

            let reply = match result {
                Ok(body) => ServerFrame::Reply { body },
                Err(e) => ServerFrame::error(Status::from(&e)),
            };
            write_frame(&mut writer, &reply).await?;
        }

        debug!(%peer, "connection closed");
        Ok(())
    }

    /// Run an upload call while feeding it the following chunk frames.
    ///
    /// The outer `Result` is a transport failure that ends the connection;
    /// the inner one is the call's outcome.
    async fn run_upload<R>(
        &self,
        call: Call,
        reader: &mut R,
        line: &mut String,
    ) -> Result<Result<Value>>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let (tx, rx) = mpsc::channel::<Result<UploadRequest>>(self.stream_depth);
        let call = call.with_streams(Streams::Upload(Box::new(rx)));

        let (outcome, fed) = tokio::join!(self.pipeline.dispatch(call), feed_upload(reader, line, tx));
        fed?;
        Ok(outcome)
    }

    /// Run a download call, writing each chunk as a frame.
    async fn run_download<W>(&self, call: Call, writer: &mut W) -> Result<Result<Value>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let (tx, rx) = mpsc::channel::<DownloadChunk>(self.stream_depth);
        let call = call.with_streams(Streams::Download(Box::new(tx)));

        let (outcome, forwarded) =
            tokio::join!(self.pipeline.dispatch(call), forward_download(rx, writer));
        forwarded?;
        Ok(outcome)
    }
}

/// Read upload frames up to `upload_end`, passing chunks to the handler.
///
/// Keeps reading after the handler hangs up so the next frame on the
/// connection is a fresh call.
async fn feed_upload<R>(
    reader: &mut R,
    line: &mut String,
    tx: mpsc::Sender<Result<UploadRequest>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = match read_frame::<_, ClientFrame>(reader, line).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = tx
                    .send(Err(KeeperError::Transport("stream closed mid-upload".into())))
                    .await;
                return Err(KeeperError::Transport("stream closed mid-upload".into()));
            }
            Err(e) => {
                let _ = tx
                    .send(Err(KeeperError::Transport("malformed upload frame".into())))
                    .await;
                return Err(e);
            }
        };

        match frame {
            ClientFrame::UploadChunk { body } => {
                let msg = serde_json::from_value::<UploadRequest>(body)
                    .map_err(|e| KeeperError::Transport(format!("bad upload chunk: {e}")));
                // A closed receiver means the handler is done; keep draining.
                let _ = tx.send(msg).await;
            }
            ClientFrame::UploadEnd => return Ok(()),
            ClientFrame::Call { .. } => {
                let _ = tx
                    .send(Err(KeeperError::Transport("upload interrupted".into())))
                    .await;
                return Err(KeeperError::Transport(
                    "call frame received before upload_end".into(),
                ));
            }
        }
    }
}

async fn forward_download<W>(mut rx: mpsc::Receiver<DownloadChunk>, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = rx.recv().await {
        let body = serde_json::to_value(&chunk)?;
        write_frame(writer, &ServerFrame::DownloadChunk { body }).await?;
    }
    Ok(())
}
