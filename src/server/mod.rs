//! JSON-lines transport for the retrieval protocol.
//!
//! Each input line is one request object with an `id` and an `action`; each
//! output line is the matching response carrying the same `id`. Requests are
//! enqueued in the order they are read and answered as they complete, so a
//! client must correlate by `id`.


use serde::Serialize;
use serde_json::Value;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatcherHandle, ErrorKind, Request, RequestId, Response};
use crate::{DocchatError, Result};

/// One output line
#[derive(Debug, Serialize)]
struct Reply {
    id: Option<RequestId>,
    #[serde(flatten)]
    response: Response,
}

impl Reply {
    fn invalid(id: Option<RequestId>, message: String) -> Self {
        Self {
            id,
            response: Response::Error {
                kind: ErrorKind::InvalidArgument,
                message,
            },
        }
    }
}

/// Serve the protocol on stdin/stdout until stdin closes
#[inline]
pub async fn serve_stdio(handle: DispatcherHandle) -> Result<()> {
    info!("Serving retrieval protocol on stdio");
    serve(handle, BufReader::new(io::stdin()), io::stdout()).await
}

/// Serve the protocol over any line-oriented reader and writer.
///
/// Returns once the reader is exhausted and every accepted request has been
/// answered.
pub async fn serve<R, W>(handle: DispatcherHandle, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
    // partial reads from a cancelled read_until stay in here
    let mut buf = Vec::new();
    let mut in_flight = 0_usize;
    let mut reading = true;

    while reading || in_flight > 0 {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf), if reading => {
                if read? == 0 {
                    debug!("Input closed with {} requests in flight", in_flight);
                    reading = false;
                    continue;
                }
                let raw = std::mem::take(&mut buf);

                let line = match decode_line(raw) {
                    Ok(line) => line,
                    Err(reply) => {
                        write_reply(&mut writer, &reply).await?;
                        continue;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match parse_line(line) {
                    Ok((id, request)) => match handle.submit(request) {
                        Ok(pending) => {
                            in_flight += 1;
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                let response = pending
                                    .wait()
                                    .await
                                    .unwrap_or_else(|e| Response::error(&e));
                                if reply_tx.send(Reply { id, response }).is_err() {
                                    debug!("Reply dropped: server already stopped");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to submit request: {}", e);
                            write_reply(&mut writer, &Reply { id, response: Response::error(&e) }).await?;
                        }
                    },
                    Err(reply) => write_reply(&mut writer, &reply).await?,
                }
            }
            Some(reply) = reply_rx.recv() => {
                in_flight -= 1;
                write_reply(&mut writer, &reply).await?;
            }
        }
    }

    info!("Input closed, all requests answered");
    Ok(())
}

fn decode_line(raw: Vec<u8>) -> std::result::Result<String, Reply> {
    String::from_utf8(raw).map_err(|e| {
        warn!("Rejecting input line: {}", e);
        Reply::invalid(None, format!("line is not valid UTF-8: {}", e))
    })
}

fn parse_line(line: &str) -> std::result::Result<(Option<RequestId>, Request), Reply> {
    let value: Value = serde_json::from_str(line).map_err(|e| {
        warn!("Failed to parse JSON: {}", e);
        Reply::invalid(None, format!("malformed JSON: {}", e))
    })?;

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    let request = serde_json::from_value::<Request>(value).map_err(|e| {
        warn!("Rejecting request {:?}: {}", id, e);
        Reply::invalid(id.clone(), format!("invalid request: {}", e))
    })?;

    Ok((id, request))
}

async fn write_reply<W>(writer: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(reply)
        .map_err(|e| DocchatError::Other(anyhow::Error::new(e).context("serialize reply")))?;
    line.push('\n');

    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
