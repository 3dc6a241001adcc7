//! JSON-lines console: requests on stdin, replies and log events on stdout.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::control::{ControlPlane, EventSink, Reply, Request, Target};
use crate::error::Result;

#[derive(Serialize)]
struct Line<'a> {
    target: Target,
    #[serde(flatten)]
    reply: &'a Reply,
}

/// Writes every reply as one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

pub type StdioSink = JsonLinesSink<Stdout>;

impl StdioSink {
    pub fn stdout() -> Self {
        JsonLinesSink::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for JsonLinesSink<W> {
    async fn emit(&self, target: Target, reply: &Reply) -> Result<()> {
        let mut line = serde_json::to_vec(&Line { target, reply })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Serves requests from `reader` until EOF or until the control plane is shut down.
pub async fn serve_console<R>(reader: R, control: &ControlPlane) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let shutdown = control.shutdown_token();
    let mut lines = reader.lines();
    info!("Console ready");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(line) {
            Ok(request) => control.handle(request).await,
            Err(e) => {
                let reply = Reply::error("request", format!("Malformed request: {}", e));
                control.sink().emit(Target::Requester, &reply).await?;
            }
        }
    }
    Ok(())
}
