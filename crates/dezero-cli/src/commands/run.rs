//! Device run loop.
//!
//! Reads newline-delimited JSON requests from stdin and writes one JSON
//! response per line to stdout. Built-in results are written as
//! `{"notify": ...}` lines ahead of the response that produced them.

use std::sync::Arc;

use anyhow::{Context, Result};
use dezero_config::Config;
use dezero_kernel::Kernel;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use super::payloads::boot;

/// Run the device until stdin closes, Ctrl+C, or a `reboot` command.
pub(crate) async fn run_device(config: &Config) -> Result<()> {
    let (kernel, notifications) = boot(config).await?;
    let supervisor = kernel.spawn_supervisor();

    let interrupt = {
        let kernel = Arc::clone(&kernel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                kernel.shutdown();
            }
        })
    };

    info!(
        root = %config.storage.root.display(),
        tick_ms = config.runtime.tick_interval_ms,
        "Device running, reading commands from stdin"
    );
    let stdin = BufReader::new(tokio::io::stdin());
    serve(&kernel, notifications, stdin, tokio::io::stdout()).await?;

    kernel.shutdown();
    interrupt.abort();
    supervisor.await.context("supervisor task failed")?;
    info!("Device stopped");
    Ok(())
}

/// Answer requests from `reader` until it is exhausted or the kernel shuts
/// down.
pub(crate) async fn serve<R, W>(
    kernel: &Kernel,
    mut notifications: UnboundedReceiver<Vec<u8>>,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let shutdown = kernel.shutdown_token();
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some(blob) = notifications.recv() => {
                write_line(&mut writer, &notification(&blob)).await?;
            },
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read request")? else {
                    debug!("Command input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = kernel.handle_json(line).await;
                while let Ok(blob) = notifications.try_recv() {
                    write_line(&mut writer, &notification(&blob)).await?;
                }
                write_line(&mut writer, &serde_json::to_string(&response)?).await?;
            },
        }
    }
    Ok(())
}

fn notification(blob: &[u8]) -> String {
    let body = serde_json::from_slice::<Value>(blob)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(blob).into_owned()));
    json!({ "notify": body }).to_string()
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
