//! One-shot payload management against the local store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dezero_config::Config;
use dezero_kernel::{ChannelNotifier, Kernel, KernelParts, Opcode, Request};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use super::into_body;
use crate::theme::Theme;

/// Boot a kernel on the configured store, with notifications captured.
pub(crate) async fn boot(config: &Config) -> Result<(Arc<Kernel>, UnboundedReceiver<Vec<u8>>)> {
    let (notifier, rx) = ChannelNotifier::new();
    let parts = KernelParts::host(config)
        .await?
        .with_notifier(Arc::new(notifier));
    let kernel = Kernel::assemble(config, parts).await?;
    Ok((Arc::new(kernel), rx))
}

pub(crate) async fn list_payloads(config: &Config) -> Result<()> {
    let (kernel, _rx) = boot(config).await?;
    let body = into_body(kernel.handle(&Request::new(Opcode::List)).await)?;
    let entries = body.as_array().map(Vec::as_slice).unwrap_or_default();

    if entries.is_empty() {
        println!("{}", Theme::info("No payloads installed"));
        return Ok(());
    }
    println!("{}", Theme::header("Installed Payloads"));
    println!(
        "  {:<20} {:<10} {:<12} {:<12} {:<10}",
        "ID", "VERSION", "TYPE", "CATEGORY", "STATUS"
    );
    println!("{}", Theme::separator());
    for entry in entries {
        let field = |key: &str| entry[key].as_str().unwrap_or("-").to_string();
        println!(
            "  {:<20} {:<10} {:<12} {:<12} {}",
            field("id"),
            field("version"),
            field("type"),
            field("category"),
            Theme::status(&field("status")),
        );
    }
    println!(
        "\n{}",
        Theme::dimmed(&format!("{} payload(s)", entries.len()))
    );
    Ok(())
}

pub(crate) async fn install_payload(
    config: &Config,
    manifest_path: &Path,
    artifact_path: Option<&Path>,
) -> Result<()> {
    let manifest = tokio::fs::read(manifest_path)
        .await
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let artifact = match artifact_path {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => Vec::new(),
    };
    let id = manifest_id(&manifest)?;

    let (kernel, _rx) = boot(config).await?;
    let request = Request::new(Opcode::Upload)
        .with_id(id.clone())
        .with_package(&manifest, &artifact);
    let body = into_body(kernel.handle(&request).await)?;
    println!(
        "{}",
        Theme::success(&format!(
            "Installed {} {}",
            id,
            body["version"].as_str().unwrap_or_default()
        ))
    );
    Ok(())
}

pub(crate) async fn uninstall_payload(config: &Config, id: &str) -> Result<()> {
    let (kernel, _rx) = boot(config).await?;
    into_body(kernel.handle(&Request::new(Opcode::Delete).with_id(id)).await)?;
    println!("{}", Theme::success(&format!("Removed {id}")));
    Ok(())
}

/// Execute a payload and wait for the run to end, printing any
/// notifications it produced. Ctrl+C stops the run.
pub(crate) async fn exec_payload(config: &Config, id: &str, params: &[String]) -> Result<()> {
    let (kernel, mut rx) = boot(config).await?;
    let mut request = Request::new(Opcode::Execute).with_id(id);
    for (key, value) in parse_params(params)? {
        request = request.with_param(key, value);
    }
    let body = into_body(kernel.handle(&request).await)?;
    debug!(payload_id = %id, status = %body["status"], "Execute accepted");

    let supervisor = kernel.spawn_supervisor();
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", Theme::info("Interrupted, stopping payload"));
                break;
            },
            _ = poll.tick() => {
                if !kernel.manager().status(id).await.is_live() {
                    break;
                }
            },
        }
    }
    kernel.shutdown();
    supervisor.await.context("supervisor task failed")?;

    while let Ok(blob) = rx.try_recv() {
        println!("{}", String::from_utf8_lossy(&blob));
    }
    let status = into_body(kernel.handle(&Request::new(Opcode::GetStatus).with_id(id)).await)?;
    let name = status["status"].as_str().unwrap_or("idle");
    if name == "error" {
        println!("{}", Theme::error(&format!("{id} ended in {name}")));
    } else {
        println!("{} {}", Theme::dimmed(&format!("{id}:")), Theme::status(name));
    }
    Ok(())
}

fn manifest_id(manifest: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_slice(manifest).context("manifest is not valid JSON")?;
    match value.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => bail!("manifest has no `id`"),
    }
}

fn parse_params(params: &[String]) -> Result<Vec<(String, String)>> {
    params
        .iter()
        .map(|p| match p.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("parameter `{p}` is not key=value"),
        })
        .collect()
}
