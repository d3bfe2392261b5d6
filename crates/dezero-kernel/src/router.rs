//! Dispatch of command requests onto the payload manager.

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use dezero_payload::{PayloadPackage, PayloadStatus, ResponseCode};

use crate::command::{Opcode, Request, Response};
use crate::journal::JOURNAL_CAPACITY;
use crate::kernel::Kernel;

impl Kernel {
    /// Handle one JSON request line.
    pub async fn handle_json(&self, text: &str) -> Response {
        match Request::from_json(text) {
            Ok(request) => self.handle(&request).await,
            Err(e) => {
                debug!(error = %e, "Rejected request envelope");
                Response::error(ResponseCode::InvalidParams, e.to_string())
            },
        }
    }

    /// Handle one decoded request.
    pub async fn handle(&self, request: &Request) -> Response {
        let op = match request.cmd.resolve() {
            Ok(op) => op,
            Err(unknown) => {
                warn!(command = %unknown, "Unknown command");
                return Response::error(
                    ResponseCode::InvalidCommand,
                    format!("unknown command {unknown}"),
                );
            },
        };
        debug!(command = %op, id = ?request.id, "Handling command");

        let result = match op {
            Opcode::Ping => Ok(Response::ok(json!({ "pong": true }))),
            Opcode::GetInfo => Ok(self.info().await),
            Opcode::List => Ok(self.list().await),
            Opcode::Upload => self.upload(request).await,
            Opcode::Delete => self.delete(request).await,
            Opcode::Execute => self.execute(request).await,
            Opcode::Stop => self.stop(request).await,
            Opcode::GetStatus => Ok(self.status(request).await),
            Opcode::GetLogs => Ok(self.logs(request).await),
            Opcode::OtaBegin | Opcode::OtaWrite | Opcode::OtaEnd => Ok(Response::error(
                ResponseCode::Error,
                "firmware update is not supported",
            )),
            Opcode::Reboot => Ok(self.reboot().await),
        };
        result.unwrap_or_else(|response| response)
    }

    async fn info(&self) -> Response {
        let storage = match self.store.space().await {
            Ok(space) => json!({
                "total": space.total_bytes,
                "used": space.used_bytes,
                "free": space.free_bytes(),
            }),
            Err(e) => {
                warn!(error = %e, "Storage space query failed");
                Value::Null
            },
        };
        let payloads = self.manager.available().await.len();
        let running = self.manager.running().await;

        Response::ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_ms": self.uptime_ms(),
            "free_memory": self.memory.free_bytes(),
            "storage": storage,
            "payloads": payloads,
            "running": running,
            "builtins": self.manager.builtin_names(),
        }))
    }

    async fn list(&self) -> Response {
        let mut entries = Vec::new();
        for m in self.manager.available().await {
            let status = self.manager.status(&m.id).await;
            entries.push(json!({
                "id": m.id,
                "name": m.name,
                "version": m.version,
                "type": m.payload.type_name,
                "category": m.category,
                "description": m.description,
                "permissions": m.permissions,
                "status": status,
            }));
        }
        Response::ok(Value::Array(entries))
    }

    async fn upload(&self, request: &Request) -> Result<Response, Response> {
        let id = request.require_id()?;
        if request.manifest.is_none() {
            return Err(Response::error(
                ResponseCode::InvalidParams,
                "missing `manifest`",
            ));
        }
        let package = PayloadPackage {
            manifest: Request::decode_field("manifest", request.manifest.as_deref())?,
            artifact: Request::decode_field("data", request.data.as_deref())?,
        };
        let manifest = self.manager.install(id, &package).await?;
        info!(payload_id = %id, version = %manifest.version, "Payload uploaded");
        Ok(Response::ok(json!({
            "id": manifest.id,
            "version": manifest.version,
        })))
    }

    async fn delete(&self, request: &Request) -> Result<Response, Response> {
        let id = request.require_id()?;
        self.manager.uninstall(id).await?;
        Ok(Response::ok(json!({ "id": id })))
    }

    async fn execute(&self, request: &Request) -> Result<Response, Response> {
        let id = request.require_id()?;
        self.manager.execute(id, &request.payload_params()).await?;
        let status = self.manager.status(id).await;
        Ok(Response::ok(json!({ "id": id, "status": status })))
    }

    async fn stop(&self, request: &Request) -> Result<Response, Response> {
        let id = request.require_id()?;
        self.manager.stop(id).await?;
        let status = self.manager.status(id).await;
        Ok(Response::ok(json!({ "id": id, "status": status })))
    }

    async fn status(&self, request: &Request) -> Response {
        let Some(id) = request.id.as_deref().filter(|id| !id.is_empty()) else {
            return Response::ok(json!({ "running": self.manager.running().await }));
        };
        match self.manager.context(id).await {
            Some(snapshot) => Response::ok(json!(snapshot)),
            None if self.manager.manifest(id).await.is_some() => Response::ok(json!({
                "payload_id": id,
                "status": PayloadStatus::Idle,
            })),
            None => Response::error(
                ResponseCode::NotFound,
                format!("payload not found: {id}"),
            ),
        }
    }

    async fn logs(&self, request: &Request) -> Response {
        let limit = request
            .params
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(JOURNAL_CAPACITY);
        let entries = self.journal.recent(limit).await;
        Response::ok(json!({
            "entries": entries,
            "dropped": self.journal.dropped().await,
        }))
    }

    async fn reboot(&self) -> Response {
        info!("Reboot requested");
        self.manager.stop_all().await;
        self.shutdown();
        Response::ok(json!({ "rebooting": true }))
    }
}
