use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ArtifactSource, ExecutionBackend, entry_or, image_bytes};
use crate::context::{PayloadContext, PayloadParams};
use crate::error::{PayloadError, PayloadResult};

/// First byte of a precompiled `.mpy` module.
const MPY_MAGIC: u8 = b'M';

const DEFAULT_ENTRY: &str = "main";

/// Scripting language handled by a [`ScriptBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptDialect {
    /// MicroPython source or `.mpy` bytecode.
    MicroPython,
    /// Lua source.
    Lua,
}

impl fmt::Display for ScriptDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MicroPython => f.write_str("micropython"),
            Self::Lua => f.write_str("lua"),
        }
    }
}

impl ScriptDialect {
    fn accepts(self, source: &[u8]) -> bool {
        let is_text = std::str::from_utf8(source).is_ok();
        match self {
            Self::MicroPython => is_text || source.first() == Some(&MPY_MAGIC),
            Self::Lua => is_text,
        }
    }
}

/// A script bound to its interpreter state for the duration of a run.
#[derive(Debug)]
pub struct ScriptImage {
    /// Language of the script.
    pub dialect: ScriptDialect,
    /// Function or module the interpreter enters.
    pub entry: String,
    /// Script source or bytecode.
    pub source: Vec<u8>,
    /// Parameters exposed to the script as globals.
    pub globals: PayloadParams,
}

/// Backend for interpreted payloads.
#[derive(Debug, Clone)]
pub struct ScriptBackend {
    dialect: ScriptDialect,
    artifacts: ArtifactSource,
}

impl ScriptBackend {
    /// A MicroPython backend.
    #[must_use]
    pub fn micropython(artifacts: ArtifactSource) -> Self {
        Self {
            dialect: ScriptDialect::MicroPython,
            artifacts,
        }
    }

    /// A Lua backend.
    #[must_use]
    pub fn lua(artifacts: ArtifactSource) -> Self {
        Self {
            dialect: ScriptDialect::Lua,
            artifacts,
        }
    }

    /// The language this backend runs.
    #[must_use]
    pub fn dialect(&self) -> ScriptDialect {
        self.dialect
    }
}

#[async_trait]
impl ExecutionBackend for ScriptBackend {
    fn name(&self) -> &'static str {
        match self.dialect {
            ScriptDialect::MicroPython => "micropython",
            ScriptDialect::Lua => "lua",
        }
    }

    async fn load(
        &self,
        payload_id: &str,
        ctx: &mut PayloadContext,
        params: &PayloadParams,
    ) -> PayloadResult<()> {
        let source = self.artifacts.read(payload_id).await?;
        if !self.dialect.accepts(&source) {
            return Err(PayloadError::BackendLoad {
                id: payload_id.to_string(),
                reason: format!("artifact is not a valid {} script", self.dialect),
            });
        }

        let entry = entry_or(ctx, DEFAULT_ENTRY).to_string();
        let bytes = image_bytes(&source);
        ctx.set_memory_allocated(bytes);
        ctx.runtime_handle = Some(Box::new(ScriptImage {
            dialect: self.dialect,
            entry: entry.clone(),
            source,
            globals: params.clone(),
        }));
        info!(payload_id, dialect = %self.dialect, %entry, bytes, "Script loaded");
        Ok(())
    }

    async fn stop(&self, ctx: &mut PayloadContext) -> PayloadResult<()> {
        if ctx.runtime_handle.take().is_some() {
            debug!(payload_id = %ctx.payload_id(), dialect = %self.dialect, "Interpreter released");
        }
        ctx.user_data = None;
        ctx.set_memory_allocated(0);
        Ok(())
    }

    fn memory_in_use(&self, ctx: &PayloadContext) -> Option<u64> {
        ctx.runtime::<ScriptImage>().map(|s| image_bytes(&s.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_acceptance() {
        assert!(ScriptDialect::Lua.accepts(b"print('x')"));
        assert!(!ScriptDialect::Lua.accepts(&[0x4D, 0xFF, 0xFE]));
        assert!(ScriptDialect::MicroPython.accepts(&[0x4D, 0x06, 0xFF]));
        assert!(ScriptDialect::MicroPython.accepts(b"import time"));
        assert!(!ScriptDialect::MicroPython.accepts(&[0x00, 0xFF]));
    }
}
