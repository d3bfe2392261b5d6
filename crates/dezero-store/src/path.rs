use crate::{StoreError, StoreResult};
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a store path into its components.
///
/// Store paths are relative, `/`-separated and may not climb above the root.
/// `""` and `"."` name the root itself and yield no components.
///
/// # Errors
///
/// Returns `StoreError::SandboxViolation` for absolute paths or `..`
/// traversal above the root.
pub fn normalize(request_path: &str) -> StoreResult<Vec<String>> {
    let req = Path::new(request_path);

    if req.is_absolute() {
        return Err(StoreError::SandboxViolation(format!(
            "absolute paths are not allowed: {request_path}"
        )));
    }

    let mut parts: Vec<String> = Vec::new();
    for component in req.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(StoreError::SandboxViolation(
                    "prefix or root components are not allowed".into(),
                ));
            },
            Component::CurDir => {},
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(StoreError::SandboxViolation(format!(
                        "attempted to traverse above store root: {request_path}"
                    )));
                }
            },
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
        }
    }
    Ok(parts)
}

/// Resolves a store path against a physical root directory.
///
/// # Errors
///
/// See [`normalize`].
pub fn resolve_path(base_root: &Path, request_path: &str) -> StoreResult<PathBuf> {
    let mut resolved = base_root.to_path_buf();
    for part in normalize(request_path)? {
        resolved.push(part);
    }
    Ok(resolved)
}

/// Joins store path segments with `/`.
#[must_use]
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
