//! Logical path normalization.
//!
//! Sandbox paths are `/`-separated and rooted at the sandbox, never at the
//! host filesystem. Normalization strips redundant separators and `.`
//! segments; `..` is rejected outright rather than resolved, so a path can
//! never climb toward a mount boundary.

use super::SandboxError;

/// Normalize a logical path into its segments.
///
/// `""`, `"/"` and `"."` all normalize to the empty segment list (the
/// sandbox root). Errors:
/// - embedded NUL or a `\` separator: [`SandboxError::InvalidPath`]
/// - any `..` segment: [`SandboxError::PermissionEscalation`]
pub fn normalize(path: &str) -> Result<Vec<String>, SandboxError> {
    if path.contains('\0') {
        return Err(SandboxError::InvalidPath {
            path: path.to_string(),
            reason: "embedded NUL byte".to_string(),
        });
    }
    if path.contains('\\') {
        return Err(SandboxError::InvalidPath {
            path: path.to_string(),
            reason: "backslash separators are not supported; use '/'".to_string(),
        });
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(SandboxError::PermissionEscalation {
                    path: path.to_string(),
                    reason: "'..' segments are not allowed".to_string(),
                });
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

/// Render segments back into a canonical logical path.
#[must_use]
pub fn join(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// True when `prefix` is a leading subsequence of `segments`.
#[must_use]
pub fn has_prefix(segments: &[String], prefix: &[String]) -> bool {
    segments.len() >= prefix.len() && segments[..prefix.len()] == *prefix
}
