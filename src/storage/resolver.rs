use crate::errors::{AppError, AppResult};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Absolute path under the root plus its normalized root-relative form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub abs: PathBuf,
    pub rel: String,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool { self.rel.is_empty() }

    /// Final segment of the relative path; empty for the root.
    pub fn name(&self) -> &str {
        self.rel.rsplit('/').next().unwrap_or("")
    }

    /// Relative path of the containing directory; empty for root-level entries.
    pub fn parent_rel(&self) -> &str {
        self.rel.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` must exist; it is canonicalized once and never changes afterwards.
    pub fn new(root: &Path) -> AppResult<Self> {
        let root = dunce::canonicalize(root).map_err(|e| AppError::Io(format!("storage root: {e}")))?;
        if !root.is_dir() {
            return Err(AppError::Io("storage root is not a directory".into()));
        }
        Ok(Self { root })
    }

    pub fn resolve(&self, relative: &str) -> AppResult<ResolvedPath> {
        let segments = match split_relative(relative) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = relative, reason = %e, "rejected client path");
                return Err(e);
            }
        };
        let mut abs = self.root.clone();
        for s in &segments {
            abs.push(s);
        }
        let resolved = ResolvedPath { abs, rel: segments.join("/") };
        self.ensure_contained(&resolved)?;
        Ok(resolved)
    }

    /// Resolves `name` as a direct child of an already resolved directory.
    pub fn resolve_child(&self, parent: &ResolvedPath, name: &str) -> AppResult<ResolvedPath> {
        validate_name(name)?;
        let resolved = ResolvedPath { abs: parent.abs.join(name), rel: super::join_rel(&parent.rel, name) };
        self.ensure_contained(&resolved)?;
        Ok(resolved)
    }

    // Symlinks may still point outside the root even when the lexical path is clean.
    fn ensure_contained(&self, resolved: &ResolvedPath) -> AppResult<()> {
        let mut probe: &Path = &resolved.abs;
        loop {
            match dunce::canonicalize(probe) {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => {
                    warn!(path = %resolved.rel, "path escapes storage root via link");
                    return Err(AppError::InvalidPath(resolved.rel.clone()));
                }
                Err(e) if probe == self.root.as_path() => {
                    return Err(AppError::Io(format!("storage root: {e}")));
                }
                Err(_) => match probe.parent() {
                    Some(p) => probe = p,
                    None => return Err(AppError::InvalidPath(resolved.rel.clone())),
                },
            }
        }
    }
}

fn split_relative(relative: &str) -> AppResult<Vec<String>> {
    if relative.is_empty() {
        return Ok(Vec::new());
    }
    if relative.contains('\0') {
        return Err(AppError::InvalidPath("path contains NUL".into()));
    }
    let normalized = relative.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(AppError::InvalidPath(format!("absolute path not allowed: {relative}")));
    }
    if has_drive_prefix(&normalized) {
        return Err(AppError::InvalidPath(format!("drive prefix not allowed: {relative}")));
    }
    let mut segments = Vec::new();
    for seg in normalized.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return Err(AppError::InvalidPath(format!("parent segment not allowed: {relative}"))),
            s => {
                if !is_plain_segment(s) {
                    return Err(AppError::InvalidPath(format!("malformed segment: {relative}")));
                }
                segments.push(s.to_string());
            }
        }
    }
    Ok(segments)
}

fn has_drive_prefix(p: &str) -> bool {
    let b = p.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

// A segment must map to exactly one normal component on the host platform.
fn is_plain_segment(s: &str) -> bool {
    let mut comps = Path::new(s).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}

/// Checks a single entry name used by create, rename and upload.
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidArgument("name must not be empty".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(AppError::InvalidArgument(format!("name must not contain path separators: {name}")));
    }
    if name == "." || name == ".." || name.contains('\0') || has_drive_prefix(name) || !is_plain_segment(name) {
        return Err(AppError::InvalidPath(format!("malformed name: {name}")));
    }
    Ok(())
}
