//! Root confinement for client-supplied paths.
//!
//! Every direct (non-share) operation funnels its logical path through
//! [`AllowedRoots::resolve`], which normalizes the input to an absolute path
//! and decides whether it lies within one of the configured roots. The
//! containment test is component-aligned, never a raw string prefix, so a
//! sibling such as `C:\Foobar` is not judged contained in root `C:\Foo`.
//! Symlinks are resolved before the check, on both the direct and the share
//! resolver, so a link inside a root cannot extend its authority.

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// The configured set of allowed root prefixes. Built once at startup and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Normalizes and canonicalizes each configured root. Roots that cannot be
    /// made absolute are dropped; order is preserved and the first root is the
    /// default base for relative requests.
    pub fn new<I>(roots: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let roots = roots
            .into_iter()
            .filter_map(|r| {
                let abs = r.absolutize().ok()?.into_owned();
                Some(canonicalize_existing(&abs))
            })
            .collect();
        AllowedRoots { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve a request path to an absolute path and decide whether it is
    /// allowed. Returns `(allowed, absolute_path)` and never panics; malformed
    /// input resolves to `(false, _)`.
    pub fn resolve(&self, request: &str) -> (bool, PathBuf) {
        let trimmed = request.trim();
        // Empty input addresses the default root itself.
        if trimmed.is_empty() || trimmed == "." {
            return match self.roots.first() {
                Some(root) => (true, root.clone()),
                None => (false, PathBuf::new()),
            };
        }
        let native = normalize_separators(trimmed);
        let candidate = Path::new(&native);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            match self.roots.first() {
                Some(root) => root.join(candidate),
                None => return (false, candidate.to_path_buf()),
            }
        };
        // Collapse `.`/`..` syntactically, then resolve symlinks on whatever
        // prefix of the path exists.
        let abs = match joined.absolutize() {
            Ok(p) => p.into_owned(),
            Err(_) => return (false, joined),
        };
        let abs = canonicalize_existing(&abs);
        (self.contains(&abs), abs)
    }

    /// Component-aligned containment: true when `abs` equals one of the roots
    /// or sits strictly below it.
    pub fn contains(&self, abs: &Path) -> bool {
        self.roots.iter().any(|root| abs.starts_with(root))
    }
}

/// True when `target` is `base` itself or any descendant of it, compared by
/// path components. Used for the move-into-own-subtree guard.
pub fn is_same_or_descendant(base: &Path, target: &Path) -> bool {
    target.starts_with(base)
}

/// Resolve symlinks on the longest existing prefix of `path`, then re-append
/// the non-existing remainder unchanged. `path` must already be absolute with
/// dot segments collapsed.
pub fn canonicalize_existing(path: &Path) -> PathBuf {
    let mut probe = path;
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match std::fs::canonicalize(probe) {
            Ok(mut real) => {
                for part in tail.iter().rev() {
                    real.push(part);
                }
                return real;
            }
            Err(_) => match (probe.parent(), probe.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    probe = parent;
                }
                _ => return path.to_path_buf(),
            },
        }
    }
}

#[cfg(windows)]
fn normalize_separators(input: &str) -> String {
    let mut s = input.replace('/', "\\");
    // Expand a bare drive letter ("C:") to its root form ("C:\").
    let bytes = s.as_bytes();
    if s.len() == 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        s.push('\\');
    }
    s
}

#[cfg(not(windows))]
fn normalize_separators(input: &str) -> String {
    // Backslash is a legal filename character on unix hosts; the input is
    // taken as-is.
    input.to_string()
}
