//! Filesystem operation surface: listing, metadata, text read/save, mkdir,
//! delete, rename, move, copy, search and undo-of-move.
//!
//! Every operation takes paths that have already been vetted by the root or
//! share resolver, or resolves them here through [`AllowedRoots`] before any
//! OS call. Destructive operations never overwrite an existing destination;
//! they fail with Conflict instead.

use filetime::FileTime;
use path_absolutize::Absolutize;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::error::{AppError, AppResult};
use crate::paths::{canonicalize_existing, is_same_or_descendant, AllowedRoots};
use crate::undo::{UndoKind, UndoLedger};

/// Directories skipped by name search; noise that explodes result counts.
const SEARCH_BLACKLIST: &[&str] = &[
    "node_modules",
    ".git",
    "venv",
    ".venv",
    "__pycache__",
    "$RECYCLE.BIN",
    "System Volume Information",
    ".idea",
    ".vscode",
];

const SEARCH_MAX_RESULTS: usize = 500;

/// Read-only projection of one directory entry, recomputed on every listing.
#[derive(Debug, Clone, Serialize)]
pub struct EntryMeta {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Epoch seconds.
    pub modified: f64,
}

/// Full metadata projection for a single path.
#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: f64,
    pub created: f64,
    pub mode: u32,
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveResult {
    pub path: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_token: Option<String>,
}

fn epoch_secs(t: std::io::Result<SystemTime>) -> f64 {
    t.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// List `abs_dir`, directories first, then case-insensitive name order.
/// Entries whose metadata cannot be read are skipped.
pub fn list_dir(abs_dir: &Path, only_dirs: bool) -> AppResult<Vec<EntryMeta>> {
    if !abs_dir.is_dir() {
        return Err(AppError::not_found("dir_not_found", "Directory not found"));
    }
    let read = fs::read_dir(abs_dir)?;
    let mut entries: Vec<EntryMeta> = Vec::new();
    for entry in read.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        let is_dir = file_type.is_dir();
        if only_dirs && !is_dir {
            continue;
        }
        // Do not follow symlinks when sizing entries.
        let Ok(meta) = entry.path().symlink_metadata() else { continue };
        entries.push(EntryMeta {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_string_lossy().into_owned(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            modified: epoch_secs(meta.modified()),
        });
    }
    sort_entries(&mut entries);
    Ok(entries)
}

fn sort_entries(entries: &mut [EntryMeta]) {
    entries.sort_by(|a, b| {
        (!a.is_dir, a.name.to_lowercase()).cmp(&(!b.is_dir, b.name.to_lowercase()))
    });
}

pub fn build_metadata(abs: &Path) -> AppResult<FileMeta> {
    let meta = fs::metadata(abs)?;
    let is_dir = meta.is_dir();
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| abs.to_string_lossy().into_owned());
    Ok(FileMeta {
        name,
        path: abs.to_string_lossy().into_owned(),
        is_dir,
        size: if is_dir { 0 } else { meta.len() },
        modified: epoch_secs(meta.modified()),
        created: {
            let created = epoch_secs(meta.created());
            if created > 0.0 { created } else { epoch_secs(meta.modified()) }
        },
        mode: mode_bits(&meta),
        readonly: meta.permissions().readonly(),
    })
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(_meta: &fs::Metadata) -> u32 {
    0
}

/// Best-effort updates of modification time and the readonly flag. Failures
/// here surface as a processing error (400), never as a containment kind.
pub fn update_meta(
    abs: &Path,
    modified: Option<f64>,
    readonly: Option<bool>,
) -> AppResult<FileMeta> {
    if let Some(mtime) = modified {
        let secs = mtime.trunc() as i64;
        let nanos = ((mtime - mtime.trunc()) * 1e9) as u32;
        filetime::set_file_mtime(abs, FileTime::from_unix_time(secs, nanos))
            .map_err(|_| AppError::user("meta_update_failed", "Failed to update modified time"))?;
    }
    if let Some(ro) = readonly {
        set_readonly(abs, ro)
            .map_err(|_| AppError::user("meta_update_failed", "Failed to update readonly flag"))?;
    }
    build_metadata(abs)
}

#[cfg(unix)]
fn set_readonly(abs: &Path, readonly: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(abs)?.permissions().mode();
    let new_mode = if readonly { mode & !0o222 } else { mode | 0o200 };
    fs::set_permissions(abs, fs::Permissions::from_mode(new_mode))
}

#[cfg(not(unix))]
fn set_readonly(abs: &Path, readonly: bool) -> std::io::Result<()> {
    let mut perms = fs::metadata(abs)?.permissions();
    perms.set_readonly(readonly);
    fs::set_permissions(abs, perms)
}

/// UTF-8 text read. Content with NUL bytes is reported as non-text; other
/// invalid sequences are replaced, matching lossy editor behavior.
pub fn read_text(abs: &Path) -> AppResult<String> {
    if !abs.is_file() {
        return Err(AppError::not_found("file_not_found", "File not found"));
    }
    let bytes = fs::read(abs)?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            if bytes.contains(&0) {
                Err(AppError::unsupported_media("not_text", "Not a text file"))
            } else {
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }
}

pub fn save_text(abs: &Path, content: &str) -> AppResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(abs, content)?;
    Ok(())
}

pub fn mkdir(abs: &Path) -> AppResult<()> {
    fs::create_dir_all(abs)?;
    Ok(())
}

/// Delete a file, or a directory tree. Inside a tree, per-entry failures are
/// swallowed and the walk continues; a failure on the top-level target itself
/// propagates.
pub fn delete(abs: &Path) -> AppResult<()> {
    if !abs.exists() {
        return Err(AppError::not_found("not_found", "Path not found"));
    }
    if abs.is_dir() {
        remove_tree_best_effort(abs)?;
    } else {
        fs::remove_file(abs)?;
    }
    Ok(())
}

fn remove_tree_best_effort(dir: &Path) -> std::io::Result<()> {
    if let Ok(read) = fs::read_dir(dir) {
        for entry in read.flatten() {
            let p = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                let _ = remove_tree_best_effort(&p);
            } else {
                let _ = fs::remove_file(&p);
            }
        }
    }
    fs::remove_dir(dir)
}

/// Rename within the same parent directory. The new name must stay inside the
/// allowed roots and must not collide with an existing entry.
pub fn rename(roots: &AllowedRoots, abs: &Path, new_name: &str) -> AppResult<PathBuf> {
    if !abs.exists() {
        return Err(AppError::not_found("not_found", "Path not found"));
    }
    let parent = abs
        .parent()
        .ok_or_else(|| AppError::user("rename_root", "Cannot rename a root"))?;
    let candidate = parent.join(new_name);
    let target = candidate
        .absolutize()
        .map(|p| canonicalize_existing(&p))
        .map_err(|_| AppError::path_not_allowed())?;
    if !roots.contains(&target) {
        return Err(AppError::path_not_allowed());
    }
    if target.exists() {
        return Err(AppError::conflict("target_exists", "Target exists"));
    }
    fs::rename(abs, &target)?;
    Ok(target)
}

/// Move `src_req` to `dst_req` (both logical request paths). A destination
/// that is an existing directory receives the source under its own name.
/// Guards: moving a directory into its own subtree is Conflict; moving onto
/// the identical canonical path is a reported no-op; an existing target is
/// Conflict. A successful move registers its inverse in the undo ledger.
pub fn move_path(
    roots: &AllowedRoots,
    undo: &UndoLedger,
    src_req: &str,
    dst_req: &str,
) -> AppResult<MoveResult> {
    let (ok_src, src) = roots.resolve(src_req);
    let (ok_dst, dst) = roots.resolve(dst_req);
    if !(ok_src && ok_dst) {
        return Err(AppError::path_not_allowed());
    }
    if !src.exists() {
        return Err(AppError::not_found("not_found", "Source not found"));
    }
    let target = if dst.is_dir() {
        match src.file_name() {
            Some(name) => dst.join(name),
            None => return Err(AppError::user("move_root", "Cannot move a root")),
        }
    } else {
        dst
    };
    if target == src {
        return Ok(MoveResult { path: target.to_string_lossy().into_owned(), skipped: true, undo_token: None });
    }
    if src.is_dir() && is_same_or_descendant(&src, &target) {
        return Err(AppError::conflict(
            "move_into_self",
            "Cannot move a directory into itself",
        ));
    }
    if target.exists() {
        return Err(AppError::conflict("target_exists", "Target exists"));
    }
    move_item(&src, &target)?;
    let token = undo.register(UndoKind::Move, target.clone(), src);
    Ok(MoveResult {
        path: target.to_string_lossy().into_owned(),
        skipped: false,
        undo_token: Some(token),
    })
}

/// Apply the inverse of a previous move. The token is consumed on lookup;
/// both endpoints are re-validated against the allowed roots and the original
/// location must be vacant.
pub fn undo_move(roots: &AllowedRoots, undo: &UndoLedger, token: &str) -> AppResult<PathBuf> {
    let entry = undo
        .consume(token)
        .ok_or_else(|| AppError::not_found("undo_not_found", "Undo token not found"))?;
    debug_assert_eq!(entry.kind, UndoKind::Move);
    let current = canonicalize_existing(&entry.current);
    let original = canonicalize_existing(&entry.original);
    if !(roots.contains(&current) && roots.contains(&original)) {
        return Err(AppError::path_not_allowed());
    }
    if original.exists() {
        return Err(AppError::conflict(
            "undo_target_exists",
            "Destination exists; cannot undo",
        ));
    }
    if !current.exists() {
        return Err(AppError::not_found("not_found", "Moved item no longer exists"));
    }
    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent)?;
    }
    move_item(&current, &original)?;
    Ok(original)
}

/// Rename, falling back to copy-then-delete when the rename crosses devices.
fn move_item(src: &Path, dst: &Path) -> AppResult<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
                remove_tree_best_effort(src)?;
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)?;
            }
            Ok(())
        }
    }
}

/// Copy `src_req` to `dst_req`. Same destination rules as move; an existing
/// target is Conflict, copying a directory into its own subtree is Conflict.
pub fn copy_path(roots: &AllowedRoots, src_req: &str, dst_req: &str) -> AppResult<PathBuf> {
    let (ok_src, src) = roots.resolve(src_req);
    let (ok_dst, dst) = roots.resolve(dst_req);
    if !(ok_src && ok_dst) {
        return Err(AppError::path_not_allowed());
    }
    if !src.exists() {
        return Err(AppError::not_found("not_found", "Source not found"));
    }
    let target = if dst.is_dir() {
        match src.file_name() {
            Some(name) => dst.join(name),
            None => return Err(AppError::user("copy_root", "Cannot copy a root")),
        }
    } else {
        dst
    };
    if target.exists() {
        return Err(AppError::conflict("target_exists", "Target exists"));
    }
    if src.is_dir() {
        if is_same_or_descendant(&src, &target) {
            return Err(AppError::conflict(
                "copy_into_self",
                "Cannot copy a directory into itself",
            ));
        }
        copy_dir_recursive(&src, &target)?;
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &target)?;
    }
    Ok(target)
}

/// Recursive copy; per-file failures inside the tree are skipped, a failure
/// creating the top-level target propagates.
fn copy_dir_recursive(src: &Path, dst: &Path) -> AppResult<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let rel = match entry.path().strip_prefix(src) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let out = dst.join(rel);
        if entry.file_type().is_dir() {
            let _ = fs::create_dir_all(&out);
        } else if entry.file_type().is_file() {
            if let Some(parent) = out.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::copy(entry.path(), &out);
        }
    }
    Ok(())
}

/// Recursive, depth-capped, case-insensitive name search with a result cap
/// and a blacklist of bulk directories. Unreadable entries are skipped.
pub fn search(abs_dir: &Path, query: &str, max_depth: usize) -> AppResult<Vec<EntryMeta>> {
    if !abs_dir.is_dir() {
        return Err(AppError::not_found("dir_not_found", "Directory not found"));
    }
    let needle = query.to_lowercase();
    let mut results: Vec<EntryMeta> = Vec::new();
    let walker = WalkDir::new(abs_dir)
        .min_depth(1)
        .max_depth(max_depth.max(1))
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && SEARCH_BLACKLIST.contains(&e.file_name().to_string_lossy().as_ref()))
        });
    for entry in walker.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_lowercase().contains(&needle) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let is_dir = meta.is_dir();
        results.push(EntryMeta {
            name,
            path: entry.path().to_string_lossy().into_owned(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            modified: epoch_secs(meta.modified()),
        });
        if results.len() >= SEARCH_MAX_RESULTS {
            break;
        }
    }
    sort_entries(&mut results);
    Ok(results)
}

/// Constrain an upload's client-supplied relative path to stay under the
/// destination directory. Absolute or escaping inputs fall back to `fallback`
/// (the bare filename).
pub fn upload_target(dest_abs: &Path, rel_path: Option<&str>, fallback: &str) -> AppResult<PathBuf> {
    let rel = rel_path.map(str::trim).filter(|s| !s.is_empty());
    let name: &Path = match rel {
        Some(r) if !Path::new(r).is_absolute() && !Path::new(r).has_root() => Path::new(r),
        _ => Path::new(fallback),
    };
    let dest = canonicalize_existing(dest_abs);
    let candidate = dest.join(name);
    let abs = candidate
        .absolutize()
        .map(|p| p.into_owned())
        .map_err(|_| AppError::forbidden("upload_path", "Invalid relative path"))?;
    // Resolve symlinks before the containment check, same discipline as the
    // root and share resolvers; a link inside the destination must not let an
    // upload land outside it.
    let abs = canonicalize_existing(&abs);
    if !abs.starts_with(&dest) {
        return Err(AppError::forbidden("upload_path", "Invalid relative path"));
    }
    Ok(abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roots_for(dir: &TempDir) -> AllowedRoots {
        AllowedRoots::new(vec![dir.path().to_path_buf()])
    }

    #[test]
    fn listing_sorts_dirs_first_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("Zeta")).unwrap();
        fs::create_dir(tmp.path().join("alpha")).unwrap();
        fs::write(tmp.path().join("Beta.txt"), b"x").unwrap();
        fs::write(tmp.path().join("apple.txt"), b"y").unwrap();
        let names: Vec<String> = list_dir(tmp.path(), false)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["alpha", "Zeta", "apple.txt", "Beta.txt"]);
    }

    #[test]
    fn only_dirs_filter() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();
        fs::write(tmp.path().join("f"), b"x").unwrap();
        let entries = list_dir(tmp.path(), true).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].size, 0);
    }

    #[test]
    fn move_into_own_subtree_is_conflict() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        let undo = UndoLedger::new();
        fs::create_dir_all(tmp.path().join("a/sub")).unwrap();
        let err = move_path(&roots, &undo, "a", "a/sub").unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.code_str(), "move_into_self");
        assert!(undo.is_empty());
    }

    #[test]
    fn move_onto_itself_is_a_skipped_noop() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        let undo = UndoLedger::new();
        fs::create_dir(tmp.path().join("a")).unwrap();
        // moving a directory to its own parent resolves to the same path
        let result = move_path(&roots, &undo, "a", "").unwrap();
        assert!(result.skipped);
        assert!(result.undo_token.is_none());
        assert!(undo.is_empty());
        assert!(tmp.path().join("a").is_dir());
    }

    #[test]
    fn move_then_undo_restores_the_original_location() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        let undo = UndoLedger::new();
        fs::write(tmp.path().join("doc.txt"), b"hello").unwrap();
        fs::create_dir(tmp.path().join("archive")).unwrap();

        let result = move_path(&roots, &undo, "doc.txt", "archive").unwrap();
        assert!(!result.skipped);
        assert!(tmp.path().join("archive/doc.txt").is_file());
        assert!(!tmp.path().join("doc.txt").exists());

        let token = result.undo_token.unwrap();
        let restored = undo_move(&roots, &undo, &token).unwrap();
        assert!(restored.ends_with("doc.txt"));
        assert!(tmp.path().join("doc.txt").is_file());
        // token was consumed
        let err = undo_move(&roots, &undo, &token).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn undo_refuses_when_original_location_is_occupied() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        let undo = UndoLedger::new();
        fs::write(tmp.path().join("doc.txt"), b"v1").unwrap();
        fs::create_dir(tmp.path().join("archive")).unwrap();
        let result = move_path(&roots, &undo, "doc.txt", "archive").unwrap();
        // something new took the original spot
        fs::write(tmp.path().join("doc.txt"), b"v2").unwrap();
        let err = undo_move(&roots, &undo, &result.undo_token.unwrap()).unwrap_err();
        assert_eq!(err.http_status(), 409);
        // the moved file stays where it is
        assert!(tmp.path().join("archive/doc.txt").is_file());
    }

    #[test]
    fn move_to_existing_target_is_conflict() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        let undo = UndoLedger::new();
        fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        fs::write(tmp.path().join("b.txt"), b"b").unwrap();
        let err = move_path(&roots, &undo, "a.txt", "b.txt").unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert_eq!(fs::read(tmp.path().join("b.txt")).unwrap(), b"b");
    }

    #[test]
    fn copy_file_and_tree() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        fs::create_dir_all(tmp.path().join("src/sub")).unwrap();
        fs::write(tmp.path().join("src/a.txt"), b"aaa").unwrap();
        fs::write(tmp.path().join("src/sub/b.txt"), b"bb").unwrap();

        let target = copy_path(&roots, "src", "dup").unwrap();
        assert!(target.ends_with("dup"));
        assert_eq!(fs::read(tmp.path().join("dup/a.txt")).unwrap(), b"aaa");
        assert_eq!(fs::read(tmp.path().join("dup/sub/b.txt")).unwrap(), b"bb");
        // source untouched
        assert!(tmp.path().join("src/a.txt").is_file());

        fs::write(tmp.path().join("x.txt"), b"old").unwrap();
        let err = copy_path(&roots, "src/a.txt", "x.txt").unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert_eq!(fs::read(tmp.path().join("x.txt")).unwrap(), b"old");
    }

    #[test]
    fn rename_rejects_collisions_and_escapes() {
        let tmp = TempDir::new().unwrap();
        let roots = roots_for(&tmp);
        fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        fs::write(tmp.path().join("b.txt"), b"b").unwrap();
        let (_, abs) = roots.resolve("a.txt");
        let err = rename(&roots, &abs, "b.txt").unwrap_err();
        assert_eq!(err.http_status(), 409);
        let err = rename(&roots, &abs, "../../escape.txt").unwrap_err();
        assert_eq!(err.http_status(), 403);
        let renamed = rename(&roots, &abs, "c.txt").unwrap();
        assert!(renamed.ends_with("c.txt"));
    }

    #[test]
    fn read_text_handles_utf8_and_binary() {
        let tmp = TempDir::new().unwrap();
        let text = tmp.path().join("t.txt");
        fs::write(&text, "héllo").unwrap();
        assert_eq!(read_text(&text).unwrap(), "héllo");

        let binary = tmp.path().join("b.bin");
        fs::write(&binary, [0u8, 159, 146, 150]).unwrap();
        let err = read_text(&binary).unwrap_err();
        assert_eq!(err.http_status(), 415);
    }

    #[test]
    fn save_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("deep/nested/file.txt");
        save_text(&target, "content").unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "content");
    }

    #[test]
    fn delete_removes_trees() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("tree/sub")).unwrap();
        fs::write(tmp.path().join("tree/sub/f.txt"), b"x").unwrap();
        delete(&tmp.path().join("tree")).unwrap();
        assert!(!tmp.path().join("tree").exists());
        let err = delete(&tmp.path().join("tree")).unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn search_finds_by_substring_and_skips_blacklist() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/report.js"), b"x").unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/Report.pdf"), b"x").unwrap();
        let hits = search(tmp.path(), "report", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Report.pdf");
    }

    #[test]
    fn upload_target_confines_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path();
        let ok = upload_target(dest, Some("sub/dir/img.png"), "img.png").unwrap();
        assert!(ok.starts_with(dest));
        assert!(ok.ends_with("sub/dir/img.png"));
        // escaping input degrades to the bare filename
        let t = upload_target(dest, Some("/abs/evil.png"), "evil.png").unwrap();
        assert_eq!(t, dest.join("evil.png"));
        let err = upload_target(dest, Some("../../evil.png"), "../../evil.png");
        assert!(err.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn upload_target_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let inbox = tmp.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        std::os::unix::fs::symlink(outside.path(), inbox.join("link")).unwrap();
        let err = upload_target(&inbox, Some("link/evil.txt"), "evil.txt").unwrap_err();
        assert_eq!(err.http_status(), 403);
        // a real subdirectory is still fine
        fs::create_dir(inbox.join("sub")).unwrap();
        let ok = upload_target(&inbox, Some("sub/ok.txt"), "ok.txt").unwrap();
        assert!(ok.starts_with(crate::paths::canonicalize_existing(&inbox)));
    }

    #[test]
    fn update_meta_toggles_readonly_and_mtime() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("m.txt");
        fs::write(&file, b"x").unwrap();
        let meta = update_meta(&file, Some(1_700_000_000.0), Some(true)).unwrap();
        assert!(meta.readonly);
        assert_eq!(meta.modified.trunc() as i64, 1_700_000_000);
        let meta = update_meta(&file, None, Some(false)).unwrap();
        assert!(!meta.readonly);
    }
}
