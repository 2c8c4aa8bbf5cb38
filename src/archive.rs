//! Streaming ZIP assembly. Archives are produced in streaming mode (local
//! headers carry data descriptors, nothing is seeked back), so a download can
//! begin before the total size is known and memory stays bounded by the
//! channel depth regardless of archive size.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AppError, AppResult};

/// Copy buffer for file content, and the flush threshold of [`ChannelWriter`].
const COPY_CHUNK: usize = 1024 * 1024;
const WRITER_FLUSH_AT: usize = 64 * 1024;
/// Entries at or above this size get ZIP64 records.
const LARGE_FILE_THRESHOLD: u64 = 0xFFFF_0000;
/// Chunks in flight before the producer blocks on the consumer.
const CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One archive member: an absolute source path and its name inside the
/// archive, always with forward slashes.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub source: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPolicy {
    /// Store entries uncompressed, maximizing throughput.
    Fast,
    Deflated,
}

impl CompressionPolicy {
    fn method(self) -> CompressionMethod {
        match self {
            CompressionPolicy::Fast => CompressionMethod::Stored,
            CompressionPolicy::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// A fully planned archive: the ordered entry list and the suggested
/// download filename.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub entries: Vec<ArchiveEntry>,
    pub filename: String,
}

fn archive_name(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Plan an archive of a single path. A file becomes a one-entry archive named
/// after itself; a directory walk roots every member under the directory's
/// own name, so extraction yields one folder. Unreadable subtrees are skipped.
pub fn plan_single(abs: &Path) -> AppResult<ArchiveJob> {
    let base = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string());
    if abs.is_file() {
        return Ok(ArchiveJob {
            entries: vec![ArchiveEntry { source: abs.to_path_buf(), name: base.clone() }],
            filename: format!("{base}.zip"),
        });
    }
    if !abs.is_dir() {
        return Err(AppError::not_found("not_found", "Path not found"));
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(abs).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(abs) else { continue };
        entries.push(ArchiveEntry {
            source: entry.path().to_path_buf(),
            name: format!("{base}/{}", archive_name(rel)),
        });
    }
    Ok(ArchiveJob { entries, filename: format!("{base}.zip") })
}

/// Plan an archive of several independently selected paths. Each selection is
/// rooted at its own basename, so siblings land next to each other.
pub fn plan_multiple(paths: &[PathBuf], filename: &str) -> AppResult<ArchiveJob> {
    let mut entries = Vec::new();
    for abs in paths {
        let job = plan_single(abs)?;
        entries.extend(job.entries);
    }
    Ok(ArchiveJob { entries, filename: filename.to_string() })
}

/// A `Write` that hands buffered chunks to an async consumer over a bounded
/// channel. A dropped receiver turns into a broken-pipe error, which aborts
/// archive generation promptly when the client goes away.
struct ChannelWriter {
    tx: mpsc::Sender<Vec<u8>>,
    buf: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx, buf: Vec::with_capacity(WRITER_FLUSH_AT) }
    }

    fn send_buf(&mut self) -> std::io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(WRITER_FLUSH_AT));
        self.tx.blocking_send(chunk).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "archive consumer dropped")
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= WRITER_FLUSH_AT {
            self.send_buf()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.send_buf()
    }
}

/// Write the planned archive into `out`. Files that vanish or become
/// unreadable between planning and streaming are skipped; a file that shrinks
/// mid-read yields a truncated but structurally valid entry.
pub fn write_archive<W: Write>(
    job: &ArchiveJob,
    policy: CompressionPolicy,
    out: W,
) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new_stream(out);
    let mut buf = vec![0u8; COPY_CHUNK];
    for entry in &job.entries {
        let Ok(mut file) = File::open(&entry.source) else { continue };
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let options = SimpleFileOptions::default()
            .compression_method(policy.method())
            .unix_permissions(0o644)
            .large_file(size >= LARGE_FILE_THRESHOLD);
        zip.start_file(&entry.name, options)?;
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            zip.write_all(&buf[..n])?;
        }
    }
    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(inner.into_inner())
}

/// Run archive generation on a blocking worker and return the chunk stream.
/// Backpressure comes from the bounded channel; dropping the receiver cancels
/// the worker via its next write.
pub fn spawn_zip_stream(job: ArchiveJob, policy: CompressionPolicy) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let writer = ChannelWriter::new(tx);
        match write_archive(&job, policy, writer) {
            Ok(mut writer) => {
                let _ = writer.flush();
            }
            Err(err) => {
                tracing::warn!(archive = %job.filename, error = %err, "zip stream aborted");
            }
        }
    });
    rx
}
