//! File-based audit log writer with automatic daily rotation.
//!
//! When `AuditLogConfig.file_path` is set, audit records are written to the
//! specified file. The writer rotates the file daily (at UTC midnight) by
//! renaming the current file with a date suffix (e.g. `audit.log.2025-01-15`)
//! and creating a new file.
//!
//! Also supports rotation by file size (`max_file_size_bytes`).
//!
//! Thread-safe: uses a `Mutex<BufWriter>` internally so multiple proxy
//! workers can write concurrently (though in practice writes happen from the
//! single admin/audit thread).

use chrono::{NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

// ── Configuration ────────────────────────────────────────────────────────────

/// Extended audit log rotation settings.
///
/// This lives outside the core config crate to avoid adding rotation-specific
/// fields to the compliance config. Users configure it via `compliance.audit_log`
/// fields.
#[derive(Debug, Clone)]
pub struct AuditFileConfig {
    /// Base file path, e.g. `/var/log/ando/audit.log`.
    pub file_path: PathBuf,
    /// Maximum file size in bytes before forced rotation.
    /// 0 = size-based rotation disabled (daily rotation only).
    pub max_file_size_bytes: u64,
    /// Maximum number of rotated files to keep. 0 = unlimited.
    pub max_rotated_files: usize,
}

impl Default for AuditFileConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("audit.log"),
            max_file_size_bytes: 100 * 1024 * 1024, // 100 MB
            max_rotated_files: 30,
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// A rotating audit log file writer.
///
/// Call [`AuditFileWriter::write_line`] to append a JSON audit line.
/// Rotation happens automatically.
pub struct AuditFileWriter {
    config: AuditFileConfig,
    inner: Mutex<WriterState>,
}

struct WriterState {
    writer: BufWriter<File>,
    current_date: NaiveDate,
    current_size: u64,
}

impl AuditFileWriter {
    /// Create a new writer, opening (or creating) the audit log file.
    pub fn new(config: AuditFileConfig) -> io::Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)?;

        let current_size = file.metadata()?.len();
        let today = Utc::now().date_naive();

        info!(path = %config.file_path.display(), "Audit log file writer opened");

        Ok(Self {
            config,
            inner: Mutex::new(WriterState {
                writer: BufWriter::new(file),
                current_date: today,
                current_size,
            }),
        })
    }

    /// Write a single JSON audit line. Rotates if needed.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer lock poisoned"))?;

        let today = Utc::now().date_naive();

        // Check rotation conditions
        let needs_date_rotate = today != state.current_date;
        let needs_size_rotate = self.config.max_file_size_bytes > 0
            && state.current_size >= self.config.max_file_size_bytes;

        if needs_date_rotate || needs_size_rotate {
            // Flush current writer before rotation
            state.writer.flush()?;
            drop(std::mem::replace(
                &mut state.writer,
                BufWriter::new(File::create("/dev/null")?),
            ));

            // Generate rotated file name
            let suffix = if needs_date_rotate {
                state.current_date.format("%Y-%m-%d").to_string()
            } else {
                Utc::now().format("%Y-%m-%d-%H%M%S").to_string()
            };

            let rotated_path = rotated_file_path(&self.config.file_path, &suffix);

            // Rename current file
            if self.config.file_path.exists() {
                if let Err(e) = fs::rename(&self.config.file_path, &rotated_path) {
                    error!(
                        error = %e,
                        from = %self.config.file_path.display(),
                        to = %rotated_path.display(),
                        "Failed to rotate audit log"
                    );
                } else {
                    info!(
                        from = %self.config.file_path.display(),
                        to = %rotated_path.display(),
                        "Rotated audit log"
                    );
                }
            }

            // Prune old rotated files
            if self.config.max_rotated_files > 0 {
                if let Err(e) =
                    prune_rotated_files(&self.config.file_path, self.config.max_rotated_files)
                {
                    warn!(error = %e, "Failed to prune old audit log files");
                }
            }

            // Open new file
            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.config.file_path)?;
            state.writer = BufWriter::new(new_file);
            state.current_date = today;
            state.current_size = 0;
        }

        // Write the line
        let bytes = line.as_bytes();
        state.writer.write_all(bytes)?;
        state.writer.write_all(b"\n")?;
        state.writer.flush()?;
        state.current_size += bytes.len() as u64 + 1;

        Ok(())
    }

    /// Flush buffered data to disk.
    pub fn flush(&self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer lock poisoned"))?;
        state.writer.flush()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Generate the rotated file path: `audit.log` → `audit.log.2025-01-15`.
fn rotated_file_path(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

/// Remove old rotated files, keeping only the newest `keep` files.
fn prune_rotated_files(base_path: &Path, keep: usize) -> io::Result<()> {
    let parent = base_path.parent().unwrap_or(Path::new("."));
    let base_name = base_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy();

    let mut rotated_files: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&*base_name)
            && name.len() > base_name.len()
            && name.as_bytes()[base_name.len()] == b'.'
        {
            rotated_files.push(entry.path());
        }
    }

    // Sort by name (dates sort lexicographically) — newest last
    rotated_files.sort();

    if rotated_files.len() > keep {
        let to_remove = rotated_files.len() - keep;
        for path in rotated_files.iter().take(to_remove) {
            debug!(path = %path.display(), "Pruning old rotated audit log");
            fs::remove_file(path)?;
        }
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
