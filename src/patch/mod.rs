//! Manifest patcher - applies a rule set to a directory tree
//!
//! Files are visited in sorted order without following symlinks. Binary and
//! non-UTF-8 files are reported as skipped and never rewritten. Rewrites go
//! through a temporary file in the same directory followed by a rename.

use crate::core::report::{FileChangeRecord, FileError, FileSkipReason, SkippedFile};
use crate::core::rule::PatchRuleSet;
use crate::error::{PatchError, PipelineError};
use crate::execution::lock::LOCK_FILE_NAME;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Suffix of the copies kept when backups are enabled
pub const BACKUP_SUFFIX: &str = ".repoforge.bak";

/// Bytes inspected for a NUL when deciding whether a file is text
const SNIFF_LEN: usize = 8000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PatchOptions {
    /// Compute changes without writing
    pub dry_run: bool,
    /// Copy each file to `<file>.repoforge.bak` before its first rewrite
    pub backup: bool,
}

/// Result of one patch pass
#[derive(Debug, Clone, Default)]
pub struct PatchOutcome {
    pub changes: Vec<FileChangeRecord>,
    pub skipped: Vec<SkippedFile>,
    pub errors: Vec<FileError>,
}

impl PatchOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManifestPatcher {
    options: PatchOptions,
}

struct Candidate {
    relative: String,
    path: PathBuf,
}

impl ManifestPatcher {
    pub fn new(options: PatchOptions) -> Self {
        Self { options }
    }

    /// Apply `rules` to every in-scope text file under `root`.
    ///
    /// Per-file problems land in the outcome. Only a missing root or a rule
    /// whose scope matches no file under it fails the pass.
    pub fn apply(&self, root: &Path, rules: &PatchRuleSet) -> Result<PatchOutcome, PipelineError> {
        self.apply_until(root, rules, &AtomicBool::new(false))
    }

    /// Like [`apply`](Self::apply), but stops before the next file once
    /// `stop` is set. The outcome then covers the files handled so far.
    pub fn apply_until(
        &self,
        root: &Path,
        rules: &PatchRuleSet,
        stop: &AtomicBool,
    ) -> Result<PatchOutcome, PipelineError> {
        let canonical_root = root
            .canonicalize()
            .map_err(|e| PipelineError::io(root, e))?;
        if !canonical_root.is_dir() {
            return Err(PipelineError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "patch root is not a directory"),
            ));
        }

        let mut outcome = PatchOutcome::default();
        let candidates = self.collect(root, &canonical_root, rules, &mut outcome);

        for rule in rules.rules() {
            if !candidates.iter().any(|c| rule.in_scope(&c.relative)) {
                return Err(PipelineError::invalid_rule(
                    rule.id(),
                    format!(
                        "scope '{}' matches nothing under {}",
                        rule.scope(),
                        root.display()
                    ),
                ));
            }
        }

        for candidate in candidates.iter().filter(|c| rules.covers(&c.relative)) {
            if stop.load(Ordering::SeqCst) {
                debug!("Patch pass under {} stopped early", root.display());
                break;
            }
            match self.patch_file(candidate, rules) {
                Ok(FileOutcome::Unchanged) => {}
                Ok(FileOutcome::Changed(record)) => outcome.changes.push(record),
                Ok(FileOutcome::Skipped(reason)) => {
                    debug!("Skipping {} ({})", candidate.relative, reason);
                    outcome.skipped.push(SkippedFile {
                        path: candidate.relative.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!("Failed to patch {}: {}", candidate.relative, err);
                    outcome.errors.push(FileError::new(&candidate.relative, &err));
                }
            }
        }

        Ok(outcome)
    }

    /// Regular files under the root, plus skip records for escaping symlinks
    fn collect(
        &self,
        root: &Path,
        canonical_root: &Path,
        rules: &PatchRuleSet,
        outcome: &mut PatchOutcome,
    ) -> Vec<Candidate> {
        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_tool_file(entry.file_name().to_string_lossy().as_ref()));

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| relative_path(root, p)).unwrap_or_default();
                    let err = match e.io_error() {
                        Some(io) => PatchError::from_io(io),
                        None => PatchError::Io(e.to_string()),
                    };
                    warn!("Cannot read {}: {}", path, err);
                    outcome.errors.push(FileError::new(path, &err));
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let relative = relative_path(root, entry.path());
            if file_type.is_symlink() {
                if rules.covers(&relative) && escapes_root(entry.path(), canonical_root) {
                    debug!("Symlink {} points outside the patch root", relative);
                    outcome.skipped.push(SkippedFile {
                        path: relative,
                        reason: FileSkipReason::SymlinkEscapesRoot,
                    });
                }
                continue;
            }

            if file_type.is_file() {
                candidates.push(Candidate {
                    relative,
                    path: entry.into_path(),
                });
            }
        }
        candidates
    }

    fn patch_file(
        &self,
        candidate: &Candidate,
        rules: &PatchRuleSet,
    ) -> Result<FileOutcome, PatchError> {
        let bytes = fs::read(&candidate.path).map_err(|e| PatchError::from_io(&e))?;

        let head = &bytes[..bytes.len().min(SNIFF_LEN)];
        if head.contains(&0) {
            return Ok(FileOutcome::Skipped(FileSkipReason::Binary));
        }
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return Ok(FileOutcome::Skipped(FileSkipReason::InvalidUtf8));
        };

        let (patched, applied) = rules.apply(&candidate.relative, text);
        if applied.is_empty() {
            return Ok(FileOutcome::Unchanged);
        }

        // A second pass over our own output must be a no-op
        let (_, reapplied) = rules.apply(&candidate.relative, &patched);
        if let Some(rule) = reapplied.into_iter().next() {
            return Err(PatchError::NotIdempotent { rule });
        }

        let metadata = fs::metadata(&candidate.path).map_err(|e| PatchError::from_io(&e))?;
        if metadata.permissions().readonly() {
            return Err(PatchError::PermissionDenied);
        }

        if !self.options.dry_run {
            if self.options.backup {
                write_backup(&candidate.path)?;
            }
            write_atomic(&candidate.path, patched.as_bytes(), metadata.permissions())?;
            debug!(
                "Patched {} ({} -> {} bytes)",
                candidate.relative,
                bytes.len(),
                patched.len()
            );
        }

        Ok(FileOutcome::Changed(FileChangeRecord {
            path: candidate.relative.clone(),
            rules_applied: applied,
            bytes_before: bytes.len() as u64,
            bytes_after: patched.len() as u64,
        }))
    }
}

enum FileOutcome {
    Unchanged,
    Changed(FileChangeRecord),
    Skipped(FileSkipReason),
}

fn is_tool_file(name: &str) -> bool {
    name == LOCK_FILE_NAME || name.ends_with(BACKUP_SUFFIX)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Dangling links are not followed anywhere, so they do not escape
fn escapes_root(link: &Path, canonical_root: &Path) -> bool {
    match link.canonicalize() {
        Ok(target) => !target.starts_with(canonical_root),
        Err(_) => false,
    }
}

fn write_backup(path: &Path) -> Result<(), PatchError> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    let backup = PathBuf::from(backup);
    if backup.exists() {
        return Ok(());
    }
    fs::copy(path, &backup).map_err(|e| PatchError::from_io(&e))?;
    Ok(())
}

fn write_atomic(
    path: &Path,
    contents: &[u8],
    permissions: fs::Permissions,
) -> Result<(), PatchError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PatchError::from_io(&e))?;
    tmp.write_all(contents).map_err(|e| PatchError::from_io(&e))?;
    fs::set_permissions(tmp.path(), permissions).map_err(|e| PatchError::from_io(&e))?;
    tmp.persist(path).map_err(|e| PatchError::from_io(&e.error))?;
    Ok(())
}
