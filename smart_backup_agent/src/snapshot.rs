//! Snapshot creation: copy the selected workspace files into a timestamped
//! directory, write a manifest, then merge the result into the live mirror.
//! Nothing in here deletes; pruning belongs to the retention module.

use crate::config::{Config, MANIFEST_FILE_NAME};
use crate::error::{SnapshotError, SnapshotStep};
use crate::types::SnapshotId;
use chrono::{DateTime, Local};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub id: SnapshotId,
    /// Source files copied into the snapshot (manifest not included).
    pub files_copied: usize,
    pub manifest: PathBuf,
    /// Files listed in the manifest, including the manifest itself.
    pub manifest_entries: usize,
}

pub struct SnapshotExecutor {
    source_dir: PathBuf,
    backup_root: PathBuf,
    mirror_dir: PathBuf,
    extensions: Vec<String>,
    config_subtree: String,
}

impl SnapshotExecutor {
    pub fn new(cfg: &Config) -> Self {
        Self {
            source_dir: cfg.source_dir.clone(),
            backup_root: cfg.backup_root.clone(),
            mirror_dir: cfg.mirror_dir.clone(),
            extensions: cfg.extensions.clone(),
            config_subtree: cfg.config_subtree.clone(),
        }
    }

    /// Create one snapshot named after `now`. Two runs within the same second share
    /// a directory and merge into it.
    ///
    /// On error the partially written directory stays on disk.
    pub fn run(&self, now: DateTime<Local>) -> Result<SnapshotReport, SnapshotError> {
        let name = SnapshotId::name_for(now);
        let id = SnapshotId {
            path: self.backup_root.join(&name),
            name,
        };
        info!("creating snapshot {}", id.name);

        fs::create_dir_all(&id.path)
            .map_err(|e| SnapshotError::new(SnapshotStep::CreateDir, &id.path, e))?;

        let mut files_copied = self.copy_matching_files(&id.path)?;

        let tree = self.source_dir.join(&self.config_subtree);
        if tree.is_dir() {
            files_copied += copy_tree(
                &tree,
                &id.path.join(&self.config_subtree),
                SnapshotStep::CopyConfigTree,
            )?;
        }

        let manifest = id.path.join(MANIFEST_FILE_NAME);
        let manifest_entries = write_manifest(&id, now, &manifest)
            .map_err(|e| SnapshotError::new(SnapshotStep::WriteManifest, &manifest, e))?;

        mirror_into(&id.path, &self.mirror_dir)?;

        info!(
            "snapshot {} written: {files_copied} files copied, mirrored to {}",
            id.name,
            self.mirror_dir.display()
        );
        Ok(SnapshotReport {
            id,
            files_copied,
            manifest,
            manifest_entries,
        })
    }

    /// Top level of the source only; regular files whose name ends with an allowed suffix.
    fn copy_matching_files(&self, dest: &Path) -> Result<usize, SnapshotError> {
        let step = SnapshotStep::CopyFiles;
        let entries =
            fs::read_dir(&self.source_dir).map_err(|e| SnapshotError::new(step, &self.source_dir, e))?;
        let mut copied = 0;
        for entry in entries {
            let entry = entry.map_err(|e| SnapshotError::new(step, &self.source_dir, e))?;
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !path.is_file() || !self.extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
                continue;
            }
            if name == MANIFEST_FILE_NAME {
                warn!("skipping {}: the snapshot manifest uses that name", path.display());
                continue;
            }
            fs::copy(&path, dest.join(&name)).map_err(|e| SnapshotError::new(step, &path, e))?;
            debug!("copied {}", path.display());
            copied += 1;
        }
        Ok(copied)
    }
}

/// Recursively copy `src` into `dst`, merging with whatever `dst` already holds.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, step: SnapshotStep) -> Result<usize, SnapshotError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            SnapshotError::new(step, path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SnapshotError::new(step, entry.path(), io::Error::other(e)))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| SnapshotError::new(step, &target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| SnapshotError::new(step, parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| SnapshotError::new(step, entry.path(), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Merge every top-level entry of the snapshot into the live mirror.
fn mirror_into(snapshot: &Path, mirror: &Path) -> Result<(), SnapshotError> {
    let step = SnapshotStep::Mirror;
    fs::create_dir_all(mirror).map_err(|e| SnapshotError::new(step, mirror, e))?;
    let entries = fs::read_dir(snapshot).map_err(|e| SnapshotError::new(step, snapshot, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SnapshotError::new(step, snapshot, e))?;
        let src = entry.path();
        let dst = mirror.join(entry.file_name());
        if src.is_dir() {
            copy_tree(&src, &dst, step)?;
        } else {
            fs::copy(&src, &dst).map_err(|e| SnapshotError::new(step, &src, e))?;
        }
    }
    Ok(())
}

/// Write the manifest and return how many files it lists. The listing covers every
/// file under the snapshot, the manifest included.
fn write_manifest(id: &SnapshotId, at: DateTime<Local>, manifest: &Path) -> io::Result<usize> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&id.path).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.push(manifest.to_path_buf());
    files.sort();
    files.dedup();

    let mut out = io::BufWriter::new(fs::File::create(manifest)?);
    writeln!(out, "Smart Backup Report")?;
    writeln!(out, "{}", "=".repeat(50))?;
    writeln!(out, "Backup time: {}", at.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "Backup path: {}", id.path.display())?;
    writeln!(out, "Backup type: idle-triggered")?;
    writeln!(out, "System state: idle")?;
    writeln!(out)?;
    writeln!(out, "Files:")?;
    for f in &files {
        writeln!(out, "{}", f.display())?;
    }
    out.flush()?;
    Ok(files.len())
}

/// Paths listed in a manifest file (the lines after the `Files:` header).
pub fn manifest_entries(manifest: &Path) -> io::Result<Vec<PathBuf>> {
    let text = fs::read_to_string(manifest)?;
    Ok(text
        .lines()
        .skip_while(|l| *l != "Files:")
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}
