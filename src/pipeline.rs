//! Per-item and per-batch download orchestration.
//!
//! An item moves through fetch-video, fetch-audio and mux strictly in that
//! order, inside a workspace directory that exists only for that call. The
//! two track files never outlive the item's processing step; the merged
//! output keeps its workspace alive until the archive (or the single-item
//! response) is done with it, so every byte written to disk has exactly one
//! owner responsible for removing it.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{StreamKind, fetch, validate_source_url};
use crate::mux::mux;
use crate::sanitize::sanitize_title;

/// Directory-name prefix of per-item workspaces under the work root.
pub const WORKSPACE_PREFIX: &str = "item-";

const VIDEO_TRACK_FILE: &str = "video.mp4";
const AUDIO_TRACK_FILE: &str = "audio.m4a";
const MERGED_FILE: &str = "merged.mp4";

/// One unit of work, as supplied by the caller or the catalog collaborator.
/// `title` is untrusted text; it is only ever used for display and for
/// deriving the final download/archive name.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub source_url: String,
    pub title: String,
}

/// A completed per-item artifact awaiting delivery.
///
/// Owns its workspace directory, so dropping the value reclaims the merged
/// file even when archival never runs.
#[derive(Debug)]
pub struct MergedOutput {
    _workspace: TempDir,
    pub path: PathBuf,
    pub archive_name: String,
}

impl MergedOutput {
    pub(crate) fn new(workspace: TempDir, path: PathBuf, archive_name: String) -> Self {
        Self {
            _workspace: workspace,
            path,
            archive_name,
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug)]
pub struct BatchResult {
    pub succeeded: Vec<MergedOutput>,
    pub skipped: Vec<String>,
}

/// Process-wide last-batch skip list.
///
/// A single slot, overwritten (never merged) when a batch completes.
/// Concurrent batches race last-writer-wins; readers only ever see one
/// batch's worth of titles.
#[derive(Debug, Default)]
pub struct SkipLog {
    titles: RwLock<Vec<String>>,
}

impl SkipLog {
    pub fn publish(&self, titles: Vec<String>) {
        *self.titles.write() = titles;
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.titles.read().clone()
    }
}

/// The three paths an item works with, all inside one unique temp directory.
struct ItemWorkspace {
    dir: TempDir,
    video_path: PathBuf,
    audio_path: PathBuf,
    merged_path: PathBuf,
}

impl ItemWorkspace {
    /// Creates a fresh workspace under `work_root`. Uniqueness comes from the
    /// temp-dir name, never from the item title, so same-titled items and
    /// concurrent batches cannot contend for paths.
    fn create(work_root: &Path) -> PipelineResult<Self> {
        fs::create_dir_all(work_root).map_err(|err| {
            PipelineError::Transport(format!("creating {}: {err}", work_root.display()))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(work_root)
            .map_err(|err| {
                PipelineError::Transport(format!(
                    "creating workspace in {}: {err}",
                    work_root.display()
                ))
            })?;
        let video_path = dir.path().join(VIDEO_TRACK_FILE);
        let audio_path = dir.path().join(AUDIO_TRACK_FILE);
        let merged_path = dir.path().join(MERGED_FILE);
        Ok(Self {
            dir,
            video_path,
            audio_path,
            merged_path,
        })
    }

    /// Removes the two track files. Runs on every exit path out of
    /// processing, including the successful one; only the merged output is
    /// exempt from this scrub.
    fn scrub_tracks(&self) {
        for path in [&self.video_path, &self.audio_path] {
            if let Err(err) = fs::remove_file(path)
                && err.kind() != io::ErrorKind::NotFound
            {
                eprintln!("  Warning: could not remove {}: {}", path.display(), err);
            }
        }
    }
}

/// Runs one item through the whole pipeline: validate, fetch both elementary
/// streams, mux. Returns the merged output on success; the caller decides
/// whether an error is fatal (single-item mode) or a skip (batch mode).
///
/// Whatever happens, the item's track files are gone by the time this
/// returns; on failure the entire workspace is reclaimed.
pub fn process_item(item: &MediaItem, work_root: &Path) -> PipelineResult<MergedOutput> {
    validate_source_url(&item.source_url)?;

    let workspace = ItemWorkspace::create(work_root)?;
    let staged = run_stages(item, &workspace);
    workspace.scrub_tracks();
    staged?;

    let archive_name = format!("{}.mp4", sanitize_title(&item.title));
    let ItemWorkspace {
        dir, merged_path, ..
    } = workspace;
    Ok(MergedOutput::new(dir, merged_path, archive_name))
}

fn run_stages(item: &MediaItem, workspace: &ItemWorkspace) -> PipelineResult<()> {
    fetch(&item.source_url, StreamKind::Video, &workspace.video_path)?;
    fetch(&item.source_url, StreamKind::Audio, &workspace.audio_path)?;
    mux(
        &workspace.video_path,
        &workspace.audio_path,
        &workspace.merged_path,
    )?;
    Ok(())
}

/// Drives a whole batch, one item at a time, in input order.
pub struct BatchCoordinator {
    work_root: PathBuf,
    skip_log: Arc<SkipLog>,
}

impl BatchCoordinator {
    pub fn new(work_root: PathBuf, skip_log: Arc<SkipLog>) -> Self {
        Self {
            work_root,
            skip_log,
        }
    }

    /// Processes every item sequentially. One failed item never sinks the
    /// batch: its title lands on the skip list and the loop moves on. Only an
    /// empty request is rejected outright, before any network or filesystem
    /// activity.
    ///
    /// The skip list is published to the shared [`SkipLog`] before the result
    /// is handed back for archiving.
    pub fn run(&self, items: &[MediaItem]) -> PipelineResult<BatchResult> {
        if items.is_empty() {
            return Err(PipelineError::InvalidInput(
                "no items provided for download".into(),
            ));
        }

        let mut succeeded = Vec::new();
        let mut skipped = Vec::new();
        let mut used_names = HashSet::new();

        for (index, item) in items.iter().enumerate() {
            println!(
                "[{}/{}] Processing item: {}",
                index + 1,
                items.len(),
                item.title
            );
            match process_item(item, &self.work_root) {
                Ok(mut output) => {
                    output.archive_name = reserve_archive_name(&mut used_names, output.archive_name);
                    succeeded.push(output);
                }
                Err(err) => {
                    eprintln!("  Warning: skipping {}: {}", item.title, err);
                    skipped.push(item.title.clone());
                }
            }
        }

        self.skip_log.publish(skipped.clone());
        Ok(BatchResult { succeeded, skipped })
    }
}

/// Claims an archive entry name, suffixing duplicates so two same-titled
/// items in one batch end up as distinct entries ("Mix.mp4", "Mix (2).mp4").
fn reserve_archive_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let stem = name.strip_suffix(".mp4").unwrap_or(&name);
    let mut counter = 2;
    loop {
        let candidate = format!("{stem} ({counter}).mp4");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Removes leftover workspace directories from previous runs. Batches do not
/// survive a restart, so anything under the work root with the workspace
/// prefix is garbage by definition.
pub fn sweep_stale_workspaces(work_root: &Path) -> usize {
    if !work_root.exists() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(work_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
    {
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(WORKSPACE_PREFIX) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => eprintln!(
                "  Warning: could not remove stale workspace {}: {}",
                entry.path().display(),
                err
            ),
        }
    }

    if removed > 0 {
        println!("Swept {removed} stale workspace(s) from previous runs");
    }
    removed
}
