// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Layout fix application.
//!
//! Every fix is attempted independently and reported as a [`FixResult`]. A
//! failing fix never prevents the remaining ones from being attempted. The
//! caller inspects the aggregated [`FixSummary`] to decide on overall
//! success.

use crate::{
    git::{GitError, GitOps},
    layout::{scan::NamingDrift, DeclaredEntry, LayoutDiff, RelativePath, RemoteMovedEntry},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument};

/// Kind of automatic fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixKind {
    /// Clone a declared remote that is absent on disk.
    Clone,

    /// Move a working folder to its declared path.
    Move,

    /// Repair the `origin` remote of a working folder in place.
    UpdateRemote,

    /// Rename a working folder after its remote repository.
    Rename,
}

impl Display for FixKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let kind = match self {
            FixKind::Clone => "clone",
            FixKind::Move => "move",
            FixKind::UpdateRemote => "update remote",
            FixKind::Rename => "rename",
        };
        fmt.write_str(kind)
    }
}

/// Outcome of a single fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixResult {
    pub kind: FixKind,

    /// Working folder the fix was applied to, after the fix.
    pub target: RelativePath,

    /// Failure description, [`None`] on success.
    pub error: Option<String>,
}

impl FixResult {
    fn new(kind: FixKind, target: &RelativePath, result: Result<()>) -> Self {
        match result {
            Ok(_) => {
                info!("{kind}: {target}");
                Self {
                    kind,
                    target: target.clone(),
                    error: None,
                }
            }
            Err(err) => {
                error!("{kind} failed for {target}: {err}");
                Self {
                    kind,
                    target: target.clone(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Check if fix was applied.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated outcome of a batch of fixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixSummary {
    results: Vec<FixResult>,
}

impl FixSummary {
    /// Record the outcome of one fix.
    pub fn push(&mut self, result: FixResult) {
        self.results.push(result);
    }

    /// Merge another summary into this one.
    pub fn extend(&mut self, other: FixSummary) {
        self.results.extend(other.results);
    }

    /// All outcomes in application order.
    pub fn results(&self) -> &[FixResult] {
        &self.results
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &FixResult> + '_ {
        self.results.iter().filter(|result| !result.is_ok())
    }

    /// Check if every fix was applied.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(FixResult::is_ok)
    }

    /// Check if no fix was attempted.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Clone declared entries into a world root, parents before children.
#[instrument(skip(entries, git), level = "debug")]
pub fn clone_all<'a>(
    root: &Path,
    entries: impl IntoIterator<Item = &'a DeclaredEntry>,
    git: &impl GitOps,
) -> FixSummary {
    let mut entries = entries.into_iter().collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.path.depth());

    let mut summary = FixSummary::default();
    for entry in entries {
        summary.push(clone_entry(root, entry, git));
    }

    summary
}

/// Apply every automatic fix of a layout diff.
///
/// Moves come first so that clones do not land in a folder about to be moved
/// away. Remote updates follow, then clones, parents before children.
/// Deleted entries are never touched.
#[instrument(skip(diff, git), level = "debug")]
pub fn apply_diff(root: &Path, diff: &LayoutDiff, git: &impl GitOps) -> FixSummary {
    let mut summary = FixSummary::default();

    let mut moved = diff.moved.iter().collect::<Vec<_>>();
    moved.sort_by_key(|entry| entry.to.depth());
    for entry in moved {
        let result = move_folder(root, &entry.from, &entry.to);
        summary.push(FixResult::new(FixKind::Move, &entry.to, result));
    }

    for entry in &diff.remote_moved {
        summary.push(update_remote(root, entry, git));
    }

    summary.extend(clone_all(root, &diff.added, git));
    summary
}

/// Rename a drifted working folder after its remote repository.
///
/// Callers are expected to only pass drifts that are not blocked.
pub fn rename(root: &Path, drift: &NamingDrift) -> FixResult {
    let result = move_folder(root, &drift.path, &drift.expected);
    FixResult::new(FixKind::Rename, &drift.expected, result)
}

/// Clone one declared entry.
pub fn clone_entry(root: &Path, entry: &DeclaredEntry, git: &impl GitOps) -> FixResult {
    let result = (|| -> Result<()> {
        let path = entry.path.to_path(root);
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent).map_err(|source| FixError::CreateParent {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        git.clone_repository(&entry.url, &path, None)?;
        Ok(())
    })();

    FixResult::new(FixKind::Clone, &entry.path, result)
}

/// Repair the `origin` remote of a working folder.
pub fn update_remote(root: &Path, entry: &RemoteMovedEntry, git: &impl GitOps) -> FixResult {
    let result = git
        .set_origin_url(&entry.path.to_path(root), &entry.to)
        .map_err(FixError::from);
    FixResult::new(FixKind::UpdateRemote, &entry.path, result)
}

// INVARIANT: Never overwrite an existing destination.
fn move_folder(root: &Path, from: &RelativePath, to: &RelativePath) -> Result<()> {
    let origin = from.to_path(root);
    let destination = to.to_path(root);
    if destination.exists() {
        return Err(FixError::DestinationExists(destination));
    }

    if let Some(parent) = destination.parent() {
        mkdirp::mkdirp(parent).map_err(|source| FixError::CreateParent {
            source,
            path: parent.to_path_buf(),
        })?;
    }

    std::fs::rename(&origin, &destination).map_err(|source| FixError::Move {
        source,
        from: origin.clone(),
        to: destination.clone(),
    })
}

/// Fix application error types.
#[derive(Debug, thiserror::Error)]
pub enum FixError {
    /// Destination of a move is already taken.
    #[error("destination {:?} already exists, fix it manually", .0.display())]
    DestinationExists(PathBuf),

    /// Parent folders of a destination cannot be created.
    #[error("failed to create {:?}", path.display())]
    CreateParent {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Working folder cannot be moved.
    #[error("failed to move {:?} to {:?}", from.display(), to.display())]
    Move {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Friendly result alias :3
pub type Result<T, E = FixError> = std::result::Result<T, E>;
