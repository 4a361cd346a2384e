// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Working folder layouts.
//!
//! A world is laid out on disk as a tree of Git working folders. Two views of
//! that tree exist at any time:
//!
//! - The __declared layout__, the `(relative path, remote URL)` pairs read
//!   from the world definition.
//! - The __actual layout__, the same pairs observed by scanning the world
//!   root for Git working folders. See [`scan`].
//!
//! [`LayoutDiff`] compares both views. It is a pure computation, applying its
//! result is the job of [`fix`].

pub mod fix;
pub mod scan;

use crate::remote::RemoteUrl;

use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Component, Path, PathBuf},
};

/// Relative path of a working folder inside a world root.
///
/// Always uses `/` as separator. The world root itself is `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    /// The world root itself.
    pub fn root() -> Self {
        Self(".".into())
    }

    /// Check if path designates the world root.
    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Append one folder name.
    ///
    /// Joining `.` is a no-op, so that a `GitFolder Name="."` stands for its
    /// parent folder.
    pub fn join(&self, name: &str) -> Self {
        match (self.is_root(), name) {
            (_, ".") => self.clone(),
            (true, _) => Self(name.to_string()),
            (false, _) => Self(format!("{}/{name}", self.0)),
        }
    }

    /// Convert a path relative to the world root.
    ///
    /// Returns [`None`] for anything but plain folder names, e.g., `..` or an
    /// absolute path.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let mut result = Self::root();
        for component in path.as_ref().components() {
            match component {
                Component::Normal(name) => result = result.join(name.to_str()?),
                Component::CurDir => continue,
                _ => return None,
            }
        }

        Some(result)
    }

    /// Last folder name, [`None`] for the world root.
    pub fn leaf(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }

        self.0.rsplit('/').next()
    }

    /// Sibling path with a different last folder name.
    pub fn with_leaf(&self, leaf: &str) -> Self {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Self(format!("{parent}/{leaf}")),
            None => Self(leaf.to_string()),
        }
    }

    /// Number of folders between the world root and this path.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            return 0;
        }

        self.0.split('/').count()
    }

    /// Resolve against an absolute world root.
    pub fn to_path(&self, root: impl AsRef<Path>) -> PathBuf {
        if self.is_root() {
            return root.as_ref().to_path_buf();
        }

        self.0
            .split('/')
            .fold(root.as_ref().to_path_buf(), |path, name| path.join(name))
    }

    /// Treat relative path as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RelativePath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// Declared working folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredEntry {
    pub path: RelativePath,
    pub url: RemoteUrl,
}

/// Declared layout of a world.
///
/// # Invariant
///
/// - No two entries share a path.
/// - No two entries share a remote URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredLayout {
    entries: Vec<DeclaredEntry>,
}

impl DeclaredLayout {
    /// Construct declared layout from entries that are known to be unique.
    pub(crate) fn from_unique(entries: Vec<DeclaredEntry>) -> Self {
        Self { entries }
    }

    /// Declared entries in document order.
    pub fn entries(&self) -> &[DeclaredEntry] {
        &self.entries
    }

    /// Check if the target pair is declared as is.
    pub fn contains(&self, path: &RelativePath, url: &RemoteUrl) -> bool {
        self.entries
            .iter()
            .any(|entry| &entry.path == path && &entry.url == url)
    }
}

/// Working folder found on disk with a readable `origin` remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualEntry {
    pub path: RelativePath,
    pub url: RemoteUrl,
}

/// Folder to move from one path to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedEntry {
    pub from: RelativePath,
    pub to: RelativePath,
    pub url: RemoteUrl,
}

/// Folder whose `origin` remote must be repaired in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMovedEntry {
    pub path: RelativePath,
    pub from: RemoteUrl,
    pub to: RemoteUrl,
}

/// Difference between a declared and an actual layout.
///
/// Every declared entry that is not found as is on disk ends up in exactly
/// one of `added`, `moved` (as destination), or `remote_moved` (as the new
/// URL). Every actual entry that is not declared as is ends up in exactly
/// one of `deleted`, `moved` (as source), or `remote_moved` (as the old URL).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutDiff {
    /// Declared, absent on disk. Must be cloned.
    pub added: Vec<DeclaredEntry>,

    /// Present on disk, not declared. Must be removed by hand.
    pub deleted: Vec<ActualEntry>,

    /// Same remote URL at a different path. Folder must be moved.
    pub moved: Vec<MovedEntry>,

    /// Same path with a different remote URL. Remote must be repaired.
    pub remote_moved: Vec<RemoteMovedEntry>,
}

impl LayoutDiff {
    /// Compare declared layout against actual layout.
    ///
    /// Actual entries are expected to hold unique remote URLs, i.e., the scan
    /// they come from has no origin URL issue.
    pub fn compute(declared: &DeclaredLayout, actual: &[ActualEntry]) -> Self {
        let declared_urls = declared
            .entries()
            .iter()
            .map(|entry| &entry.url)
            .collect::<HashSet<_>>();

        let unmatched_actual = actual
            .iter()
            .filter(|entry| !declared.contains(&entry.path, &entry.url))
            .collect::<Vec<_>>();
        let actual_by_url = unmatched_actual
            .iter()
            .map(|&entry| (&entry.url, entry))
            .collect::<HashMap<_, _>>();
        let actual_by_path = unmatched_actual
            .iter()
            .map(|&entry| (&entry.path, entry))
            .collect::<HashMap<_, _>>();
        let all_actual_urls = actual.iter().map(|entry| &entry.url).collect::<HashSet<_>>();

        let mut diff = Self::default();
        let mut consumed: HashSet<&RelativePath> = HashSet::new();

        for entry in declared.entries() {
            if actual
                .iter()
                .any(|found| found.path == entry.path && found.url == entry.url)
            {
                continue;
            }

            // INVARIANT: Remote already cloned elsewhere? Move it!
            if let Some(&found) = actual_by_url.get(&entry.url) {
                consumed.insert(&found.path);
                diff.moved.push(MovedEntry {
                    from: found.path.clone(),
                    to: entry.path.clone(),
                    url: entry.url.clone(),
                });
                continue;
            }

            // INVARIANT: Path taken by an orphan remote? Repair the remote!
            if let Some(&found) = actual_by_path.get(&entry.path) {
                if !declared_urls.contains(&found.url) && !all_actual_urls.contains(&entry.url) {
                    consumed.insert(&found.path);
                    diff.remote_moved.push(RemoteMovedEntry {
                        path: entry.path.clone(),
                        from: found.url.clone(),
                        to: entry.url.clone(),
                    });
                    continue;
                }
            }

            diff.added.push(entry.clone());
        }

        diff.deleted = unmatched_actual
            .into_iter()
            .filter(|entry| !consumed.contains(&entry.path))
            .cloned()
            .collect();

        diff
    }

    /// Check if any difference can be fixed without human intervention.
    pub fn has_automatic_fixes(&self) -> bool {
        !self.added.is_empty() || !self.moved.is_empty() || !self.remote_moved.is_empty()
    }

    /// Check if both layouts are identical.
    pub fn is_empty(&self) -> bool {
        !self.has_automatic_fixes() && self.deleted.is_empty()
    }
}
