// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Actual layout scanning.
//!
//! Scan a world root for Git working folders, i.e., any folder holding a
//! `.git` entry, no matter how deeply nested. Each working folder is opened
//! and its `origin` remote read and normalized.
//!
//! # Issues
//!
//! Some shapes of the working folder tree make any automatic reconciliation
//! unsafe:
//!
//! - __Repository issues__: a `.git` entry exists but the repository cannot
//!   be opened, or has no usable `origin` remote.
//! - __Homonym issues__: two or more folders share the same leaf name, so a
//!   remote cannot be matched to a folder by name alone.
//! - __Origin URL issues__: two or more folders are clones of the same remote.
//!
//! While any of these exist, the layout must not be diffed. Only manual fix
//! guidance can be given.

use crate::{
    git::GitOps,
    layout::{ActualEntry, DeclaredLayout, RelativePath},
    remote::RemoteUrl,
};

use ignore::WalkBuilder;
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Folders to leave out of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    ignored: Vec<RelativePath>,
    skip_parallel_roots: bool,
}

impl ScanFilter {
    /// Construct new filter that ignores nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore target folder and everything below it.
    pub fn ignore(mut self, path: RelativePath) -> Self {
        self.ignored.push(path);
        self
    }

    /// Ignore every top-level `[Parallel]` folder.
    ///
    /// Used when scanning a default world, whose root also holds the roots of
    /// its parallel worlds.
    pub fn skip_parallel_roots(mut self) -> Self {
        self.skip_parallel_roots = true;
        self
    }

    /// Check if target folder is ignored.
    pub fn is_ignored(&self, path: &RelativePath) -> bool {
        if self.skip_parallel_roots && path.depth() == 1 && is_parallel_root_name(path.as_str()) {
            return true;
        }

        self.ignored.iter().any(|ignored| {
            path == ignored
                || path
                    .as_str()
                    .strip_prefix(ignored.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

fn is_parallel_root_name(name: &str) -> bool {
    name.len() > 2 && name.starts_with('[') && name.ends_with(']')
}

/// Folder with a `.git` entry that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIssue {
    pub path: RelativePath,
    pub reason: String,
}

/// Folders sharing the same leaf name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomonymIssue {
    pub name: String,
    pub paths: Vec<RelativePath>,
}

/// Folders cloned from the same remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginUrlIssue {
    pub url: RemoteUrl,
    pub paths: Vec<RelativePath>,
}

/// Working folder whose name differs from the name of its remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingDrift {
    pub path: RelativePath,
    pub url: RemoteUrl,

    /// Sibling path named after the remote repository.
    pub expected: RelativePath,

    /// Why renaming to `expected` is not safe, if it is not.
    pub blocked_by: Option<String>,
}

/// Actual layout of Git working folders under a root.
#[derive(Debug, Clone)]
pub struct GitWorkingFolderLayout {
    root: PathBuf,
    missing_root: bool,
    folders: Vec<RelativePath>,
    entries: Vec<ActualEntry>,
    repository_issues: Vec<RepositoryIssue>,
    homonym_issues: Vec<HomonymIssue>,
    origin_url_issues: Vec<OriginUrlIssue>,
}

impl GitWorkingFolderLayout {
    /// Scan target root.
    ///
    /// A root that does not exist is not an error: it yields an empty layout
    /// flagged with [`Self::is_missing_root`].
    ///
    /// # Errors
    ///
    /// - Return [`ScanError::NotADirectory`] if root is not a directory.
    /// - Return [`ScanError::Walk`] if the directory tree cannot be walked.
    #[instrument(skip(filter, git), level = "debug")]
    pub fn create(root: &Path, filter: &ScanFilter, git: &impl GitOps) -> Result<Self> {
        let mut layout = Self {
            root: root.to_path_buf(),
            missing_root: false,
            folders: Vec::new(),
            entries: Vec::new(),
            repository_issues: Vec::new(),
            homonym_issues: Vec::new(),
            origin_url_issues: Vec::new(),
        };

        if !root.exists() {
            debug!("world root {:?} does not exist", root.display());
            layout.missing_root = true;
            return Ok(layout);
        }

        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        for folder in find_working_folders(root, filter)? {
            layout.classify_folder(folder, git);
        }
        layout.classify_groups();

        Ok(layout)
    }

    fn classify_folder(&mut self, path: RelativePath, git: &impl GitOps) {
        let absolute = path.to_path(&self.root);
        let issue = match git.origin_url(&absolute) {
            Ok(Some(raw)) => match RemoteUrl::parse(&raw) {
                Ok(url) => {
                    self.folders.push(path.clone());
                    self.entries.push(ActualEntry { path, url });
                    return;
                }
                Err(err) => format!("origin remote is unusable: {err}"),
            },
            Ok(None) => "no origin remote".to_string(),
            Err(err) => err.to_string(),
        };

        warn!("working folder {path} is corrupted: {issue}");
        self.folders.push(path.clone());
        self.repository_issues.push(RepositoryIssue {
            path,
            reason: issue,
        });
    }

    fn classify_groups(&mut self) {
        let mut by_name: BTreeMap<String, Vec<RelativePath>> = BTreeMap::new();
        for path in &self.folders {
            by_name
                .entry(self.leaf_name(path).to_lowercase())
                .or_default()
                .push(path.clone());
        }
        self.homonym_issues = by_name
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(_, paths)| HomonymIssue {
                name: self.leaf_name(&paths[0]),
                paths,
            })
            .collect();

        let mut by_url: BTreeMap<RemoteUrl, Vec<RelativePath>> = BTreeMap::new();
        for entry in &self.entries {
            by_url
                .entry(entry.url.clone())
                .or_default()
                .push(entry.path.clone());
        }
        self.origin_url_issues = by_url
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(url, paths)| OriginUrlIssue { url, paths })
            .collect();
    }

    // INVARIANT: The world root is named after its own folder.
    fn leaf_name(&self, path: &RelativePath) -> String {
        match path.leaf() {
            Some(leaf) => leaf.to_string(),
            None => self
                .root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Absolute path to the scanned root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if root does not exist, i.e., world was never cloned.
    pub fn is_missing_root(&self) -> bool {
        self.missing_root
    }

    /// Usable working folders.
    pub fn entries(&self) -> &[ActualEntry] {
        &self.entries
    }

    /// Working folders that cannot be used.
    pub fn repository_issues(&self) -> &[RepositoryIssue] {
        &self.repository_issues
    }

    /// Groups of working folders sharing a leaf name.
    pub fn homonym_issues(&self) -> &[HomonymIssue] {
        &self.homonym_issues
    }

    /// Groups of working folders sharing a remote.
    pub fn origin_url_issues(&self) -> &[OriginUrlIssue] {
        &self.origin_url_issues
    }

    /// Check if any structural issue prevents diffing.
    pub fn has_issues(&self) -> bool {
        !self.repository_issues.is_empty()
            || !self.homonym_issues.is_empty()
            || !self.origin_url_issues.is_empty()
    }

    /// Working folders not named after their remote repository.
    ///
    /// Folders already declared as is are left alone: the declaration wins.
    /// A rename is only considered safe if the folder is not a duplicate
    /// clone, the destination is free on disk, and the destination name is
    /// not used by any other working folder nor claimed by another rename.
    pub fn naming_drifts(&self, declared: Option<&DeclaredLayout>) -> Vec<NamingDrift> {
        let duplicated = self
            .origin_url_issues
            .iter()
            .flat_map(|issue| issue.paths.iter())
            .collect::<HashSet<_>>();
        let used_names = self
            .folders
            .iter()
            .map(|path| self.leaf_name(path).to_lowercase())
            .collect::<HashSet<_>>();

        let mut drifts = Vec::new();
        for entry in &self.entries {
            let leaf = match entry.path.leaf() {
                Some(leaf) => leaf,
                None => continue,
            };
            let repository_name = entry.url.repository_name();
            if leaf == repository_name || repository_name.is_empty() {
                continue;
            }
            if declared.is_some_and(|declared| declared.contains(&entry.path, &entry.url)) {
                continue;
            }

            let expected = entry.path.with_leaf(repository_name);
            let blocked_by = if duplicated.contains(&entry.path) {
                Some(format!("{} is a duplicate clone of {}", entry.path, entry.url))
            } else if expected.to_path(&self.root).exists() {
                Some(format!("{expected} already exists"))
            } else if used_names.contains(&repository_name.to_lowercase()) {
                Some(format!("another working folder is already named {repository_name:?}"))
            } else {
                None
            };

            drifts.push(NamingDrift {
                path: entry.path.clone(),
                url: entry.url.clone(),
                expected,
                blocked_by,
            });
        }

        // INVARIANT: Renames applied together never produce a new homonym.
        let mut claims = BTreeMap::<String, Vec<&RelativePath>>::new();
        for drift in drifts.iter().filter(|drift| drift.blocked_by.is_none()) {
            claims
                .entry(drift.url.repository_name().to_lowercase())
                .or_default()
                .push(&drift.path);
        }
        let contested = claims
            .into_values()
            .filter(|paths| paths.len() > 1)
            .map(|paths| paths.into_iter().cloned().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        for paths in contested {
            let others = paths
                .iter()
                .map(RelativePath::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            for drift in drifts.iter_mut().filter(|drift| paths.contains(&drift.path)) {
                drift.blocked_by = Some(format!(
                    "{others} would all be renamed {:?}",
                    drift.url.repository_name()
                ));
            }
        }

        drifts
    }
}

fn find_working_folders(root: &Path, filter: &ScanFilter) -> Result<Vec<RelativePath>> {
    let walk_root = root.to_path_buf();
    let walk_filter = filter.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|kind| kind.is_dir()) || entry.file_name() == ".git" {
                return false;
            }

            // INVARIANT: Anything not expressible as a relative path is skipped.
            entry
                .path()
                .strip_prefix(&walk_root)
                .ok()
                .and_then(RelativePath::from_path)
                .is_some_and(|path| !walk_filter.is_ignored(&path))
        })
        .build();

    let mut folders = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| ScanError::Walk {
            source,
            root: root.to_path_buf(),
        })?;

        if !entry.path().join(".git").exists() {
            continue;
        }

        if let Some(path) = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(RelativePath::from_path)
        {
            debug!("found working folder {path}");
            folders.push(path);
        }
    }

    Ok(folders)
}

/// Layout scanning error types.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Root exists but is not a directory.
    #[error("world root {:?} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Directory tree cannot be walked.
    #[error("failed to scan {:?}", root.display())]
    Walk {
        #[source]
        source: ignore::Error,
        root: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
