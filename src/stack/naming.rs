// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stack naming convention.
//!
//! The remote of a metadata repository is always named `<StackName>-Stack`,
//! and the stack root folder holding it is always named `<StackName>`. A
//! stack root never lives inside another stack's tree.

use crate::{
    remote::RemoteUrl,
    stack::{PRIVATE_STACK_FOLDER, PUBLIC_STACK_FOLDER},
    world::WorldName,
};

use std::path::{Path, PathBuf};

/// Suffix every metadata repository name ends with.
pub const STACK_SUFFIX: &str = "-Stack";

/// Derive stack name from the remote of its metadata repository.
///
/// # Errors
///
/// - Return [`NamingError::MissingSuffix`] if the repository name does not
///   end with `-Stack`.
/// - Return [`NamingError::InvalidName`] if what remains is not a valid
///   stack name.
pub fn stack_name(url: &RemoteUrl) -> Result<String> {
    let repository = url.repository_name();
    let name = repository
        .strip_suffix(STACK_SUFFIX)
        .ok_or_else(|| NamingError::MissingSuffix {
            url: url.clone(),
            repository: repository.to_string(),
        })?;

    if WorldName::new(name, None).is_err() {
        return Err(NamingError::InvalidName {
            url: url.clone(),
            name: name.to_string(),
        });
    }

    Ok(name.to_string())
}

/// Check that a stack root follows the naming convention.
///
/// Returns the stack name on success.
///
/// # Errors
///
/// - Return [`NamingError::FolderMismatch`] if the stack root is not named
///   after the stack.
/// - Return [`NamingError::Nested`] if the stack root lives inside the tree
///   of another stack.
pub fn check_stack_root(stack_root: &Path, url: &RemoteUrl) -> Result<String> {
    let name = stack_name(url)?;

    let folder = stack_root
        .file_name()
        .map(|folder| folder.to_string_lossy().into_owned())
        .unwrap_or_default();
    if folder != name {
        return Err(NamingError::FolderMismatch {
            url: url.clone(),
            found: stack_root.to_path_buf(),
            expected: sibling(stack_root, &name),
        });
    }

    if let Some(outer) = enclosing_stack_root(stack_root) {
        return Err(NamingError::Nested {
            expected: sibling(&outer, &name),
            outer,
        });
    }

    Ok(name)
}

/// Find the closest stack root above target path, excluding the path itself.
pub fn enclosing_stack_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| is_stack_root(ancestor))
        .map(Path::to_path_buf)
}

/// Check if target folder holds a metadata repository.
pub fn is_stack_root(path: &Path) -> bool {
    path.join(PUBLIC_STACK_FOLDER).is_dir() || path.join(PRIVATE_STACK_FOLDER).is_dir()
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Stack naming error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    /// Metadata repository name does not end with `-Stack`.
    #[error("stack repository {repository:?} of {url} must end with \"-Stack\"")]
    MissingSuffix { url: RemoteUrl, repository: String },

    /// Stack name derived from the remote is unusable.
    #[error("stack name {name:?} derived from {url} is invalid")]
    InvalidName { url: RemoteUrl, name: String },

    /// Stack root folder is not named after the stack.
    #[error(
        "stack root {:?} does not match stack {url}, move it to {:?}",
        found.display(),
        expected.display()
    )]
    FolderMismatch {
        url: RemoteUrl,
        found: PathBuf,
        expected: PathBuf,
    },

    /// Stack root lives inside another stack.
    #[error(
        "stack cannot live inside stack {:?}, use {:?} instead",
        outer.display(),
        expected.display()
    )]
    Nested { outer: PathBuf, expected: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = NamingError> = std::result::Result<T, E>;
