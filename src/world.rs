// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! World naming.
//!
//! A __world__ is a concrete instantiation of a stack's declared repositories
//! on a machine. Every stack has one __default__ world whose root is the stack
//! root itself, and any number of __parallel__ worlds, sibling variants that
//! live in a `[Parallel]` subfolder of the stack root.
//!
//! # Naming
//!
//! The full name of the default world is the stack name, e.g., `CK`. The full
//! name of a parallel world appends the parallel name in brackets, e.g.,
//! `CK[Net8]`. Both the definition file (`CK[Net8].World.xml`) and the root
//! folder of a parallel world (`[Net8]`) derive from it.

pub mod definition;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Suffix of every world definition file.
pub const DEFINITION_SUFFIX: &str = ".World.xml";

/// Suffix of every shared state file.
pub const SHARED_STATE_SUFFIX: &str = ".SharedState.xml";

/// Name of a world, independent of any machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorldName {
    stack_name: String,
    parallel_name: Option<String>,
}

impl WorldName {
    /// Construct new world name.
    ///
    /// # Errors
    ///
    /// - Return [`WorldNameError`] if either name is blank or contains
    ///   characters that cannot appear in a file name.
    pub fn new(stack_name: impl Into<String>, parallel_name: Option<String>) -> Result<Self> {
        let stack_name = stack_name.into();
        check_name_part(&stack_name)?;
        if let Some(parallel) = &parallel_name {
            check_name_part(parallel)?;
        }

        Ok(Self {
            stack_name,
            parallel_name,
        })
    }

    /// Name of the stack this world belongs to.
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Name of the parallel world, [`None`] for the default world.
    pub fn parallel_name(&self) -> Option<&str> {
        self.parallel_name.as_deref()
    }

    /// Check if this is the default world of its stack.
    pub fn is_default(&self) -> bool {
        self.parallel_name.is_none()
    }

    /// Full name, e.g., `CK` or `CK[Net8]`.
    pub fn full_name(&self) -> String {
        match &self.parallel_name {
            Some(parallel) => format!("{}[{parallel}]", self.stack_name),
            None => self.stack_name.clone(),
        }
    }

    /// Check if both names designate the same world, ignoring case.
    pub fn is_same_world(&self, other: &WorldName) -> bool {
        self.full_name().eq_ignore_ascii_case(&other.full_name())
    }

    /// Expected name of the root element of the definition document.
    ///
    /// `Stack-World` for the default world, `Stack-Parallel.World` for a
    /// parallel one.
    pub fn definition_root_element(&self) -> String {
        match &self.parallel_name {
            Some(parallel) => format!("{}-{parallel}.World", self.stack_name),
            None => format!("{}-World", self.stack_name),
        }
    }

    /// File name of the definition document, e.g., `CK[Net8].World.xml`.
    pub fn definition_file_name(&self) -> String {
        format!("{}{DEFINITION_SUFFIX}", self.full_name())
    }

    /// File name of the shared state document, e.g., `CK[Net8].SharedState.xml`.
    pub fn shared_state_file_name(&self) -> String {
        format!("{}{SHARED_STATE_SUFFIX}", self.full_name())
    }

    /// Root folder of this world relative to its stack root.
    ///
    /// Empty path for the default world.
    pub fn relative_root(&self) -> PathBuf {
        match &self.parallel_name {
            Some(parallel) => PathBuf::from(format!("[{parallel}]")),
            None => PathBuf::new(),
        }
    }

    /// Parse a world name from a definition file name.
    ///
    /// Returns [`None`] if the file name is not a definition of the target
    /// stack, e.g., `Other.World.xml` when looking for stack `CK`.
    pub fn from_definition_file_name(stack_name: &str, file_name: &str) -> Option<Self> {
        let full_name = file_name.strip_suffix(DEFINITION_SUFFIX)?;
        let name: WorldName = full_name.parse().ok()?;
        (name.stack_name == stack_name).then_some(name)
    }
}

impl FromStr for WorldName {
    type Err = WorldNameError;

    fn from_str(full_name: &str) -> Result<Self, Self::Err> {
        match full_name.split_once('[') {
            Some((stack, rest)) => {
                let parallel = rest
                    .strip_suffix(']')
                    .ok_or_else(|| WorldNameError::Malformed(full_name.to_string()))?;
                Self::new(stack, Some(parallel.to_string()))
            }
            None => Self::new(full_name, None),
        }
    }
}

impl Display for WorldName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.full_name())
    }
}

fn check_name_part(part: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['[', ']', '/', '\\', ':', '*', '?', '"', '<', '>', '|'];

    if part.trim().is_empty() || part != part.trim() {
        return Err(WorldNameError::Blank(part.to_string()));
    }

    if part.contains(FORBIDDEN) || part.starts_with('.') {
        return Err(WorldNameError::Malformed(part.to_string()));
    }

    Ok(())
}

/// World name resolved on the current machine.
///
/// Carries the absolute root folder of the world and the absolute path of
/// its definition file. The definition file may be expected but temporarily
/// missing, e.g., in the middle of a merge conflict in the metadata
/// repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWorldName {
    name: WorldName,
    root: PathBuf,
    definition_path: PathBuf,
    has_definition_file: bool,
}

impl LocalWorldName {
    /// Resolve world name against a stack root and its metadata folder.
    ///
    /// Checks the presence of the definition file on disk right away.
    pub fn new(name: WorldName, stack_root: &Path, metadata_path: &Path) -> Self {
        let root = stack_root.join(name.relative_root());
        let definition_path = metadata_path.join(name.definition_file_name());
        let has_definition_file = definition_path.is_file();

        Self {
            name,
            root,
            definition_path,
            has_definition_file,
        }
    }

    /// Machine independent world name.
    pub fn name(&self) -> &WorldName {
        &self.name
    }

    /// Full name of the world.
    pub fn full_name(&self) -> String {
        self.name.full_name()
    }

    /// Absolute path to the root folder of the world.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path to the definition file.
    pub fn definition_path(&self) -> &Path {
        &self.definition_path
    }

    /// Check if the definition file existed when this name was resolved.
    pub fn has_definition_file(&self) -> bool {
        self.has_definition_file
    }
}

impl Display for LocalWorldName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({})", self.name, self.root.display())
    }
}

/// World naming error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldNameError {
    /// Name part is empty or padded with whitespace.
    #[error("world name part {0:?} is blank or padded with whitespace")]
    Blank(String),

    /// Name is not of the form `Stack` or `Stack[Parallel]`.
    #[error("malformed world name {0:?}")]
    Malformed(String),
}

/// Friendly result alias :3
pub type Result<T, E = WorldNameError> = std::result::Result<T, E>;
