// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stack root registry.
//!
//! Worldstack keeps track of every stack cloned or created on the machine in
//! one flat text file called the __stack root registry__. The registry lives
//! outside of any Git repository, by default at
//! `$XDG_DATA_HOME/worldstack/StackRootRegistry.v0.txt`.
//!
//! # File Format
//!
//! One line per known clone:
//!
//! ```text
//! /home/user/dev/CK/.PublicStack*https://github.com/org/CK-Stack
//! ```
//!
//! The registry is append-only. Cloning the same stack twice is allowed, the
//! registry only reports it. The first clone of a stack short name is its
//! __primary__ clone, later ones are __duplicates__.

use crate::{
    git::GitOps,
    remote::RemoteUrl,
    stack::{StackRepository, PRIVATE_STACK_FOLDER, PUBLIC_STACK_FOLDER},
    world::DEFINITION_SUFFIX,
};

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

const SEPARATOR: char = '*';

/// Snapshot of a known stack clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackInfo {
    git_repository_path: PathBuf,
    root_path: PathBuf,
    stack_url: RemoteUrl,
    is_public: bool,
    world_definitions: Vec<String>,
}

impl StackInfo {
    fn new(git_repository_path: PathBuf, stack_url: RemoteUrl) -> Option<Self> {
        let is_public = match git_repository_path.file_name()?.to_str()? {
            PUBLIC_STACK_FOLDER => true,
            PRIVATE_STACK_FOLDER => false,
            _ => return None,
        };
        let root_path = git_repository_path.parent()?.to_path_buf();
        let world_definitions = list_definitions(&git_repository_path);

        Some(Self {
            git_repository_path,
            root_path,
            stack_url,
            is_public,
            world_definitions,
        })
    }

    /// Path to the metadata repository.
    pub fn git_repository_path(&self) -> &Path {
        &self.git_repository_path
    }

    /// Path to the stack root.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn stack_url(&self) -> &RemoteUrl {
        &self.stack_url
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// Full names of the worlds defined when the snapshot was taken.
    pub fn world_definitions(&self) -> &[String] {
        &self.world_definitions
    }

    /// Last folder name of the stack root.
    pub fn short_name(&self) -> String {
        self.root_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn to_line(&self) -> String {
        format!(
            "{}{SEPARATOR}{}",
            self.git_repository_path.display(),
            self.stack_url
        )
    }
}

fn list_definitions(git_repository_path: &Path) -> Vec<String> {
    let mut names = fs::read_dir(git_repository_path)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(DEFINITION_SUFFIX))
                .map(String::from)
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}

/// Clone of a stack that is not its primary clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateStack {
    pub info: StackInfo,

    /// Remote differs from the one of the primary clone.
    pub url_differs: bool,

    /// Privacy differs from the one of the primary clone.
    pub privacy_differs: bool,
}

impl DuplicateStack {
    /// Check if this clone disagrees with its primary clone.
    pub fn is_flagged(&self) -> bool {
        self.url_differs || self.privacy_differs
    }
}

/// Every known clone of one stack short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackGroup {
    pub name: String,
    pub primary: StackInfo,
    pub duplicates: Vec<DuplicateStack>,
}

/// Registry line that cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLine {
    pub number: usize,
    pub line: String,
}

/// Local index of every stack clone on the machine.
#[derive(Debug, Clone)]
pub struct StackRootRegistry {
    path: PathBuf,
    entries: Vec<StackInfo>,
    invalid_lines: Vec<InvalidLine>,
}

impl StackRootRegistry {
    /// Load registry file.
    ///
    /// A missing file yields an empty registry. Entries whose metadata
    /// repository vanished from disk are dropped and the file is rewritten
    /// without them. Invalid lines are logged, kept aside in
    /// [`Self::invalid_lines`], and do not stop the rest from loading.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::Read`] if registry file cannot be read.
    /// - Return [`RegistryError::Write`] if pruned registry cannot be written.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self> {
        let mut registry = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            invalid_lines: Vec::new(),
        };

        let content = match fs::read_to_string(&registry.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no registry at {:?}", registry.path.display());
                return Ok(registry);
            }
            Err(source) => {
                return Err(RegistryError::Read {
                    source,
                    path: registry.path,
                })
            }
        };

        let mut needs_rewrite = false;
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Some(info) if info.git_repository_path.is_dir() => registry.entries.push(info),
                Some(info) => {
                    info!(
                        "forget stack clone {:?}, it no longer exists",
                        info.git_repository_path.display()
                    );
                    needs_rewrite = true;
                }
                None => {
                    error!("invalid stack registry line {}: {line:?}", index + 1);
                    registry.invalid_lines.push(InvalidLine {
                        number: index + 1,
                        line: line.to_string(),
                    });
                }
            }
        }

        if needs_rewrite {
            registry.save()?;
        }

        Ok(registry)
    }

    /// Record a newly created or cloned stack and save the registry.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::Write`] if registry cannot be written.
    pub fn on_created<G: GitOps>(&mut self, stack: &StackRepository<G>) -> Result<()> {
        let info = StackInfo::new(stack.path().to_path_buf(), stack.origin_url().clone())
            .ok_or_else(|| RegistryError::NotAStack(stack.path().to_path_buf()))?;
        info!("register stack clone {:?}", info.git_repository_path.display());
        self.entries.push(info);
        self.save()
    }

    /// Write every entry back to the registry file.
    ///
    /// Invalid lines found at load time are written back verbatim after the
    /// valid entries, so that a human can still repair them.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::Write`] if registry cannot be written.
    pub fn save(&self) -> Result<()> {
        let mut content = self
            .entries
            .iter()
            .map(StackInfo::to_line)
            .chain(self.invalid_lines.iter().map(|invalid| invalid.line.clone()))
            .collect::<Vec<_>>()
            .join("\n");
        content.push('\n');

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                mkdirp::mkdirp(parent)?;
            }
            fs::write(&self.path, &content)
        };
        write().map_err(|source| RegistryError::Write {
            source,
            path: self.path.clone(),
        })
    }

    /// Known clones in registration order.
    pub fn entries(&self) -> &[StackInfo] {
        &self.entries
    }

    /// Lines skipped at load time.
    pub fn invalid_lines(&self) -> &[InvalidLine] {
        &self.invalid_lines
    }

    /// Known clones of target remote.
    pub fn find_by_url(&self, url: &RemoteUrl) -> Vec<&StackInfo> {
        self.entries
            .iter()
            .filter(|info| &info.stack_url == url)
            .collect()
    }

    /// Group known clones by stack short name, ignoring case.
    ///
    /// The earliest registered clone of a group is its primary. Later clones
    /// are flagged if their remote or privacy differs from the primary.
    pub fn get_list_info(&self) -> Vec<StackGroup> {
        let mut groups: Vec<StackGroup> = Vec::new();
        for info in &self.entries {
            let name = info.short_name();
            match groups
                .iter_mut()
                .find(|group| group.name.eq_ignore_ascii_case(&name))
            {
                Some(group) => {
                    let duplicate = DuplicateStack {
                        url_differs: info.stack_url != group.primary.stack_url,
                        privacy_differs: info.is_public != group.primary.is_public,
                        info: info.clone(),
                    };
                    if duplicate.is_flagged() {
                        warn!(
                            "stack clone {:?} disagrees with primary clone {:?}",
                            info.root_path.display(),
                            group.primary.root_path.display()
                        );
                    }
                    group.duplicates.push(duplicate);
                }
                None => groups.push(StackGroup {
                    name,
                    primary: info.clone(),
                    duplicates: Vec::new(),
                }),
            }
        }

        groups
    }

    /// Path to the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// INVARIANT: Paths may hold the separator, remote URLs never do.
fn parse_line(line: &str) -> Option<StackInfo> {
    let (path, url) = line.rsplit_once(SEPARATOR)?;
    let path = PathBuf::from(path);
    if !path.is_absolute() {
        return None;
    }
    let url = RemoteUrl::parse(url).ok()?;

    StackInfo::new(path, url)
}

/// Stack root registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registry file cannot be read.
    #[error("failed to read stack registry {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Registry file cannot be written.
    #[error("failed to write stack registry {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Path is not a metadata repository.
    #[error("{:?} is not a stack metadata repository", .0.display())]
    NotAStack(PathBuf),
}

/// Friendly result alias :3
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::formatdoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{env::current_dir, fs::create_dir_all};

    fn clone_dir(root: &Path, name: &str, folder: &str) -> anyhow::Result<PathBuf> {
        let path = root.join(name).join(folder);
        create_dir_all(&path)?;
        Ok(path)
    }

    #[sealed_test]
    fn load_prunes_vanished_clones_and_reports_invalid_lines() -> anyhow::Result<()> {
        let root = current_dir()?;
        let alive = clone_dir(&root, "CK", PUBLIC_STACK_FOLDER)?;
        fs::write(alive.join("CK.World.xml"), "<CK-World />")?;
        let gone = root.join("Gone").join(PUBLIC_STACK_FOLDER);
        let file = root.join("registry.txt");
        fs::write(
            &file,
            formatdoc! {"
                {}*https://host/org/CK-Stack
                {}*https://host/org/Gone-Stack
                this line is garbage
            ", alive.display(), gone.display()},
        )?;

        let registry = StackRootRegistry::load(&file)?;
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].short_name(), "CK");
        assert_eq!(registry.entries()[0].world_definitions(), ["CK".to_string()]);
        assert_eq!(
            registry.invalid_lines(),
            [InvalidLine {
                number: 3,
                line: "this line is garbage".into()
            }]
        );

        let expect = format!(
            "{}*https://host/org/CK-Stack\nthis line is garbage\n",
            alive.display()
        );
        assert_eq!(fs::read_to_string(&file)?, expect);

        // Later rewrites keep reporting the same line.
        let mut registry = StackRootRegistry::load(&file)?;
        registry.entries.clear();
        registry.save()?;
        assert_eq!(fs::read_to_string(&file)?, "this line is garbage\n");
        let registry = StackRootRegistry::load(&file)?;
        assert_eq!(registry.invalid_lines().len(), 1);
        assert_eq!(registry.invalid_lines()[0].number, 1);

        Ok(())
    }

    #[sealed_test]
    fn first_clone_is_primary() -> anyhow::Result<()> {
        let root = current_dir()?;
        let first = clone_dir(&root, "a/CK", PUBLIC_STACK_FOLDER)?;
        let same = clone_dir(&root, "b/ck", PUBLIC_STACK_FOLDER)?;
        let private = clone_dir(&root, "c/CK", PRIVATE_STACK_FOLDER)?;
        let fork = clone_dir(&root, "d/CK", PUBLIC_STACK_FOLDER)?;
        let other = clone_dir(&root, "e/Other", PUBLIC_STACK_FOLDER)?;
        let file = root.join("registry.txt");
        fs::write(
            &file,
            formatdoc! {"
                {}*https://host/org/CK-Stack
                {}*https://host/org/CK-Stack
                {}*https://host/org/CK-Stack
                {}*https://host/fork/CK-Stack
                {}*https://host/org/Other-Stack
            ", first.display(), same.display(), private.display(), fork.display(), other.display()},
        )?;

        let registry = StackRootRegistry::load(&file)?;
        let groups = registry.get_list_info();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].primary.git_repository_path(), first);
        let flags = groups[0]
            .duplicates
            .iter()
            .map(|duplicate| (duplicate.url_differs, duplicate.privacy_differs))
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![(false, false), (false, true), (true, false)]);
        assert!(groups[1].duplicates.is_empty());

        let url = RemoteUrl::parse("https://host/org/CK-Stack")?;
        assert_eq!(registry.find_by_url(&url).len(), 3);

        Ok(())
    }

    #[sealed_test]
    fn missing_registry_is_empty() -> anyhow::Result<()> {
        let registry = StackRootRegistry::load(&current_dir()?.join("nope.txt"))?;
        assert!(registry.entries().is_empty());
        assert!(registry.get_list_info().is_empty());

        Ok(())
    }
}
