// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stack metadata repository.
//!
//! Every stack root holds exactly one __metadata repository__, either
//! `.PublicStack` or `.PrivateStack`, next to the working folders of its
//! default world. The metadata repository stores the definition file of each
//! world of the stack, along with their shared state. Per-machine state lives
//! in its `$Local` folder, which is never committed.

pub mod naming;
pub mod store;

use crate::{
    git::{Git2Ops, GitError, GitOps, PullOutcome},
    remote::{RemoteUrl, RemoteUrlError},
    world::{
        definition::{DefinitionError, WorldDefinitionFile},
        LocalWorldName, WorldName, WorldNameError, DEFINITION_SUFFIX,
    },
};

use naming::NamingError;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Metadata folder of a public stack.
pub const PUBLIC_STACK_FOLDER: &str = ".PublicStack";

/// Metadata folder of a private stack.
pub const PRIVATE_STACK_FOLDER: &str = ".PrivateStack";

/// Per-machine folder inside a metadata repository.
pub const LOCAL_FOLDER: &str = "$Local";

const GITIGNORE: &str = ".gitignore";

/// Metadata folder name for target privacy.
pub fn metadata_folder_name(is_public: bool) -> &'static str {
    if is_public {
        PUBLIC_STACK_FOLDER
    } else {
        PRIVATE_STACK_FOLDER
    }
}

/// Metadata repository of a stack.
#[derive(Debug)]
pub struct StackRepository<G = Git2Ops> {
    git: G,
    stack_name: String,
    stack_root: PathBuf,
    path: PathBuf,
    origin_url: RemoteUrl,
    is_public: bool,
    branch_name: String,
    world_definitions: Vec<LocalWorldName>,
    is_dirty: bool,
    generation: u64,
}

impl<G: GitOps> StackRepository<G> {
    /// Open metadata repository of an existing stack root.
    ///
    /// # Errors
    ///
    /// - Return [`StackError::NoMetadataFolder`] if stack root holds neither
    ///   `.PublicStack` nor `.PrivateStack`.
    /// - Return [`StackError::AmbiguousMetadataFolder`] if it holds both.
    /// - Return [`StackError::NoOrigin`] if metadata repository has no
    ///   `origin` remote.
    /// - Return [`StackError::Naming`] if stack root does not follow the
    ///   naming convention.
    /// - Return [`StackError::DetachedHead`] if no branch is checked out.
    #[instrument(skip(git), level = "debug")]
    pub fn open(stack_root: &Path, git: G) -> Result<Self> {
        let public = stack_root.join(PUBLIC_STACK_FOLDER);
        let private = stack_root.join(PRIVATE_STACK_FOLDER);
        let (path, is_public) = match (public.is_dir(), private.is_dir()) {
            (true, false) => (public, true),
            (false, true) => (private, false),
            (true, true) => return Err(StackError::AmbiguousMetadataFolder(stack_root.into())),
            (false, false) => return Err(StackError::NoMetadataFolder(stack_root.into())),
        };

        let raw = git
            .origin_url(&path)?
            .ok_or_else(|| StackError::NoOrigin(path.clone()))?;
        let origin_url = RemoteUrl::parse(raw)?;
        let stack_name = naming::check_stack_root(stack_root, &origin_url)?;
        let branch_name = git
            .current_branch(&path)?
            .ok_or_else(|| StackError::DetachedHead(path.clone()))?;

        let mut stack = Self {
            git,
            stack_name,
            stack_root: stack_root.to_path_buf(),
            path,
            origin_url,
            is_public,
            branch_name,
            world_definitions: Vec::new(),
            is_dirty: false,
            generation: 0,
        };
        stack.ensure_gitignore()?;
        stack.refresh_worlds()?;
        info!("open stack {} at {:?}", stack.stack_name, stack.stack_root.display());

        Ok(stack)
    }

    /// Clone metadata repository of a stack under a parent folder.
    ///
    /// The stack root is `<parent>/<StackName>`.
    ///
    /// # Errors
    ///
    /// - Return [`StackError::AlreadyExists`] if stack root already exists.
    /// - Return [`StackError::Naming`] if remote does not follow the naming
    ///   convention, or if stack root would land inside another stack.
    #[instrument(skip(git), level = "debug")]
    pub fn clone(url: &RemoteUrl, parent: &Path, is_public: bool, git: G) -> Result<Self> {
        let stack_root = Self::new_stack_root(url, parent)?;
        let path = stack_root.join(metadata_folder_name(is_public));
        git.clone_repository(url, &path, None)?;

        Self::open(&stack_root, git)
    }

    /// Create a brand new stack under a parent folder.
    ///
    /// Initializes the metadata repository with `origin` set to the target
    /// remote, an empty default world definition, and its `.gitignore`. Nothing
    /// is committed yet, the new stack is left dirty so that the next
    /// [`Self::push_changes`] publishes it.
    ///
    /// # Errors
    ///
    /// - Return [`StackError::AlreadyExists`] if stack root already exists.
    /// - Return [`StackError::Naming`] if remote does not follow the naming
    ///   convention, or if stack root would land inside another stack.
    #[instrument(skip(git), level = "debug")]
    pub fn create(
        url: &RemoteUrl,
        parent: &Path,
        is_public: bool,
        branch: &str,
        git: G,
    ) -> Result<Self> {
        let stack_root = Self::new_stack_root(url, parent)?;
        let path = stack_root.join(metadata_folder_name(is_public));
        git.init_repository(&path, branch, url)?;

        let world = WorldName::new(naming::stack_name(url)?, None)?;
        let definition = WorldDefinitionFile::empty(&world);
        let definition_path = path.join(world.definition_file_name());
        write_file(&definition_path, &definition.to_xml().map_err(|source| {
            StackError::Definition {
                source,
                path: definition_path.clone(),
            }
        })?)?;

        let mut stack = Self::open(&stack_root, git)?;
        stack.is_dirty = true;

        Ok(stack)
    }

    fn new_stack_root(url: &RemoteUrl, parent: &Path) -> Result<PathBuf> {
        let stack_root = parent.join(naming::stack_name(url)?);
        if stack_root.exists() {
            return Err(StackError::AlreadyExists(stack_root));
        }
        naming::check_stack_root(&stack_root, url)?;

        Ok(stack_root)
    }

    // INVARIANT: Local state never reaches the remote.
    fn ensure_gitignore(&mut self) -> Result<()> {
        let gitignore = self.path.join(GITIGNORE);
        if gitignore.exists() {
            return Ok(());
        }

        write_file(&gitignore, &format!("{LOCAL_FOLDER}/\n"))?;
        self.is_dirty = true;
        debug!("create {:?}", gitignore.display());

        Ok(())
    }

    /// Rescan metadata folder for world definitions.
    ///
    /// The default world is always listed first, even while its definition
    /// file is missing. Every rescan bumps the generation.
    pub fn refresh_worlds(&mut self) -> Result<&[LocalWorldName]> {
        let pattern = format!(
            "{}/*{DEFINITION_SUFFIX}",
            glob::Pattern::escape(&self.path.to_string_lossy())
        );
        let mut names = Vec::new();
        for entry in glob::glob(&pattern)? {
            let file = match entry {
                Ok(file) => file,
                Err(err) => {
                    warn!("skip unreadable definition: {err}");
                    continue;
                }
            };
            let found = file
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| WorldName::from_definition_file_name(&self.stack_name, name));
            if let Some(name) = found {
                names.push(name);
            }
        }

        if !names.iter().any(WorldName::is_default) {
            names.push(WorldName::new(self.stack_name.clone(), None)?);
        }
        names.sort_by_key(|name| (!name.is_default(), name.full_name().to_lowercase()));

        self.world_definitions = names
            .into_iter()
            .map(|name| LocalWorldName::new(name, &self.stack_root, &self.path))
            .collect();
        self.generation += 1;
        debug!(
            "stack {} lists {} worlds at generation {}",
            self.stack_name,
            self.world_definitions.len(),
            self.generation
        );

        Ok(&self.world_definitions)
    }

    /// Optionally pull the metadata repository, then rescan world definitions.
    ///
    /// The rescan is skipped if the pull brings nothing new. Returns [`None`]
    /// if either step fails, after logging why.
    pub fn try_refresh_worlds(&mut self, pull: bool) -> Option<&[LocalWorldName]> {
        if pull {
            match self.git.pull(&self.path, &self.branch_name) {
                Ok(PullOutcome::UpToDate) => return Some(&self.world_definitions),
                Ok(PullOutcome::FastForwarded) => {}
                Err(err) => {
                    error!("failed to pull stack {}: {err}", self.stack_name);
                    return None;
                }
            }
        }

        match self.refresh_worlds() {
            Ok(_) => Some(&self.world_definitions),
            Err(err) => {
                error!("failed to list worlds of stack {}: {err}", self.stack_name);
                None
            }
        }
    }

    /// Commit and push pending changes.
    ///
    /// A no-op unless dirty. If there is nothing to commit and every earlier
    /// commit already reached `origin`, the dirty flag is cleared without
    /// pushing. Returns whether anything was pushed.
    ///
    /// # Errors
    ///
    /// - Return [`StackError::Git`] if commit or push fails. The stack stays
    ///   dirty in that case, and the next call pushes the pending commit.
    #[instrument(skip(self), level = "debug")]
    pub fn push_changes(&mut self, message: &str) -> Result<bool> {
        if !self.is_dirty {
            debug!("stack {} has nothing to push", self.stack_name);
            return Ok(false);
        }

        let committed = self.git.commit_all(&self.path, message)?;
        if !committed && !self.git.has_unpushed_commits(&self.path, &self.branch_name)? {
            debug!("stack {} is already in sync with origin", self.stack_name);
            self.is_dirty = false;
            return Ok(false);
        }

        self.git.push(&self.path, &self.branch_name)?;
        self.is_dirty = false;

        Ok(true)
    }

    /// Find a world of this stack, the default one if `parallel` is [`None`].
    ///
    /// Parallel names are matched ignoring case.
    pub fn world(&self, parallel: Option<&str>) -> Option<&LocalWorldName> {
        self.world_definitions
            .iter()
            .find(|world| match (world.name().parallel_name(), parallel) {
                (None, None) => true,
                (Some(found), Some(wanted)) => found.eq_ignore_ascii_case(wanted),
                _ => false,
            })
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub(crate) fn git(&self) -> &G {
        &self.git
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn stack_root(&self) -> &Path {
        &self.stack_root
    }

    /// Path to the metadata folder, `.PublicStack` or `.PrivateStack`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin_url(&self) -> &RemoteUrl {
        &self.origin_url
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    /// Worlds found at the latest rescan.
    pub fn world_definitions(&self) -> &[LocalWorldName] {
        &self.world_definitions
    }

    /// Check if shared files changed since the last push.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Number of world rescans so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(|source| StackError::Write {
            source,
            path: parent.to_path_buf(),
        })?;
    }

    fs::write(path, contents).map_err(|source| StackError::Write {
        source,
        path: path.to_path_buf(),
    })
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| StackError::Read {
        source,
        path: path.to_path_buf(),
    })
}

/// Stack error types.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// Stack root holds no metadata repository.
    #[error("no {PUBLIC_STACK_FOLDER} or {PRIVATE_STACK_FOLDER} found in {:?}", .0.display())]
    NoMetadataFolder(PathBuf),

    /// Stack root holds both metadata repositories.
    #[error("both {PUBLIC_STACK_FOLDER} and {PRIVATE_STACK_FOLDER} found in {:?}", .0.display())]
    AmbiguousMetadataFolder(PathBuf),

    /// Metadata repository has no `origin` remote.
    #[error("metadata repository {:?} has no origin remote", .0.display())]
    NoOrigin(PathBuf),

    /// Metadata repository has no branch checked out.
    #[error("metadata repository {:?} has no branch checked out", .0.display())]
    DetachedHead(PathBuf),

    /// Stack root of a new stack already exists.
    #[error("stack root {:?} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// World is not part of this stack.
    #[error("stack has no world {0:?}")]
    UnknownWorld(String),

    /// Parallel world already exists.
    #[error("world {0:?} already exists")]
    WorldExists(String),

    /// World definition is unusable.
    #[error("invalid world definition {:?}", path.display())]
    Definition {
        #[source]
        source: DefinitionError,
        path: PathBuf,
    },

    /// State document is not well-formed.
    #[error("invalid state document {:?}", path.display())]
    State {
        #[source]
        source: quick_xml::Error,
        path: PathBuf,
    },

    /// File cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    RemoteUrl(#[from] RemoteUrlError),

    #[error(transparent)]
    WorldName(#[from] WorldNameError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = StackError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use git2::Repository;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{cell::Cell, env::current_dir};

    /// Git double that records commits and pushes, and clones nothing.
    #[derive(Debug, Default)]
    pub(crate) struct CountingGit {
        pub(crate) changes: Cell<bool>,
        pub(crate) pushes: Cell<usize>,
        pub(crate) unpushed: Cell<bool>,
        pub(crate) offline: Cell<bool>,
    }

    impl GitOps for CountingGit {
        fn clone_repository(&self, url: &RemoteUrl, path: &Path, _: Option<&str>) -> crate::git::Result<()> {
            Git2Ops.init_repository(path, "main", url)
        }

        fn init_repository(&self, path: &Path, branch: &str, origin: &RemoteUrl) -> crate::git::Result<()> {
            Git2Ops.init_repository(path, branch, origin)
        }

        fn origin_url(&self, path: &Path) -> crate::git::Result<Option<String>> {
            Git2Ops.origin_url(path)
        }

        fn set_origin_url(&self, path: &Path, url: &RemoteUrl) -> crate::git::Result<()> {
            Git2Ops.set_origin_url(path, url)
        }

        fn current_branch(&self, path: &Path) -> crate::git::Result<Option<String>> {
            Git2Ops.current_branch(path)
        }

        fn pull(&self, _: &Path, _: &str) -> crate::git::Result<PullOutcome> {
            Ok(PullOutcome::UpToDate)
        }

        fn commit_all(&self, _: &Path, _: &str) -> crate::git::Result<bool> {
            let committed = self.changes.replace(false);
            if committed {
                self.unpushed.set(true);
            }
            Ok(committed)
        }

        fn push(&self, _: &Path, branch: &str) -> crate::git::Result<()> {
            if self.offline.get() {
                return Err(GitError::Push {
                    source: git2::Error::from_str("remote unreachable"),
                    branch: branch.to_string(),
                });
            }
            self.pushes.set(self.pushes.get() + 1);
            self.unpushed.set(false);
            Ok(())
        }

        fn has_unpushed_commits(&self, _: &Path, _: &str) -> crate::git::Result<bool> {
            Ok(self.unpushed.get())
        }
    }

    pub(crate) fn stack_url() -> RemoteUrl {
        RemoteUrl::parse("https://example.org/org/CK-Stack").unwrap()
    }

    #[sealed_test]
    fn create_new_stack() -> anyhow::Result<()> {
        let parent = current_dir()?;
        let stack = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default())?;

        assert_eq!(stack.stack_name(), "CK");
        assert_eq!(stack.stack_root(), parent.join("CK"));
        assert_eq!(stack.path(), parent.join("CK").join(PUBLIC_STACK_FOLDER));
        assert_eq!(stack.branch_name(), "main");
        assert!(stack.is_public());
        assert!(stack.is_dirty());

        let gitignore = fs::read_to_string(stack.path().join(GITIGNORE))?;
        assert_eq!(gitignore, "$Local/\n");

        let worlds = stack
            .world_definitions()
            .iter()
            .map(|world| (world.full_name(), world.has_definition_file()))
            .collect::<Vec<_>>();
        assert_eq!(worlds, vec![("CK".to_string(), true)]);

        Ok(())
    }

    #[sealed_test]
    fn create_refuses_existing_root() -> anyhow::Result<()> {
        let parent = current_dir()?;
        fs::create_dir(parent.join("CK"))?;
        let result = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default());
        assert!(matches!(result, Err(StackError::AlreadyExists(_))));

        Ok(())
    }

    #[sealed_test]
    fn open_rejects_misnamed_stack_root() -> anyhow::Result<()> {
        let root = current_dir()?.join("Wrong");
        let repository = Repository::init(root.join(PRIVATE_STACK_FOLDER))?;
        repository.remote("origin", stack_url().as_str())?;

        let result = StackRepository::open(&root, Git2Ops);
        assert!(matches!(result, Err(StackError::Naming(NamingError::FolderMismatch { .. }))));

        Ok(())
    }

    #[sealed_test]
    fn list_worlds_of_own_stack_only() -> anyhow::Result<()> {
        let parent = current_dir()?;
        let mut stack = StackRepository::create(&stack_url(), &parent, false, "main", CountingGit::default())?;
        fs::write(stack.path().join("CK[Net8].World.xml"), "<CK-Net8.World />")?;
        fs::write(stack.path().join("Other.World.xml"), "<Other-World />")?;
        fs::write(stack.path().join("CK.SharedState.xml"), "<SharedState />")?;

        let generation = stack.generation();
        let worlds = stack
            .refresh_worlds()?
            .iter()
            .map(|world| world.full_name())
            .collect::<Vec<_>>();
        assert_eq!(worlds, vec!["CK", "CK[Net8]"]);
        assert_eq!(stack.generation(), generation + 1);
        assert_eq!(
            stack.world(Some("net8")).map(|world| world.root().to_path_buf()),
            Some(parent.join("CK").join("[Net8]"))
        );

        Ok(())
    }

    #[sealed_test]
    fn up_to_date_pull_skips_rescan() -> anyhow::Result<()> {
        let parent = current_dir()?;
        let mut stack = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default())?;
        let generation = stack.generation();

        assert!(stack.try_refresh_worlds(true).is_some());
        assert_eq!(stack.generation(), generation);
        assert!(stack.try_refresh_worlds(false).is_some());
        assert_eq!(stack.generation(), generation + 1);

        Ok(())
    }

    #[sealed_test]
    fn push_only_when_dirty_and_changed() -> anyhow::Result<()> {
        let parent = current_dir()?;
        let mut stack = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default())?;

        // Dirty, but nothing to commit: clean up without pushing.
        assert!(!stack.push_changes("sync")?);
        assert!(!stack.is_dirty());
        assert_eq!(stack.git().pushes.get(), 0);

        // Clean: no-op even if files changed.
        stack.git().changes.set(true);
        assert!(!stack.push_changes("sync")?);
        assert_eq!(stack.git().pushes.get(), 0);

        stack.mark_dirty();
        assert!(stack.push_changes("sync")?);
        assert!(!stack.is_dirty());
        assert_eq!(stack.git().pushes.get(), 1);

        Ok(())
    }

    #[sealed_test]
    fn failed_push_is_retried_on_next_call() -> anyhow::Result<()> {
        let parent = current_dir()?;
        let mut stack = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default())?;
        stack.git().changes.set(true);
        stack.git().offline.set(true);

        assert!(matches!(stack.push_changes("sync"), Err(StackError::Git(GitError::Push { .. }))));
        assert!(stack.is_dirty());
        assert_eq!(stack.git().pushes.get(), 0);

        // Nothing new to commit, but the earlier commit still has to go out.
        stack.git().offline.set(false);
        assert!(stack.push_changes("sync")?);
        assert!(!stack.is_dirty());
        assert_eq!(stack.git().pushes.get(), 1);

        Ok(())
    }

    #[sealed_test]
    fn commit_reaches_remote_once_it_is_reachable() -> anyhow::Result<()> {
        let cwd = current_dir()?;
        let remote = cwd.join("remotes").join("CK-Stack");
        let url = RemoteUrl::parse(remote.to_string_lossy())?;
        let mut stack = StackRepository::create(&url, &cwd.join("work"), true, "main", Git2Ops::new())?;

        assert!(stack.push_changes("Initial stack").is_err());
        assert!(stack.is_dirty());

        Repository::init_bare(&remote)?;
        assert!(stack.push_changes("Initial stack")?);
        assert!(!stack.is_dirty());
        let published = Repository::open_bare(&remote)?;
        assert!(published.find_reference("refs/heads/main").is_ok());

        // Everything already reached the remote.
        stack.mark_dirty();
        assert!(!stack.push_changes("Initial stack")?);
        assert!(!stack.is_dirty());

        Ok(())
    }
}
