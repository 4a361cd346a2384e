// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stack root facade.
//!
//! A [`StackRoot`] ties together the metadata repository of a stack and the
//! bearer of its currently opened world. It is the entry point of every
//! command: create, clone or discover a stack, check and fix the layout of
//! its worlds, and open or close one of them.

pub mod check;

use crate::{
    bearer::{BearerError, MemorySecretStore, NoPlugins, World, WorldBearer},
    git::{Git2Ops, GitOps},
    registry::{RegistryError, StackRootRegistry},
    remote::RemoteUrl,
    stack::{naming, store::WorldStore, StackError, StackRepository},
    world::LocalWorldName,
};

use check::{LayoutCheck, LayoutSession};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Opened stack.
#[derive(Debug)]
pub struct StackRoot<G = Git2Ops> {
    stack: StackRepository<G>,
    bearer: WorldBearer,
}

impl<G: GitOps> StackRoot<G> {
    /// Wrap an opened metadata repository.
    ///
    /// Worlds are opened without plugins, with secrets held in memory. Use
    /// [`Self::with_bearer`] to change that.
    pub fn new(stack: StackRepository<G>) -> Self {
        Self {
            stack,
            bearer: WorldBearer::new(Box::new(NoPlugins), Box::new(MemorySecretStore::new())),
        }
    }

    /// Replace the bearer of opened worlds.
    pub fn with_bearer(mut self, bearer: WorldBearer) -> Self {
        self.bearer.close();
        self.bearer = bearer;
        self
    }

    /// Create a brand new stack and register it.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Stack`] if stack cannot be created.
    /// - Return [`RootError::Registry`] if registry cannot be saved.
    #[instrument(skip(registry, git), level = "debug")]
    pub fn create(
        url: &RemoteUrl,
        parent: &Path,
        is_public: bool,
        branch: &str,
        registry: &mut StackRootRegistry,
        git: G,
    ) -> Result<Self> {
        let stack = StackRepository::create(url, parent, is_public, branch, git)?;
        registry.on_created(&stack)?;
        info!("created stack {} at {:?}", stack.stack_name(), stack.stack_root().display());

        Ok(Self::new(stack))
    }

    /// Clone an existing stack and register it.
    ///
    /// Known clones of the same remote are reported, but do not prevent a new
    /// clone.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Stack`] if stack cannot be cloned.
    /// - Return [`RootError::Registry`] if registry cannot be saved.
    #[instrument(skip(registry, git), level = "debug")]
    pub fn clone_stack(
        url: &RemoteUrl,
        parent: &Path,
        is_public: bool,
        registry: &mut StackRootRegistry,
        git: G,
    ) -> Result<Self> {
        for known in registry.find_by_url(url) {
            warn!(
                "stack {url} is already cloned at {:?}",
                known.root_path().display()
            );
        }

        let stack = StackRepository::clone(url, parent, is_public, git)?;
        registry.on_created(&stack)?;

        Ok(Self::new(stack))
    }

    /// Open the stack enclosing target path.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::NotInStack`] if no stack root encloses the path.
    /// - Return [`RootError::Stack`] if the stack cannot be opened.
    pub fn open(path: &Path, git: G) -> Result<Self> {
        let stack_root = path
            .ancestors()
            .find(|ancestor| naming::is_stack_root(ancestor))
            .ok_or_else(|| RootError::NotInStack(path.to_path_buf()))?;

        Ok(Self::new(StackRepository::open(stack_root, git)?))
    }

    pub fn stack(&self) -> &StackRepository<G> {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut StackRepository<G> {
        &mut self.stack
    }

    /// Find a world of this stack, the default one if `parallel` is [`None`].
    ///
    /// # Errors
    ///
    /// - Return [`RootError::UnknownWorld`] if stack has no such world.
    pub fn world(&self, parallel: Option<&str>) -> Result<LocalWorldName> {
        self.stack.world(parallel).cloned().ok_or_else(|| {
            let name = match parallel {
                Some(parallel) => format!("{}[{parallel}]", self.stack.stack_name()),
                None => self.stack.stack_name().to_string(),
            };
            RootError::UnknownWorld(name)
        })
    }

    /// Check layout of target world, fixing it if authorized.
    pub fn check_world_layout(&self, world: &LocalWorldName, apply_auto_fix: bool) -> LayoutCheck {
        LayoutSession::new(&self.stack, world).run(apply_auto_fix)
    }

    /// Check layout of target world, then open it.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::LayoutNotReady`] if layout check fails or
    ///   requires a fix.
    /// - Return [`RootError::Bearer`] if world cannot be opened.
    pub fn open_world(&mut self, parallel: Option<&str>, apply_auto_fix: bool) -> Result<&World> {
        let world = self.world(parallel)?;
        let check = self.check_world_layout(&world, apply_auto_fix);
        if !check.is_ready() {
            return Err(RootError::LayoutNotReady {
                world: world.full_name(),
                messages: check.messages,
            });
        }

        Ok(self.bearer.open_world(&world, &self.stack)?)
    }

    /// Currently opened world.
    pub fn opened_world(&self) -> Option<&World> {
        self.bearer.world()
    }

    /// Close currently opened world, if any.
    pub fn close_world(&mut self) {
        self.bearer.close();
    }

    /// Create a new parallel world of this stack.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Stack`] if world exists or cannot be written.
    pub fn create_parallel(&mut self, parallel: &str) -> Result<LocalWorldName> {
        Ok(self.stack.create_new_parallel(parallel)?)
    }

    /// Pull metadata repository and list worlds again.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Pull`] if pull or listing fails.
    pub fn pull(&mut self) -> Result<&[LocalWorldName]> {
        let name = self.stack.stack_name().to_string();
        self.stack
            .try_refresh_worlds(true)
            .ok_or(RootError::Pull(name))
    }

    /// Commit and push pending changes of the metadata repository.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Stack`] if commit or push fails.
    pub fn push(&mut self, message: &str) -> Result<bool> {
        Ok(self.stack.push_changes(message)?)
    }

    /// Close opened world.
    ///
    /// # Errors
    ///
    /// - Return [`RootError::Bearer`] if a resource fails to release.
    pub fn dispose(mut self) -> Result<()> {
        Ok(self.bearer.dispose()?)
    }
}

/// Stack root error types.
#[derive(Debug, thiserror::Error)]
pub enum RootError {
    /// Path is not inside any stack.
    #[error("{:?} is not inside a stack", .0.display())]
    NotInStack(PathBuf),

    /// World is not part of the stack.
    #[error("stack has no world {0}")]
    UnknownWorld(String),

    /// World layout must be fixed first.
    #[error("world {world} cannot be opened until its layout is fixed:\n{}", messages.join("\n"))]
    LayoutNotReady { world: String, messages: Vec<String> },

    /// Metadata repository cannot be refreshed.
    #[error("failed to pull stack {0}")]
    Pull(String),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Bearer(#[from] BearerError),
}

/// Friendly result alias :3
pub type Result<T, E = RootError> = std::result::Result<T, E>;
