// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Opened world lifecycle.
//!
//! A [`WorldBearer`] binds at most one world at a time to a runtime object
//! graph built by a [`WorldActivator`]. Everything the activator acquires is
//! pushed on a [`ResourceStack`], and released in reverse acquisition order
//! when the world closes. The working folders of the world are opened first
//! and released last.
//!
//! # Failure Rollback
//!
//! Opening a world first takes a snapshot of the [`SecretStore`]. If anything
//! goes wrong while opening, the snapshot is restored and every resource
//! acquired so far is released, leaving the bearer closed.

use crate::{
    layout::RelativePath,
    stack::{store::WorldStore, StackError},
    world::{definition::WorldDefinitionFile, LocalWorldName},
};

use git2::Repository;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Boxed error raised by collaborators.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Saved content of a secret store.
pub type SecretSnapshot = BTreeMap<String, String>;

/// Storage of secrets needed by activators.
pub trait SecretStore {
    /// Copy current content.
    fn snapshot(&self) -> SecretSnapshot;

    /// Replace current content with a snapshot.
    fn restore(&mut self, snapshot: SecretSnapshot);

    /// Check if target secret is available.
    fn contains(&self, key: &str) -> bool;

    /// Set target secret.
    fn set(&mut self, key: &str, value: &str);
}

/// Secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: SecretSnapshot,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }
}

impl SecretStore for MemorySecretStore {
    fn snapshot(&self) -> SecretSnapshot {
        self.secrets.clone()
    }

    fn restore(&mut self, snapshot: SecretSnapshot) {
        self.secrets = snapshot;
    }

    fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.secrets.insert(key.to_string(), value.to_string());
    }
}

/// Secrets read from prefixed environment variables.
///
/// Secret `GITHUB_TOKEN` lives in variable `<prefix>GITHUB_TOKEN`.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl SecretStore for EnvSecretStore {
    fn snapshot(&self) -> SecretSnapshot {
        std::env::vars()
            .filter_map(|(name, value)| {
                name.strip_prefix(&self.prefix)
                    .map(|key| (key.to_string(), value.clone()))
            })
            .collect()
    }

    fn restore(&mut self, snapshot: SecretSnapshot) {
        for key in self.snapshot().into_keys() {
            if !snapshot.contains_key(&key) {
                std::env::remove_var(self.variable(&key));
            }
        }
        for (key, value) in snapshot {
            std::env::set_var(self.variable(&key), value);
        }
    }

    fn contains(&self, key: &str) -> bool {
        std::env::var_os(self.variable(key)).is_some()
    }

    fn set(&mut self, key: &str, value: &str) {
        std::env::set_var(self.variable(key), value);
    }
}

/// Anything acquired while activating a world.
pub trait Resource {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Release resource.
    fn release(&mut self) -> std::result::Result<(), DynError>;
}

/// Marker resource standing for the root of an object graph.
#[derive(Debug, Clone)]
pub struct WorldRoot {
    name: String,
}

impl WorldRoot {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Resource for WorldRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&mut self) -> std::result::Result<(), DynError> {
        Ok(())
    }
}

/// Acquired resources, released in reverse acquisition order.
#[derive(Default)]
pub struct ResourceStack {
    resources: Vec<Box<dyn Resource>>,
    root: Option<usize>,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquired resource.
    pub fn push(&mut self, resource: Box<dyn Resource>) {
        debug!("acquire {}", resource.name());
        self.resources.push(resource);
    }

    /// Record the root resource of the object graph.
    pub fn push_root(&mut self, resource: Box<dyn Resource>) {
        self.push(resource);
        self.root = Some(self.resources.len() - 1);
    }

    /// Check if a root resource was recorded.
    pub fn has_root(&self) -> bool {
        self.root.is_some()
    }

    /// Name of the root resource.
    pub fn root_name(&self) -> Option<&str> {
        self.root
            .and_then(|index| self.resources.get(index))
            .map(|resource| resource.name())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Release every resource, last acquired first.
    ///
    /// Keeps going on failure. Returns every failure.
    pub fn release_all(&mut self) -> Vec<BearerError> {
        let mut failures = Vec::new();
        while let Some(mut resource) = self.resources.pop() {
            debug!("release {}", resource.name());
            if let Err(source) = resource.release() {
                failures.push(BearerError::Release {
                    name: resource.name().to_string(),
                    source,
                });
            }
        }
        self.root = None;

        failures
    }
}

impl Debug for ResourceStack {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("ResourceStack")
            .field(
                "resources",
                &self.resources.iter().map(|resource| resource.name()).collect::<Vec<_>>(),
            )
            .field("root", &self.root)
            .finish()
    }
}

/// Working folders of an opened world.
///
/// Holds an open repository handle for every declared working folder found
/// on disk.
pub struct WorldFileSystem {
    root: PathBuf,
    repositories: Vec<(RelativePath, Repository)>,
}

impl WorldFileSystem {
    /// Open every declared working folder present under target root.
    ///
    /// # Errors
    ///
    /// - Return [`BearerError::Repository`] if a present working folder
    ///   cannot be opened.
    pub fn open(root: PathBuf, definition: &WorldDefinitionFile) -> Result<Self> {
        let layout = definition
            .layout()
            .ok_or_else(|| BearerError::InvalidDefinition(definition.root_element_name().into()))?;

        let mut repositories = Vec::new();
        for entry in layout.entries() {
            let path = entry.path.to_path(&root);
            if !path.exists() {
                warn!("working folder {} is missing", entry.path);
                continue;
            }

            let repository = Repository::open(&path)
                .map_err(|source| BearerError::Repository { source, path })?;
            repositories.push((entry.path.clone(), repository));
        }

        Ok(Self { root, repositories })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opened repository at target relative path.
    pub fn repository(&self, path: &RelativePath) -> Option<&Repository> {
        self.repositories
            .iter()
            .find(|(found, _)| found == path)
            .map(|(_, repository)| repository)
    }

    /// Relative paths of every opened working folder.
    pub fn paths(&self) -> impl Iterator<Item = &RelativePath> + '_ {
        self.repositories.iter().map(|(path, _)| path)
    }

    fn release(self) {
        debug!("release working folders of {:?}", self.root.display());
    }
}

impl Debug for WorldFileSystem {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("WorldFileSystem")
            .field("root", &self.root)
            .field("repositories", &self.paths().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything an activator may use while building an object graph.
pub struct ActivationContext<'a> {
    pub world: &'a LocalWorldName,
    pub definition: &'a WorldDefinitionFile,
    pub file_system: &'a WorldFileSystem,
    pub secrets: &'a mut dyn SecretStore,
    pub resources: &'a mut ResourceStack,
}

/// Builder of the runtime object graph of a world.
pub trait WorldActivator {
    /// Secrets that must be available before activation.
    fn required_secrets(&self, _world: &LocalWorldName) -> Vec<String> {
        Vec::new()
    }

    /// Build object graph, pushing every acquired resource on the stack.
    ///
    /// Must push a root resource through [`ResourceStack::push_root`].
    fn activate(&mut self, context: ActivationContext<'_>) -> std::result::Result<(), DynError>;
}

/// Activator that only marks the world root.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlugins;

impl WorldActivator for NoPlugins {
    fn activate(&mut self, context: ActivationContext<'_>) -> std::result::Result<(), DynError> {
        context
            .resources
            .push_root(Box::new(WorldRoot::new(context.world.full_name())));
        Ok(())
    }
}

/// Opened world.
#[derive(Debug)]
pub struct World {
    name: LocalWorldName,
    definition: WorldDefinitionFile,
    file_system: WorldFileSystem,
    resources: ResourceStack,
}

impl World {
    pub fn name(&self) -> &LocalWorldName {
        &self.name
    }

    pub fn definition(&self) -> &WorldDefinitionFile {
        &self.definition
    }

    pub fn file_system(&self) -> &WorldFileSystem {
        &self.file_system
    }

    pub fn resources(&self) -> &ResourceStack {
        &self.resources
    }

    // INVARIANT: Resources go first, working folders last.
    fn release(mut self) -> Vec<BearerError> {
        let failures = self.resources.release_all();
        self.file_system.release();
        failures
    }
}

/// Binds at most one opened world to its object graph.
pub struct WorldBearer {
    activator: Box<dyn WorldActivator>,
    secrets: Box<dyn SecretStore>,
    world: Option<World>,
}

impl WorldBearer {
    pub fn new(activator: Box<dyn WorldActivator>, secrets: Box<dyn SecretStore>) -> Self {
        Self {
            activator,
            secrets,
            world: None,
        }
    }

    /// Currently opened world.
    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.world.is_some()
    }

    pub fn secrets(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    /// Open target world.
    ///
    /// A no-op if target world is already open, names being compared
    /// ignoring case. Any other opened world is closed first.
    ///
    /// # Errors
    ///
    /// - Return [`BearerError::Store`] if world definition cannot be read.
    /// - Return [`BearerError::MissingSecrets`] if required secrets are
    ///   unavailable.
    /// - Return [`BearerError::Activation`] if activator fails.
    /// - Return [`BearerError::MissingRoot`] if activator produced no root.
    ///
    /// On error, secrets are restored and the bearer is left closed.
    #[instrument(skip(self, world, store), fields(world = %world.full_name()), level = "debug")]
    pub fn open_world(&mut self, world: &LocalWorldName, store: &dyn WorldStore) -> Result<&World> {
        let already_open = self
            .world
            .as_ref()
            .is_some_and(|opened| opened.name.name().is_same_world(world.name()));
        if !already_open {
            self.close();

            let snapshot = self.secrets.snapshot();
            match self.activate(world, store) {
                Ok(opened) => {
                    info!("open world {}", world.full_name());
                    self.world = Some(opened);
                }
                Err(err) => {
                    self.secrets.restore(snapshot);
                    return Err(err);
                }
            }
        }

        self.world.as_ref().ok_or(BearerError::Closed)
    }

    fn activate(&mut self, world: &LocalWorldName, store: &dyn WorldStore) -> Result<World> {
        let definition = store.read_world_description(world.name())?;

        let missing = self
            .activator
            .required_secrets(world)
            .into_iter()
            .filter(|key| !self.secrets.contains(key))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(BearerError::MissingSecrets(missing));
        }

        let file_system = WorldFileSystem::open(world.root().to_path_buf(), &definition)?;
        let mut resources = ResourceStack::new();
        let activated = self.activator.activate(ActivationContext {
            world,
            definition: &definition,
            file_system: &file_system,
            secrets: self.secrets.as_mut(),
            resources: &mut resources,
        });

        let failure = match activated {
            Err(source) => Some(BearerError::Activation(source)),
            Ok(_) if !resources.has_root() => Some(BearerError::MissingRoot(world.full_name())),
            Ok(_) => None,
        };
        if let Some(err) = failure {
            for leftover in resources.release_all() {
                error!("{leftover}");
            }
            file_system.release();
            return Err(err);
        }

        Ok(World {
            name: world.clone(),
            definition,
            file_system,
            resources,
        })
    }

    /// Close opened world, logging release failures.
    pub fn close(&mut self) {
        if let Some(world) = self.world.take() {
            info!("close world {}", world.name.full_name());
            for err in world.release() {
                error!("{err}");
            }
        }
    }

    /// Close opened world.
    ///
    /// # Errors
    ///
    /// - Return the first [`BearerError::Release`] failure. Every resource is
    ///   still released.
    pub fn dispose(&mut self) -> Result<()> {
        match self.world.take() {
            Some(world) => match world.release().into_iter().next() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl Drop for WorldBearer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Debug for WorldBearer {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("WorldBearer")
            .field("world", &self.world)
            .finish_non_exhaustive()
    }
}

/// World lifecycle error types.
#[derive(Debug, thiserror::Error)]
pub enum BearerError {
    /// No world is open.
    #[error("no world is open")]
    Closed,

    /// Declared layout of the world is invalid.
    #[error("world definition <{0}> declares an invalid layout")]
    InvalidDefinition(String),

    /// Required secrets are unavailable.
    #[error("missing required secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<String>),

    /// Activator produced no root object.
    #[error("activation of world {0} produced no root object")]
    MissingRoot(String),

    /// Activator failed.
    #[error("failed to activate world")]
    Activation(#[source] DynError),

    /// Resource failed to release.
    #[error("failed to release {name}")]
    Release {
        #[source]
        source: DynError,
        name: String,
    },

    /// Working folder cannot be opened.
    #[error("failed to open working folder {:?}", path.display())]
    Repository {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Store(#[from] StackError),
}

/// Friendly result alias :3
pub type Result<T, E = BearerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{
        tests::{stack_url, CountingGit},
        StackRepository,
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{cell::RefCell, env::current_dir, rc::Rc};

    type Log = Rc<RefCell<Vec<String>>>;

    struct Logged {
        name: String,
        log: Log,
    }

    impl Resource for Logged {
        fn name(&self) -> &str {
            &self.name
        }

        fn release(&mut self) -> std::result::Result<(), DynError> {
            self.log.borrow_mut().push(format!("release {}", self.name));
            if self.name == "faulty" {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recording {
        log: Log,
        activations: usize,
        resources: Vec<&'static str>,
        root: bool,
        fail: bool,
        secrets: Vec<String>,
    }

    impl WorldActivator for Recording {
        fn required_secrets(&self, _: &LocalWorldName) -> Vec<String> {
            self.secrets.clone()
        }

        fn activate(&mut self, context: ActivationContext<'_>) -> std::result::Result<(), DynError> {
            self.activations += 1;
            context.secrets.set("SESSION", "temporary");
            for name in &self.resources {
                context.resources.push(Box::new(Logged {
                    name: name.to_string(),
                    log: self.log.clone(),
                }));
            }
            if self.root {
                context.resources.push_root(Box::new(Logged {
                    name: "root".into(),
                    log: self.log.clone(),
                }));
            }
            if self.fail {
                return Err("activation failed".into());
            }
            Ok(())
        }
    }

    fn stack() -> anyhow::Result<StackRepository<CountingGit>> {
        Ok(StackRepository::create(&stack_url(), &current_dir()?, true, "main", CountingGit::default())?)
    }

    fn bearer(activator: Recording) -> WorldBearer {
        WorldBearer::new(Box::new(activator), Box::new(MemorySecretStore::new()))
    }

    #[sealed_test]
    fn release_in_reverse_acquisition_order() -> anyhow::Result<()> {
        let stack = stack()?;
        let log = Log::default();
        let mut bearer = bearer(Recording {
            log: log.clone(),
            resources: vec!["first", "second"],
            root: true,
            ..Default::default()
        });

        let world = stack.world(None).cloned().unwrap();
        let opened = bearer.open_world(&world, &stack)?;
        assert_eq!(opened.resources().root_name(), Some("root"));
        assert!(bearer.secrets().contains("SESSION"));

        bearer.dispose()?;
        assert!(!bearer.is_open());
        assert_eq!(
            *log.borrow(),
            vec!["release root", "release second", "release first"]
        );

        Ok(())
    }

    #[sealed_test]
    fn reopening_same_world_is_a_no_op() -> anyhow::Result<()> {
        let stack = stack()?;
        let mut bearer = WorldBearer::new(Box::new(NoPlugins), Box::new(MemorySecretStore::new()));
        let world = stack.world(None).cloned().unwrap();

        bearer.open_world(&world, &stack)?;
        let lowercase = crate::world::LocalWorldName::new("ck".parse()?, stack.stack_root(), stack.path());
        let opened = bearer.open_world(&lowercase, &stack)?;
        assert_eq!(opened.name().full_name(), "CK");

        Ok(())
    }

    #[sealed_test]
    fn failed_activation_rolls_back() -> anyhow::Result<()> {
        let stack = stack()?;
        let log = Log::default();
        let mut bearer = bearer(Recording {
            log: log.clone(),
            resources: vec!["first", "faulty"],
            root: true,
            fail: true,
            ..Default::default()
        });

        let world = stack.world(None).cloned().unwrap();
        let result = bearer.open_world(&world, &stack);
        assert!(matches!(result, Err(BearerError::Activation(_))));
        assert!(!bearer.is_open());
        assert!(!bearer.secrets().contains("SESSION"));
        assert_eq!(
            *log.borrow(),
            vec!["release root", "release faulty", "release first"]
        );

        Ok(())
    }

    #[sealed_test]
    fn missing_root_or_secrets_fail_to_open() -> anyhow::Result<()> {
        let stack = stack()?;
        let world = stack.world(None).cloned().unwrap();

        let mut rootless = bearer(Recording::default());
        let result = rootless.open_world(&world, &stack);
        assert!(matches!(result, Err(BearerError::MissingRoot(_))));

        let mut locked = bearer(Recording {
            root: true,
            secrets: vec!["GITHUB_TOKEN".into()],
            ..Default::default()
        });
        let result = locked.open_world(&world, &stack);
        assert!(matches!(result, Err(BearerError::MissingSecrets(keys)) if keys == ["GITHUB_TOKEN"]));
        assert!(!locked.is_open());

        Ok(())
    }

    #[sealed_test(env = [("WS_SECRET_KEEP", "1")])]
    fn environment_secrets_restore() {
        let mut store = EnvSecretStore::new("WS_SECRET_");
        let snapshot = store.snapshot();
        store.set("EXTRA", "2");
        assert!(store.contains("EXTRA"));

        store.restore(snapshot);
        assert!(!store.contains("EXTRA"));
        assert!(store.contains("KEEP"));
    }
}
