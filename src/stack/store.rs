// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! World storage.
//!
//! Collaborators of an opened world never touch the metadata repository
//! directly: they go through [`WorldStore`]. Three kinds of documents are
//! stored per world:
//!
//! - The definition, `<FullName>.World.xml`, committed.
//! - The shared state, `<FullName>.SharedState.xml`, committed. Writing it
//!   marks the stack dirty.
//! - The local state, `$Local/<FullName>/LocalState.xml`, never committed.

use crate::{
    git::GitOps,
    stack::{read_file, write_file, Result, StackError, StackRepository, LOCAL_FOLDER},
    world::{definition::WorldDefinitionFile, LocalWorldName, WorldName},
};

use quick_xml::{events::Event, Reader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const LOCAL_STATE_FILE: &str = "LocalState.xml";
const EMPTY_LOCAL_STATE: &str = "<LocalState />\n";
const EMPTY_SHARED_STATE: &str = "<SharedState />\n";

/// Storage of world documents.
pub trait WorldStore {
    /// Load definition of target world.
    fn read_world_description(&self, world: &WorldName) -> Result<WorldDefinitionFile>;

    /// Replace definition of target world.
    fn write_world_description(
        &mut self,
        world: &WorldName,
        definition: &WorldDefinitionFile,
    ) -> Result<()>;

    /// Per-machine state of target world, created empty if missing.
    fn get_or_create_local_state(&self, world: &WorldName) -> Result<String>;

    /// Replace per-machine state of target world.
    fn save_local_state(&self, world: &WorldName, state: &str) -> Result<()>;

    /// Shared state of target world, created empty if missing.
    fn get_or_create_shared_state(&mut self, world: &WorldName) -> Result<String>;

    /// Replace shared state of target world.
    fn save_shared_state(&mut self, world: &WorldName, state: &str) -> Result<()>;

    /// Per-machine scratch folder of target world, created if missing.
    fn get_working_local_folder(&self, world: &WorldName) -> Result<PathBuf>;

    /// Create a parallel world from the definition of the default world.
    fn create_new_parallel(&mut self, parallel_name: &str) -> Result<LocalWorldName>;
}

impl<G: GitOps> StackRepository<G> {
    fn known_world(&self, world: &WorldName) -> Result<&LocalWorldName> {
        self.world_definitions()
            .iter()
            .find(|found| found.name().is_same_world(world))
            .ok_or_else(|| StackError::UnknownWorld(world.full_name()))
    }

    fn local_folder(&self, world: &WorldName) -> PathBuf {
        self.path().join(LOCAL_FOLDER).join(world.full_name())
    }

    fn shared_state_path(&self, world: &WorldName) -> PathBuf {
        self.path().join(world.shared_state_file_name())
    }
}

impl<G: GitOps> WorldStore for StackRepository<G> {
    fn read_world_description(&self, world: &WorldName) -> Result<WorldDefinitionFile> {
        let known = self.known_world(world)?;
        let path = known.definition_path();
        let xml = read_file(path)?;

        WorldDefinitionFile::load(known.name(), &xml).map_err(|source| StackError::Definition {
            source,
            path: path.to_path_buf(),
        })
    }

    #[instrument(skip(self, definition), level = "debug")]
    fn write_world_description(
        &mut self,
        world: &WorldName,
        definition: &WorldDefinitionFile,
    ) -> Result<()> {
        let path = self.path().join(world.definition_file_name());
        let xml = definition.to_xml().map_err(|source| StackError::Definition {
            source,
            path: path.clone(),
        })?;
        write_file(&path, &xml)?;
        self.mark_dirty();
        self.refresh_worlds()?;

        Ok(())
    }

    fn get_or_create_local_state(&self, world: &WorldName) -> Result<String> {
        let path = self.local_folder(world).join(LOCAL_STATE_FILE);
        get_or_create_state(&path, EMPTY_LOCAL_STATE).map(|(state, _)| state)
    }

    fn save_local_state(&self, world: &WorldName, state: &str) -> Result<()> {
        let path = self.local_folder(world).join(LOCAL_STATE_FILE);
        check_state(&path, state)?;
        write_file(&path, state)
    }

    fn get_or_create_shared_state(&mut self, world: &WorldName) -> Result<String> {
        let path = self.shared_state_path(world);
        let (state, created) = get_or_create_state(&path, EMPTY_SHARED_STATE)?;
        if created {
            self.mark_dirty();
        }

        Ok(state)
    }

    fn save_shared_state(&mut self, world: &WorldName, state: &str) -> Result<()> {
        let path = self.shared_state_path(world);
        check_state(&path, state)?;
        write_file(&path, state)?;
        self.mark_dirty();

        Ok(())
    }

    fn get_working_local_folder(&self, world: &WorldName) -> Result<PathBuf> {
        let path = self.local_folder(world);
        mkdirp::mkdirp(&path).map_err(|source| StackError::Write {
            source,
            path: path.clone(),
        })?;

        Ok(path)
    }

    #[instrument(skip(self), level = "debug")]
    fn create_new_parallel(&mut self, parallel_name: &str) -> Result<LocalWorldName> {
        let name = WorldName::new(self.stack_name(), Some(parallel_name.to_string()))?;
        if self.world(Some(parallel_name)).is_some() {
            return Err(StackError::WorldExists(name.full_name()));
        }

        let default = WorldName::new(self.stack_name(), None)?;
        let mut editor = self.read_world_description(&default)?.edit();
        editor.rename_root(name.definition_root_element());
        self.write_world_description(&name, &editor.finish())?;
        info!("create parallel world {name}");

        self.world(Some(parallel_name))
            .cloned()
            .ok_or_else(|| StackError::UnknownWorld(name.full_name()))
    }
}

fn get_or_create_state(path: &Path, empty: &str) -> Result<(String, bool)> {
    if path.is_file() {
        return Ok((read_file(path)?, false));
    }

    debug!("create state {:?}", path.display());
    write_file(path, empty)?;

    Ok((empty.to_string(), true))
}

// INVARIANT: Only well-formed documents are ever stored.
fn check_state(path: &Path, state: &str) -> Result<()> {
    let mut reader = Reader::from_str(state);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => continue,
            Err(source) => {
                return Err(StackError::State {
                    source,
                    path: path.to_path_buf(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::tests::{rel, url},
        stack::tests::{stack_url, CountingGit},
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{env::current_dir, fs};

    fn new_stack() -> anyhow::Result<StackRepository<CountingGit>> {
        let parent = current_dir()?;
        let mut stack = StackRepository::create(&stack_url(), &parent, true, "main", CountingGit::default())?;
        stack.push_changes("init")?;

        Ok(stack)
    }

    #[sealed_test]
    fn shared_state_marks_stack_dirty() -> anyhow::Result<()> {
        let mut stack = new_stack()?;
        let world: WorldName = "CK".parse()?;
        assert!(!stack.is_dirty());

        assert_eq!(stack.get_or_create_shared_state(&world)?, EMPTY_SHARED_STATE);
        assert!(stack.is_dirty());
        assert!(stack.path().join("CK.SharedState.xml").is_file());

        stack.push_changes("sync")?;
        stack.save_shared_state(&world, "<SharedState Build=\"3\" />")?;
        assert!(stack.is_dirty());
        assert_eq!(stack.get_or_create_shared_state(&world)?, "<SharedState Build=\"3\" />");

        Ok(())
    }

    #[sealed_test]
    fn local_state_stays_out_of_the_repository() -> anyhow::Result<()> {
        let mut stack = new_stack()?;
        let world: WorldName = "CK".parse()?;

        stack.save_local_state(&world, "<LocalState Seen=\"true\" />")?;
        assert!(!stack.is_dirty());
        assert_eq!(
            fs::read_to_string(stack.path().join("$Local/CK/LocalState.xml"))?,
            "<LocalState Seen=\"true\" />"
        );
        assert_eq!(
            stack.get_working_local_folder(&world)?,
            stack.path().join("$Local").join("CK")
        );

        let result = stack.save_local_state(&world, "<LocalState></Other>");
        assert!(matches!(result, Err(StackError::State { .. })));

        Ok(())
    }

    #[sealed_test]
    fn create_parallel_from_default_definition() -> anyhow::Result<()> {
        let mut stack = new_stack()?;
        let default: WorldName = "CK".parse()?;
        let mut editor = stack.read_world_description(&default)?.edit();
        editor.set_git_folder(&rel("Libs/Foo"), &url("Foo"));
        stack.write_world_description(&default, &editor.finish())?;

        let parallel = stack.create_new_parallel("Net8")?;
        assert_eq!(parallel.full_name(), "CK[Net8]");
        assert!(parallel.has_definition_file());

        let definition = stack.read_world_description(parallel.name())?;
        assert_eq!(definition.root_element_name(), "CK-Net8.World");
        let paths = definition
            .layout()
            .map(|layout| layout.entries().iter().map(|entry| entry.path.to_string()).collect::<Vec<_>>());
        assert_eq!(paths, Some(vec!["Libs/Foo".to_string()]));

        let again = stack.create_new_parallel("net8");
        assert!(matches!(again, Err(StackError::WorldExists(_))));

        Ok(())
    }

    #[sealed_test]
    fn unknown_world_is_an_error() -> anyhow::Result<()> {
        let stack = new_stack()?;
        let result = stack.read_world_description(&"CK[Nope]".parse()?);
        assert!(matches!(result, Err(StackError::UnknownWorld(_))));

        Ok(())
    }
}
