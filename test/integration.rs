// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{RepoFixture, RepoKind};

use anyhow::Result;
use git2::Repository;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{env::current_dir, fs};
use worldstack::{
    layout::fix::FixKind, Git2Ops, GitOps, RelativePath, RemoteUrl, StackRoot, StackRootRegistry,
    WorldStore,
};

fn registry() -> Result<StackRootRegistry> {
    Ok(StackRootRegistry::load(&current_dir()?.join("registry.txt"))?)
}

fn rel(path: &str) -> RelativePath {
    RelativePath::from_path(path).unwrap()
}

fn declare(root: &mut StackRoot, parallel: Option<&str>, entries: &[(&str, &RemoteUrl)]) -> Result<()> {
    let world = root.world(parallel)?;
    let mut editor = root.stack().read_world_description(world.name())?.edit();
    for (path, url) in entries {
        editor.set_git_folder(&rel(path), url);
    }
    root.stack_mut().write_world_description(world.name(), &editor.finish())?;
    Ok(())
}

/// Publish a stack declaring `entries` in its default world.
fn publish(entries: &[(&str, &RemoteUrl)]) -> Result<StackRoot> {
    let cwd = current_dir()?;
    let remote = RepoFixture::new(cwd.join("remotes").join("CK-Stack"), RepoKind::Bare)?;
    let mut registry = registry()?;
    let mut root = StackRoot::create(
        &remote.url()?,
        &cwd.join("publisher"),
        true,
        "main",
        &mut registry,
        Git2Ops::new(),
    )?;
    declare(&mut root, None, entries)?;
    assert!(root.push("Initial stack")?);

    Ok(root)
}

fn clone_stack(into: &str, is_public: bool) -> Result<StackRoot> {
    let cwd = current_dir()?;
    let url = RemoteUrl::parse(cwd.join("remotes").join("CK-Stack").to_string_lossy())?;
    let mut registry = registry()?;
    Ok(StackRoot::clone_stack(&url, &cwd.join(into), is_public, &mut registry, Git2Ops::new())?)
}

fn check_default(root: &StackRoot, apply: bool) -> Result<worldstack::LayoutCheck> {
    let world = root.world(None)?;
    Ok(root.check_world_layout(&world, apply))
}

fn kinds(check: &worldstack::LayoutCheck) -> Vec<FixKind> {
    check.fixes.results().iter().map(|result| result.kind).collect()
}

#[sealed_test]
fn published_world_is_cloned_once() -> Result<()> {
    let foo = RepoFixture::remote(current_dir()?.join("remotes").join("Foo"))?;
    let mut publisher = publish(&[("Libs/Foo", &foo.url()?)])?;
    assert!(!publisher.push("Nothing new")?);

    let consumer = clone_stack("dev", true)?;
    let world_root = consumer.stack().stack_root().to_path_buf();

    let dry = check_default(&consumer, false)?;
    assert!(dry.success);
    assert!(dry.requires_fix);
    assert!(dry.fixes.is_empty());
    assert!(!world_root.join("Libs/Foo").exists());

    let fixed = check_default(&consumer, true)?;
    assert!(fixed.is_ready(), "{:?}", fixed.messages);
    assert_eq!(kinds(&fixed), vec![FixKind::Clone]);
    assert!(world_root.join("Libs/Foo/README.md").is_file());

    let again = check_default(&consumer, true)?;
    assert!(again.is_ready());
    assert!(again.fixes.is_empty());
    assert!(again.messages.is_empty());

    Ok(())
}

#[sealed_test]
fn misplaced_working_folder_is_moved_back() -> Result<()> {
    let foo = RepoFixture::remote(current_dir()?.join("remotes").join("Foo"))?;
    publish(&[("Libs/Foo", &foo.url()?)])?;
    let consumer = clone_stack("dev", true)?;
    assert!(check_default(&consumer, true)?.is_ready());

    let world_root = consumer.stack().stack_root().to_path_buf();
    fs::create_dir_all(world_root.join("Old"))?;
    fs::rename(world_root.join("Libs/Foo"), world_root.join("Old/Foo"))?;

    let result = check_default(&consumer, true)?;
    assert!(result.is_ready(), "{:?}", result.messages);
    assert_eq!(kinds(&result), vec![FixKind::Move]);
    assert!(world_root.join("Libs/Foo/README.md").is_file());
    assert!(!world_root.join("Old/Foo").exists());

    Ok(())
}

#[sealed_test]
fn drifted_origin_is_repaired() -> Result<()> {
    let foo = RepoFixture::remote(current_dir()?.join("remotes").join("Foo"))?;
    publish(&[("Libs/Foo", &foo.url()?)])?;
    let consumer = clone_stack("dev", true)?;
    assert!(check_default(&consumer, true)?.is_ready());

    let working_folder = consumer.stack().stack_root().join("Libs/Foo");
    let archive = RemoteUrl::parse(current_dir()?.join("archive").join("Foo").to_string_lossy())?;
    Repository::open(&working_folder)?.remote_set_url("origin", archive.as_str())?;

    let dry = check_default(&consumer, false)?;
    assert!(dry.requires_fix);
    assert_eq!(dry.messages.len(), 1);

    let result = check_default(&consumer, true)?;
    assert!(result.is_ready(), "{:?}", result.messages);
    assert_eq!(kinds(&result), vec![FixKind::UpdateRemote]);
    let origin = Git2Ops::new().origin_url(&working_folder)?;
    assert_eq!(origin.as_deref(), Some(foo.url()?.as_str()));

    Ok(())
}

#[sealed_test]
fn undeclared_working_folder_is_never_deleted() -> Result<()> {
    let cwd = current_dir()?;
    let foo = RepoFixture::remote(cwd.join("remotes").join("Foo"))?;
    let extra = RepoFixture::remote(cwd.join("remotes").join("Extra"))?;
    publish(&[("Libs/Foo", &foo.url()?)])?;
    let consumer = clone_stack("dev", true)?;

    let local = RepoFixture::new(consumer.stack().stack_root().join("Extra"), RepoKind::Normal)?;
    local.set_origin(&extra.url()?)?;

    for _ in 0..2 {
        let result = check_default(&consumer, true)?;
        assert!(result.success);
        assert!(result.requires_fix);
        assert!(result.messages.iter().any(|message| message.contains("Extra")));
        assert!(consumer.stack().stack_root().join("Extra/.git").exists());
    }
    assert!(consumer.stack().stack_root().join("Libs/Foo/.git").exists());

    Ok(())
}

#[sealed_test]
fn duplicate_clone_is_never_renamed() -> Result<()> {
    let foo = RepoFixture::remote(current_dir()?.join("remotes").join("Foo"))?;
    publish(&[("Libs/Foo", &foo.url()?)])?;
    let consumer = clone_stack("dev", true)?;
    assert!(check_default(&consumer, true)?.is_ready());

    let copy = consumer.stack().stack_root().join("Libs/Bar");
    let local = RepoFixture::new(&copy, RepoKind::Normal)?;
    local.set_origin(&foo.url()?)?;

    let result = check_default(&consumer, true)?;
    assert!(result.success);
    assert!(result.requires_fix);
    assert!(result.fixes.is_empty());
    assert!(copy.join(".git").exists());
    assert!(consumer.stack().stack_root().join("Libs/Foo/.git").exists());

    Ok(())
}

#[sealed_test]
fn parallel_world_is_cloned_under_its_own_root() -> Result<()> {
    let foo = RepoFixture::remote(current_dir()?.join("remotes").join("Foo"))?;
    let mut publisher = publish(&[])?;
    let parallel = publisher.create_parallel("Net8")?;
    declare(&mut publisher, Some("Net8"), &[("Foo", &foo.url()?)])?;
    assert!(publisher.push("Add Net8 world")?);

    let dry = publisher.check_world_layout(&parallel, false);
    assert!(dry.missing_root);
    assert!(dry.success);
    assert!(dry.requires_fix);
    assert!(!parallel.root().exists());

    let fixed = publisher.check_world_layout(&parallel, true);
    assert!(fixed.missing_root);
    assert!(fixed.is_ready(), "{:?}", fixed.messages);
    assert!(parallel.root().join("Foo/README.md").is_file());

    // INVARIANT: Default world never sees parallel roots as its own folders.
    let default = check_default(&publisher, true)?;
    assert!(default.is_ready(), "{:?}", default.messages);
    assert!(default.fixes.is_empty());

    Ok(())
}

#[sealed_test]
fn pulled_declarations_are_applied() -> Result<()> {
    let cwd = current_dir()?;
    let foo = RepoFixture::remote(cwd.join("remotes").join("Foo"))?;
    let bar = RepoFixture::remote(cwd.join("remotes").join("Bar"))?;
    let mut publisher = publish(&[("Libs/Foo", &foo.url()?)])?;

    let mut consumer = clone_stack("dev", true)?;
    assert!(check_default(&consumer, true)?.is_ready());
    let generation = consumer.stack().generation();

    declare(&mut publisher, None, &[("Libs/Bar", &bar.url()?)])?;
    assert!(publisher.stack().is_dirty());
    assert!(publisher.push("Add Bar")?);
    assert!(!publisher.stack().is_dirty());

    consumer.pull()?;
    assert!(consumer.stack().generation() > generation);

    let result = check_default(&consumer, true)?;
    assert!(result.is_ready(), "{:?}", result.messages);
    assert_eq!(kinds(&result), vec![FixKind::Clone]);
    assert!(consumer.stack().stack_root().join("Libs/Bar/README.md").is_file());

    Ok(())
}

#[sealed_test]
fn registry_keeps_first_clone_as_primary() -> Result<()> {
    publish(&[])?;
    clone_stack("first", true)?;
    clone_stack("second", false)?;

    let registry = registry()?;
    assert_eq!(registry.entries().len(), 3);

    let groups = registry.get_list_info();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.name, "CK");
    assert!(group.primary.root_path().starts_with(current_dir()?.join("publisher")));
    assert_eq!(group.duplicates.len(), 2);
    assert!(!group.duplicates[0].is_flagged());
    assert!(group.duplicates[1].privacy_differs);
    assert!(!group.duplicates[1].url_differs);

    fs::remove_dir_all(current_dir()?.join("second"))?;
    let pruned = self::registry()?;
    assert_eq!(pruned.entries().len(), 2);
    let saved = fs::read_to_string(pruned.path())?;
    assert_eq!(saved.lines().count(), 2);

    Ok(())
}
