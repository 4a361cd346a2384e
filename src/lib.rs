// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stacks of Git repositories, laid out on disk as worlds.
//!
//! A __stack__ is a named collection of Git repositories, described by a
//! dedicated metadata repository (`.PublicStack` or `.PrivateStack`). Each
//! __world__ of a stack declares where every repository must be cloned,
//! relative to the world root.
//!
//! Worldstack keeps the working folders on disk consistent with those
//! declarations. It clones what is missing, moves what is misplaced, and
//! repairs remotes that drifted. It never deletes a working folder: anything
//! that cannot be fixed safely is reported for a human to handle.

pub mod bearer;
pub mod config;
pub mod git;
pub mod layout;
pub mod path;
pub mod registry;
pub mod remote;
pub mod root;
pub mod stack;
pub mod world;

pub use bearer::{World, WorldActivator, WorldBearer};
pub use git::{Git2Ops, GitOps};
pub use layout::{LayoutDiff, RelativePath};
pub use registry::StackRootRegistry;
pub use remote::RemoteUrl;
pub use root::{check::LayoutCheck, StackRoot};
pub use stack::{store::WorldStore, StackRepository};
pub use world::{definition::WorldDefinitionFile, LocalWorldName, WorldName};
