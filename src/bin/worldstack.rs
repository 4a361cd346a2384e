// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use worldstack::{
    bearer::{EnvSecretStore, NoPlugins},
    config::Settings,
    path::{default_config_path, default_registry_path},
    Git2Ops, RemoteUrl, StackRoot, StackRootRegistry, WorldBearer,
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::{env::current_dir, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SECRET_PREFIX: &str = "WORLDSTACK_SECRET_";

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "worldstack [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file instead of the default one.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = match self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_config_path()?)?,
        };

        match self.command {
            Command::Init(opts) => run_init(opts, &settings),
            Command::Clone(opts) => run_clone(opts, &settings),
            Command::Check(opts) => run_check(opts, &settings),
            Command::Pull => run_pull(),
            Command::Push(opts) => run_push(opts),
            Command::Parallel(opts) => run_parallel(opts),
            Command::Worlds => run_worlds(),
            Command::List => run_list(&settings),
            Command::Open(opts) => run_open(opts, &settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create a brand new stack.
    #[command(override_usage = "worldstack init [options] <url>")]
    Init(InitOptions),

    /// Clone existing stack from remote.
    #[command(override_usage = "worldstack clone [options] <url>")]
    Clone(CloneOptions),

    /// Check layout of a world, optionally fixing it.
    #[command(override_usage = "worldstack check [options]")]
    Check(CheckOptions),

    /// Pull metadata repository of current stack.
    Pull,

    /// Commit and push pending changes of current stack.
    #[command(override_usage = "worldstack push [options]")]
    Push(PushOptions),

    /// Create a new parallel world in current stack.
    #[command(override_usage = "worldstack parallel <name>")]
    Parallel(ParallelOptions),

    /// List worlds of current stack.
    Worlds,

    /// List every known stack clone on this machine.
    List,

    /// Check, then open a world.
    #[command(override_usage = "worldstack open [options]")]
    Open(CheckOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// URL of the metadata repository, must end with "-Stack".
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Create a private stack instead of a public one.
    #[arg(short, long)]
    pub private: bool,

    /// Folder to create the stack root in, current directory by default.
    #[arg(short = 'd', long, value_name = "path")]
    pub parent: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// URL of the metadata repository, must end with "-Stack".
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Clone as a private stack.
    #[arg(short, long)]
    pub private: bool,

    /// Folder to clone the stack root in, current directory by default.
    #[arg(short = 'd', long, value_name = "path")]
    pub parent: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CheckOptions {
    /// Apply automatic fixes.
    #[arg(short, long)]
    pub fix: bool,

    /// Parallel world to use instead of the default world.
    #[arg(short, long, value_name = "parallel")]
    pub world: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PushOptions {
    /// Commit message.
    #[arg(short, long, value_name = "message", default_value = "Update stack")]
    pub message: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ParallelOptions {
    /// Name of the new parallel world.
    #[arg(required = true, value_name = "name")]
    pub name: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open_registry(settings: &Settings) -> Result<StackRootRegistry> {
    let path = match &settings.registry {
        Some(path) => path.clone(),
        None => default_registry_path()?,
    };

    Ok(StackRootRegistry::load(&path)?)
}

fn open_current() -> Result<StackRoot> {
    Ok(StackRoot::open(&current_dir()?, Git2Ops::new())?)
}

fn run_init(opts: InitOptions, settings: &Settings) -> Result<()> {
    let url = RemoteUrl::parse(opts.url)?;
    let parent = match opts.parent {
        Some(parent) => parent,
        None => current_dir()?,
    };

    let mut registry = open_registry(settings)?;
    let root = StackRoot::create(
        &url,
        &parent,
        !opts.private,
        &settings.default_branch,
        &mut registry,
        Git2Ops::new(),
    )?;
    info!(
        "stack {} ready at {:?}, run `worldstack push` to publish it",
        root.stack().stack_name(),
        root.stack().stack_root().display()
    );

    Ok(())
}

fn run_clone(opts: CloneOptions, settings: &Settings) -> Result<()> {
    let url = RemoteUrl::parse(opts.url)?;
    let parent = match opts.parent {
        Some(parent) => parent,
        None => current_dir()?,
    };

    let mut registry = open_registry(settings)?;
    let root = StackRoot::clone_stack(&url, &parent, !opts.private, &mut registry, Git2Ops::new())?;
    info!(
        "stack {} cloned at {:?}, run `worldstack check --fix` to clone its world",
        root.stack().stack_name(),
        root.stack().stack_root().display()
    );

    Ok(())
}

fn run_check(opts: CheckOptions, settings: &Settings) -> Result<()> {
    let root = open_current()?;
    let world = root.world(opts.world.as_deref())?;
    let check = root.check_world_layout(&world, opts.fix || settings.auto_fix);

    for result in check.fixes.results() {
        match &result.error {
            Some(err) => warn!("{} {}: {err}", result.kind, result.target),
            None => info!("{} {}", result.kind, result.target),
        }
    }

    if !check.success {
        bail!("layout check of world {} failed", world.full_name());
    }
    if check.requires_fix {
        bail!(
            "world {} requires fixes, see messages above",
            world.full_name()
        );
    }
    info!("world {} is ready", world.full_name());

    Ok(())
}

fn run_pull() -> Result<()> {
    let mut root = open_current()?;
    for world in root.pull()? {
        info!("{world}");
    }

    Ok(())
}

fn run_push(opts: PushOptions) -> Result<()> {
    let mut root = open_current()?;
    if root.push(&opts.message)? {
        info!("pushed stack {}", root.stack().stack_name());
    } else {
        info!("nothing to push");
    }

    Ok(())
}

fn run_parallel(opts: ParallelOptions) -> Result<()> {
    let mut root = open_current()?;
    let world = root.create_parallel(&opts.name)?;
    info!("created world {world}, run `worldstack push` to share it");

    Ok(())
}

fn run_worlds() -> Result<()> {
    let root = open_current()?;
    for world in root.stack().world_definitions() {
        let marker = if world.has_definition_file() {
            ""
        } else {
            " (definition missing)"
        };
        println!("{}\t{}{marker}", world.full_name(), world.root().display());
    }

    Ok(())
}

fn run_list(settings: &Settings) -> Result<()> {
    let registry = open_registry(settings)?;
    for group in registry.get_list_info() {
        let primary = &group.primary;
        println!(
            "{}\t{}\t{}",
            group.name,
            primary.stack_url(),
            primary.root_path().display()
        );
        for duplicate in &group.duplicates {
            let mut notes = Vec::new();
            if duplicate.url_differs {
                notes.push("different remote");
            }
            if duplicate.privacy_differs {
                notes.push("different privacy");
            }
            println!(
                "  duplicate\t{}\t{}\t{}",
                duplicate.info.stack_url(),
                duplicate.info.root_path().display(),
                notes.join(", ")
            );
        }
    }

    Ok(())
}

fn run_open(opts: CheckOptions, settings: &Settings) -> Result<()> {
    let bearer = WorldBearer::new(Box::new(NoPlugins), Box::new(EnvSecretStore::new(SECRET_PREFIX)));
    let mut root = open_current()?.with_bearer(bearer);
    let world = root.open_world(opts.world.as_deref(), opts.fix || settings.auto_fix)?;
    info!(
        "world {} is open with {} working folders",
        world.name().full_name(),
        world.file_system().paths().count()
    );
    root.dispose()?;

    Ok(())
}
