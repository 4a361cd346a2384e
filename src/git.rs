// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git plumbing.
//!
//! Worldstack never looks at commit history or file content of the working
//! folders it manages. It only needs a handful of blocking operations: clone,
//! read or repair the `origin` remote, and pull, commit, and push the metadata
//! repository. [`GitOps`] is that narrow surface, and [`Git2Ops`] implements
//! it through libgit2.
//!
//! Every operation addresses a repository by the path of its working folder,
//! and opens it on demand. No handle outlives a call.

use crate::remote::RemoteUrl;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, ErrorCode, FetchOptions, IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository,
    RepositoryInitOptions, Signature,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Name of the remote every managed repository is bound to.
pub const ORIGIN: &str = "origin";

/// Outcome of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing new on the remote.
    UpToDate,

    /// Local branch moved forward to match the remote.
    FastForwarded,
}

/// Layer of indirection for Git access.
pub trait GitOps {
    /// Clone remote into target path, optionally checking out a branch.
    fn clone_repository(&self, url: &RemoteUrl, path: &Path, branch: Option<&str>) -> Result<()>;

    /// Initialize new repository with an `origin` remote.
    fn init_repository(&self, path: &Path, branch: &str, origin: &RemoteUrl) -> Result<()>;

    /// Raw URL of the `origin` remote, [`None`] if there is no such remote.
    fn origin_url(&self, path: &Path) -> Result<Option<String>>;

    /// Point the `origin` remote to a new URL.
    fn set_origin_url(&self, path: &Path, url: &RemoteUrl) -> Result<()>;

    /// Name of the checked out branch, even if it has no commit yet.
    fn current_branch(&self, path: &Path) -> Result<Option<String>>;

    /// Fetch `origin` and fast-forward the target branch.
    fn pull(&self, path: &Path, branch: &str) -> Result<PullOutcome>;

    /// Stage everything and commit.
    ///
    /// Returns `false` without committing if nothing changed.
    fn commit_all(&self, path: &Path, message: &str) -> Result<bool>;

    /// Push target branch to `origin`.
    fn push(&self, path: &Path, branch: &str) -> Result<()>;

    /// Check if target branch holds commits `origin` has not seen yet.
    ///
    /// An unborn branch has nothing to push. A branch never pushed before
    /// always has.
    fn has_unpushed_commits(&self, path: &Path, branch: &str) -> Result<bool>;
}

/// Git access through libgit2.
#[derive(Debug, Default, Clone)]
pub struct Git2Ops;

impl Git2Ops {
    /// Construct new libgit2 access.
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Repository> {
        Repository::open(path).map_err(|source| GitError::Open {
            source,
            path: path.to_path_buf(),
        })
    }

    fn with_callbacks<T>(
        bar: &ProgressBar,
        run: impl FnOnce(RemoteCallbacks<'_>) -> Result<T>,
    ) -> Result<T> {
        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(stats.total_objects() as u64);
                bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        run(rc)
    }

    fn target(repository: &Repository, refname: &str) -> Result<Option<Oid>> {
        match repository.find_reference(refname) {
            Ok(reference) => Ok(reference.target()),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(GitError::Git2(err)),
        }
    }

    fn progress_bar(message: impl Into<String>) -> Result<ProgressBar> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(message.into());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        Ok(bar)
    }
}

impl GitOps for Git2Ops {
    /// Clone remote into target path.
    ///
    /// The progress of the clone is displayed through a progress bar. If any
    /// credentials are required, the user is prompted for them, and the
    /// progress bar is suspended meanwhile.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Clone`] if libgit2 fails to clone.
    #[instrument(skip(self), level = "debug")]
    fn clone_repository(&self, url: &RemoteUrl, path: &Path, branch: Option<&str>) -> Result<()> {
        info!("clone {url} into {:?}", path.display());
        let bar = Self::progress_bar(url.as_str())?;
        let result = Self::with_callbacks(&bar, |rc| {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(rc);
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fo);
            if let Some(branch) = branch {
                builder.branch(branch);
            }

            builder
                .clone(url.as_str(), path)
                .map(|_| ())
                .map_err(|source| GitError::Clone {
                    source,
                    url: url.to_string(),
                    path: path.to_path_buf(),
                })
        });
        bar.finish_and_clear();

        result
    }

    #[instrument(skip(self), level = "debug")]
    fn init_repository(&self, path: &Path, branch: &str, origin: &RemoteUrl) -> Result<()> {
        info!("initialize new repository at {:?}", path.display());
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(branch);
        let repository = Repository::init_opts(path, &opts)?;
        repository.remote(ORIGIN, origin.as_str())?;

        Ok(())
    }

    fn origin_url(&self, path: &Path) -> Result<Option<String>> {
        let repository = Self::open(path)?;
        let result = match repository.find_remote(ORIGIN) {
            Ok(remote) => Ok(remote.url().map(String::from)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(GitError::Git2(err)),
        };

        result
    }

    #[instrument(skip(self), level = "debug")]
    fn set_origin_url(&self, path: &Path, url: &RemoteUrl) -> Result<()> {
        let repository = Self::open(path)?;
        repository.remote_set_url(ORIGIN, url.as_str())?;
        info!("origin of {:?} now points to {url}", path.display());

        Ok(())
    }

    fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let repository = Self::open(path)?;
        let result = match repository.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(String::from)),
            Ok(_) => Ok(None),
            Err(err) if err.code() == ErrorCode::UnbornBranch => {
                // INVARIANT: Unborn HEAD still names its branch symbolically.
                let head = repository.find_reference("HEAD")?;
                Ok(head
                    .symbolic_target()
                    .and_then(|target| target.strip_prefix("refs/heads/"))
                    .map(String::from))
            }
            Err(err) => Err(GitError::Git2(err)),
        };

        result
    }

    #[instrument(skip(self), level = "debug")]
    fn pull(&self, path: &Path, branch: &str) -> Result<PullOutcome> {
        let repository = Self::open(path)?;
        let mut remote = repository.find_remote(ORIGIN)?;
        let bar = Self::progress_bar(format!("pull {branch}"))?;
        let fetched = Self::with_callbacks(&bar, |rc| {
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(rc);
            remote.fetch(&[branch], Some(&mut fo), None)?;
            Ok(())
        });
        bar.finish_and_clear();
        fetched?;

        let fetch_head = repository.find_reference("FETCH_HEAD")?;
        let fetch_commit = repository.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repository.merge_analysis(&[&fetch_commit])?;

        if analysis.is_up_to_date() {
            debug!("{:?} is up to date", path.display());
            return Ok(PullOutcome::UpToDate);
        }

        if !analysis.is_fast_forward() && !analysis.is_unborn() {
            return Err(GitError::Diverged {
                path: path.to_path_buf(),
                branch: branch.to_string(),
            });
        }

        // INVARIANT: Update files first, so a dirty working tree blocks the
        // fast-forward before any reference moves.
        let target = repository.find_object(fetch_commit.id(), None)?;
        repository.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;

        let refname = format!("refs/heads/{branch}");
        match repository.find_reference(&refname) {
            Ok(mut reference) => {
                reference.set_target(fetch_commit.id(), "worldstack: fast-forward")?;
            }
            Err(_) => {
                repository.reference(&refname, fetch_commit.id(), true, "worldstack: fast-forward")?;
            }
        }
        repository.set_head(&refname)?;
        info!("fast-forward {:?} to origin/{branch}", path.display());

        Ok(PullOutcome::FastForwarded)
    }

    #[instrument(skip(self), level = "debug")]
    fn commit_all(&self, path: &Path, message: &str) -> Result<bool> {
        let repository = Self::open(path)?;
        let mut index = repository.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;

        // INVARIANT: Always determine latest parent commit to append to.
        let parent = repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        if parent.as_ref().map(|commit| commit.tree_id()) == Some(tree_oid) {
            debug!("nothing to commit in {:?}", path.display());
            return Ok(false);
        }

        let tree = repository.find_tree(tree_oid)?;
        let signature = repository
            .signature()
            .or_else(|_| Signature::now("worldstack", "worldstack@localhost"))?;
        let parents = parent.iter().collect::<Vec<_>>();
        repository.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        info!("commit {message:?} in {:?}", path.display());

        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self, path: &Path, branch: &str) -> Result<()> {
        let repository = Self::open(path)?;
        let mut remote = repository.find_remote(ORIGIN)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let bar = Self::progress_bar(format!("push {branch}"))?;
        let result = Self::with_callbacks(&bar, |mut rc| {
            rc.push_update_reference(|refname, status| match status {
                Some(message) => Err(git2::Error::from_str(&format!("{refname}: {message}"))),
                None => Ok(()),
            });
            let mut po = PushOptions::new();
            po.remote_callbacks(rc);
            remote
                .push(&[refspec.as_str()], Some(&mut po))
                .map_err(|source| GitError::Push {
                    source,
                    branch: branch.to_string(),
                })
        });
        bar.finish_and_clear();
        result?;
        info!("push {branch} of {:?}", path.display());

        Ok(())
    }

    fn has_unpushed_commits(&self, path: &Path, branch: &str) -> Result<bool> {
        let repository = Self::open(path)?;
        let Some(local) = Self::target(&repository, &format!("refs/heads/{branch}"))? else {
            return Ok(false);
        };

        // INVARIANT: Tracking branch is only as fresh as the latest fetch or
        // push. A stale one costs a no-op push, never a lost commit.
        let result = match Self::target(&repository, &format!("refs/remotes/{ORIGIN}/{branch}"))? {
            Some(remote) if remote == local => Ok(false),
            Some(remote) => {
                let (ahead, _) = repository.graph_ahead_behind(local, remote)?;
                Ok(ahead > 0)
            }
            None => Ok(true),
        };

        result
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Git access error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Folder is not a readable Git repository.
    #[error("failed to open repository at {:?}", path.display())]
    Open {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    /// Clone failed.
    #[error("failed to clone {url} into {:?}", path.display())]
    Clone {
        #[source]
        source: git2::Error,
        url: String,
        path: PathBuf,
    },

    /// Local branch cannot be fast-forwarded.
    #[error("cannot fast-forward {:?} to origin/{branch}: histories diverged", path.display())]
    Diverged { path: PathBuf, branch: String },

    /// Push failed or was rejected.
    #[error("failed to push {branch} to origin")]
    Push {
        #[source]
        source: git2::Error,
        branch: String,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;
