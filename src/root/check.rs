// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! World layout check and fix.
//!
//! A check compares the declared layout of a world with what lies on disk,
//! in this order:
//!
//! 1. Read the declared layout. An invalid declaration stops everything.
//! 2. Scan the world root.
//! 3. A missing root means the world was never cloned: clone everything.
//! 4. Structural issues block any diff. Only renames of working folders
//!    after their remote repository are attempted, then the root is scanned
//!    again.
//! 5. Diff both layouts. Undeclared folders are never deleted, everything else
//!    is fixed if authorized.

use crate::{
    git::GitOps,
    layout::{
        fix::{self, FixSummary},
        scan::{GitWorkingFolderLayout, ScanFilter},
        DeclaredLayout, LayoutDiff, RelativePath,
    },
    stack::{store::WorldStore, StackRepository},
    world::LocalWorldName,
};

use tracing::{error, info, instrument, warn};

/// Outcome of a layout check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutCheck {
    /// Check ran to completion and every attempted fix succeeded.
    pub success: bool,

    /// World must not be used until someone acts on [`Self::messages`].
    pub requires_fix: bool,

    /// Stack generation the check ran against.
    pub generation: u64,

    /// World root was missing when the check started.
    pub missing_root: bool,

    /// Every fix attempted.
    pub fixes: FixSummary,

    /// Human readable diagnostics, in the order they were found.
    pub messages: Vec<String>,
}

impl LayoutCheck {
    /// Check if the world can be used as is.
    pub fn is_ready(&self) -> bool {
        self.success && !self.requires_fix
    }
}

/// One layout check of one world.
pub(crate) struct LayoutSession<'a, G> {
    stack: &'a StackRepository<G>,
    world: &'a LocalWorldName,
    check: LayoutCheck,
    manual_renames: bool,
}

impl<'a, G: GitOps> LayoutSession<'a, G> {
    pub(crate) fn new(stack: &'a StackRepository<G>, world: &'a LocalWorldName) -> Self {
        Self {
            stack,
            world,
            check: LayoutCheck {
                generation: stack.generation(),
                ..Default::default()
            },
            manual_renames: false,
        }
    }

    #[instrument(skip(self), fields(world = %self.world.full_name()), level = "debug")]
    pub(crate) fn run(mut self, apply_auto_fix: bool) -> LayoutCheck {
        let declared = match self.declared_layout() {
            Some(declared) => declared,
            None => return self.finish(false, false),
        };

        let mut actual = match self.scan() {
            Some(actual) => actual,
            None => return self.finish(false, false),
        };

        if actual.is_missing_root() {
            return self.clone_world(&declared, apply_auto_fix);
        }

        if actual.has_issues() {
            if !self.fix_naming_drifts(&actual, &declared, apply_auto_fix) {
                self.report_issues(&actual);
                return self.finish(true, true);
            }

            actual = match self.scan() {
                Some(actual) if !actual.has_issues() => actual,
                Some(actual) => {
                    self.report_issues(&actual);
                    return self.finish(true, true);
                }
                None => return self.finish(false, false),
            };
        }

        self.reconcile(&declared, &actual, apply_auto_fix)
    }

    fn declared_layout(&mut self) -> Option<DeclaredLayout> {
        let definition = match self.stack.read_world_description(self.world.name()) {
            Ok(definition) => definition,
            Err(err) => {
                self.error(format!("cannot read definition of world {}: {err}", self.world));
                return None;
            }
        };

        match definition.read_layout() {
            Ok(layout) => Some(layout.clone()),
            Err(errors) => {
                for err in &errors.0 {
                    self.error(format!("invalid definition of world {}: {err}", self.world));
                }
                None
            }
        }
    }

    fn scan(&mut self) -> Option<GitWorkingFolderLayout> {
        let mut filter = ScanFilter::new();
        if let Some(metadata) = self
            .stack
            .path()
            .strip_prefix(self.world.root())
            .ok()
            .and_then(RelativePath::from_path)
        {
            filter = filter.ignore(metadata);
        }
        if self.world.name().is_default() {
            filter = filter.skip_parallel_roots();
        }

        match GitWorkingFolderLayout::create(self.world.root(), &filter, self.stack.git()) {
            Ok(layout) => Some(layout),
            Err(err) => {
                self.error(format!("cannot scan world {}: {err}", self.world));
                None
            }
        }
    }

    fn clone_world(mut self, declared: &DeclaredLayout, apply_auto_fix: bool) -> LayoutCheck {
        self.check.missing_root = true;
        if !apply_auto_fix {
            self.warn(format!(
                "world {} was never cloned, {} working folders to clone",
                self.world,
                declared.entries().len()
            ));
            return self.finish(true, true);
        }

        info!("clone world {}", self.world);
        let summary = fix::clone_all(self.world.root(), declared.entries(), self.stack.git());
        let success = self.record_fixes(summary);
        self.finish(success, !success)
    }

    // INVARIANT: Returns true only if at least one rename was applied.
    fn fix_naming_drifts(
        &mut self,
        actual: &GitWorkingFolderLayout,
        declared: &DeclaredLayout,
        apply_auto_fix: bool,
    ) -> bool {
        let mut renamed = false;
        for drift in actual.naming_drifts(Some(declared)) {
            match (&drift.blocked_by, apply_auto_fix) {
                (Some(reason), _) => {
                    self.manual_renames = true;
                    self.error(format!(
                        "working folder {} should be named {}, but {reason}: rename it manually",
                        drift.path, drift.expected
                    ));
                }
                (None, false) => self.warn(format!(
                    "working folder {} should be renamed {}",
                    drift.path, drift.expected
                )),
                (None, true) => {
                    let result = fix::rename(actual.root(), &drift);
                    renamed |= result.is_ok();
                    if let Some(err) = &result.error {
                        self.error(format!("cannot rename {} to {}: {err}", drift.path, drift.expected));
                    }
                    self.check.fixes.push(result);
                }
            }
        }

        renamed
    }

    fn report_issues(&mut self, actual: &GitWorkingFolderLayout) {
        for issue in actual.repository_issues() {
            self.error(format!(
                "working folder {} is corrupted ({}): fix it manually",
                issue.path, issue.reason
            ));
        }

        for issue in actual.homonym_issues() {
            self.error(format!(
                "working folders {} share the name {:?}: rename or remove them manually",
                join(&issue.paths),
                issue.name
            ));
        }

        for issue in actual.origin_url_issues() {
            self.error(format!(
                "working folders {} are clones of the same remote {}: remove all but one manually",
                join(&issue.paths),
                issue.url
            ));
        }

        self.error("fix the issues above manually, then check again".into());
    }

    fn reconcile(
        mut self,
        declared: &DeclaredLayout,
        actual: &GitWorkingFolderLayout,
        apply_auto_fix: bool,
    ) -> LayoutCheck {
        let diff = LayoutDiff::compute(declared, actual.entries());
        let mut requires_fix = false;

        // INVARIANT: Undeclared working folders may hold unpushed work.
        for entry in &diff.deleted {
            self.error(format!(
                "folder {} ({}) is not part of world {}: delete it manually",
                entry.path,
                entry.url,
                self.world.name()
            ));
            requires_fix = true;
        }

        if !diff.has_automatic_fixes() {
            return self.finish(true, requires_fix);
        }

        if !apply_auto_fix {
            for entry in &diff.added {
                self.warn(format!("{} must be cloned from {}", entry.path, entry.url));
            }
            for entry in &diff.moved {
                self.warn(format!("{} must be moved to {}", entry.from, entry.to));
            }
            for entry in &diff.remote_moved {
                self.warn(format!(
                    "origin of {} must change from {} to {}",
                    entry.path, entry.from, entry.to
                ));
            }
            return self.finish(true, true);
        }

        let summary = fix::apply_diff(actual.root(), &diff, self.stack.git());
        let success = self.record_fixes(summary);
        self.finish(success, requires_fix || !success)
    }

    fn record_fixes(&mut self, summary: FixSummary) -> bool {
        for failure in summary.failures() {
            let message = format!(
                "{} of {} failed: {}",
                failure.kind,
                failure.target,
                failure.error.as_deref().unwrap_or_default()
            );
            self.check.messages.push(message);
        }

        let success = summary.is_success();
        self.check.fixes.extend(summary);
        success
    }

    fn error(&mut self, message: String) {
        error!("{message}");
        self.check.messages.push(message);
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.check.messages.push(message);
    }

    fn finish(mut self, success: bool, requires_fix: bool) -> LayoutCheck {
        // INVARIANT: A failed rename is never silent, a blocked one is never
        // forgotten.
        self.check.success = success && self.check.fixes.is_success();
        self.check.requires_fix = requires_fix || self.manual_renames;
        self.check
    }
}

fn join(paths: &[RelativePath]) -> String {
    paths
        .iter()
        .map(RelativePath::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
