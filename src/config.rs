// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the user configuration file to simplify the process
//! of serialization and deserialization. Reading the file is offered as a
//! convenience through [`Settings::load`], everything else is left to the
//! caller.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

/// User settings.
///
/// Every field is optional in the file itself. Missing fields fall back to
/// their defaults so that an empty file, or no file at all, is valid.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Branch to use for a metadata repository that has no commit yet.
    pub default_branch: String,

    /// Apply automatic layout fixes on `check` even without `--fix`.
    pub auto_fix: bool,

    /// Override location of the stack registry file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_branch: "master".into(),
            auto_fix: false,
            registry: None,
        }
    }
}

impl Settings {
    /// Load settings from file at target path.
    ///
    /// A missing file is not an error, it simply yields the default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if the registry path cannot be
    ///   expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => content.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on registry path.
        if let Some(registry) = settings.registry.take() {
            let expanded = shellexpand::full(registry.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
            settings.registry = Some(PathBuf::from(expanded));
        }

        if settings.default_branch.trim().is_empty() {
            return Err(ConfigError::EmptyBranch);
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file exists but cannot be read.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default branch name is blank.
    #[error("default_branch cannot be empty")]
    EmptyBranch,
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            default_branch = "main"
            auto_fix = true
            registry = "$BLAH/registry.txt"
        "#
        .parse()?;

        let expect = Settings {
            default_branch: "main".into(),
            auto_fix: true,
            registry: Some(PathBuf::from("/home/blah/blah/registry.txt")),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_empty_settings() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());

        Ok(())
    }

    #[test]
    fn reject_blank_default_branch() {
        let result = "default_branch = \"  \"".parse::<Settings>();
        assert!(matches!(result, Err(ConfigError::EmptyBranch)));
    }

    #[test]
    fn serialize_settings() {
        let result = Settings::default().to_string();
        let expect = indoc! {r#"
            default_branch = "master"
            auto_fix = false
        "#};

        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn load_missing_file_yields_defaults() -> anyhow::Result<()> {
        let result = Settings::load("does-not-exist.toml")?;
        assert_eq!(result, Settings::default());

        Ok(())
    }
}
