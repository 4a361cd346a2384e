// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine machine-wide locations that worldstack reads or writes outside
//! of any stack, i.e., the user configuration file and the stack registry.

use std::path::PathBuf;

/// Name of the stack registry file.
///
/// The version suffix is part of the name so that a future format can live
/// next to the current one.
pub const REGISTRY_FILE_NAME: &str = "StackRootRegistry.v0.txt";

/// Determine default absolute path to the configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/worldstack/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("worldstack").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the stack registry file.
///
/// Uses `$XDG_DATA_HOME/worldstack/StackRootRegistry.v0.txt`. The registry
/// lives outside of every stack so that it survives the deletion of any of
/// them.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_registry_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("worldstack").join(REGISTRY_FILE_NAME))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
