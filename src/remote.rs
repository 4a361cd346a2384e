// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote URL normalization.
//!
//! The same remote can be spelled many ways: `HTTPS://GitHub.com/org/repo/`
//! and `https://github.com/org/repo` point to the same place. Declared and
//! scanned layouts are only comparable if both sides agree on a canonical
//! spelling, so every URL that enters the layout engine goes through
//! [`RemoteUrl::parse`] first.
//!
//! # Canonical Form
//!
//! - Surrounding whitespace and trailing slashes are removed.
//! - Scheme and host are lowercased. The path keeps its case, and any `.git`
//!   suffix is kept as is.
//! - An absolute filesystem path becomes a `file://` URL.
//! - An scp-like address (`git@host:org/repo.git`) keeps its shape with the
//!   host lowercased.
//!
//! # Comparison
//!
//! Two remote URLs are equal if their canonical forms are. Hosting services
//! that resolve repository paths ignoring case are the exception: on those,
//! `https://github.com/Org/Foo.git` and `https://github.com/org/foo` are the
//! same remote, even though each keeps its own spelling for display.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    path::Path,
};
use url::Url;

/// Hosts that resolve repository paths ignoring case and `.git` suffix.
const CASE_INSENSITIVE_HOSTS: [&str; 3] = ["github.com", "gitlab.com", "bitbucket.org"];

/// Normalized remote URL of a Git repository.
#[derive(Debug, Clone)]
pub struct RemoteUrl {
    url: String,
    key: String,
}

impl RemoteUrl {
    /// Parse and normalize a remote URL.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteUrlError::Empty`] for a blank URL.
    /// - Return [`RemoteUrlError::Invalid`] if the URL cannot be understood.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(RemoteUrlError::Empty);
        }

        if raw.chars().any(char::is_whitespace) {
            return Err(RemoteUrlError::Invalid {
                url: raw.to_string(),
                reason: "contains whitespace".into(),
            });
        }

        let path = Path::new(raw);
        if path.is_absolute() {
            let url = Url::from_file_path(path).map_err(|_| RemoteUrlError::Invalid {
                url: raw.to_string(),
                reason: "cannot be expressed as a file URL".into(),
            })?;
            return Ok(Self::new(trim_slashes(url.as_str()), None));
        }

        match Url::parse(raw) {
            Ok(mut url) => {
                if url.cannot_be_a_base() {
                    return Err(RemoteUrlError::Invalid {
                        url: raw.to_string(),
                        reason: "not a hierarchical URL".into(),
                    });
                }
                if url.scheme() != "file" && url.host_str().is_none() {
                    return Err(RemoteUrlError::Invalid {
                        url: raw.to_string(),
                        reason: "missing host".into(),
                    });
                }

                // INVARIANT: Only special schemes get their host lowercased by the parser.
                if let Some(host) = url.host_str().map(str::to_lowercase) {
                    url.set_host(Some(&host)).map_err(|err| RemoteUrlError::Invalid {
                        url: raw.to_string(),
                        reason: err.to_string(),
                    })?;
                }
                let host = url.host_str().map(String::from);
                Ok(Self::new(trim_slashes(url.as_str()), host.as_deref()))
            }
            Err(_) => Self::parse_scp_like(raw),
        }
    }

    // INVARIANT: scp-like syntax is "[user@]host:path" where host holds no '/'.
    fn parse_scp_like(raw: &str) -> Result<Self> {
        let invalid = || RemoteUrlError::Invalid {
            url: raw.to_string(),
            reason: "neither a URL nor an scp-like address".into(),
        };

        let (authority, path) = raw.split_once(':').ok_or_else(invalid)?;
        if authority.is_empty() || authority.contains('/') || path.trim_matches('/').is_empty() {
            return Err(invalid());
        }

        let (user, host) = match authority.rsplit_once('@') {
            Some((user, host)) if !host.is_empty() => (Some(user), host.to_lowercase()),
            Some(_) => return Err(invalid()),
            None => (None, authority.to_lowercase()),
        };
        let authority = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.clone(),
        };

        Ok(Self::new(format!("{authority}:{}", trim_slashes(path)), Some(&host)))
    }

    fn new(url: String, host: Option<&str>) -> Self {
        let key = match host {
            Some(host) if CASE_INSENSITIVE_HOSTS.contains(&host) => {
                let folded = url.to_lowercase();
                match folded.strip_suffix(".git") {
                    Some(stripped) => stripped.to_string(),
                    None => folded,
                }
            }
            _ => url.clone(),
        };

        Self { url, key }
    }

    /// Name of the repository this URL points to.
    ///
    /// The last path segment without any `.git` suffix, e.g.,
    /// `https://host/org/CK-Core.git` gives `CK-Core`.
    pub fn repository_name(&self) -> &str {
        let last = self
            .url
            .rsplit(['/', ':'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(self.url.as_str());
        last.strip_suffix(".git").unwrap_or(last)
    }

    /// Treat remote URL as string slice.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl PartialEq for RemoteUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RemoteUrl {}

impl Hash for RemoteUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for RemoteUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RemoteUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Display for RemoteUrl {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.url)
    }
}

impl AsRef<str> for RemoteUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

fn trim_slashes(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

/// Remote URL normalization error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteUrlError {
    /// URL is blank.
    #[error("remote URL is empty")]
    Empty,

    /// URL cannot be understood.
    #[error("invalid remote URL {url:?}: {reason}")]
    Invalid { url: String, reason: String },
}

/// Friendly result alias :3
pub type Result<T, E = RemoteUrlError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("https://github.com/org/Repo", "https://github.com/org/Repo"; "already canonical")]
    #[test_case("HTTPS://GitHub.COM/org/Repo/", "https://github.com/org/Repo"; "scheme host and slash")]
    #[test_case("  https://host/org/Repo.git//  ", "https://host/org/Repo.git"; "whitespace and slashes")]
    #[test_case("git@GitHub.com:org/Repo.git", "git@github.com:org/Repo.git"; "scp like")]
    #[test_case("ssh://git@Host.org/org/Repo", "ssh://git@host.org/org/Repo"; "ssh scheme")]
    #[test]
    fn normalize_remote_url(raw: &str, expect: &str) {
        let result = RemoteUrl::parse(raw).map(|url| url.to_string());
        pretty_assertions::assert_eq!(result, Ok(expect.to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn normalize_absolute_path_to_file_url() {
        let result = RemoteUrl::parse("/srv/git/Foo.git/").map(|url| url.to_string());
        assert_eq!(result, Ok("file:///srv/git/Foo.git".to_string()));
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("not a url"; "whitespace inside")]
    #[test_case("relative/path"; "relative path")]
    #[test_case("mailto:someone"; "not hierarchical")]
    #[test]
    fn reject_invalid_remote_url(raw: &str) {
        assert!(RemoteUrl::parse(raw).is_err());
    }

    #[test_case("https://GitHub.com/Org/Foo.git", "https://github.com/org/foo", true; "github ignores case and suffix")]
    #[test_case("git@gitlab.com:Org/Foo.git", "git@GitLab.com:org/foo", true; "scp like on gitlab")]
    #[test_case("https://host/Org/Foo", "https://host/org/foo", false; "other hosts keep case")]
    #[test_case("https://host/org/Foo.git", "https://host/org/Foo", false; "other hosts keep suffix")]
    #[test]
    fn compare_remote_urls(left: &str, right: &str, same: bool) {
        let left = RemoteUrl::parse(left).unwrap();
        let right = RemoteUrl::parse(right).unwrap();
        pretty_assertions::assert_eq!(left == right, same);
        pretty_assertions::assert_eq!(left.cmp(&right) == Ordering::Equal, same);
    }

    #[test]
    fn folded_url_keeps_its_spelling() {
        let url = RemoteUrl::parse("https://github.com/Org/Foo.git").unwrap();
        assert_eq!(url.as_str(), "https://github.com/Org/Foo.git");
        assert_eq!(url.repository_name(), "Foo");
    }

    #[test_case("https://host/org/CK-Core.git", "CK-Core"; "git suffix")]
    #[test_case("https://host/org/CK-Core", "CK-Core"; "no suffix")]
    #[test_case("git@host:CK-Core.git", "CK-Core"; "scp like")]
    #[test]
    fn derive_repository_name(raw: &str, expect: &str) {
        let url = RemoteUrl::parse(raw).unwrap();
        pretty_assertions::assert_eq!(url.repository_name(), expect);
    }
}
