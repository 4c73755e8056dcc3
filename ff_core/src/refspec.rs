//! Ref identities and partial ref specifications.
//!
//! A ref is identified by the tuple (kind, name, arch, branch) and serializes
//! to the canonical form `<kind>/<name>/<arch>/<branch>`. Configuration files
//! refer to refs with partial specs of the form `name[/arch[/branch]]`, where
//! empty segments fall back to per-remote defaults.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Whether a ref is an application or a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    App,
    Runtime,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        }
    }

    pub fn parse(s: &str) -> Option<RefKind> {
        match s {
            "app" => Some(RefKind::App),
            "runtime" => Some(RefKind::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full identity of an app or runtime ref.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RefId {
    pub kind: RefKind,
    pub name: String,
    pub arch: String,
    pub branch: String,
}

impl RefId {
    pub fn new(kind: RefKind, name: &str, arch: &str, branch: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            arch: arch.to_string(),
            branch: branch.to_string(),
        }
    }

    /// Parse a canonical four-part ref string like
    /// `app/com.example.App1/x86_64/master`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Config {
                message: format!("'{}' is not a full kind/name/arch/branch ref", s),
            });
        }
        let kind = RefKind::parse(parts[0]).ok_or_else(|| Error::Config {
            message: format!("unrecognized ref kind '{}' in '{}'", parts[0], s),
        })?;
        Ok(Self::new(kind, parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.kind, self.name, self.arch, self.branch)
    }
}

/// A partial ref specification from configuration: `name[/arch[/branch]]`.
///
/// Empty arch or branch segments (e.g. `name//branch`) are treated as unset
/// and fall back to remote defaults during matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRef {
    pub name: String,
    pub arch: Option<String>,
    pub branch: Option<String>,
}

impl PartialRef {
    pub fn parse(spec: &str) -> Result<Self, Error> {
        if spec.is_empty() {
            return Err(Error::Config {
                message: "cannot match empty ref".to_string(),
            });
        }

        let parts: Vec<&str> = spec.split('/').collect();
        if parts.len() > 3 {
            return Err(Error::MalformedRef {
                spec: spec.to_string(),
            });
        }

        let name = parts[0].to_string();
        if name.is_empty() {
            return Err(Error::MalformedRef {
                spec: spec.to_string(),
            });
        }
        let arch = parts
            .get(1)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string());
        let branch = parts
            .get(2)
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string());

        Ok(Self { name, arch, branch })
    }
}
