//! Per-remote ref catalogs and the summary wire model.
//!
//! A remote advertises its contents through a summary document: general
//! metadata (title, default branch, optionally a collection id) plus one
//! entry per app/runtime ref with sizes, the embedded manifest, related refs
//! and end-of-life markers. `RefCatalog` holds the fully parsed form and
//! implements partial-spec matching.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::Error;
use crate::metadata::RefMetadata;
use crate::refspec::{PartialRef, RefId, RefKind};

/// Remote summary document as transferred.
#[derive(Debug, Clone, Deserialize)]
pub struct Summary {
    #[serde(default = "default_format")]
    pub format: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub refs: BTreeMap<String, RefEntry>,
}

fn default_format() -> u32 {
    1
}

impl Summary {
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(data).map_err(|e| Error::Network {
            message: format!("failed to parse remote summary: {}", e),
        })
    }

    /// General remote metadata with format-specific fields resolved.
    pub fn info(&self) -> Result<SummaryInfo, Error> {
        let format = SummaryFormat::from_version(self.format)?;
        Ok(SummaryInfo {
            title: self.title.clone(),
            default_branch: self.default_branch.clone(),
            collection_id: format.collection_id(self).map(|s| s.to_string()),
            format,
        })
    }
}

/// Supported summary format series. Selected once per remote session; the
/// variant decides which optional fields of the document are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFormat {
    /// Original format: no collection ids.
    V1,
    /// Adds a collection id for peer-to-peer distribution.
    V2,
}

impl SummaryFormat {
    pub fn from_version(version: u32) -> Result<Self, Error> {
        match version {
            1 => Ok(SummaryFormat::V1),
            2 => Ok(SummaryFormat::V2),
            other => Err(Error::Network {
                message: format!("unsupported remote summary format {}", other),
            }),
        }
    }

    pub fn collection_id<'a>(&self, summary: &'a Summary) -> Option<&'a str> {
        match self {
            SummaryFormat::V1 => None,
            SummaryFormat::V2 => summary.collection_id.as_deref(),
        }
    }
}

/// Resolved general metadata for a remote.
#[derive(Debug, Clone)]
pub struct SummaryInfo {
    pub format: SummaryFormat,
    pub title: Option<String>,
    pub default_branch: Option<String>,
    pub collection_id: Option<String>,
}

/// One ref as advertised in a remote summary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefEntry {
    pub commit: String,
    #[serde(default)]
    pub installed_size: u64,
    #[serde(default)]
    pub download_size: u64,
    /// Digest of the commit archive, verified after transfer when present.
    #[serde(default)]
    pub archive_sha256: Option<String>,
    /// The ref's embedded manifest, keyfile text.
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub related: Vec<RelatedEntry>,
    #[serde(default)]
    pub eol: Option<String>,
    #[serde(default)]
    pub eol_rebase: Option<String>,
}

/// A related ref (extension) as advertised.
#[derive(Debug, Clone, Deserialize)]
pub struct RelatedEntry {
    #[serde(rename = "ref")]
    pub ref_id: String,
    pub commit: String,
    /// Whether installers should fetch this extension by default.
    #[serde(default)]
    pub should_fetch: bool,
    /// Whether the extension's payload is split per locale, so only the
    /// configured locale subdirectories need transferring.
    #[serde(default)]
    pub locale_subset: bool,
}

/// A related ref after locale filters have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedRef {
    pub id: RefId,
    pub commit: String,
    pub should_fetch: bool,
    /// Payload sub-paths to restrict transfers to; empty means everything.
    pub subpaths: Vec<String>,
}

impl RelatedEntry {
    /// Resolve this entry against the configured locale set.
    pub fn resolve(&self, locales: &[String]) -> Result<RelatedRef, Error> {
        let id = RefId::parse(&self.ref_id)?;
        let subpaths = if self.locale_subset {
            locales.iter().map(|l| format!("/{}", l)).collect()
        } else {
            Vec::new()
        };
        Ok(RelatedRef {
            id,
            commit: self.commit.clone(),
            should_fetch: self.should_fetch,
            subpaths,
        })
    }
}

/// Complete representation of a catalogued ref: identity, owning remote,
/// sizes, parsed manifest, related refs and end-of-life markers. Collects
/// everything needed to decide on and perform an install in one place.
#[derive(Debug, Clone)]
pub struct FullRef {
    pub id: RefId,
    pub remote: String,
    pub commit: String,
    pub installed_size: u64,
    pub download_size: u64,
    pub archive_sha256: Option<String>,
    pub metadata: RefMetadata,
    pub related: Vec<RelatedRef>,
    pub eol: Option<String>,
    pub eol_rebase: Option<String>,
}

impl FullRef {
    /// Build a catalog ref from a summary entry. Manifest parse failures are
    /// fatal and name the offending ref.
    pub fn from_entry(
        remote: &str,
        id: RefId,
        entry: &RefEntry,
        related: Vec<RelatedRef>,
    ) -> Result<Self, Error> {
        let metadata =
            RefMetadata::parse(&entry.metadata).map_err(|e| Error::MetadataParse {
                reference: id.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            id,
            remote: remote.to_string(),
            commit: entry.commit.clone(),
            installed_size: entry.installed_size,
            download_size: entry.download_size,
            archive_sha256: entry.archive_sha256.clone(),
            metadata,
            related,
            eol: entry.eol.clone(),
            eol_rebase: entry.eol_rebase.clone(),
        })
    }

    /// The ref's hard runtime dependency, if any.
    pub fn runtime(&self) -> Option<RefId> {
        self.metadata.runtime_for(&self.id)
    }

    pub fn has_extra_data(&self) -> bool {
        self.metadata.has_extra_data()
    }
}

/// All refs advertised by one remote, keyed by canonical ref string.
#[derive(Debug, Clone, Default)]
pub struct RefCatalog {
    refs: BTreeMap<String, FullRef>,
}

impl RefCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, full_ref: FullRef) {
        self.refs.insert(full_ref.id.to_string(), full_ref);
    }

    pub fn get(&self, id: &RefId) -> Option<&FullRef> {
        self.refs.get(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FullRef> {
        self.refs.values()
    }

    /// Resolve a partial spec `name[/arch[/branch]]` against this catalog.
    ///
    /// Arch falls back to `default_arch` and branch to `default_branch`. With
    /// no branch at all, the lexicographically greatest branch among matching
    /// entries is chosen: a simple, reproducible tie-break, not semantic
    /// versioning.
    pub fn matches(
        &self,
        spec: &str,
        kind: RefKind,
        default_arch: &str,
        default_branch: Option<&str>,
    ) -> Result<Option<&FullRef>, Error> {
        let partial = PartialRef::parse(spec)?;
        let arch = partial.arch.as_deref().unwrap_or(default_arch);
        let branch = partial.branch.as_deref().or(default_branch);

        match branch {
            Some(branch) => {
                let id = RefId::new(kind, &partial.name, arch, branch);
                Ok(self.refs.get(&id.to_string()))
            }
            None => {
                // No specific branch and no default branch: take the latest
                // branch by sort order.
                let prefix = format!("{}/{}/{}/", kind, partial.name, arch);
                Ok(self
                    .refs
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .last()
                    .map(|(_, full_ref)| full_ref))
            }
        }
    }
}
