//! Remote session: configuration plus the live catalog of one remote.
//!
//! A `Remote` binds a `RemoteConfig` to a `RemoteSource` and drives the
//! remote's lifecycle: `add()` registers it with the content store and picks
//! up server-side metadata, `deploy()` adjusts it to the configuration the
//! shipped image should see, and `enumerate()` populates the ref catalog.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use ff_core::{
    Error, FullRef, KeyFile, RefCatalog, RefId, RefKind, RemoteConfig, SummaryFormat,
};

use crate::retry::retry;
use crate::store::ContentStore;
use crate::traits::{HttpRemoteSource, RemoteSource};

/// Group used in `.flatpakrepo` files.
const FLATPAK_REPO_GROUP: &str = "Flatpak Repo";

pub struct Remote {
    pub config: RemoteConfig,
    pub catalog: RefCatalog,
    source: Box<dyn RemoteSource>,
    format: Option<SummaryFormat>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Remote {
    pub fn new(config: RemoteConfig, source: Box<dyn RemoteSource>) -> Self {
        Self {
            config,
            catalog: RefCatalog::new(),
            source,
            format: None,
        }
    }

    /// Build a remote from configuration: apply the repo-file overlay if one
    /// is declared, require a pull URL, and connect an HTTP source to it.
    pub async fn from_config(config: RemoteConfig) -> Result<Self, Error> {
        let config = apply_repo_file(config).await?;
        config.validate()?;
        let url = config.url.clone().expect("validated url");
        Ok(Self::new(config, Box::new(HttpRemoteSource::new(&url))))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The summary format negotiated for this session, once known.
    pub fn format(&self) -> Option<SummaryFormat> {
        self.format
    }

    /// Register this remote with the content store and refresh its metadata
    /// from the server. A server-side default branch is adopted when the
    /// configuration does not pin one.
    pub async fn add(&mut self, store: &ContentStore) -> Result<(), Error> {
        eprintln!("    Adding flatpak remote {}", self.name());
        let url = self.config.url.as_deref().expect("validated url");
        store.set_remote_option(self.name(), "url", url)?;
        store.set_remote_option(
            self.name(),
            "gpg-verify",
            if self.config.gpg_key.is_some() {
                "true"
            } else {
                "false"
            },
        )?;

        // A collection id can never change once set; clear anything stale
        // since it may not match the configured URL.
        store.remove_remote_option(self.name(), "collection-id")?;

        eprintln!("    Updating metadata for remote {}", self.name());
        let info = retry(|| self.source.summary_info()).await?;
        self.format = Some(info.format);

        if self.config.default_branch.is_none()
            && let Some(branch) = info.default_branch
        {
            eprintln!(
                "    Using {} as default branch for remote {}",
                branch,
                self.name()
            );
            self.config.default_branch = Some(branch);
        }

        self.reset_metadata(store)
    }

    /// Prepare the remote for the deployed image: point it at the deploy
    /// URL, apply the collection id when peer-to-peer updates are enabled,
    /// refresh metadata and restore configured values.
    pub async fn deploy(&mut self, store: &ContentStore, enable_p2p: bool) -> Result<(), Error> {
        let url = self.config.url.as_deref().expect("validated url");
        let deploy_url = self.config.effective_deploy_url().expect("validated url");
        if deploy_url != url {
            eprintln!(
                "    Setting {} URL to {} for deployment",
                self.name(),
                deploy_url
            );
            store.set_remote_option(self.name(), "url", deploy_url)?;
        }

        if enable_p2p {
            let info = retry(|| self.source.summary_info()).await?;
            self.format = Some(info.format);
            if let Some(collection_id) = info.collection_id {
                eprintln!(
                    "    Setting flatpak remote {} collection-id to \"{}\"",
                    self.name(),
                    collection_id
                );
                store.set_remote_option(self.name(), "collection-id", &collection_id)?;
            }
        }

        eprintln!("    Updating metadata for remote {}", self.name());
        retry(|| self.source.summary_info()).await?;

        self.reset_metadata(store)
    }

    /// Write the configuration-defined title and default branch back to the
    /// store, undoing anything a metadata refresh changed.
    fn reset_metadata(&self, store: &ContentStore) -> Result<(), Error> {
        if let Some(title) = &self.config.title {
            store.set_remote_option(self.name(), "xa.title", title)?;
        }
        if let Some(branch) = &self.config.default_branch {
            store.set_remote_option(self.name(), "xa.default-branch", branch)?;
        }
        Ok(())
    }

    /// Populate the catalog with every ref the remote advertises. Sub-paths
    /// of related refs are computed against the given locale filters, so the
    /// caller must have the store's locale configuration in place.
    pub async fn enumerate(&mut self, locales: &[String]) -> Result<(), Error> {
        eprintln!("    Fetching refs for {}", self.name());
        let refs = retry(|| self.source.list_refs()).await?;

        for ref_str in refs {
            let id = RefId::parse(&ref_str)?;
            let entry = retry(|| self.source.ref_entry(&ref_str)).await?;
            let related = retry(|| self.source.related_refs(&ref_str, locales)).await?;
            let full_ref = FullRef::from_entry(self.name(), id, &entry, related)?;
            self.catalog.insert(full_ref);
        }

        Ok(())
    }

    /// Resolve a partial spec within this remote's catalog.
    pub fn matches(
        &self,
        spec: &str,
        kind: RefKind,
        arch: &str,
    ) -> Result<Option<&FullRef>, Error> {
        self.catalog
            .matches(spec, kind, arch, self.config.default_branch.as_deref())
    }

    /// Fetch a commit's content archive with the standard retry policy.
    pub async fn fetch_commit_archive(&self, commit: &str) -> Result<Vec<u8>, Error> {
        retry(|| self.source.fetch_commit_archive(commit)).await
    }
}

/// Fill URL, title, default branch and GPG key from a `.flatpakrepo` file.
/// Values set directly in the configuration win.
async fn apply_repo_file(mut config: RemoteConfig) -> Result<RemoteConfig, Error> {
    let Some(repo_file) = config.repo_file.clone() else {
        return Ok(config);
    };

    let bytes = fetch_repo_file(&repo_file).await?;
    let text = String::from_utf8(bytes).map_err(|_| Error::Config {
        message: format!("repo file '{}' is not valid UTF-8", repo_file),
    })?;
    let keyfile = KeyFile::parse(&text).map_err(|e| Error::Config {
        message: format!("could not parse repo file '{}': {}", repo_file, e),
    })?;

    if config.url.is_none() {
        config.url = keyfile
            .get(FLATPAK_REPO_GROUP, "Url")
            .map(|s| s.to_string());
    }
    if config.title.is_none() {
        config.title = keyfile
            .get(FLATPAK_REPO_GROUP, "Title")
            .map(|s| s.to_string());
    }
    if config.default_branch.is_none() {
        config.default_branch = keyfile
            .get(FLATPAK_REPO_GROUP, "DefaultBranch")
            .map(|s| s.to_string());
    }

    if let Some(encoded) = keyfile.get(FLATPAK_REPO_GROUP, "GPGKey") {
        let stripped: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = BASE64.decode(stripped.as_bytes()).map_err(|e| Error::Config {
            message: format!("invalid GPG key in repo file '{}': {}", repo_file, e),
        })?;
        config.gpg_key = Some(decoded);
    }

    Ok(config)
}

async fn fetch_repo_file(location: &str) -> Result<Vec<u8>, Error> {
    if location.starts_with("http://") || location.starts_with("https://") {
        eprintln!("    Downloading repo file {}", location);
        let response = reqwest::get(location).await.map_err(|e| Error::Network {
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(Error::Network {
                message: format!("HTTP {} for {}", response.status(), location),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network {
                message: e.to_string(),
            })
    } else {
        eprintln!("    Loading repo file {}", location);
        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read(path).await.map_err(|e| Error::Config {
            message: format!("could not read repo file '{}': {}", location, e),
        })
    }
}
