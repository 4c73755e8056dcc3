//! Remote content source abstraction.
//!
//! `RemoteSource` is the seam between the engine and a remote repository:
//! tests inject mock implementations that simulate failures or hand-built
//! catalogs, while real builds use `HttpRemoteSource` against a repository
//! served over HTTP.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::OnceCell;

use ff_core::{Error, RefEntry, RelatedRef, Summary, SummaryInfo};

/// One remote repository's read operations.
///
/// The summary document behind these calls is fetched once per session;
/// per-ref lookups are served from it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// General remote metadata (title, default branch, collection id),
    /// with format-specific fields already resolved.
    async fn summary_info(&self) -> Result<SummaryInfo, Error>;

    /// Canonical ref strings of every app and runtime the remote advertises.
    async fn list_refs(&self) -> Result<Vec<String>, Error>;

    /// Sizes, manifest and end-of-life markers for one ref.
    async fn ref_entry(&self, ref_str: &str) -> Result<RefEntry, Error>;

    /// Related refs for one ref. Should-fetch flags and sub-paths are
    /// computed for the given locale set.
    async fn related_refs(
        &self,
        ref_str: &str,
        locales: &[String],
    ) -> Result<Vec<RelatedRef>, Error>;

    /// The content archive for a commit.
    async fn fetch_commit_archive(&self, commit: &str) -> Result<Vec<u8>, Error>;
}

/// Real remote source over HTTP.
pub struct HttpRemoteSource {
    base_url: String,
    client: reqwest::Client,
    summary: OnceCell<Summary>,
}

impl HttpRemoteSource {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("flatforge/0.1")
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(base_url, client)
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            summary: OnceCell::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, Error> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Network {
                message: format!("HTTP {} for {}", response.status(), url),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network {
                message: e.to_string(),
            })
    }

    async fn summary(&self) -> Result<&Summary, Error> {
        self.summary
            .get_or_try_init(|| async {
                let data = self.get("summary.json").await?;
                Summary::from_slice(&data)
            })
            .await
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn summary_info(&self) -> Result<SummaryInfo, Error> {
        self.summary().await?.info()
    }

    async fn list_refs(&self) -> Result<Vec<String>, Error> {
        Ok(self.summary().await?.refs.keys().cloned().collect())
    }

    async fn ref_entry(&self, ref_str: &str) -> Result<RefEntry, Error> {
        self.summary()
            .await?
            .refs
            .get(ref_str)
            .cloned()
            .ok_or_else(|| Error::Network {
                message: format!("ref {} not advertised by {}", ref_str, self.base_url),
            })
    }

    async fn related_refs(
        &self,
        ref_str: &str,
        locales: &[String],
    ) -> Result<Vec<RelatedRef>, Error> {
        let entry = self.ref_entry(ref_str).await?;
        entry
            .related
            .iter()
            .map(|related| related.resolve(locales))
            .collect()
    }

    async fn fetch_commit_archive(&self, commit: &str) -> Result<Vec<u8>, Error> {
        self.get(&format!("objects/{}.commit.tar.gz", commit)).await
    }
}
