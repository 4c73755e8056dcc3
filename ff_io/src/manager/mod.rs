//! Build manager: the entry point tying configuration, remotes, resolution
//! and transfers together.
//!
//! The manager is constructed from the image configuration, which declares
//! remotes in `flatpak-remote-<name>` sections and build-wide settings in
//! the `flatpak` section. A build then runs `add_remotes` →
//! `enumerate_remotes` → `resolve` → `pull`/`install`.

mod transfer;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ff_core::{Error, ImageConfig, InstallSet, RemoteConfig, Resolver};

use crate::db::DeployDb;
use crate::remote::Remote;
use crate::store::{ContentStore, ScopedBuildConfig};

pub const REMOTE_PREFIX: &str = "flatpak-remote-";

/// Options for `BuildManager::pull`.
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Fetch content addressed by commit only, without writing named refs.
    /// Used to warm a cache repository without exposing refs.
    pub commit_only: bool,
    /// A local store consulted for commit objects before the network.
    pub cache_repo: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BuildManager {
    store: ContentStore,
    db: DeployDb,
    remotes: Vec<Remote>,
    arch: String,
    locales: Vec<String>,
    enable_p2p_updates: bool,
    set_extra_languages: bool,
    is_cache_repo: bool,
    install_set: Option<InstallSet>,
}

impl BuildManager {
    /// Build a manager from the image configuration. Remotes are created in
    /// declaration order; disabled remotes are skipped.
    pub async fn from_config(
        store_root: &Path,
        config: &ImageConfig,
        is_cache_repo: bool,
    ) -> Result<Self, Error> {
        let store = ContentStore::open(store_root)?;
        let db = DeployDb::open(&store.db_path())?;

        let arch = match config.get("flatpak", "arch") {
            Some(arch) if !arch.is_empty() => arch.to_string(),
            _ => default_arch().to_string(),
        };
        eprintln!("    Using flatpak arch {}", arch);

        let locales = config.get_list("flatpak", "locales");
        if !locales.is_empty() {
            eprintln!("    Using flatpak locales {}", locales.join(" "));
        }

        let enable_p2p_updates = config.get_bool_or("flatpak", "enable_p2p_updates", false)?;
        let set_extra_languages = config.get_bool_or("flatpak", "set_extra_languages", false)?;

        let mut manager = Self {
            store,
            db,
            remotes: Vec::new(),
            arch,
            locales,
            enable_p2p_updates,
            set_extra_languages,
            is_cache_repo,
            install_set: None,
        };

        for section in config.sections() {
            let Some(name) = section.strip_prefix(REMOTE_PREFIX) else {
                continue;
            };
            if name.is_empty() {
                return Err(Error::Config {
                    message: format!("no remote name suffix in config section '{}'", section),
                });
            }
            if !config.get_bool_or(section, "enable", true)? {
                eprintln!("    Note: remote {} disabled, skipping", name);
                continue;
            }

            let mut options = config
                .section_items(section)
                .cloned()
                .unwrap_or_default();
            options.remove("enable");
            let remote_config = RemoteConfig::from_section(name, &options);
            manager.remotes.push(Remote::from_config(remote_config).await?);
        }

        Ok(manager)
    }

    /// Assemble a manager from already-built parts. This is the seam used by
    /// tests that inject mock remote sources.
    pub fn assemble(
        store: ContentStore,
        db: DeployDb,
        arch: &str,
        locales: &[String],
        is_cache_repo: bool,
    ) -> Self {
        Self {
            store,
            db,
            remotes: Vec::new(),
            arch: arch.to_string(),
            locales: locales.to_vec(),
            enable_p2p_updates: false,
            set_extra_languages: false,
            is_cache_repo,
            install_set: None,
        }
    }

    pub fn insert_remote(&mut self, remote: Remote) {
        self.remotes.push(remote);
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn db(&self) -> &DeployDb {
        &self.db
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn remotes(&self) -> &[Remote] {
        &self.remotes
    }

    pub fn install_set(&self) -> Option<&InstallSet> {
        self.install_set.as_ref()
    }

    pub(crate) fn remote(&self, name: &str) -> Result<&Remote, Error> {
        self.remotes
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| Error::Config {
                message: format!("unknown remote '{}'", name),
            })
    }

    /// Register all configured remotes with the content store.
    pub async fn add_remotes(&mut self) -> Result<(), Error> {
        let store = self.store.clone();
        for remote in &mut self.remotes {
            remote.add(&store).await?;
        }
        Ok(())
    }

    /// Configure all remotes for image deployment.
    pub async fn deploy_remotes(&mut self) -> Result<(), Error> {
        let store = self.store.clone();
        let enable_p2p = self.enable_p2p_updates;
        for remote in &mut self.remotes {
            remote.deploy(&store, enable_p2p).await?;
        }
        Ok(())
    }

    /// Enumerate all remotes' catalogs. The store's locale filter is set for
    /// the duration so related-ref sub-paths reflect the configured locales.
    pub async fn enumerate_remotes(&mut self) -> Result<(), Error> {
        let scoped = self.scoped_build_config()?;
        let locales = self.store.extra_languages();
        for remote in &mut self.remotes {
            remote.enumerate(&locales).await?;
        }
        drop(scoped);
        Ok(())
    }

    /// Resolve the install set from the enumerated catalogs. Must run after
    /// `enumerate_remotes`; `pull` and `install` operate on the result.
    pub fn resolve(&mut self, split: bool) -> Result<&InstallSet, Error> {
        let set = {
            let mut resolver = Resolver::new(&self.arch);
            for remote in &self.remotes {
                resolver.add_remote(&remote.config, &remote.catalog);
            }
            resolver.resolve(split)?
        };
        eprintln!("    Resolved {} refs to install", set.len());
        self.install_set = Some(set);
        Ok(self.install_set.as_ref().expect("just set"))
    }

    pub(crate) fn require_install_set(&self) -> Result<InstallSet, Error> {
        self.install_set.clone().ok_or_else(|| Error::Config {
            message: "no refs resolved; call resolve() first".to_string(),
        })
    }

    /// Apply the build-scoped store configuration (locale filter plus the
    /// union of all remotes' exclude lists as masked refs). A cache repo
    /// never keeps the locale filter; an image keeps it only when
    /// `set_extra_languages` is configured.
    pub(crate) fn scoped_build_config(&self) -> Result<ScopedBuildConfig, Error> {
        let masked: BTreeSet<String> = self
            .remotes
            .iter()
            .flat_map(|r| r.config.exclude.iter().cloned())
            .collect();
        let keep_languages = !self.is_cache_repo && self.set_extra_languages;
        self.store
            .scoped_build_config(&self.locales, &masked, keep_languages)
    }
}

/// The build architecture when the configuration does not set one, in the
/// naming convention the catalogs use.
fn default_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        "arm" => "arm",
        other => other,
    }
}
