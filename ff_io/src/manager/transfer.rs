//! Pull, install and seed operations.
//!
//! Each operation runs as a single staged transaction against the content
//! store: any failure aborts the transaction and the store is left exactly
//! as it was. Transfers are strictly sequential.

use std::collections::BTreeMap;
use std::path::Path;

use ff_core::{Error, InstallCandidate};

use super::{BuildManager, PullOptions};
use crate::store::{CommitState, ContentStore, Transaction};

impl BuildManager {
    /// Pull the content of every resolved ref into the store.
    ///
    /// With `commit_only`, content is fetched addressed by commit without
    /// creating named refs. A cache repository, when given, is consulted
    /// for complete commit objects before going to the network.
    pub async fn pull(&mut self, options: &PullOptions) -> Result<(), Error> {
        let set = self.require_install_set()?;
        let _scoped = self.scoped_build_config()?;

        let cache = options
            .cache_repo
            .as_deref()
            .map(ContentStore::open)
            .transpose()?;

        let store = self.store().clone();
        store.log_free_space();
        let mut txn = store.begin()?;

        let mut staged = Ok(());
        for (ref_str, candidate) in set.iter() {
            staged = self
                .stage_candidate(&mut txn, ref_str, candidate, cache.as_ref(), "pull")
                .await;
            if staged.is_err() {
                break;
            }
            if !options.commit_only {
                txn.stage_ref(candidate.remote(), ref_str, &candidate.full_ref.commit);
            }
        }

        match staged {
            Ok(()) => txn.commit()?,
            Err(e) => {
                eprintln!("    Pull failed, aborting transaction");
                txn.abort();
                return Err(e);
            }
        }

        store.log_free_space();
        Ok(())
    }

    /// Deploy every resolved ref, optionally seeding commit objects from a
    /// cache repository first.
    ///
    /// Refs without a runtime dependency deploy before refs that declare
    /// one. This reduces dependency-violating ordering but does not strictly
    /// guarantee it; out-of-order extension deploys are tolerated.
    pub async fn install(&mut self, cache_repo: Option<&Path>) -> Result<(), Error> {
        let set = self.require_install_set()?;
        let _scoped = self.scoped_build_config()?;

        if let Some(cache) = cache_repo {
            let refs: BTreeMap<String, String> = set
                .iter()
                .map(|(k, c)| (k.to_string(), c.full_ref.commit.clone()))
                .collect();
            self.seed(cache, &refs).await?;
        }

        let mut ordered: Vec<(&str, &InstallCandidate)> = set.iter().collect();
        ordered.sort_by_key(|(ref_str, candidate)| {
            (candidate.full_ref.runtime().is_some(), ref_str.to_string())
        });

        let store = self.store().clone();
        store.log_free_space();
        let mut txn = store.begin()?;

        let mut staged = Ok(());
        for (ref_str, candidate) in &ordered {
            staged = self
                .stage_candidate(&mut txn, ref_str, candidate, None, "install")
                .await;
            if staged.is_err() {
                break;
            }
            txn.stage_ref(candidate.remote(), ref_str, &candidate.full_ref.commit);
            if let Err(e) = txn.stage_deploy(ref_str, &candidate.full_ref.commit, &candidate.subpaths)
            {
                staged = Err(e);
                break;
            }
        }

        match staged {
            Ok(()) => txn.commit()?,
            Err(e) => {
                eprintln!("    Install failed, aborting transaction");
                txn.abort();
                return Err(e);
            }
        }

        for (ref_str, candidate) in &ordered {
            self.db().record_deploy(
                ref_str,
                candidate.remote(),
                &candidate.full_ref.commit,
                &candidate.subpaths,
                candidate.full_ref.installed_size,
            )?;
        }

        store.log_free_space();
        Ok(())
    }

    /// Copy commit objects from a cache repository into this store, as one
    /// transaction, to spare the network during a subsequent install.
    ///
    /// Only complete objects are taken: partial (sub-path restricted)
    /// objects cannot be safely promoted and are skipped. Named refs are
    /// never created here.
    pub async fn seed(
        &mut self,
        cache_repo_path: &Path,
        refs: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let cache = ContentStore::open(cache_repo_path)?;

        let mut revs = Vec::new();
        for (ref_str, rev) in refs {
            match cache.commit_state(rev)? {
                None => {
                    eprintln!(
                        "    Note: skipping {} rev {} not in {}",
                        ref_str,
                        rev,
                        cache_repo_path.display()
                    );
                }
                Some(CommitState::Partial(_)) => {
                    eprintln!(
                        "    Note: skipping {} rev {} in {} (partial)",
                        ref_str,
                        rev,
                        cache_repo_path.display()
                    );
                }
                Some(CommitState::Normal) => revs.push(rev.clone()),
            }
        }

        eprintln!(
            "    Seeding {} commits from {}",
            revs.len(),
            cache_repo_path.display()
        );

        let store = self.store().clone();
        store.log_free_space();
        let mut txn = store.begin()?;

        let mut staged = Ok(());
        for rev in &revs {
            if store.has_commit(rev) {
                continue;
            }
            staged = txn.stage_object_copy(&cache.object_path(rev), rev);
            if staged.is_err() {
                break;
            }
        }

        match staged {
            Ok(()) => txn.commit()?,
            Err(e) => {
                eprintln!("    Seed failed, aborting transaction");
                txn.abort();
                return Err(e);
            }
        }

        Ok(())
    }

    /// Make a candidate's commit object available in the transaction:
    /// already-stored content is reused, then the cache repository, then
    /// the network.
    async fn stage_candidate(
        &self,
        txn: &mut Transaction<'_>,
        ref_str: &str,
        candidate: &InstallCandidate,
        cache: Option<&ContentStore>,
        operation: &str,
    ) -> Result<(), Error> {
        let commit = &candidate.full_ref.commit;

        if !self.commit_content_usable(commit, candidate)? {
            let mut seeded = false;
            if let Some(cache) = cache
                && matches!(cache.commit_state(commit)?, Some(CommitState::Normal))
            {
                eprintln!("    Seeding {} rev {} from cache", ref_str, commit);
                txn.stage_object_copy(&cache.object_path(commit), commit)?;
                seeded = true;
            }

            if !seeded {
                let remote = self.remote(candidate.remote())?;
                let archive = remote.fetch_commit_archive(commit).await?;
                txn.stage_archive(
                    commit,
                    &archive,
                    candidate.full_ref.archive_sha256.as_deref(),
                    &candidate.subpaths,
                )?;
            }
        }

        eprintln!(
            "    Flatpak {} operation done: {}:{} {}",
            operation,
            candidate.remote(),
            ref_str,
            commit
        );
        self.store().log_free_space();
        Ok(())
    }

    /// Whether the stored content for a commit already covers what the
    /// candidate needs: complete content always does, partial content only
    /// when the candidate's sub-paths are all recorded.
    fn commit_content_usable(
        &self,
        commit: &str,
        candidate: &InstallCandidate,
    ) -> Result<bool, Error> {
        match self.store().commit_state(commit)? {
            None => Ok(false),
            Some(CommitState::Normal) => Ok(true),
            Some(CommitState::Partial(stored)) => {
                if candidate.subpaths.is_empty() {
                    return Ok(false);
                }
                Ok(candidate
                    .subpaths
                    .iter()
                    .all(|subpath| stored.contains(subpath)))
            }
        }
    }
}
