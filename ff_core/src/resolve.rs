//! Install set resolution.
//!
//! Given each remote's wanted apps and runtimes, compute the complete
//! transitive set of refs to install: runtime dependencies, related
//! (extension) refs, and their locale sub-paths. The closure is an explicit
//! worklist over a processed-set rather than recursive traversal, so
//! self-referential or unexpectedly deep ref graphs terminate without
//! blowing the stack.
//!
//! # Determinism
//!
//! The install set is a `BTreeMap` keyed by canonical ref string, remotes
//! are consulted in configuration order, and the worklist is drained in key
//! order, so the same catalogs and configuration always produce the same
//! result.

use std::collections::{BTreeMap, BTreeSet};

use crate::Error;
use crate::catalog::{FullRef, RefCatalog};
use crate::policy::{self, PolicyViolation};
use crate::refspec::{PartialRef, RefId, RefKind};
use crate::remote::RemoteConfig;

/// A resolved ref staged for transfer, plus the payload sub-paths to
/// restrict the transfer to. Sub-paths are recorded by the first dependent
/// that pulls the ref in; later discoveries never override them.
#[derive(Debug, Clone)]
pub struct InstallCandidate {
    pub full_ref: FullRef,
    pub subpaths: Vec<String>,
}

impl InstallCandidate {
    pub fn remote(&self) -> &str {
        &self.full_ref.remote
    }

    pub fn id(&self) -> &RefId {
        &self.full_ref.id
    }
}

/// The resolved, policy-checked set of refs for one build, keyed by
/// canonical ref string.
#[derive(Debug, Clone, Default)]
pub struct InstallSet {
    entries: BTreeMap<String, InstallCandidate>,
}

impl InstallSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&InstallCandidate> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstallCandidate)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &InstallCandidate> {
        self.entries.values()
    }

    /// Insert a candidate unless the identity is already present. An
    /// existing entry is kept untouched so earlier sub-path data survives
    /// duplicate discovery.
    fn insert(&mut self, full_ref: FullRef, subpaths: Vec<String>) {
        self.entries
            .entry(full_ref.id.to_string())
            .or_insert(InstallCandidate { full_ref, subpaths });
    }

    /// Record sub-paths for an already-present candidate. First writer wins:
    /// once any sub-paths are recorded, later discoveries are ignored.
    fn record_subpaths(&mut self, key: &str, subpaths: &[String]) {
        if subpaths.is_empty() {
            return;
        }
        if let Some(candidate) = self.entries.get_mut(key)
            && candidate.subpaths.is_empty()
        {
            candidate.subpaths = subpaths.to_vec();
        }
    }
}

/// Resolves the install set for one build over an ordered list of remotes.
pub struct Resolver<'a> {
    arch: String,
    remotes: Vec<(&'a RemoteConfig, &'a RefCatalog)>,
}

impl<'a> Resolver<'a> {
    pub fn new(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            remotes: Vec::new(),
        }
    }

    /// Remotes are searched in the order they are added, which must be the
    /// configuration declaration order.
    pub fn add_remote(&mut self, config: &'a RemoteConfig, catalog: &'a RefCatalog) {
        self.remotes.push((config, catalog));
    }

    /// Compute the install set. With `split` set, app names on a remote's
    /// `nosplit` list are left out of the wanted set.
    pub fn resolve(&self, split: bool) -> Result<InstallSet, Error> {
        let mut set = InstallSet::default();

        self.seed(&mut set, split)?;
        self.close_over_dependencies(&mut set)?;

        Ok(set)
    }

    /// Seed phase: resolve every wanted app/runtime within its own remote.
    /// A wanted ref that does not match is fatal.
    fn seed(&self, set: &mut InstallSet, split: bool) -> Result<(), Error> {
        for (config, catalog) in &self.remotes {
            let wanted = [(RefKind::App, &config.apps), (RefKind::Runtime, &config.runtimes)];
            for (kind, specs) in wanted {
                for spec in specs {
                    if split && self.is_nosplit(config, spec)? {
                        eprintln!(
                            "    Note: leaving {} {} out of split build",
                            kind, spec
                        );
                        continue;
                    }

                    let full_ref = catalog
                        .matches(spec, kind, &self.arch, config.default_branch.as_deref())?
                        .ok_or_else(|| Error::MissingRef {
                            spec: spec.clone(),
                            remote: config.name.clone(),
                        })?;

                    policy::evaluate(full_ref, config).map_err(|v| v.into_error(full_ref))?;

                    eprintln!("    Adding {} {} from {}", kind, full_ref.id, config.name);
                    set.insert(full_ref.clone(), Vec::new());
                }
            }
        }
        Ok(())
    }

    fn is_nosplit(&self, config: &RemoteConfig, spec: &str) -> Result<bool, Error> {
        let partial = PartialRef::parse(spec)?;
        Ok(config.nosplit.contains(&partial.name))
    }

    /// Fixed-point closure: scan every not-yet-processed member for runtime
    /// and related-ref obligations until the whole set has been processed.
    fn close_over_dependencies(&self, set: &mut InstallSet) -> Result<(), Error> {
        let mut processed: BTreeSet<String> = BTreeSet::new();

        while processed.len() < set.len() {
            let pending: Vec<String> = set
                .keys()
                .filter(|key| !processed.contains(*key))
                .map(|key| key.to_string())
                .collect();

            for key in pending {
                let candidate = set.get(&key).expect("pending key is present").clone();
                self.process_runtime(set, &key, &candidate.full_ref)?;
                self.process_related(set, &candidate.full_ref)?;
                processed.insert(key);
            }
        }

        Ok(())
    }

    /// Pull in a candidate's declared runtime. Searched in the candidate's
    /// own remote first, then the others in order; not found anywhere is
    /// fatal, and so is any policy violation on the runtime.
    fn process_runtime(
        &self,
        set: &mut InstallSet,
        dependent: &str,
        full_ref: &FullRef,
    ) -> Result<(), Error> {
        let Some(runtime_id) = full_ref.runtime() else {
            return Ok(());
        };
        if set.contains(&runtime_id.to_string()) {
            return Ok(());
        }

        let Some((runtime_ref, config)) = self.find_ref(&runtime_id, &full_ref.remote) else {
            return Err(Error::MissingRuntime {
                runtime: runtime_id.to_string(),
                needed_by: dependent.to_string(),
            });
        };

        policy::evaluate(runtime_ref, config).map_err(|v| v.into_error(runtime_ref))?;

        eprintln!(
            "    Adding runtime {} from {} for {}",
            runtime_ref.id, config.name, dependent
        );
        set.insert(runtime_ref.clone(), Vec::new());
        Ok(())
    }

    /// Pull in a candidate's should-fetch related refs. These are
    /// best-effort: a related ref that cannot be found, or that policy
    /// rejects, is logged and skipped, except for eol-rebase, which is
    /// always fatal. A related ref that is already in the set only
    /// contributes its sub-paths, and only if none were recorded yet.
    fn process_related(&self, set: &mut InstallSet, full_ref: &FullRef) -> Result<(), Error> {
        for related in full_ref.related.iter().filter(|r| r.should_fetch) {
            let related_key = related.id.to_string();

            if set.contains(&related_key) {
                set.record_subpaths(&related_key, &related.subpaths);
                continue;
            }

            let Some((related_ref, config)) = self.find_ref(&related.id, &full_ref.remote) else {
                eprintln!(
                    "    Note: skipping related ref {} of {} (not found in any remote)",
                    related.id, full_ref.id
                );
                continue;
            };

            match policy::evaluate(related_ref, config) {
                Ok(()) => {
                    eprintln!(
                        "    Adding related ref {} from {} for {}",
                        related_ref.id, config.name, full_ref.id
                    );
                    set.insert(related_ref.clone(), related.subpaths.clone());
                }
                Err(violation @ PolicyViolation::EolRebase { .. }) => {
                    return Err(violation.into_error(related_ref));
                }
                Err(violation) => {
                    eprintln!(
                        "    Note: skipping related ref {} of {}: {}",
                        related_ref.id,
                        full_ref.id,
                        violation.into_error(related_ref)
                    );
                }
            }
        }
        Ok(())
    }

    /// Exact-identity search preferring the dependent's own remote, then the
    /// remaining remotes in configuration order.
    fn find_ref(&self, id: &RefId, origin: &str) -> Option<(&'a FullRef, &'a RemoteConfig)> {
        let own = self
            .remotes
            .iter()
            .find(|(config, _)| config.name == origin);
        let rest = self
            .remotes
            .iter()
            .filter(|(config, _)| config.name != origin);

        for &(config, catalog) in own.into_iter().chain(rest) {
            if let Some(full_ref) = catalog.get(id) {
                return Some((full_ref, config));
            }
        }
        None
    }
}
