//! Local content store.
//!
//! Commit objects live under `objects/<commit>/` as extracted trees with a
//! state marker recording whether the object is complete or a partial
//! (sub-path restricted) fetch. Named refs are files under
//! `refs/<remote>/<kind>/<name>/<arch>/<branch>` containing the commit id,
//! and deployed refs are materialized trees under `deploy/`. Store options
//! (remote configuration, locale filters) live in a keyfile at `config`.
//!
//! All mutation happens through a `Transaction`: content is staged into a
//! private directory and renamed into place on commit, so an error anywhere
//! inside the transaction body leaves the store exactly as it was.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use walkdir::WalkDir;

use ff_core::{Error, KeyFile};

const CONFIG_FILE: &str = "config";
const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs";
const DEPLOY_DIR: &str = "deploy";
const STAGING_DIR: &str = "staging";
const DB_DIR: &str = "db";
const STATE_FILE: &str = ".commitstate";

/// Content completeness of a stored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    /// The full payload is present.
    Normal,
    /// Only `metadata` and the recorded `files/` sub-paths are present.
    Partial(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if necessary) a store at `root`. Stale staging
    /// directories from interrupted runs are cleared; committed state is
    /// never touched.
    pub fn open(root: &Path) -> Result<Self, Error> {
        for dir in [OBJECTS_DIR, REFS_DIR, DEPLOY_DIR, STAGING_DIR, DB_DIR] {
            fs::create_dir_all(root.join(dir)).map_err(|e| Error::Store {
                message: format!("failed to create {} under '{}': {}", dir, root.display(), e),
            })?;
        }

        let store = Self {
            root: root.to_path_buf(),
        };
        store.clear_staging()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_DIR).join("deploy.sqlite3")
    }

    fn clear_staging(&self) -> Result<(), Error> {
        let staging = self.root.join(STAGING_DIR);
        let entries = fs::read_dir(&staging).map_err(|e| Error::Store {
            message: format!("failed to read staging directory: {}", e),
        })?;
        for entry in entries.flatten() {
            let _ = fs::remove_dir_all(entry.path());
        }
        Ok(())
    }

    // ========== Store configuration ==========

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    fn read_config(&self) -> Result<KeyFile, Error> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(KeyFile::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::Store {
            message: format!("failed to read store config: {}", e),
        })?;
        KeyFile::parse(&text).map_err(|e| Error::Store {
            message: format!("corrupt store config: {}", e),
        })
    }

    fn write_config(&self, config: &KeyFile) -> Result<(), Error> {
        fs::write(self.config_path(), config.to_text()).map_err(|e| Error::Store {
            message: format!("failed to write store config: {}", e),
        })
    }

    pub fn option(&self, section: &str, key: &str) -> Result<Option<String>, Error> {
        Ok(self.read_config()?.get(section, key).map(|s| s.to_string()))
    }

    pub fn set_option(&self, section: &str, key: &str, value: &str) -> Result<(), Error> {
        let mut config = self.read_config()?;
        config.set(section, key, value);
        self.write_config(&config)
    }

    pub fn remove_option(&self, section: &str, key: &str) -> Result<(), Error> {
        let mut config = self.read_config()?;
        config.remove(section, key);
        self.write_config(&config)
    }

    fn remote_section(name: &str) -> String {
        format!("remote \"{}\"", name)
    }

    pub fn remote_option(&self, remote: &str, key: &str) -> Result<Option<String>, Error> {
        self.option(&Self::remote_section(remote), key)
    }

    pub fn set_remote_option(&self, remote: &str, key: &str, value: &str) -> Result<(), Error> {
        self.set_option(&Self::remote_section(remote), key, value)
    }

    pub fn remove_remote_option(&self, remote: &str, key: &str) -> Result<(), Error> {
        self.remove_option(&Self::remote_section(remote), key)
    }

    /// Locale filters currently configured on the store, as set for the
    /// duration of a build by `scoped_build_config`.
    pub fn extra_languages(&self) -> Vec<String> {
        self.option("core", "xa.extra-languages")
            .ok()
            .flatten()
            .map(|v| v.split(';').map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    /// Set the locale filter and masked-ref options for the duration of a
    /// build step. The returned guard restores the configuration on every
    /// exit path; when `keep_languages` is set the locale filter is left in
    /// place for the deployed image.
    pub fn scoped_build_config(
        &self,
        locales: &[String],
        masked: &BTreeSet<String>,
        keep_languages: bool,
    ) -> Result<ScopedBuildConfig, Error> {
        if !locales.is_empty() {
            let value = locales.join(";");
            eprintln!("    Setting store option core.xa.extra-languages to {}", value);
            self.set_option("core", "xa.extra-languages", &value)?;
        }
        if !masked.is_empty() {
            let value = masked.iter().cloned().collect::<Vec<_>>().join(";");
            eprintln!("    Setting store option core.xa.masked to {}", value);
            self.set_option("core", "xa.masked", &value)?;
        }
        Ok(ScopedBuildConfig {
            store: self.clone(),
            remove_languages: !keep_languages,
        })
    }

    // ========== Objects ==========

    pub fn object_path(&self, commit: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(commit)
    }

    pub fn has_commit(&self, commit: &str) -> bool {
        self.object_path(commit).exists()
    }

    /// Content state of a stored commit; `None` when the commit is absent.
    pub fn commit_state(&self, commit: &str) -> Result<Option<CommitState>, Error> {
        let object = self.object_path(commit);
        if !object.exists() {
            return Ok(None);
        }
        let state_path = object.join(STATE_FILE);
        if !state_path.exists() {
            return Ok(Some(CommitState::Normal));
        }
        let text = fs::read_to_string(&state_path).map_err(|e| Error::Store {
            message: format!("failed to read state of commit {}: {}", commit, e),
        })?;
        Ok(Some(parse_commit_state(text.trim())))
    }

    // ========== Refs ==========

    fn ref_path(&self, remote: &str, ref_str: &str) -> PathBuf {
        self.root.join(REFS_DIR).join(remote).join(ref_str)
    }

    /// Resolve a named ref to its commit, if present.
    pub fn resolve_ref(&self, remote: &str, ref_str: &str) -> Result<Option<String>, Error> {
        let path = self.ref_path(remote, ref_str);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::Store {
            message: format!("failed to read ref {}:{}: {}", remote, ref_str, e),
        })?;
        Ok(Some(text.trim().to_string()))
    }

    /// Enumerate all stored refs as `remote:kind/name/arch/branch` mapped to
    /// their commit ids.
    pub fn list_refs(&self) -> Result<BTreeMap<String, String>, Error> {
        let refs_root = self.root.join(REFS_DIR);
        let mut refs = BTreeMap::new();

        for entry in WalkDir::new(&refs_root).min_depth(5).max_depth(5) {
            let entry = entry.map_err(|e| Error::Store {
                message: format!("failed to walk refs: {}", e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&refs_root)
                .expect("walked path under refs root");
            let parts: Vec<String> = rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect();
            let (remote, ref_parts) = parts.split_first().expect("depth-5 path");
            let commit = fs::read_to_string(entry.path()).map_err(|e| Error::Store {
                message: format!("failed to read ref file: {}", e),
            })?;
            refs.insert(
                format!("{}:{}", remote, ref_parts.join("/")),
                commit.trim().to_string(),
            );
        }

        Ok(refs)
    }

    // ========== Deploys ==========

    pub fn deploy_path(&self, ref_str: &str) -> PathBuf {
        self.root.join(DEPLOY_DIR).join(ref_str)
    }

    // ========== Transactions ==========

    /// Start a transaction. Content staged through it becomes visible only
    /// on `commit()`; dropping the transaction without committing discards
    /// everything staged.
    pub fn begin(&self) -> Result<Transaction<'_>, Error> {
        let staging = tempfile::Builder::new()
            .prefix("txn-")
            .tempdir_in(self.root.join(STAGING_DIR))
            .map_err(|e| Error::Store {
                message: format!("failed to create staging directory: {}", e),
            })?;
        Ok(Transaction {
            store: self,
            staging,
            staged_objects: Vec::new(),
            staged_refs: Vec::new(),
            staged_deploys: Vec::new(),
        })
    }

    // ========== Diagnostics ==========

    /// Report available space at the store path. Best-effort: failure to
    /// stat the filesystem only produces a note.
    pub fn log_free_space(&self) {
        match (fs4::available_space(&self.root), fs4::total_space(&self.root)) {
            (Ok(free), Ok(total)) if total > 0 => {
                let percent = 100.0 * free as f64 / total as f64;
                eprintln!(
                    "    {} free space: {} / {} ({:.1}%)",
                    self.root.display(),
                    format_size(free),
                    format_size(total),
                    percent
                );
            }
            _ => {
                eprintln!(
                    "    Note: could not determine free space for {}",
                    self.root.display()
                );
            }
        }
    }
}

/// Restores the store's build-scoped options when dropped.
pub struct ScopedBuildConfig {
    store: ContentStore,
    remove_languages: bool,
}

impl Drop for ScopedBuildConfig {
    fn drop(&mut self) {
        if let Err(e) = self.store.remove_option("core", "xa.masked") {
            eprintln!("    Warning: failed to remove store option core.xa.masked: {}", e);
        }
        if self.remove_languages
            && let Err(e) = self.store.remove_option("core", "xa.extra-languages")
        {
            eprintln!(
                "    Warning: failed to remove store option core.xa.extra-languages: {}",
                e
            );
        }
    }
}

/// An open, staged mutation of the store. Dropping the transaction without
/// committing removes the staging directory and everything in it.
pub struct Transaction<'a> {
    store: &'a ContentStore,
    staging: tempfile::TempDir,
    staged_objects: Vec<String>,
    staged_refs: Vec<(String, String, String)>,
    staged_deploys: Vec<String>,
}

impl Transaction<'_> {
    fn staged_object_path(&self, commit: &str) -> PathBuf {
        self.staging.path().join(OBJECTS_DIR).join(commit)
    }

    fn staged_deploy_path(&self, ref_str: &str) -> PathBuf {
        self.staging.path().join(DEPLOY_DIR).join(ref_str)
    }

    /// Where the content of `commit` can currently be read from: the staged
    /// copy if this transaction staged it, the committed object otherwise.
    fn object_source(&self, commit: &str) -> PathBuf {
        if self.staged_objects.iter().any(|c| c == commit) {
            self.staged_object_path(commit)
        } else {
            self.store.object_path(commit)
        }
    }

    /// Extract a commit archive into the transaction. With sub-paths, only
    /// `metadata` and the requested `files/` subtrees are kept and the
    /// object is recorded as partial. The archive digest is verified first
    /// when one is known.
    pub fn stage_archive(
        &mut self,
        commit: &str,
        archive: &[u8],
        expected_sha256: Option<&str>,
        subpaths: &[String],
    ) -> Result<(), Error> {
        if let Some(expected) = expected_sha256 {
            let actual = format!("{:x}", Sha256::digest(archive));
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                    commit: commit.to_string(),
                });
            }
        }

        let dest = self.staged_object_path(commit);
        fs::create_dir_all(&dest).map_err(|e| Error::Store {
            message: format!("failed to create staged object: {}", e),
        })?;

        let mut tar = Archive::new(GzDecoder::new(archive));
        let entries = tar.entries().map_err(|e| Error::Store {
            message: format!("failed to read commit archive {}: {}", commit, e),
        })?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Store {
                message: format!("failed to read commit archive {}: {}", commit, e),
            })?;
            let path = entry
                .path()
                .map_err(|e| Error::Store {
                    message: format!("bad path in commit archive {}: {}", commit, e),
                })?
                .into_owned();
            if !keep_entry(&path, subpaths) {
                continue;
            }
            entry.unpack_in(&dest).map_err(|e| Error::Store {
                message: format!("failed to unpack commit archive {}: {}", commit, e),
            })?;
        }

        let state = if subpaths.is_empty() {
            "normal".to_string()
        } else {
            format!("partial {}", subpaths.join(" "))
        };
        fs::write(dest.join(STATE_FILE), state).map_err(|e| Error::Store {
            message: format!("failed to write commit state: {}", e),
        })?;

        self.staged_objects.push(commit.to_string());
        Ok(())
    }

    /// Stage a complete commit object by copying it from another store
    /// (cache seeding). The source must be a complete object directory.
    pub fn stage_object_copy(&mut self, source: &Path, commit: &str) -> Result<(), Error> {
        let dest = self.staged_object_path(commit);
        copy_dir_recursive(source, &dest)?;
        self.staged_objects.push(commit.to_string());
        Ok(())
    }

    /// Stage a named ref pointing at a commit.
    pub fn stage_ref(&mut self, remote: &str, ref_str: &str, commit: &str) {
        self.staged_refs
            .push((remote.to_string(), ref_str.to_string(), commit.to_string()));
    }

    /// Stage the deployment of a ref: materialize the commit's content
    /// (restricted to sub-paths, if any) under the deploy tree.
    pub fn stage_deploy(
        &mut self,
        ref_str: &str,
        commit: &str,
        subpaths: &[String],
    ) -> Result<(), Error> {
        let source = self.object_source(commit);
        if !source.exists() {
            return Err(Error::Store {
                message: format!("cannot deploy {}: commit {} not present", ref_str, commit),
            });
        }
        let dest = self.staged_deploy_path(ref_str);
        copy_dir_filtered(&source, &dest, subpaths, false)?;
        self.staged_deploys.push(ref_str.to_string());
        Ok(())
    }

    /// Make everything staged visible. Objects and deploy trees are moved
    /// into place, then ref files are written.
    pub fn commit(self) -> Result<(), Error> {
        for commit in &self.staged_objects {
            let dest = self.store.object_path(commit);
            if dest.exists() {
                fs::remove_dir_all(&dest).map_err(|e| Error::Store {
                    message: format!("failed to replace object {}: {}", commit, e),
                })?;
            }
            fs::rename(self.staged_object_path(commit), &dest).map_err(|e| Error::Store {
                message: format!("failed to commit object {}: {}", commit, e),
            })?;
        }

        for ref_str in &self.staged_deploys {
            let dest = self.store.deploy_path(ref_str);
            if dest.exists() {
                fs::remove_dir_all(&dest).map_err(|e| Error::Store {
                    message: format!("failed to replace deploy {}: {}", ref_str, e),
                })?;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::Store {
                    message: format!("failed to create deploy directory: {}", e),
                })?;
            }
            fs::rename(self.staged_deploy_path(ref_str), &dest).map_err(|e| Error::Store {
                message: format!("failed to commit deploy {}: {}", ref_str, e),
            })?;
        }

        for (remote, ref_str, commit) in &self.staged_refs {
            let path = self.store.ref_path(remote, ref_str);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::Store {
                    message: format!("failed to create ref directory: {}", e),
                })?;
            }
            fs::write(&path, format!("{}\n", commit)).map_err(|e| Error::Store {
                message: format!("failed to write ref {}:{}: {}", remote, ref_str, e),
            })?;
        }

        // The staging directory (now holding only empty shells) is removed
        // when `self.staging` drops here.
        Ok(())
    }

    /// Discard everything staged.
    pub fn abort(self) {
        // Dropping the staging directory is the whole job.
    }
}

fn parse_commit_state(text: &str) -> CommitState {
    match text.split_once(' ') {
        Some(("partial", subpaths)) => CommitState::Partial(
            subpaths
                .split_whitespace()
                .map(|s| s.to_string())
                .collect(),
        ),
        _ if text == "partial" => CommitState::Partial(Vec::new()),
        _ => CommitState::Normal,
    }
}

/// Whether an archive entry survives a sub-path restricted fetch: the
/// manifest always does, payload entries only under a requested sub-path.
fn keep_entry(path: &Path, subpaths: &[String]) -> bool {
    if subpaths.is_empty() {
        return true;
    }

    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    match parts.split_first() {
        None => false,
        Some((first, rest)) if first == "metadata" && rest.is_empty() => true,
        Some((first, rest)) if first == "files" => {
            if rest.is_empty() {
                return true;
            }
            subpaths.iter().any(|subpath| {
                let wanted: Vec<&str> = subpath
                    .trim_start_matches('/')
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .collect();
                rest.len() >= wanted.len() && rest[..wanted.len()] == wanted[..]
                    || wanted.len() > rest.len() && wanted[..rest.len()] == rest[..]
            })
        }
        _ => false,
    }
}

/// Object-to-object copy, state marker included.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), Error> {
    copy_dir_filtered(src, dst, &[], true)
}

/// Copy a directory tree, optionally restricted to `metadata` plus the
/// given `files/` sub-paths. The state marker is internal bookkeeping and
/// only survives object-to-object copies.
fn copy_dir_filtered(
    src: &Path,
    dst: &Path,
    subpaths: &[String],
    include_state: bool,
) -> Result<(), Error> {
    fs::create_dir_all(dst).map_err(|e| Error::Store {
        message: format!("failed to create directory '{}': {}", dst.display(), e),
    })?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| Error::Store {
            message: format!("failed to walk '{}': {}", src.display(), e),
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walked path under source");
        if !include_state && rel == Path::new(STATE_FILE) {
            continue;
        }
        if !subpaths.is_empty() && !keep_entry(rel, subpaths) {
            continue;
        }

        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::Store {
                message: format!("failed to create directory '{}': {}", target.display(), e),
            })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::Store {
                    message: format!("failed to create directory '{}': {}", parent.display(), e),
                })?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::Store {
                message: format!(
                    "failed to copy '{}' to '{}': {}",
                    entry.path().display(),
                    target.display(),
                    e
                ),
            })?;
        }
    }

    Ok(())
}

pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::commit_archive;
    use tempfile::TempDir;

    fn archive_fixture() -> Vec<u8> {
        commit_archive(&[
            ("metadata", b"[Runtime]\nname=com.example.Locale\n".as_slice()),
            ("files/en/strings.txt", b"hello".as_slice()),
            ("files/es/strings.txt", b"hola".as_slice()),
            ("files/fr/strings.txt", b"bonjour".as_slice()),
        ])
    }

    #[test]
    fn full_archive_stages_and_commits() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let mut txn = store.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &[]).unwrap();
        txn.stage_ref("example", "runtime/com.example.Locale/x86_64/master", "c1");

        // Nothing is visible until commit.
        assert!(!store.has_commit("c1"));
        txn.commit().unwrap();

        assert_eq!(store.commit_state("c1").unwrap(), Some(CommitState::Normal));
        assert!(store.object_path("c1").join("files/fr/strings.txt").exists());
        assert_eq!(
            store
                .resolve_ref("example", "runtime/com.example.Locale/x86_64/master")
                .unwrap()
                .as_deref(),
            Some("c1")
        );

        let refs = store.list_refs().unwrap();
        assert_eq!(
            refs.get("example:runtime/com.example.Locale/x86_64/master"),
            Some(&"c1".to_string())
        );
    }

    #[test]
    fn subpath_fetch_keeps_metadata_and_requested_locales_only() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let subpaths = vec!["/en".to_string(), "/es".to_string()];
        let mut txn = store.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &subpaths).unwrap();
        txn.commit().unwrap();

        let object = store.object_path("c1");
        assert!(object.join("metadata").exists());
        assert!(object.join("files/en/strings.txt").exists());
        assert!(object.join("files/es/strings.txt").exists());
        assert!(!object.join("files/fr").exists());

        assert_eq!(
            store.commit_state("c1").unwrap(),
            Some(CommitState::Partial(subpaths))
        );
    }

    #[test]
    fn dropped_transaction_leaves_store_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        {
            let mut txn = store.begin().unwrap();
            txn.stage_archive("c1", &archive_fixture(), None, &[]).unwrap();
            txn.stage_ref("example", "app/com.example.App1/x86_64/master", "c1");
            // Dropped without commit.
        }

        assert!(!store.has_commit("c1"));
        assert!(store.list_refs().unwrap().is_empty());
        // The staging area is cleaned up too.
        assert_eq!(
            fs::read_dir(tmp.path().join(STAGING_DIR)).unwrap().count(),
            0
        );
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let archive = archive_fixture();
        let good_sha = format!("{:x}", Sha256::digest(&archive));

        let mut txn = store.begin().unwrap();
        txn.stage_archive("c-a", &archive, Some(good_sha.as_str()), &[]).unwrap();
        let err = txn
            .stage_archive("c-b", &archive, Some("0".repeat(64).as_str()), &[])
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        txn.abort();

        // Neither the failed nor the already-staged object is visible.
        assert!(!store.has_commit("c-a"));
        assert!(!store.has_commit("c-b"));
    }

    #[test]
    fn stage_deploy_materializes_filtered_tree() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let ref_str = "runtime/com.example.Locale/x86_64/master";
        let subpaths = vec!["/en".to_string()];
        let mut txn = store.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &[]).unwrap();
        txn.stage_deploy(ref_str, "c1", &subpaths).unwrap();
        txn.commit().unwrap();

        let deploy = store.deploy_path(ref_str);
        assert!(deploy.join("metadata").exists());
        assert!(deploy.join("files/en/strings.txt").exists());
        assert!(!deploy.join("files/es").exists());
        assert!(!deploy.join(STATE_FILE).exists());
    }

    #[test]
    fn stage_object_copy_seeds_between_stores() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentStore::open(&tmp.path().join("cache")).unwrap();
        let target = ContentStore::open(&tmp.path().join("target")).unwrap();

        let mut txn = cache.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &[]).unwrap();
        txn.commit().unwrap();

        let mut txn = target.begin().unwrap();
        txn.stage_object_copy(&cache.object_path("c1"), "c1").unwrap();
        txn.commit().unwrap();

        assert_eq!(target.commit_state("c1").unwrap(), Some(CommitState::Normal));
        assert!(target.object_path("c1").join("files/en/strings.txt").exists());
    }

    #[test]
    fn commit_replaces_partial_object_with_full_one() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let mut txn = store.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &["/en".to_string()])
            .unwrap();
        txn.commit().unwrap();
        assert!(matches!(
            store.commit_state("c1").unwrap(),
            Some(CommitState::Partial(_))
        ));

        let mut txn = store.begin().unwrap();
        txn.stage_archive("c1", &archive_fixture(), None, &[]).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.commit_state("c1").unwrap(), Some(CommitState::Normal));
        assert!(store.object_path("c1").join("files/fr/strings.txt").exists());
    }

    #[test]
    fn scoped_build_config_restores_on_drop() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let locales = vec!["en".to_string(), "es".to_string()];
        let masked: BTreeSet<String> = ["com.example.Bad".to_string()].into();

        {
            let _scoped = store.scoped_build_config(&locales, &masked, false).unwrap();
            assert_eq!(store.extra_languages(), vec!["en", "es"]);
            assert_eq!(
                store.option("core", "xa.masked").unwrap().as_deref(),
                Some("com.example.Bad")
            );
        }

        assert!(store.extra_languages().is_empty());
        assert_eq!(store.option("core", "xa.masked").unwrap(), None);
    }

    #[test]
    fn scoped_build_config_can_keep_languages() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        let locales = vec!["en".to_string()];
        {
            let _scoped = store
                .scoped_build_config(&locales, &BTreeSet::new(), true)
                .unwrap();
        }
        // Left in place for the deployed image; the masked option never
        // survives.
        assert_eq!(store.extra_languages(), vec!["en"]);
        assert_eq!(store.option("core", "xa.masked").unwrap(), None);
    }

    #[test]
    fn open_clears_stale_staging() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join(STAGING_DIR).join("txn-123-0");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover"), b"junk").unwrap();

        let _store = ContentStore::open(tmp.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn remote_options_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::open(tmp.path()).unwrap();

        store
            .set_remote_option("example", "url", "https://example.com/repo")
            .unwrap();
        assert_eq!(
            store.remote_option("example", "url").unwrap().as_deref(),
            Some("https://example.com/repo")
        );
        store.remove_remote_option("example", "url").unwrap();
        assert_eq!(store.remote_option("example", "url").unwrap(), None);
    }

    #[test]
    fn format_size_humanizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn keep_entry_filters_payload_paths() {
        let subpaths = vec!["/en".to_string()];
        assert!(keep_entry(Path::new("metadata"), &subpaths));
        assert!(keep_entry(Path::new("files"), &subpaths));
        assert!(keep_entry(Path::new("files/en"), &subpaths));
        assert!(keep_entry(Path::new("files/en/deep/file"), &subpaths));
        assert!(!keep_entry(Path::new("files/es/file"), &subpaths));
        assert!(!keep_entry(Path::new("export/icon.png"), &subpaths));
        assert!(keep_entry(Path::new("export/icon.png"), &[]));
    }
}
