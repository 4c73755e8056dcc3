//! Test infrastructure shared by unit and integration tests.
//!
//! `RemoteFixture` describes a synthetic remote repository: refs with
//! manifests, related refs and content archives. `mount` serves the whole
//! thing from a wiremock server so managers built against the server URL
//! exercise the real HTTP source, archive extraction and store paths.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tar::{Builder, Header};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ff_core::ImageConfig;

use crate::db::DeployDb;
use crate::manager::BuildManager;
use crate::store::ContentStore;

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Build a gzipped commit archive from (path, contents) pairs.
pub fn commit_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());

    for (file_path, content) in files {
        let mut header = Header::new_gnu();
        header.set_path(file_path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }

    let tar_data = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data).unwrap();
    encoder.finish().unwrap()
}

/// Deterministic commit id for a fixture ref.
pub fn fixture_commit(ref_str: &str) -> String {
    format!("c-{}", &sha256_hex(ref_str.as_bytes())[..12])
}

struct FixtureRef {
    entry: Value,
    archive: Vec<u8>,
}

/// A synthetic remote repository served over wiremock.
pub struct RemoteFixture {
    pub format: u32,
    pub title: String,
    pub default_branch: String,
    pub collection_id: String,
    refs: BTreeMap<String, FixtureRef>,
}

impl Default for RemoteFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFixture {
    pub fn new() -> Self {
        Self {
            format: 2,
            title: "Example Repo".to_string(),
            default_branch: "master".to_string(),
            collection_id: "com.example.FlatpakRepo".to_string(),
            refs: BTreeMap::new(),
        }
    }

    /// The worked-example repository: two apps on two platform branches,
    /// each app and platform with a locale extension.
    pub fn example() -> Self {
        let mut fixture = Self::new();
        fixture.add_app("com.example.App1", "master", "1");
        fixture.add_app("com.example.App2", "master", "2");
        fixture.add_platform("1");
        fixture.add_platform("2");
        fixture
    }

    /// Add an app plus its locale extension. The app's manifest declares the
    /// platform runtime at `runtime_branch`.
    pub fn add_app(&mut self, name: &str, branch: &str, runtime_branch: &str) {
        let app_ref = format!("app/{}/x86_64/{}", name, branch);
        let locale_ref = format!("runtime/{}.Locale/x86_64/{}", name, branch);
        let metadata = format!(
            "[Application]\nname={}\nruntime=com.example.Platform/x86_64/{}\nsdk=com.example.Sdk/x86_64/{}\n",
            name, runtime_branch, runtime_branch
        );
        self.add_ref(
            &app_ref,
            &metadata,
            vec![locale_related(&locale_ref)],
            default_files(name),
        );
        self.add_locale_ref(&locale_ref, &format!("{}.Locale", name));
    }

    /// Add a platform runtime plus its locale extension.
    pub fn add_platform(&mut self, branch: &str) {
        let platform_ref = format!("runtime/com.example.Platform/x86_64/{}", branch);
        let locale_ref = format!("runtime/com.example.Platform.Locale/x86_64/{}", branch);
        let metadata = format!(
            "[Runtime]\nname=com.example.Platform\nruntime=com.example.Platform/x86_64/{}\n",
            branch
        );
        self.add_ref(
            &platform_ref,
            &metadata,
            vec![locale_related(&locale_ref)],
            default_files("com.example.Platform"),
        );
        self.add_locale_ref(&locale_ref, "com.example.Platform.Locale");
    }

    /// Add an app whose manifest carries an `[Extra Data]` group.
    pub fn add_extra_data_app(&mut self, name: &str, branch: &str, runtime_branch: &str) {
        let app_ref = format!("app/{}/x86_64/{}", name, branch);
        let metadata = format!(
            "[Application]\nname={}\nruntime=com.example.Platform/x86_64/{}\n\
             [Extra Data]\nname=payload.bin\nsize=1024\n",
            name, runtime_branch
        );
        self.add_ref(&app_ref, &metadata, Vec::new(), default_files(name));
    }

    fn add_locale_ref(&mut self, ref_str: &str, name: &str) {
        let metadata = format!("[Runtime]\nname={}\n", name);
        let files = vec![
            ("files/en/strings.txt".to_string(), b"hello".to_vec()),
            ("files/es/strings.txt".to_string(), b"hola".to_vec()),
            ("files/fr/strings.txt".to_string(), b"bonjour".to_vec()),
        ];
        self.add_ref(ref_str, &metadata, Vec::new(), files);
    }

    /// Add an arbitrary ref with its manifest, related entries (JSON
    /// values) and payload files. The commit archive and its digest are
    /// derived here.
    pub fn add_ref(
        &mut self,
        ref_str: &str,
        metadata: &str,
        related: Vec<Value>,
        files: Vec<(String, Vec<u8>)>,
    ) {
        let mut archive_files: Vec<(&str, &[u8])> = vec![("metadata", metadata.as_bytes())];
        for (file_path, content) in &files {
            archive_files.push((file_path.as_str(), content.as_slice()));
        }
        let archive = commit_archive(&archive_files);
        let installed_size: u64 = files.iter().map(|(_, c)| c.len() as u64).sum();

        let entry = json!({
            "commit": fixture_commit(ref_str),
            "installed_size": installed_size,
            "download_size": archive.len(),
            "archive_sha256": sha256_hex(&archive),
            "metadata": metadata,
            "related": related,
        });

        self.refs.insert(ref_str.to_string(), FixtureRef { entry, archive });
    }

    /// Attach end-of-life markers to an existing ref.
    pub fn set_eol(&mut self, ref_str: &str, eol: &str, eol_rebase: Option<&str>) {
        let fixture_ref = self.refs.get_mut(ref_str).expect("ref exists");
        fixture_ref.entry["eol"] = json!(eol);
        if let Some(successor) = eol_rebase {
            fixture_ref.entry["eol_rebase"] = json!(successor);
        }
    }

    pub fn commit_for(&self, ref_str: &str) -> String {
        fixture_commit(ref_str)
    }

    pub fn archive_for(&self, ref_str: &str) -> Vec<u8> {
        self.refs.get(ref_str).expect("ref exists").archive.clone()
    }

    pub fn ref_strings(&self) -> Vec<String> {
        self.refs.keys().cloned().collect()
    }

    pub fn summary_json(&self) -> Value {
        let refs: serde_json::Map<String, Value> = self
            .refs
            .iter()
            .map(|(k, v)| (k.clone(), v.entry.clone()))
            .collect();
        json!({
            "format": self.format,
            "title": self.title,
            "default_branch": self.default_branch,
            "collection_id": self.collection_id,
            "refs": refs,
        })
    }

    /// Serve the summary and every commit archive from a mock server.
    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/summary.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.summary_json()))
            .mount(server)
            .await;

        for (ref_str, fixture_ref) in &self.refs {
            Mock::given(method("GET"))
                .and(path(format!(
                    "/objects/{}.commit.tar.gz",
                    fixture_commit(ref_str)
                )))
                .respond_with(
                    ResponseTemplate::new(200).set_body_bytes(fixture_ref.archive.clone()),
                )
                .mount(server)
                .await;
        }
    }
}

fn locale_related(locale_ref: &str) -> Value {
    json!({
        "ref": locale_ref,
        "commit": fixture_commit(locale_ref),
        "should_fetch": true,
        "locale_subset": true,
    })
}

fn default_files(name: &str) -> Vec<(String, Vec<u8>)> {
    vec![(
        "files/hello.txt".to_string(),
        format!("hello from {}", name).into_bytes(),
    )]
}

/// Render image configuration text pointing one remote at a server URL.
pub fn config_text(url: &str, remote_options: &[(&str, &str)], flatpak_options: &[(&str, &str)]) -> String {
    let mut text = String::from("[flatpak]\narch=x86_64\nlocales=en es\n");
    for (key, value) in flatpak_options {
        text.push_str(&format!("{}={}\n", key, value));
    }
    text.push_str("\n[flatpak-remote-example]\n");
    text.push_str(&format!("url={}\n", url));
    for (key, value) in remote_options {
        text.push_str(&format!("{}={}\n", key, value));
    }
    text
}

/// Build a manager over a temp store wired to a mock server.
pub async fn build_manager(
    server: &MockServer,
    store_root: &std::path::Path,
    remote_options: &[(&str, &str)],
    flatpak_options: &[(&str, &str)],
    is_cache_repo: bool,
) -> BuildManager {
    let text = config_text(&server.uri(), remote_options, flatpak_options);
    let config = ImageConfig::parse(&text).unwrap();
    BuildManager::from_config(store_root, &config, is_cache_repo)
        .await
        .unwrap()
}

/// An empty manager with no remotes, for tests that inject their own.
pub fn empty_manager(store_root: &std::path::Path, locales: &[String]) -> BuildManager {
    let store = ContentStore::open(store_root).unwrap();
    let db = DeployDb::open(&store.db_path()).unwrap();
    BuildManager::assemble(store, db, "x86_64", locales, false)
}
