use std::collections::BTreeMap;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ff_core::{Error, ImageConfig};

use super::BuildManager;
use crate::manager::PullOptions;
use crate::store::{CommitState, ContentStore};
use crate::test_utils::{RemoteFixture, build_manager, commit_archive, config_text, empty_manager};

const WANTED_APPS: (&str, &str) = ("apps", "com.example.App1 com.example.App2");

const EXPECTED_REFS: &[&str] = &[
    "app/com.example.App1/x86_64/master",
    "app/com.example.App2/x86_64/master",
    "runtime/com.example.App1.Locale/x86_64/master",
    "runtime/com.example.App2.Locale/x86_64/master",
    "runtime/com.example.Platform.Locale/x86_64/1",
    "runtime/com.example.Platform.Locale/x86_64/2",
    "runtime/com.example.Platform/x86_64/1",
    "runtime/com.example.Platform/x86_64/2",
];

async fn prepared_manager(
    server: &MockServer,
    store_root: &std::path::Path,
    remote_options: &[(&str, &str)],
    is_cache_repo: bool,
) -> BuildManager {
    let mut manager =
        build_manager(server, store_root, remote_options, &[], is_cache_repo).await;
    manager.add_remotes().await.unwrap();
    manager.enumerate_remotes().await.unwrap();
    manager
}

#[tokio::test]
async fn pull_to_cache_repo() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], true).await;
    manager.resolve(false).unwrap();
    manager.pull(&PullOptions::default()).await.unwrap();

    let store = manager.store();
    let refs = store.list_refs().unwrap();
    let expected: Vec<String> = EXPECTED_REFS.iter().map(|r| format!("example:{}", r)).collect();
    let actual: Vec<String> = refs.keys().cloned().collect();
    assert_eq!(actual, expected);

    // Nothing is deployed by a pull.
    assert!(manager.db().list_deployed().unwrap().is_empty());

    // Locale objects only carry the configured locales.
    for ref_str in EXPECTED_REFS.iter().filter(|r| r.contains(".Locale")) {
        let object = store.object_path(&fixture.commit_for(ref_str));
        assert!(object.join("files/en/strings.txt").exists(), "{}", ref_str);
        assert!(object.join("files/es/strings.txt").exists(), "{}", ref_str);
        assert!(!object.join("files/fr").exists(), "{}", ref_str);
        assert_eq!(
            store.commit_state(&fixture.commit_for(ref_str)).unwrap(),
            Some(CommitState::Partial(vec![
                "/en".to_string(),
                "/es".to_string()
            ]))
        );
    }

    // The locale filter was restored after the build step.
    assert!(store.extra_languages().is_empty());
}

#[tokio::test]
async fn install_deploys_every_resolved_ref() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    manager.resolve(false).unwrap();
    manager.install(None).await.unwrap();

    let deployed: Vec<String> = manager
        .db()
        .list_deployed()
        .unwrap()
        .into_iter()
        .map(|d| d.ref_str)
        .collect();
    assert_eq!(deployed, EXPECTED_REFS);

    let store = manager.store();
    for ref_str in EXPECTED_REFS {
        let deploy = store.deploy_path(ref_str);
        assert!(deploy.join("metadata").exists(), "{}", ref_str);
    }

    // Locale deploys carry only the configured locale sub-paths.
    for ref_str in EXPECTED_REFS.iter().filter(|r| r.contains(".Locale")) {
        let deploy = store.deploy_path(ref_str);
        assert!(deploy.join("files/en").exists());
        assert!(!deploy.join("files/fr").exists());

        let record = manager.db().get_deployed(ref_str).unwrap();
        assert_eq!(record.subpaths, vec!["/en", "/es"]);
    }
}

#[tokio::test]
async fn pull_commit_only_creates_no_refs() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    manager.resolve(false).unwrap();
    manager
        .pull(&PullOptions {
            commit_only: true,
            cache_repo: None,
        })
        .await
        .unwrap();

    let store = manager.store();
    assert!(store.list_refs().unwrap().is_empty());
    for ref_str in EXPECTED_REFS {
        assert!(
            store.has_commit(&fixture.commit_for(ref_str)),
            "missing commit for {}",
            ref_str
        );
    }
}

#[tokio::test]
async fn excluded_runtime_fails_resolution() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(
        &server,
        tmp.path(),
        &[("apps", "com.example.App1"), ("exclude", "com.example.Platform")],
        false,
    )
    .await;

    let err = manager.resolve(false).unwrap_err();
    match err {
        Error::Excluded { reference, remote } => {
            assert_eq!(reference, "runtime/com.example.Platform/x86_64/1");
            assert_eq!(remote, "example");
        }
        other => panic!("expected Excluded, got {:?}", other),
    }
}

#[tokio::test]
async fn extra_data_app_requires_allow_list() {
    let server = MockServer::start().await;
    let mut fixture = RemoteFixture::example();
    fixture.add_extra_data_app("com.example.AppExtraData", "master", "1");
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(
        &server,
        tmp.path(),
        &[("apps", "com.example.AppExtraData")],
        false,
    )
    .await;
    let err = manager.resolve(false).unwrap_err();
    assert!(matches!(err, Error::ExtraData { .. }));
    assert!(err.to_string().contains("com.example.AppExtraData"));

    // Allow-listing the app makes the same resolution succeed.
    let tmp2 = TempDir::new().unwrap();
    let mut manager = prepared_manager(
        &server,
        tmp2.path(),
        &[
            ("apps", "com.example.AppExtraData"),
            ("allow_extra_data", "com.example.AppExtraData"),
        ],
        false,
    )
    .await;
    let set = manager.resolve(false).unwrap();
    assert!(set.contains("app/com.example.AppExtraData/x86_64/master"));
}

#[tokio::test]
async fn eol_rebase_fails_resolution_but_plain_eol_does_not() {
    let app_ref = "app/com.example.App1/x86_64/master";

    let server = MockServer::start().await;
    let mut fixture = RemoteFixture::example();
    fixture.set_eol(app_ref, "Dead", None);
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    // Plain EOL only warns.
    assert!(manager.resolve(false).is_ok());

    let server = MockServer::start().await;
    let mut fixture = RemoteFixture::example();
    fixture.set_eol(app_ref, "Dead", Some("com.example.App2"));
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    let err = manager.resolve(false).unwrap_err();
    match err {
        Error::EolRebase { reference, successor, .. } => {
            assert_eq!(reference, app_ref);
            assert_eq!(successor, "com.example.App2");
        }
        other => panic!("expected EolRebase, got {:?}", other),
    }
}

#[tokio::test]
async fn seed_takes_complete_objects_and_skips_partial_ones() {
    let tmp = TempDir::new().unwrap();
    let cache_root = tmp.path().join("cache");
    let cache = ContentStore::open(&cache_root).unwrap();

    let archive = commit_archive(&[
        ("metadata", b"[Runtime]\nname=com.example.X\n".as_slice()),
        ("files/en/strings.txt", b"hello".as_slice()),
    ]);
    let mut txn = cache.begin().unwrap();
    txn.stage_archive("c-full", &archive, None, &[]).unwrap();
    txn.stage_archive("c-partial", &archive, None, &["/en".to_string()])
        .unwrap();
    txn.commit().unwrap();

    let mut manager = empty_manager(&tmp.path().join("target"), &[]);
    let refs: BTreeMap<String, String> = [
        ("runtime/com.example.Full/x86_64/1".to_string(), "c-full".to_string()),
        ("runtime/com.example.Part/x86_64/1".to_string(), "c-partial".to_string()),
        ("runtime/com.example.Gone/x86_64/1".to_string(), "c-missing".to_string()),
    ]
    .into();
    manager.seed(&cache_root, &refs).await.unwrap();

    let store = manager.store();
    assert_eq!(store.commit_state("c-full").unwrap(), Some(CommitState::Normal));
    assert!(!store.has_commit("c-partial"));
    assert!(!store.has_commit("c-missing"));
    // Seeding never creates named refs.
    assert!(store.list_refs().unwrap().is_empty());
}

#[tokio::test]
async fn install_runs_from_cache_without_object_downloads() {
    // A fixture with no locale extensions pulls complete objects, so a cache
    // repo can satisfy the entire install.
    let mut fixture = RemoteFixture::new();
    fixture.add_ref(
        "app/com.example.Solo/x86_64/master",
        "[Application]\nname=com.example.Solo\nruntime=com.example.Platform/x86_64/1\n",
        Vec::new(),
        vec![("files/hello.txt".to_string(), b"hi".to_vec())],
    );
    fixture.add_ref(
        "runtime/com.example.Platform/x86_64/1",
        "[Runtime]\nname=com.example.Platform\n",
        Vec::new(),
        vec![("files/lib.so".to_string(), b"elf".to_vec())],
    );

    let tmp = TempDir::new().unwrap();

    // First build: warm the cache repo with a full pull.
    let server = MockServer::start().await;
    fixture.mount(&server).await;
    let cache_root = tmp.path().join("cache");
    let mut cache_manager = prepared_manager(
        &server,
        &cache_root,
        &[("apps", "com.example.Solo")],
        true,
    )
    .await;
    cache_manager.resolve(false).unwrap();
    cache_manager.pull(&PullOptions::default()).await.unwrap();

    // Second build: the server only offers the summary. Object downloads
    // would 404, so a successful install proves the cache seeded them.
    let bare_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/summary.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture.summary_json()))
        .mount(&bare_server)
        .await;

    let mut manager = prepared_manager(
        &bare_server,
        &tmp.path().join("image"),
        &[("apps", "com.example.Solo")],
        false,
    )
    .await;
    manager.resolve(false).unwrap();
    manager.install(Some(cache_root.as_path())).await.unwrap();

    let deployed = manager.db().list_deployed().unwrap();
    assert_eq!(deployed.len(), 2);
    assert!(
        manager
            .store()
            .deploy_path("app/com.example.Solo/x86_64/master")
            .join("files/hello.txt")
            .exists()
    );
}

#[tokio::test]
async fn failed_pull_commits_nothing() {
    // Serve the summary and all objects except one, whose download fails.
    let fixture = RemoteFixture::example();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/summary.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixture.summary_json()))
        .mount(&server)
        .await;
    for ref_str in fixture.ref_strings() {
        if ref_str == "runtime/com.example.Platform/x86_64/2" {
            continue;
        }
        Mock::given(method("GET"))
            .and(path(format!(
                "/objects/{}.commit.tar.gz",
                fixture.commit_for(&ref_str)
            )))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture.archive_for(&ref_str)))
            .mount(&server)
            .await;
    }

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    manager.resolve(false).unwrap();

    let err = manager.pull(&PullOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Network { .. }));

    // The transaction was aborted: no refs and no objects are visible, not
    // even the ones that transferred successfully before the failure.
    let store = manager.store();
    assert!(store.list_refs().unwrap().is_empty());
    for ref_str in fixture.ref_strings() {
        assert!(!store.has_commit(&fixture.commit_for(&ref_str)), "{}", ref_str);
    }
}

#[tokio::test]
async fn transient_summary_failures_are_retried() {
    let server = MockServer::start().await;
    // Two failures, then the fixture's mocks take over.
    Mock::given(method("GET"))
        .and(path("/summary.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager =
        build_manager(&server, tmp.path(), &[WANTED_APPS], &[], false).await;
    // The third attempt inside the retry wrapper succeeds.
    manager.add_remotes().await.unwrap();
}

#[tokio::test]
async fn pull_before_resolve_is_an_error() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(&server, tmp.path(), &[WANTED_APPS], false).await;
    let err = manager.pull(&PullOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("resolve"));
}

#[tokio::test]
async fn disabled_remotes_are_skipped() {
    let server = MockServer::start().await;
    let text = config_text(&server.uri(), &[("enable", "false")], &[]);
    let config = ImageConfig::parse(&text).unwrap();

    let tmp = TempDir::new().unwrap();
    let manager = BuildManager::from_config(tmp.path(), &config, false)
        .await
        .unwrap();
    assert!(manager.remotes().is_empty());
}

#[tokio::test]
async fn remote_section_without_name_is_fatal() {
    let text = "[flatpak]\narch=x86_64\n\n[flatpak-remote-]\nurl=https://example.com\n";
    let config = ImageConfig::parse(text).unwrap();

    let tmp = TempDir::new().unwrap();
    let err = BuildManager::from_config(tmp.path(), &config, false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("remote name suffix"));
}

#[tokio::test]
async fn split_mode_drops_nosplit_apps() {
    let server = MockServer::start().await;
    let fixture = RemoteFixture::example();
    fixture.mount(&server).await;

    let tmp = TempDir::new().unwrap();
    let mut manager = prepared_manager(
        &server,
        tmp.path(),
        &[WANTED_APPS, ("nosplit", "com.example.App2")],
        false,
    )
    .await;

    let set = manager.resolve(true).unwrap();
    assert!(set.contains("app/com.example.App1/x86_64/master"));
    assert!(!set.contains("app/com.example.App2/x86_64/master"));
}
