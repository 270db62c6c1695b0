mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use common::{
    BIDS_FILES, COMMIT, CountingWorkDirs, MockRemote, is_placeholder, remote_fixture, touch,
    utf8_tempdir,
};
use kira_datagrabber::domain::Element;
use kira_datagrabber::error::GrabError;
use kira_datagrabber::grabber::{Grabber, GrabberConfig};
use kira_datagrabber::lifecycle::LifecycleState;
use kira_datagrabber::pattern::{PatternDetail, PatternSpec};
use kira_datagrabber::remote::RemoteRepoClient;
use kira_datagrabber::workdir::{TempWorkDirs, WorkDirProvider};

const URI: &str = "https://example.org/datasets/example_bids.git";
const DATASET_ID: &str = "b1c2d3e4-example-bids";

fn element(value: &str) -> Element {
    value.parse().unwrap()
}

fn bids_config(name: &str) -> GrabberConfig {
    let mut patterns = BTreeMap::new();
    patterns.insert(
        "T1w".to_string(),
        PatternSpec::from("{subject}/anat/{subject}_T1w.nii.gz"),
    );
    let mut nested = BTreeMap::new();
    nested.insert(
        "mask".to_string(),
        PatternSpec::from("{subject}/func/{subject}_task-rest_mask.nii.gz"),
    );
    patterns.insert(
        "BOLD".to_string(),
        PatternSpec::Detailed(PatternDetail {
            pattern: "{subject}/func/{subject}_task-rest_bold.nii.gz".to_string(),
            space: Some("native".to_string()),
            nested,
        }),
    );
    GrabberConfig::new(name, vec!["subject".to_string()], patterns)
}

fn remote_config(name: &str) -> GrabberConfig {
    let mut config = bids_config(name);
    config.remote_uri = Some(URI.to_string());
    config
}

#[test]
fn local_grabber_lists_and_gets() {
    let (_tmp, root) = utf8_tempdir();
    for file in BIDS_FILES {
        touch(&root, file);
    }
    let mut config = bids_config("LocalBids");
    config.local_path = Some(root.clone());

    let mut grabber: Grabber<MockRemote> =
        Grabber::new(&config, None, Arc::new(TempWorkDirs::new())).unwrap();
    assert_eq!(grabber.state(), None);
    grabber.enter().unwrap();

    let elements = grabber.list_elements().unwrap();
    assert_eq!(
        elements,
        BTreeSet::from([element("sub-01"), element("sub-02")])
    );

    let data = grabber.get(&element("sub-02")).unwrap();
    assert_eq!(data.assets["T1w"].path, root.join("sub-02/anat/sub-02_T1w.nii.gz"));
    assert_eq!(
        data.assets["BOLD"].nested["mask"].path,
        root.join("sub-02/func/sub-02_task-rest_mask.nii.gz")
    );
    assert_eq!(data.meta.element["subject"], "sub-02");
    assert_eq!(data.meta.datagrabber.class, "LocalBids");
    assert_eq!(data.meta.datagrabber.uri, None);

    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json["BOLD"]["meta"]["space"], "native");
    assert_eq!(json["meta"]["element"]["subject"], "sub-02");
    assert!(json["meta"]["datagrabber"].get("commit_id").is_none());

    grabber.exit().unwrap();
}

#[test]
fn missing_asset_is_reported_per_type() {
    let (_tmp, root) = utf8_tempdir();
    for file in BIDS_FILES {
        touch(&root, file);
    }
    let mut config = bids_config("LocalBids");
    config.local_path = Some(root);

    let mut grabber: Grabber<MockRemote> =
        Grabber::new(&config, None, Arc::new(TempWorkDirs::new())).unwrap();
    let err = grabber.get(&element("sub-03")).unwrap_err();
    assert_matches!(err, GrabError::MissingAsset { ref data_type, .. } if data_type == "BOLD");
}

#[test]
fn invalid_config_fails_before_any_io() {
    let (_tmp, base) = utf8_tempdir();
    let workdirs = Arc::new(CountingWorkDirs::new_in(base));

    let mut config = remote_config("Broken");
    config.replacements.push("session".to_string());
    let result = Grabber::new(&config, Some(unused_client()), workdirs.clone());
    assert_matches!(result, Err(GrabError::Configuration(message)) if message.contains("session"));
    assert_eq!(workdirs.created(), 0);

    let mut config = bids_config("NoHome");
    config.local_path = None;
    let result = Grabber::<MockRemote>::new(&config, None, workdirs.clone());
    assert_matches!(result, Err(GrabError::Configuration(_)));

    let mut config = bids_config("Absolute");
    config.local_path = Some(Utf8PathBuf::from("/data"));
    config.root_subdir = Some(Utf8PathBuf::from("/abs"));
    let result = Grabber::<MockRemote>::new(&config, None, workdirs.clone());
    assert_matches!(result, Err(GrabError::Configuration(_)));
    assert_eq!(workdirs.created(), 0);
}

fn unused_client() -> MockRemote {
    let fixture = remote_fixture(DATASET_ID, &[]);
    MockRemote::new(&fixture)
}

#[test]
fn remote_grabber_in_tempdir_fetches_and_cleans_up() {
    let fixture = remote_fixture(DATASET_ID, BIDS_FILES);
    let client = MockRemote::new(&fixture);
    let (_tmp, base) = utf8_tempdir();
    let workdirs = Arc::new(CountingWorkDirs::new_in(base));

    let mut grabber =
        Grabber::new(&remote_config("RemoteBids"), Some(client.clone()), workdirs.clone())
            .unwrap();
    assert_eq!(workdirs.created(), 1);
    let tempdir = workdirs.last().unwrap();
    assert_eq!(grabber.root().to_path_buf(), tempdir.join("dataset"));
    assert_matches!(grabber.list_elements(), Err(GrabError::NotEntered));

    grabber.enter().unwrap();
    assert_eq!(grabber.state(), Some(LifecycleState::InstalledFresh));
    assert_eq!(
        grabber.list_elements().unwrap(),
        BTreeSet::from([element("sub-01"), element("sub-02")])
    );

    let data = grabber.get(&element("sub-01")).unwrap();
    for path in data.assets.values().flat_map(|a| a.paths()) {
        assert!(!is_placeholder(&path), "{path} was not fetched");
    }
    let meta = &data.meta.datagrabber;
    assert_eq!(meta.uri.as_deref(), Some(URI));
    assert_eq!(meta.dataset_id.as_deref(), Some(DATASET_ID));
    assert_eq!(meta.commit_id.as_deref(), Some(COMMIT));
    assert_eq!(meta.dataset_dirty, Some(false));
    assert_eq!(client.count("fetch:3"), 1);

    let again = grabber.get(&element("sub-01")).unwrap();
    assert_eq!(again, data);
    assert_eq!(client.count("fetch"), 1);

    drop(grabber);
    assert_eq!(client.count("remove"), 1);
    assert_eq!(workdirs.deleted(), 1);
    assert!(!tempdir.exists());
}

#[test]
fn remote_grabber_honors_root_subdir() {
    let files: Vec<String> = BIDS_FILES
        .iter()
        .map(|f| format!("example_bids/{f}"))
        .collect();
    let files: Vec<&str> = files.iter().map(String::as_str).collect();
    let fixture = remote_fixture(DATASET_ID, &files);
    let client = MockRemote::new(&fixture);
    let (_tmp, base) = utf8_tempdir();
    let local = base.join("clone");

    let mut config = remote_config("Nested");
    config.local_path = Some(local.clone());
    config.root_subdir = Some(Utf8PathBuf::from("example_bids"));
    let workdirs = Arc::new(CountingWorkDirs::new_in(base.join("tmp")));
    let mut grabber = Grabber::new(&config, Some(client.clone()), workdirs.clone()).unwrap();
    assert_eq!(workdirs.created(), 0);

    grabber.enter().unwrap();
    let data = grabber.get(&element("sub-02")).unwrap();
    assert_eq!(
        data.assets["T1w"].path,
        local.join("example_bids/sub-02/anat/sub-02_T1w.nii.gz")
    );
    grabber.exit().unwrap();
    assert!(!local.exists());
}

#[test]
fn existing_clone_survives_the_session() {
    let fixture = remote_fixture(DATASET_ID, BIDS_FILES);
    let client = MockRemote::new(&fixture);
    let (_tmp, base) = utf8_tempdir();
    let local = base.join("clone");
    client.clone_dataset(URI, &local).unwrap();

    let mut config = remote_config("Preexisting");
    config.local_path = Some(local.clone());
    let mut grabber =
        Grabber::new(&config, Some(client.clone()), Arc::new(TempWorkDirs::new())).unwrap();
    grabber.enter().unwrap();
    assert_eq!(grabber.state(), Some(LifecycleState::InstalledPreexisting));

    let data = grabber.get(&element("sub-01")).unwrap();
    let t1w = data.assets["T1w"].path.clone();
    assert!(!is_placeholder(&t1w));
    assert_eq!(grabber.remote().unwrap().got_files().len(), 3);

    grabber.exit().unwrap();
    assert!(local.is_dir());
    assert!(is_placeholder(&t1w));
    assert_eq!(client.count("drop:3"), 1);
}

#[test]
fn resolution_failure_fetches_nothing() {
    let fixture = remote_fixture(DATASET_ID, BIDS_FILES);
    let client = MockRemote::new(&fixture);
    let (_tmp, base) = utf8_tempdir();

    let mut config = remote_config("RemoteBids");
    config.local_path = Some(base.join("clone"));
    let mut grabber =
        Grabber::new(&config, Some(client.clone()), Arc::new(TempWorkDirs::new())).unwrap();
    grabber.enter().unwrap();

    assert_matches!(
        grabber.get(&element("sub-03")),
        Err(GrabError::MissingAsset { .. })
    );
    assert_matches!(
        grabber.get(&Element::new(["sub-01", "ses-1"])),
        Err(GrabError::ElementResolution { .. })
    );
    assert_eq!(client.count("fetch"), 0);
    grabber.exit().unwrap();
}

struct ExhaustedWorkDirs;

impl WorkDirProvider for ExhaustedWorkDirs {
    fn get_tempdir(&self, _prefix: &str) -> Result<Utf8PathBuf, GrabError> {
        Err(GrabError::Filesystem("no space left on device".to_string()))
    }

    fn delete_tempdir(&self, _path: &Utf8Path) -> Result<(), GrabError> {
        panic!("nothing was created");
    }
}

#[test]
fn tempdir_is_requested_only_for_a_complete_remote_declaration() {
    let (_tmp, base) = utf8_tempdir();
    let workdirs = Arc::new(CountingWorkDirs::new_in(base));
    let result = Grabber::<MockRemote>::new(&remote_config("NoClient"), None, workdirs.clone());
    assert_matches!(result, Err(GrabError::Configuration(message)) if message.contains("client"));
    assert_eq!(workdirs.created(), 0);

    let result = Grabber::new(
        &remote_config("Exhausted"),
        Some(unused_client()),
        Arc::new(ExhaustedWorkDirs),
    );
    assert_matches!(result, Err(GrabError::Filesystem(_)));
}
