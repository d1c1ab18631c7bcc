#![cfg(unix)]

mod common;

use std::{
    fs::{self, File, FileTimes},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use common::mocks::{MemoryStore, MockDriver, MockMountTable, ScriptedPrompt, SharedState};
use cryptainer::{
    audit::AuditLog,
    config::{CryptainerConfig, KeepassConfig},
    credentials::CredentialManager,
    error::CryptainerError,
    manager::{CreateRequest, VolumeManager},
    volume::{TypeRegistry, VolumeType},
};

struct Harness {
    _temp_dir: tempfile::TempDir,
    volumes_dir: PathBuf,
    mount_dir: PathBuf,
    audit_file: PathBuf,
    state: SharedState,
    store: MemoryStore,
    prompt: ScriptedPrompt,
    manager: VolumeManager<MockMountTable, MemoryStore>,
}

struct HarnessOptions {
    with_store: bool,
    with_template: bool,
    auto_cleanup: bool,
    prune_max_age_days: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            with_store: true,
            with_template: false,
            auto_cleanup: true,
            prune_max_age_days: 365,
        }
    }
}

fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

fn harness_with(options: HarnessOptions) -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let volumes_dir = temp_dir.path().join("volumes");
    let mount_dir = temp_dir.path().join("mnt");
    fs::create_dir_all(&volumes_dir).unwrap();
    fs::create_dir_all(&mount_dir).unwrap();
    let template_path = options.with_template.then(|| {
        let template = temp_dir.path().join("template");
        fs::create_dir_all(template.join("docs")).unwrap();
        fs::write(template.join("README"), "welcome").unwrap();
        fs::write(template.join("docs/index.md"), "# index").unwrap();
        template
    });

    let config = CryptainerConfig {
        source_path: temp_dir.path().join("config.toml"),
        volumes_dir: volumes_dir.clone(),
        mount_dir: mount_dir.clone(),
        template_path,
        keepass: KeepassConfig::default(),
        passgen_length: 30,
        prune_max_age_days: options.prune_max_age_days,
        auto_cleanup: options.auto_cleanup,
    };

    let state = SharedState::default();
    let mut registry = TypeRegistry::new();
    registry.register(Box::new(MockDriver::new(
        VolumeType::GoCryptFs,
        Arc::clone(&state),
    )));
    registry.register(Box::new(MockDriver::new(
        VolumeType::VeraCrypt,
        Arc::clone(&state),
    )));

    let store = MemoryStore::default();
    let prompt = ScriptedPrompt::default();
    let audit_file = temp_dir.path().join("audit.jsonl");
    let manager = VolumeManager::new(
        config,
        registry,
        MockMountTable::new(Arc::clone(&state)),
        options
            .with_store
            .then(|| CredentialManager::new(store.clone())),
        Box::new(prompt.clone()),
        AuditLog::new(&audit_file).unwrap(),
    );

    Harness {
        _temp_dir: temp_dir,
        volumes_dir,
        mount_dir,
        audit_file,
        state,
        store,
        prompt,
        manager,
    }
}

fn request(name: &str, type_name: &str) -> CreateRequest {
    CreateRequest {
        name: name.to_owned(),
        type_name: type_name.to_owned(),
        size: (type_name == "veracrypt").then(|| "1G".to_owned()),
        ..CreateRequest::default()
    }
}

fn create_prompted(harness: &Harness, name: &str, type_name: &str, passphrase: &str) {
    harness.prompt.push(passphrase);
    harness.manager.create(request(name, type_name)).unwrap();
}

fn audit_events(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_owned()
        })
        .collect()
}

fn age_container(path: &Path, days: u64) {
    let then = SystemTime::now() - Duration::from_secs(days * 86_400);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_times(FileTimes::new().set_accessed(then).set_modified(then))
        .unwrap();
}

#[test]
fn created_volume_appears_once_with_its_type() {
    let harness = harness();
    harness.prompt.push("pw-alpha");

    let created = harness.manager.create(request("alpha", "gocryptfs")).unwrap();

    assert_eq!(created.volume.name, "alpha");
    assert_eq!(created.volume.volume_type, VolumeType::GoCryptFs);
    assert!(!created.stored);
    assert!(created.generated_passphrase.is_none());
    let catalog = harness.manager.catalog().unwrap();
    assert_eq!(
        catalog
            .volumes()
            .filter(|volume| volume.name == "alpha")
            .count(),
        1
    );
    assert!(harness.prompt.asked()[0].contains("alpha"));
    assert_eq!(audit_events(&harness.audit_file), vec!["volume_created"]);
}

#[test]
fn create_rejects_name_already_in_catalog() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");

    let result = harness.manager.create(request("alpha", "veracrypt"));

    assert!(matches!(result, Err(CryptainerError::AlreadyExists(name)) if name == "alpha"));
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("create"), 1);
    assert!(!harness.volumes_dir.join("alpha.hc").exists());
}

#[test]
fn create_rejects_bad_names_and_unknown_types() {
    let harness = harness();

    assert!(matches!(
        harness.manager.create(request("../escape", "gocryptfs")),
        Err(CryptainerError::Validation(_))
    ));
    assert!(matches!(
        harness.manager.create(request("alpha", "GoCryptFS")),
        Err(CryptainerError::UnknownType(_))
    ));
    assert!(harness.prompt.asked().is_empty());
}

#[test]
fn create_with_store_generates_and_stores_without_prompting() {
    let harness = harness();
    let mut create = request("alpha", "gocryptfs");
    create.use_credential_store = true;

    let created = harness.manager.create(create).unwrap();

    assert!(created.stored);
    assert!(created.generated_passphrase.is_none());
    assert!(harness.prompt.asked().is_empty());
    let stored = harness
        .store
        .entries
        .lock()
        .unwrap()
        .get("alpha")
        .cloned()
        .unwrap();
    assert_eq!(stored.len(), 30);
    let used = harness
        .state
        .lock()
        .unwrap()
        .passphrases
        .get(&harness.volumes_dir.join("alpha"))
        .cloned()
        .unwrap();
    assert_eq!(stored, used);
    assert_eq!(
        audit_events(&harness.audit_file),
        vec!["volume_created", "passphrase_stored"]
    );
}

#[test]
fn create_with_existing_record_fails_before_touching_disk() {
    let harness = harness();
    harness
        .store
        .entries
        .lock()
        .unwrap()
        .insert("alpha".to_owned(), "old".to_owned());
    let mut create = request("alpha", "gocryptfs");
    create.use_credential_store = true;

    let result = harness.manager.create(create);

    assert!(matches!(result, Err(CryptainerError::DuplicateEntry(name)) if name == "alpha"));
    assert_eq!(fs::read_dir(&harness.volumes_dir).unwrap().count(), 0);
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("create"), 0);
}

#[test]
fn create_with_store_requires_configured_store() {
    let harness = harness_with(HarnessOptions {
        with_store: false,
        ..HarnessOptions::default()
    });
    let mut create = request("alpha", "gocryptfs");
    create.use_credential_store = true;

    let result = harness.manager.create(create);

    assert!(matches!(result, Err(CryptainerError::StoreUnavailable(_))));
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("create"), 0);
}

#[test]
fn failed_store_write_removes_new_container() {
    let harness = harness();
    *harness.store.fail_put.lock().unwrap() = true;
    let mut create = request("beta", "veracrypt");
    create.use_credential_store = true;

    let result = harness.manager.create(create);

    assert!(matches!(result, Err(CryptainerError::StoreUnavailable(_))));
    assert!(!harness.volumes_dir.join("beta.hc").exists());
    assert!(!harness.manager.catalog().unwrap().contains("beta"));
}

#[test]
fn generate_returns_unstored_passphrase_once() {
    let harness = harness();
    let mut create = request("alpha", "gocryptfs");
    create.generate = true;

    let created = harness.manager.create(create).unwrap();

    let generated = created.generated_passphrase.unwrap();
    assert_eq!(generated.expose(str::len), 30);
    assert!(!created.stored);
    assert!(harness.store.entries.lock().unwrap().is_empty());
}

#[test]
fn empty_supplied_passphrase_is_rejected() {
    let harness = harness();
    let mut create = request("alpha", "gocryptfs");
    create.passphrase = Some(cryptainer::types::Passphrase::new(String::new()));

    let result = harness.manager.create(create);

    assert!(matches!(result, Err(CryptainerError::InvalidInput(_))));
    assert!(!harness.volumes_dir.join("alpha").exists());
}

#[test]
fn auto_mount_with_template_copies_tree_into_mount() {
    let harness = harness_with(HarnessOptions {
        with_template: true,
        ..HarnessOptions::default()
    });
    let mut create = request("alpha", "gocryptfs");
    create.auto_mount = true;
    create.use_template = true;
    create.use_credential_store = true;

    let created = harness.manager.create(create).unwrap();

    assert!(created.follow_up_error.is_none());
    assert!(created.volume.mounted);
    assert_eq!(created.template_files, Some(2));
    let mount_path = harness.mount_dir.join("alpha");
    assert_eq!(fs::read_to_string(mount_path.join("README")).unwrap(), "welcome");
    assert!(mount_path.join("docs/index.md").is_file());
}

#[test]
fn template_preconditions_are_checked_first() {
    let harness = harness();
    let mut without_mount = request("alpha", "gocryptfs");
    without_mount.use_template = true;
    assert!(matches!(
        harness.manager.create(without_mount),
        Err(CryptainerError::UnsupportedOption { .. })
    ));

    let mut unconfigured = request("alpha", "gocryptfs");
    unconfigured.use_template = true;
    unconfigured.auto_mount = true;
    assert!(matches!(
        harness.manager.create(unconfigured),
        Err(CryptainerError::InvalidInput(_))
    ));
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("create"), 0);
}

#[test]
fn auto_mount_failure_keeps_created_volume() {
    let harness = harness();
    harness
        .state
        .lock()
        .unwrap()
        .fail_mount
        .insert("alpha".to_owned());
    let mut create = request("alpha", "gocryptfs");
    create.auto_mount = true;
    create.generate = true;

    let created = harness.manager.create(create).unwrap();

    assert!(matches!(
        created.follow_up_error,
        Some(CryptainerError::ExternalToolFailure { .. })
    ));
    assert!(created.generated_passphrase.is_some());
    assert!(!created.volume.mounted);
    assert!(harness.volumes_dir.join("alpha").is_dir());
}

#[test]
fn mounting_twice_reports_already_mounted_without_second_tool_call() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");
    harness.prompt.push("pw");

    let first = harness.manager.mount(&["alpha".to_owned()]).unwrap();
    assert!(first.all_succeeded());

    let second = harness.manager.mount(&["alpha".to_owned()]).unwrap();
    assert!(matches!(
        &second.outcomes[0].result,
        Err(CryptainerError::AlreadyMounted(name)) if name == "alpha"
    ));
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("mount"), 1);
}

#[test]
fn duplicate_name_in_one_batch_is_rejected_the_second_time() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");
    harness.prompt.push("pw");

    let report = harness
        .manager
        .mount(&["alpha".to_owned(), "alpha".to_owned()])
        .unwrap();

    assert!(report.outcomes[0].result.is_ok());
    assert!(matches!(
        &report.outcomes[1].result,
        Err(CryptainerError::AlreadyMounted(_))
    ));
}

#[test]
fn unmounting_never_mounted_volume_skips_tool() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");

    let report = harness.manager.unmount(&["alpha".to_owned()]).unwrap();

    assert!(matches!(
        &report.outcomes[0].result,
        Err(CryptainerError::NotMounted(name)) if name == "alpha"
    ));
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("unmount"), 0);
}

#[test]
fn batch_mount_attempts_every_name() {
    let harness = harness();
    create_prompted(&harness, "a", "gocryptfs", "pw-a");
    create_prompted(&harness, "c", "veracrypt", "pw-c");
    harness.prompt.push("pw-a");
    harness.prompt.push("pw-c");

    let report = harness
        .manager
        .mount(&["a".to_owned(), "b".to_owned(), "c".to_owned()])
        .unwrap();

    assert!(!report.all_succeeded());
    assert!(report.outcomes[0].result.is_ok());
    assert!(matches!(
        &report.outcomes[1].result,
        Err(CryptainerError::NotFound(name)) if name == "b"
    ));
    assert!(report.outcomes[2].result.is_ok());
    assert_eq!(report.failures().count(), 1);
    let catalog = harness.manager.catalog().unwrap();
    assert!(catalog.lookup("a").unwrap().mounted);
    assert!(catalog.lookup("c").unwrap().mounted);
}

#[test]
fn wrong_passphrase_is_reported_per_volume() {
    let harness = harness();
    create_prompted(&harness, "a", "gocryptfs", "pw-a");
    create_prompted(&harness, "b", "gocryptfs", "pw-b");
    harness.prompt.push("pw-a");
    harness.prompt.push("not-pw-b");

    let report = harness
        .manager
        .mount(&["a".to_owned(), "b".to_owned()])
        .unwrap();

    assert!(report.outcomes[0].result.is_ok());
    assert!(matches!(
        &report.outcomes[1].result,
        Err(CryptainerError::WrongPassphrase(_))
    ));
    assert!(!harness.manager.catalog().unwrap().lookup("b").unwrap().mounted);
}

#[test]
fn stored_passphrase_is_used_and_missing_record_prompts() {
    let harness = harness();
    let mut stored = request("kept", "gocryptfs");
    stored.use_credential_store = true;
    harness.manager.create(stored).unwrap();
    create_prompted(&harness, "typed", "gocryptfs", "pw-typed");
    let prompts_before = harness.prompt.asked().len();
    harness.prompt.push("pw-typed");

    let report = harness
        .manager
        .mount(&["kept".to_owned(), "typed".to_owned()])
        .unwrap();

    assert!(report.all_succeeded());
    let asked = harness.prompt.asked();
    assert_eq!(asked.len(), prompts_before + 1);
    assert!(asked.last().unwrap().contains("typed"));
}

#[test]
fn unmount_removes_empty_mount_dir_when_auto_cleanup_is_set() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");
    harness.prompt.push("pw");
    harness.manager.mount(&["alpha".to_owned()]).unwrap();
    assert!(harness.mount_dir.join("alpha").is_dir());

    let report = harness.manager.unmount(&["alpha".to_owned()]).unwrap();

    assert!(report.all_succeeded());
    assert!(!harness.mount_dir.join("alpha").exists());
    assert_eq!(
        audit_events(&harness.audit_file),
        vec![
            "volume_created",
            "volume_mounted",
            "volume_unmounted",
            "mount_dir_cleaned"
        ]
    );
}

#[test]
fn unmount_keeps_mount_dir_without_auto_cleanup() {
    let harness = harness_with(HarnessOptions {
        auto_cleanup: false,
        ..HarnessOptions::default()
    });
    create_prompted(&harness, "alpha", "gocryptfs", "pw");
    harness.prompt.push("pw");
    harness.manager.mount(&["alpha".to_owned()]).unwrap();

    harness.manager.unmount(&["alpha".to_owned()]).unwrap();

    assert!(harness.mount_dir.join("alpha").is_dir());
}

#[test]
fn prune_disabled_flags_nothing() {
    let harness = harness_with(HarnessOptions {
        prune_max_age_days: 0,
        ..HarnessOptions::default()
    });
    create_prompted(&harness, "ancient", "veracrypt", "pw");
    age_container(&harness.volumes_dir.join("ancient.hc"), 5_000);

    let report = harness.manager.prune(None, true).unwrap();

    assert_eq!(report.max_age_days, 0);
    assert!(report.candidates.is_empty());
    assert!(harness.volumes_dir.join("ancient.hc").exists());
}

#[test]
fn prune_flags_only_old_unmounted_volumes() {
    let harness = harness();
    create_prompted(&harness, "old", "veracrypt", "pw-old");
    create_prompted(&harness, "busy", "veracrypt", "pw-busy");
    create_prompted(&harness, "fresh", "veracrypt", "pw-fresh");
    harness.prompt.push("pw-busy");
    harness.manager.mount(&["busy".to_owned()]).unwrap();
    age_container(&harness.volumes_dir.join("old.hc"), 400);
    age_container(&harness.volumes_dir.join("busy.hc"), 400);

    let report = harness.manager.prune(None, false).unwrap();

    assert_eq!(report.max_age_days, 365);
    let names = report
        .candidates
        .iter()
        .map(|candidate| candidate.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["old"]);
    assert!(report.candidates[0].age_days >= 399);
    assert_eq!(report.skipped_mounted, vec!["busy".to_owned()]);
    assert!(report.deleted.is_empty());
    assert!(harness.volumes_dir.join("old.hc").exists());
}

#[test]
fn prune_delete_removes_containers_and_keeps_credentials() {
    let harness = harness();
    let mut stored = request("old", "veracrypt");
    stored.use_credential_store = true;
    harness.manager.create(stored).unwrap();
    age_container(&harness.volumes_dir.join("old.hc"), 40);

    let untouched = harness.manager.prune(None, true).unwrap();
    assert!(untouched.candidates.is_empty());

    let report = harness.manager.prune(Some(30), true).unwrap();

    assert_eq!(report.max_age_days, 30);
    assert_eq!(report.deleted, vec!["old".to_owned()]);
    assert!(report.failures.is_empty());
    assert!(!harness.volumes_dir.join("old.hc").exists());
    assert!(harness.store.entries.lock().unwrap().contains_key("old"));
    assert!(audit_events(&harness.audit_file).contains(&"volume_pruned".to_owned()));
}

#[test]
fn clean_unmounts_idle_volumes_and_is_idempotent() {
    let harness = harness();
    create_prompted(&harness, "idle", "gocryptfs", "pw-idle");
    create_prompted(&harness, "inuse", "gocryptfs", "pw-inuse");
    harness.prompt.push("pw-idle");
    harness.prompt.push("pw-inuse");
    harness
        .manager
        .mount(&["idle".to_owned(), "inuse".to_owned()])
        .unwrap();
    harness
        .state
        .lock()
        .unwrap()
        .busy
        .insert(harness.mount_dir.join("inuse"));
    fs::create_dir_all(harness.mount_dir.join("ghost")).unwrap();
    fs::create_dir_all(harness.mount_dir.join("keep")).unwrap();
    fs::write(harness.mount_dir.join("keep/file"), "x").unwrap();

    let report = harness.manager.clean().unwrap();

    assert_eq!(report.unmounted, vec!["idle".to_owned()]);
    assert_eq!(report.busy, vec!["inuse".to_owned()]);
    assert!(report.failures.is_empty());
    assert_eq!(
        report.removed_dirs,
        vec![harness.mount_dir.join("ghost"), harness.mount_dir.join("idle")]
    );
    assert!(harness.mount_dir.join("inuse").is_dir());
    assert!(harness.mount_dir.join("keep/file").exists());

    let again = harness.manager.clean().unwrap();
    assert!(again.is_noop());
    assert_eq!(again.busy, vec!["inuse".to_owned()]);
}

#[test]
fn clean_with_nothing_mounted_is_a_noop() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");

    let report = harness.manager.clean().unwrap();

    assert!(report.is_noop());
    assert_eq!(harness.state.lock().unwrap().calls_starting_with("unmount"), 0);
}

#[test]
fn audit_write_failure_does_not_lose_created_volume_or_stored_passphrase() {
    let harness = harness();
    fs::remove_file(&harness.audit_file).unwrap();
    fs::create_dir(&harness.audit_file).unwrap();
    let mut create = request("alpha", "gocryptfs");
    create.use_credential_store = true;

    let created = harness.manager.create(create).unwrap();

    assert!(created.stored);
    let stored = harness.store.entries.lock().unwrap().get("alpha").cloned();
    assert_eq!(stored.map(|value| value.len()), Some(30));
    assert!(harness.manager.catalog().unwrap().contains("alpha"));

    create_prompted(&harness, "beta", "gocryptfs", "pw-beta");
    harness.prompt.push("pw-beta");
    let report = harness
        .manager
        .mount(&["alpha".to_owned(), "beta".to_owned()])
        .unwrap();
    assert!(report.all_succeeded());
    let report = harness
        .manager
        .unmount(&["alpha".to_owned(), "beta".to_owned()])
        .unwrap();
    assert!(report.all_succeeded());
    assert!(!harness.mount_dir.join("alpha").exists());
}

#[test]
fn mount_that_never_becomes_ready_is_detached_and_cleaned() {
    let harness = harness();
    create_prompted(&harness, "alpha", "gocryptfs", "pw");
    harness
        .state
        .lock()
        .unwrap()
        .stall_mount
        .insert("alpha".to_owned());
    harness.prompt.push("pw");

    let report = harness.manager.mount(&["alpha".to_owned()]).unwrap();

    assert!(matches!(
        &report.outcomes[0].result,
        Err(CryptainerError::ExternalToolFailure { detail, .. }) if detail.contains("did not become ready")
    ));
    let state = harness.state.lock().unwrap();
    assert_eq!(state.calls_starting_with("unmount alpha"), 1);
    assert!(state.stalled.is_empty());
    drop(state);
    assert!(!harness.mount_dir.join("alpha").exists());
    assert!(!audit_events(&harness.audit_file).contains(&"volume_mounted".to_owned()));
}
