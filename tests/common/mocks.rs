use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use cryptainer::{
    credentials::{PassphrasePrompt, SecretStore},
    error::{CryptainerError, Result},
    types::{Passphrase, VolumeName},
    volume::{
        driver::prepare_mount_point, CreateOptions, MountTable, VolumeDriver, VolumeType,
    },
};

/// Marker file that identifies a mock directory container.
pub const MOCK_MARKER: &str = "mock.conf";

/// State shared between mock drivers and the mock mount table.
#[derive(Debug, Default)]
pub struct MockState {
    pub mounted: HashSet<PathBuf>,
    pub busy: HashSet<PathBuf>,
    pub passphrases: HashMap<PathBuf, String>,
    pub calls: Vec<String>,
    pub fail_mount: HashSet<String>,
    /// Names whose mount succeeds but never shows up in the mount table.
    pub stall_mount: HashSet<String>,
    pub stalled: HashSet<PathBuf>,
}

pub type SharedState = Arc<Mutex<MockState>>;

impl MockState {
    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|call| call.starts_with(prefix)).count()
    }
}

fn label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// In-process driver: gocryptfs-like directories or veracrypt-like `.hc` files.
pub struct MockDriver {
    kind: VolumeType,
    state: SharedState,
}

impl MockDriver {
    pub fn new(kind: VolumeType, state: SharedState) -> Self {
        Self { kind, state }
    }
}

impl VolumeDriver for MockDriver {
    fn volume_type(&self) -> VolumeType {
        self.kind
    }

    fn container_path(&self, volumes_dir: &Path, name: &VolumeName) -> PathBuf {
        match self.kind {
            VolumeType::GoCryptFs => volumes_dir.join(name.as_str()),
            VolumeType::VeraCrypt => volumes_dir.join(format!("{name}.hc")),
        }
    }

    fn detect(&self, path: &Path) -> bool {
        match self.kind {
            VolumeType::GoCryptFs => path.is_dir() && path.join(MOCK_MARKER).is_file(),
            VolumeType::VeraCrypt => {
                path.is_file() && path.extension().is_some_and(|extension| extension == "hc")
            }
        }
    }

    fn create(
        &self,
        name: &VolumeName,
        volumes_dir: &Path,
        options: &CreateOptions,
        passphrase: &Passphrase,
    ) -> Result<PathBuf> {
        let container = self.container_path(volumes_dir, name);
        if container.exists() {
            return Err(CryptainerError::AlreadyExists(name.to_string()));
        }
        match self.kind {
            VolumeType::GoCryptFs => {
                fs::create_dir(&container)?;
                fs::write(container.join(MOCK_MARKER), "")?;
            }
            VolumeType::VeraCrypt => {
                if options.size.is_none() {
                    return Err(CryptainerError::UnsupportedOption {
                        target: name.to_string(),
                        detail: "size required".to_owned(),
                    });
                }
                fs::write(&container, "mock")?;
            }
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {name}"));
        state
            .passphrases
            .insert(container.clone(), passphrase.expose(str::to_owned));
        Ok(container)
    }

    fn mount(&self, container: &Path, mount_point: &Path, passphrase: &Passphrase) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("mount {}", label(mount_point)));
        if state.fail_mount.contains(&label(mount_point)) {
            return Err(CryptainerError::ExternalToolFailure {
                tool: "mock".to_owned(),
                detail: "injected mount failure".to_owned(),
            });
        }
        let expected = state.passphrases.get(container).cloned();
        if expected.as_deref() != Some(passphrase.expose(str::to_owned).as_str()) {
            return Err(CryptainerError::WrongPassphrase(label(container)));
        }
        prepare_mount_point(mount_point)?;
        if state.stall_mount.contains(&label(mount_point)) {
            state.stalled.insert(mount_point.to_path_buf());
            return Ok(());
        }
        state.mounted.insert(mount_point.to_path_buf());
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("unmount {}", label(mount_point)));
        if state.busy.contains(mount_point) {
            return Err(CryptainerError::Busy(label(mount_point)));
        }
        if state.stalled.remove(mount_point) {
            return Ok(());
        }
        if !state.mounted.remove(mount_point) {
            return Err(CryptainerError::NotMounted(label(mount_point)));
        }
        Ok(())
    }
}

/// Mount table reading the shared mock state.
pub struct MockMountTable {
    state: SharedState,
}

impl MockMountTable {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl MountTable for MockMountTable {
    fn is_mounted(&self, mount_point: &Path) -> Result<bool> {
        Ok(self.state.lock().unwrap().mounted.contains(mount_point))
    }
}

/// In-memory secret store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub entries: Arc<Mutex<HashMap<String, String>>>,
    pub fail_put: Arc<Mutex<bool>>,
}

impl SecretStore for MemoryStore {
    fn put(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        if *self.fail_put.lock().unwrap() {
            return Err(CryptainerError::StoreUnavailable("database locked".to_owned()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_owned(), passphrase.expose(str::to_owned));
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Passphrase>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(name)
            .map(|value| Passphrase::new(value.clone())))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.entries.lock().unwrap().contains_key(name))
    }

    fn update(&self, name: &str, passphrase: &Passphrase) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(name) {
            Some(value) => {
                *value = passphrase.expose(str::to_owned);
                Ok(())
            }
            None => Err(CryptainerError::NotFound(name.to_owned())),
        }
    }
}

/// Prompt that replays queued answers and records the labels it was asked with.
#[derive(Clone, Default)]
pub struct ScriptedPrompt {
    pub answers: Arc<Mutex<VecDeque<String>>>,
    pub labels: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompt {
    pub fn push(&self, answer: &str) {
        self.answers.lock().unwrap().push_back(answer.to_owned());
    }

    pub fn asked(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl PassphrasePrompt for ScriptedPrompt {
    fn prompt(&self, label: &str) -> Result<Passphrase> {
        self.labels.lock().unwrap().push(label.to_owned());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .map(Passphrase::new)
            .ok_or_else(|| CryptainerError::InvalidInput(format!("{label}: no scripted answer")))
    }
}
