use std::{collections::BTreeMap, fs, path::PathBuf};

use uuid::Uuid;

pub(crate) const DEVICE_ID_KEY: &str = "gamehud_device_id_";
pub(crate) const MACHINE_ID_KEY: &str = "gamehud_machine_id_";

/**
A persistent string store, the engine-agnostic stand-in for player prefs.

Implementations are allowed to fail quietly: a `get` on an unavailable
store returns `None` and a `set` that can't persist is dropped. The SDK
degrades to fresh identifiers per run rather than failing.
*/
pub trait Prefs {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&mut self, key: &str, value: &str);

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.parse().ok()
    }

    fn set_int(&mut self, key: &str, value: i64) {
        self.set_string(key, &value.to_string());
    }
}

/**
The identifiers attached to every submission.

The device identifier is generated once and persisted; the session
identifier is regenerated on every start and never stored.
*/
#[derive(Debug, Clone)]
pub struct Identity {
    pub device_id: String,
    pub session_id: String,
}

impl Identity {
    pub fn load(prefs: &mut dyn Prefs) -> Self {
        let device_id = match prefs.get_string(DEVICE_ID_KEY) {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = Uuid::new_v4().to_string();
                prefs.set_string(DEVICE_ID_KEY, &id);
                id
            }
        };

        Identity {
            device_id,
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

/**
An in-memory [`Prefs`] store for tests and hosts without durable storage.
*/
#[derive(Default)]
pub struct MemoryPrefs(BTreeMap<String, String>);

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prefs for MemoryPrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_owned(), value.to_owned());
    }
}

/**
A [`Prefs`] store backed by a small JSON file.

A missing, unreadable, or corrupt file degrades to an empty store; write
failures are logged and dropped. Neither is fatal, per the identity
contract.
*/
pub struct FilePrefs {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePrefs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let values = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(values) => values,
                Err(err) => {
                    log::warn!(
                        "GAMEhud prefs file {} is corrupt and will be rewritten: {err}",
                        path.display()
                    );

                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        FilePrefs { path, values }
    }

    fn persist(&self) {
        let contents = match serde_json::to_string(&self.values) {
            Ok(contents) => contents,
            Err(err) => {
                log::warn!("GAMEhud failed to encode prefs: {err}");

                return;
            }
        };

        if let Err(err) = fs::write(&self.path, contents) {
            log::warn!(
                "GAMEhud failed to persist prefs to {}: {err}",
                self.path.display()
            );
        }
    }
}

impl Prefs for FilePrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
        self.persist();
    }
}
