use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::storage::file::{Config, FileIoWithBackup};

/// Persisted router entry. `ready` records whether first-run provisioning
/// has completed, so it never repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterEntry {
    pub name: String,
    pub jarfile: String,
    pub template: String,
    pub port: u16,
    pub active: bool,
    pub ready: bool,
}

impl Default for RouterEntry {
    fn default() -> Self {
        RouterEntry {
            name: "BungeeCord".to_string(),
            jarfile: "BungeeCord.jar".to_string(),
            template: "bungeecord".to_string(),
            port: 25565,
            active: true,
            ready: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub name: String,
    pub jarfile: String,
    pub template: String,
    pub port: u16,
    pub active: bool,
}

/// On-disk fleet document. Field names are part of the stored format; do
/// not rename them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetDocument {
    #[serde(default)]
    pub bungeecord: RouterEntry,
    #[serde(rename = "spigot-servers", default)]
    pub workers: BTreeMap<String, WorkerEntry>,
}

/// Fleet membership persistence. Every mutation is written through
/// immediately, with a `.bak` copy of the previous document.
pub struct FleetStore {
    path: PathBuf,
    doc: FleetDocument,
}

impl FileIoWithBackup for FleetStore {}

impl Config for FleetStore {
    type ConfigType = FleetDocument;
}

impl FleetStore {
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Result<Self, FleetError> {
        let doc = Self::load_config_or_default(path.as_ref(), FleetDocument::default)?;
        Ok(FleetStore {
            path: path.as_ref().to_path_buf(),
            doc,
        })
    }

    pub fn router(&self) -> &RouterEntry {
        &self.doc.bungeecord
    }

    pub fn workers(&self) -> &BTreeMap<String, WorkerEntry> {
        &self.doc.workers
    }

    pub fn mark_router_ready(&mut self) -> Result<(), FleetError> {
        self.doc.bungeecord.ready = true;
        self.save()
    }

    pub fn insert_worker(&mut self, slug: &str, entry: WorkerEntry) -> Result<(), FleetError> {
        self.doc.workers.insert(slug.to_string(), entry);
        self.save()
    }

    pub fn remove_worker(&mut self, slug: &str) -> Result<(), FleetError> {
        self.doc.workers.remove(slug);
        self.save()
    }

    pub fn set_worker_active(&mut self, slug: &str, active: bool) -> Result<(), FleetError> {
        match self.doc.workers.get_mut(slug) {
            Some(entry) => {
                entry.active = active;
                self.save()
            }
            None => Err(FleetError::ServerNotFound(slug.to_string())),
        }
    }

    fn save(&self) -> Result<(), FleetError> {
        Self::save_config(&self.path, &self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_in(dir: &tempfile::TempDir) -> FleetStore {
        FleetStore::load_or_init(dir.path().join("config.json")).unwrap()
    }

    #[test]
    fn first_load_writes_router_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.router().port, 25565);
        assert!(!store.router().ready);

        let raw = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["bungeecord"]["jarfile"], "BungeeCord.jar");
        assert!(value["spigot-servers"].as_object().unwrap().is_empty());
    }

    #[test]
    fn worker_mutations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        store
            .insert_worker(
                "lobby",
                WorkerEntry {
                    name: "Lobby".to_string(),
                    jarfile: "spigot.jar".to_string(),
                    template: "spigot-1.12".to_string(),
                    port: 25566,
                    active: false,
                },
            )
            .unwrap();
        store.set_worker_active("lobby", true).unwrap();
        store.mark_router_ready().unwrap();

        let reloaded = store_in(&dir);
        assert!(reloaded.router().ready);
        assert_eq!(reloaded.workers().len(), 1);
        assert!(reloaded.workers()["lobby"].active);
        assert_eq!(reloaded.workers()["lobby"].port, 25566);
    }

    #[test]
    fn flipping_an_unknown_worker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        let err = store.set_worker_active("ghost", true).unwrap_err();
        assert_eq!(err.kind(), "server-not-found");
    }

    #[test]
    fn removal_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        store
            .insert_worker(
                "lobby",
                WorkerEntry {
                    name: "Lobby".to_string(),
                    jarfile: "spigot.jar".to_string(),
                    template: "spigot-1.12".to_string(),
                    port: 25566,
                    active: false,
                },
            )
            .unwrap();
        store.remove_worker("lobby").unwrap();

        let reloaded = store_in(&dir);
        assert!(reloaded.workers().is_empty());
    }
}
