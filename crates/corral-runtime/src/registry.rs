//! Persistent container records.
//!
//! Each container owns a directory under the run directory holding its
//! `config.json` record and its log file. Readers reconstruct the host's
//! state from these files alone.

use std::net::Ipv4Addr;
use std::path::Path;

use corral_common::config::RuntimeConfig;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerStatus;
use serde::{Deserialize, Serialize};

/// Timestamp format of `createTime`.
pub const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything recorded about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Host pid of the init process; empty once stopped.
    pub pid: String,
    /// Random container id.
    pub id: String,
    /// Registry key, the id unless the user chose a name.
    pub name: String,
    /// Command line, space-joined.
    pub command: String,
    /// Local creation time, [`CREATE_TIME_FORMAT`].
    #[serde(rename = "createTime")]
    pub create_time: String,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// Volume flag as given, empty when none.
    #[serde(default)]
    pub volume: String,
    /// `hostPort:containerPort` entries as given.
    #[serde(default)]
    pub portmapping: Vec<String>,
    /// Network the container is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address allocated on [`network`](Self::network).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
}

impl ContainerRecord {
    /// A fresh `running` record stamped with the current local time.
    #[must_use]
    pub fn running(id: &str, name: &str, pid: i32, command: &[String]) -> Self {
        Self {
            pid: pid.to_string(),
            id: id.to_string(),
            name: name.to_string(),
            command: command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: String::new(),
            portmapping: Vec::new(),
            network: None,
            ip: None,
        }
    }

    /// Parses the recorded pid; `None` when blank or garbage.
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        self.pid.trim().parse().ok().filter(|pid| *pid > 0)
    }
}

/// Reads and writes records under the configured run directory.
#[derive(Debug, Clone)]
pub struct Registry {
    config: RuntimeConfig,
}

impl Registry {
    /// Creates a registry over `config`'s run directory.
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Whether a record named `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.config.config_file(name).exists()
    }

    /// Writes `record`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let dir = self.config.container_dir(&record.name);
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;
        let path = self.config.config_file(&record.name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(record)?;
        std::fs::write(&tmp, json).map_err(|e| CorralError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| CorralError::io(&path, e))?;
        tracing::debug!(name = %record.name, status = %record.status, "record saved");
        Ok(())
    }

    /// Loads the record of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if there is no such container, or
    /// an error if the file cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<ContainerRecord> {
        let path = self.config.config_file(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CorralError::NotFound {
                kind: "container",
                id: name.to_string(),
            }),
            Err(e) => Err(CorralError::io(path, e)),
        }
    }

    /// Every readable record, ordered by name. Unreadable ones are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory exists but cannot be
    /// listed.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let root = self.config.run_dir.join("containers");
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(root, e)),
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CorralError::io(&root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load(&name) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(name, error = %e, "skipping unreadable container record"),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Deletes the container directory, log included. A missing directory
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        remove_dir(&self.config.container_dir(name))
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::io(dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &Path) -> Registry {
        Registry::new(RuntimeConfig::with_dirs(dir.join("run"), dir.join("root")))
    }

    #[test]
    fn record_uses_wire_field_names() {
        let mut record = ContainerRecord::running("abc", "web", 42, &["sleep".into(), "5".into()]);
        record.portmapping = vec!["80:80".into()];
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["pid"], "42");
        assert_eq!(json["command"], "sleep 5");
        assert_eq!(json["status"], "running");
        assert!(json.get("createTime").is_some());
        assert_eq!(json["portmapping"][0], "80:80");
        assert!(json.get("network").is_none());
        assert!(json.get("ip").is_none());
    }

    #[test]
    fn older_records_without_optional_fields_parse() {
        let json = r#"{"pid":"","id":"x","name":"x","command":"sh","createTime":"t","status":"stopped"}"#;
        let record: ContainerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, ContainerStatus::Stopped);
        assert!(record.portmapping.is_empty());
        assert_eq!(record.pid(), None);
    }

    #[test]
    fn save_load_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        let record = ContainerRecord::running("id1", "one", 7, &["top".into()]);

        registry.save(&record).expect("save");
        assert!(registry.exists("one"));
        assert_eq!(registry.load("one").expect("load"), record);

        registry.remove("one").expect("remove");
        assert!(!registry.exists("one"));
        registry.remove("one").expect("second remove is a no-op");
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = registry(dir.path()).load("ghost").unwrap_err();
        assert!(matches!(err, CorralError::NotFound { kind: "container", .. }));
    }

    #[test]
    fn list_skips_garbage_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = registry(dir.path());
        assert!(registry.list().expect("empty list").is_empty());

        for name in ["b", "a"] {
            registry
                .save(&ContainerRecord::running(name, name, 1, &["sh".into()]))
                .expect("save");
        }
        let broken = dir.path().join("run").join("containers").join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("config.json"), "{").unwrap();

        let names: Vec<_> = registry.list().expect("list").into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
