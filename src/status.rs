use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::Stage;
use crate::error::SpiceError;
use crate::store::write_bytes_atomic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCounters {
    pub gene_count: usize,
    pub transcript_count: usize,
    pub protein_count: usize,
    pub collected_sequences_count: usize,
    pub fas_scored_sequences_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub species: String,
    pub taxon_id: u32,
    pub release: String,
    #[serde(flatten)]
    pub counters: LibraryCounters,
}

/// Persisted build state of a library (`info.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub spice_version: String,
    pub init_date: String,
    pub last_edit: String,
    #[serde(default)]
    pub commandline_args: BTreeMap<String, String>,
    pub info: LibraryInfo,
    status: BTreeMap<Stage, bool>,
}

impl LibraryStatus {
    pub fn new(species: &str, taxon_id: u32, release: &str) -> Self {
        let today = today();
        Self {
            spice_version: env!("CARGO_PKG_VERSION").to_string(),
            init_date: today.clone(),
            last_edit: today,
            commandline_args: BTreeMap::new(),
            info: LibraryInfo {
                species: species.to_string(),
                taxon_id,
                release: release.to_string(),
                counters: LibraryCounters::default(),
            },
            status: Stage::ALL.iter().map(|stage| (*stage, false)).collect(),
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, SpiceError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| SpiceError::Filesystem(format!("read {path}: {err}")))?;
        let mut status: LibraryStatus = serde_yaml::from_str(&content)
            .map_err(|err| SpiceError::Filesystem(format!("parse {path}: {err}")))?;
        for stage in Stage::ALL {
            status.status.entry(stage).or_insert(false);
        }
        Ok(status)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), SpiceError> {
        let content =
            serde_yaml::to_string(self).map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, content.as_bytes())
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.status.get(&stage).copied().unwrap_or(false)
    }

    pub fn set(&mut self, stage: Stage, done: bool) {
        self.status.insert(stage, done);
    }

    /// A stage may run only once every earlier stage is complete.
    pub fn can_run(&self, stage: Stage) -> bool {
        Stage::ALL[..stage.index()]
            .iter()
            .all(|earlier| self.is_complete(*earlier))
    }

    pub fn first_pending(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| !self.is_complete(*stage))
    }

    pub fn all_complete(&self) -> bool {
        self.first_pending().is_none()
    }

    pub fn flags(&self) -> Vec<(Stage, bool)> {
        Stage::ALL
            .iter()
            .map(|stage| (*stage, self.is_complete(*stage)))
            .collect()
    }

    pub fn counters(&self) -> LibraryCounters {
        self.info.counters
    }

    pub fn set_counters(&mut self, counters: LibraryCounters) {
        self.info.counters = counters;
    }

    pub fn touch(&mut self) {
        self.last_edit = today();
    }
}

fn today() -> String {
    chrono::Local::now().date_naive().to_string()
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn yaml_roundtrip_keeps_stage_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("info.yaml")).unwrap();
        let mut status = LibraryStatus::new("homo_sapiens", 9606, "110");
        status.set(Stage::IdCollection, true);
        status.save(&path).unwrap();

        let text = fs::read_to_string(path.as_std_path()).unwrap();
        let first = text.find("01_id_collection").unwrap();
        let last = text.find("10_fas_scoring").unwrap();
        assert!(first < last);

        let loaded = LibraryStatus::load(&path).unwrap();
        assert_eq!(loaded, status);
        assert_eq!(loaded.first_pending(), Some(Stage::SequenceCollection));
    }

    #[test]
    fn stage_requires_predecessors() {
        let mut status = LibraryStatus::new("mus_musculus", 10090, "110");
        assert!(status.can_run(Stage::IdCollection));
        assert!(!status.can_run(Stage::SequenceCollection));
        status.set(Stage::IdCollection, true);
        assert!(status.can_run(Stage::SequenceCollection));
        assert!(!status.can_run(Stage::SmallProteinRemoval));
    }
}
