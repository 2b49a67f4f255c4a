use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::error::SpiceError;

pub const MANIFEST_FILE: &str = "paths.json";

/// Logical names of every file and directory inside a library root.
const LAYOUT: [(&str, &str); 11] = [
    ("info", "info.yaml"),
    ("fas_data", "fas_data"),
    ("fas_scores", "fas_data/fas_scores.json"),
    ("fas_temp", "fas_data/temp"),
    ("fas_annotation", "fas_data/annotation"),
    ("transcript_data", "transcript_data"),
    ("transcript_info", "transcript_data/transcript_info.json"),
    ("transcript_seq", "transcript_data/sequences.json"),
    ("transcript_fasta", "transcript_data/transcript_set.fasta"),
    ("transcript_pairings", "transcript_data/transcript_pairings.json"),
    ("transcript_ids", "transcript_data/phyloprofile_ids.tsv"),
];

const DIRECTORIES: [&str; 4] = ["fas_data", "fas_temp", "fas_annotation", "transcript_data"];

/// Paths manifest of one library: logical name -> path relative to the root.
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    root: Utf8PathBuf,
    entries: BTreeMap<String, Utf8PathBuf>,
}

impl LibraryPaths {
    pub fn library_name(species: &str, release: &str) -> String {
        format!("spice_lib_{species}_{release}")
    }

    pub fn new(root: Utf8PathBuf) -> Self {
        let entries = LAYOUT
            .iter()
            .map(|(name, rel)| ((*name).to_string(), Utf8PathBuf::from(*rel)))
            .collect();
        Self { root, entries }
    }

    /// Creates the directory tree and writes the manifest.
    pub fn create(root: Utf8PathBuf) -> Result<Self, SpiceError> {
        let paths = Self::new(root);
        fs::create_dir_all(paths.root.as_std_path())
            .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        for name in DIRECTORIES {
            fs::create_dir_all(paths.get(name)?.as_std_path())
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        }
        let mut manifest = BTreeMap::new();
        manifest.insert("root".to_string(), paths.root.to_string());
        for (name, rel) in &paths.entries {
            manifest.insert(name.clone(), rel.to_string());
        }
        write_json_atomic(&paths.root.join(MANIFEST_FILE), &manifest)?;
        Ok(paths)
    }

    /// Reads the manifest of an existing library. The root recorded inside the
    /// manifest is ignored so that libraries can be moved.
    pub fn open(root: &Utf8Path) -> Result<Self, SpiceError> {
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.as_std_path().exists() {
            return Err(SpiceError::MissingLibrary(root.to_string()));
        }
        let mut manifest: BTreeMap<String, String> = read_json(&manifest_path)?;
        manifest.remove("root");
        let mut paths = Self::new(root.to_path_buf());
        for (name, rel) in manifest {
            paths.entries.insert(name, Utf8PathBuf::from(rel));
        }
        Ok(paths)
    }

    pub fn exists(root: &Utf8Path) -> bool {
        root.join(MANIFEST_FILE).as_std_path().exists()
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Result<Utf8PathBuf, SpiceError> {
        self.entries
            .get(name)
            .map(|rel| self.root.join(rel))
            .ok_or_else(|| SpiceError::Filesystem(format!("paths manifest has no entry {name}")))
    }

    pub fn info(&self) -> Result<Utf8PathBuf, SpiceError> {
        self.get("info")
    }

    pub fn transcript_info(&self) -> Result<Utf8PathBuf, SpiceError> {
        self.get("transcript_info")
    }

    pub fn transcript_seq(&self) -> Result<Utf8PathBuf, SpiceError> {
        self.get("transcript_seq")
    }

    pub fn fas_scores(&self) -> Result<Utf8PathBuf, SpiceError> {
        self.get("fas_scores")
    }

    pub fn clear(root: &Utf8Path) -> Result<(), SpiceError> {
        if root.as_std_path().exists() {
            fs::remove_dir_all(root.as_std_path())
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SpiceError> {
    let parent = path
        .parent()
        .ok_or_else(|| SpiceError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".spice-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), SpiceError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, SpiceError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| SpiceError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content)
        .map_err(|err| SpiceError::Filesystem(format!("parse {path}: {err}")))
}

/// Copies `source` over `dest` through a temp file in the destination directory.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), SpiceError> {
    let parent = dest
        .parent()
        .ok_or_else(|| SpiceError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".spice-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
    Ok(())
}
