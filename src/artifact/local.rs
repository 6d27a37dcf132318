//! Local filesystem artifact storage, CBOR-encoded.

use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::artifact::Artifact;
use crate::error::ArtifactError;

/// An artifact stored as one CBOR file on the local filesystem.
///
/// This is what a [`ArtifactSpec::Path`](crate::ArtifactSpec::Path) template
/// resolves to. Parent directories are created on `dump`.
#[derive(Debug, Clone)]
pub struct FileArtifact {
    path: Utf8PathBuf,
}

impl FileArtifact {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Artifact for FileArtifact {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn size(&self) -> Result<u64, ArtifactError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn last_modified(&self) -> Result<SystemTime, ArtifactError> {
        Ok(fs::metadata(&self.path)?.modified()?)
    }

    fn load(&self) -> Result<Value, ArtifactError> {
        let file = fs::File::open(&self.path)?;
        Ok(ciborium::de::from_reader(std::io::BufReader::new(file))?)
    }

    fn dump(&self, value: &Value) -> Result<(), ArtifactError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut buffer = Vec::new();
        ciborium::ser::into_writer(value, &mut buffer)?;
        fs::write(&self.path, buffer)?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.to_string()
    }
}
