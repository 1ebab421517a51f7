use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A uniquely named file that is removed when dropped.
///
/// The file is created with `create_new`, so two artifacts can never share a
/// path even when charts are rendered concurrently into the same directory.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn create(dir: &Path, extension: &str) -> io::Result<(Self, File)> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("out_{}.{extension}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((Self { path }, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to remove {}: {err}", self.path.display());
            }
        }
    }
}
