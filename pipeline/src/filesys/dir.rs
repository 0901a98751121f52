//! Directory operations

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;

use crate::errors::ShipyardError;
use crate::filesys::file::File;

/// Directory of JSON records
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Files in the directory with the given extension, sorted by name
    ///
    /// A directory that does not exist yet holds no files.
    pub async fn list_files(&self, extension: &str) -> Result<Vec<PathBuf>, ShipyardError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file()
                && path.extension().is_some_and(|ext| ext == extension)
            {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_filters_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Dir::new(tmp.path().join("records"));
        assert!(dir.list_files("json").await.unwrap().is_empty());

        dir.file("b.json").write_atomic(b"{}").await.unwrap();
        dir.file("a.json").write_atomic(b"{}").await.unwrap();
        dir.file("notes.txt").write_atomic(b"x").await.unwrap();
        std::fs::create_dir_all(tmp.path().join("records").join("nested.json")).unwrap();

        let files = dir.list_files("json").await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));
    }
}
