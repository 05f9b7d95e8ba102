// src/storage/file.rs
use super::{join_logical, Storage, StorageError};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub struct FileStorage {
    root: PathBuf,
    make_root: bool,
    make_dirs: bool,
    dir_mode: u32,
    file_mode: u32,
}

impl FileStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            make_root: true,
            make_dirs: true,
            dir_mode: 0o755,
            file_mode: 0o600,
        }
    }

    #[cfg(test)]
    pub fn make_root(mut self, make_root: bool) -> Self {
        self.make_root = make_root;
        self
    }

    #[cfg(test)]
    pub fn make_dirs(mut self, make_dirs: bool) -> Self {
        self.make_dirs = make_dirs;
        self
    }

    fn check_make_dir(&self, directory: &Path, make_it: bool) -> io::Result<()> {
        if directory.is_dir() {
            return Ok(());
        }
        if !make_it {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "directory {} does not exist and creating it is disabled",
                    directory.display()
                ),
            ));
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.dir_mode);
        }
        builder.create(directory)
    }

    fn write_file(&self, full_path: &Path, content: &[u8]) -> io::Result<()> {
        self.check_make_dir(&self.root, self.make_root)?;
        let dir = full_path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        self.check_make_dir(dir, self.make_dirs)?;

        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let result = fs::write(&temp_path, content)
            .and_then(|_| self.set_file_mode(&temp_path))
            .and_then(|_| fs::rename(&temp_path, full_path));
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    #[cfg(unix)]
    fn set_file_mode(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(self.file_mode))
    }

    #[cfg(not(unix))]
    fn set_file_mode(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for FileStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = join_logical(&self.root, path)?;
        match fs::read(&full_path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(full_path.display().to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let full_path = join_logical(&self.root, path)?;
        self.write_file(&full_path, content)
            .map_err(|source| StorageError::WriteError {
                path: full_path.display().to_string(),
                source,
            })
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
