use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

/// Durable byte sink for received files and the roster snapshot.
pub trait Storage: Send + Sync {
    /// Appends `bytes` to the named file, creating it if absent.
    fn append(&self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Replaces the named file's contents.
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Filesystem storage rooted at the relay's data directory.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// File names come off the wire, so anything that could resolve outside
    /// the data directory is rejected
    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl Storage for FsStorage {
    fn append(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.resolve(name)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(bytes)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.resolve(name)?;
        fs::write(path, bytes)
    }
}
