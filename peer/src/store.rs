use common::messages::ClientId;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

const CLIENT_ID_FILE: &str = "client_id.txt";

/// Persistence seam for the relay-assigned client id, so a peer reconnects
/// under the same identity across restarts.
pub trait ClientIdStore: Send + 'static {
    fn load(&self) -> Option<ClientId>;
    fn save(&self, id: ClientId) -> io::Result<()>;
}

/// Stores the id as decimal text in `client_id.txt` under the data directory.
pub struct FsClientIdStore {
    dir: PathBuf,
}

impl FsClientIdStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(CLIENT_ID_FILE)
    }
}

impl ClientIdStore for FsClientIdStore {
    fn load(&self) -> Option<ClientId> {
        let text = fs::read_to_string(self.path()).ok()?;
        text.trim().parse().ok()
    }

    fn save(&self, id: ClientId) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(), id.to_string())
    }
}
