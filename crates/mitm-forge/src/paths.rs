use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::errors::BackendError;

pub const ROOT_CERTIFICATE_FILE: &str = "root.crt";
pub const ROOT_KEY_FILE: &str = "root.key";
pub const SERVER_KEY_FILE: &str = "server.key";
pub const CLIENT_KEY_FILE: &str = "client.key";

/// Locations of the persisted material inside one configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn root_certificate(&self) -> PathBuf {
        self.dir.join(ROOT_CERTIFICATE_FILE)
    }

    pub fn root_key(&self) -> PathBuf {
        self.dir.join(ROOT_KEY_FILE)
    }

    pub fn server_key(&self) -> PathBuf {
        self.dir.join(SERVER_KEY_FILE)
    }

    pub fn client_key(&self) -> PathBuf {
        self.dir.join(CLIENT_KEY_FILE)
    }
}

pub fn ensure_directory_exists(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;
    if !path.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} is not a directory", path.display()),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_parent_exists(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Writes `contents` to a file that must not exist yet. `mode` applies on
/// Unix only.
pub(crate) fn write_new_file(
    path: &Path,
    contents: &[u8],
    mode: Option<u32>,
) -> Result<(), BackendError> {
    ensure_parent_exists(path).map_err(|error| BackendError::io(path, error))?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = options
        .open(path)
        .map_err(|error| BackendError::io(path, error))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|error| BackendError::io(path, error))
}
