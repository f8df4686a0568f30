use std::path::PathBuf;

use crate::backend::KeyBackend;
use crate::certificate_spec::{
    KeySpec, CLIENT_KEY_DESCRIPTION, ROOT_KEY_DESCRIPTION, SERVER_KEY_DESCRIPTION,
};
use crate::config::KeyAlgorithm;
use crate::errors::InitError;
use crate::handles::Keypair;
use crate::paths::{ensure_directory_exists, ConfigPaths};

/// The three long-lived keypairs of one proxy instance.
#[derive(Debug)]
pub struct KeyStore {
    root: Keypair,
    server: Keypair,
    client: Keypair,
}

impl KeyStore {
    /// Loads `root.key`, `server.key` and `client.key`, creating any that are
    /// missing. Either all three are available or initialization fails.
    pub fn initialize(
        paths: &ConfigPaths,
        algorithm: KeyAlgorithm,
        backend: &dyn KeyBackend,
    ) -> Result<Self, InitError> {
        ensure_directory_exists(paths.dir()).map_err(|source| InitError::ConfigDirectory {
            path: paths.dir().to_path_buf(),
            source,
        })?;

        let root = load_key(backend, algorithm, ROOT_KEY_DESCRIPTION, paths.root_key())?;
        let server = load_key(backend, algorithm, SERVER_KEY_DESCRIPTION, paths.server_key())?;
        let client = load_key(backend, algorithm, CLIENT_KEY_DESCRIPTION, paths.client_key())?;
        Ok(Self {
            root,
            server,
            client,
        })
    }

    pub fn root_key(&self) -> Keypair {
        self.root.clone()
    }

    pub fn server_key(&self) -> Keypair {
        self.server.clone()
    }

    pub fn client_key(&self) -> Keypair {
        self.client.clone()
    }

    pub(crate) fn root_key_ref(&self) -> &Keypair {
        &self.root
    }

    pub(crate) fn server_key_ref(&self) -> &Keypair {
        &self.server
    }
}

fn load_key(
    backend: &dyn KeyBackend,
    algorithm: KeyAlgorithm,
    description: &str,
    path: PathBuf,
) -> Result<Keypair, InitError> {
    let spec = KeySpec::new(algorithm, description);
    backend
        .load_or_create_key(&spec, &path)
        .map_err(|source| {
            tracing::error!(
                description,
                path = %path.display(),
                error = %source,
                "unable to load or create private keypair"
            );
            InitError::Key {
                description: description.to_string(),
                path,
                source,
            }
        })
}
