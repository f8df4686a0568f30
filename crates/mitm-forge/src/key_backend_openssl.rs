use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;

use crate::backend::KeyBackend;
use crate::certificate_spec::KeySpec;
use crate::config::KeyAlgorithm;
use crate::errors::BackendError;
use crate::handles::Keypair;
use crate::paths::write_new_file;

const PRIVATE_KEY_MODE: u32 = 0o600;

/// Stores keys as PKCS#8 PEM files, generating them with openssl when absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpensslKeyBackend;

impl KeyBackend for OpensslKeyBackend {
    fn load_or_create_key(&self, spec: &KeySpec, path: &Path) -> Result<Keypair, BackendError> {
        match fs::read(path) {
            Ok(pem) => load_stored_key(spec, path, &pem),
            Err(error) if error.kind() == ErrorKind::NotFound => create_and_persist_key(spec, path),
            Err(error) => Err(BackendError::io(path, error)),
        }
    }
}

fn load_stored_key(spec: &KeySpec, path: &Path, pem: &[u8]) -> Result<Keypair, BackendError> {
    let private_key = PKey::private_key_from_pem(pem).map_err(|error| {
        BackendError::InvalidMaterial(format!(
            "failed to parse private key {}: {error}",
            path.display()
        ))
    })?;
    let keypair = Keypair::from_private_key(spec.description.clone(), private_key)?;
    if keypair.algorithm() != spec.algorithm {
        tracing::warn!(
            description = %spec.description,
            path = %path.display(),
            stored = %keypair.algorithm(),
            configured = %spec.algorithm,
            "stored keypair does not match configured keyspec, using stored key"
        );
    }
    tracing::debug!(
        description = %spec.description,
        path = %path.display(),
        algorithm = %keypair.algorithm(),
        "loaded stored keypair"
    );
    Ok(keypair)
}

fn create_and_persist_key(spec: &KeySpec, path: &Path) -> Result<Keypair, BackendError> {
    tracing::info!(
        description = %spec.description,
        path = %path.display(),
        algorithm = %spec.algorithm,
        "generating keypair"
    );
    let private_key = generate_private_key(spec.algorithm)?;
    let pem = private_key.private_key_to_pem_pkcs8()?;
    // a key the signer cannot load must never reach disk
    let keypair = Keypair::from_private_key(spec.description.clone(), private_key)?;
    write_new_file(path, &pem, Some(PRIVATE_KEY_MODE))?;
    Ok(keypair)
}

fn generate_private_key(algorithm: KeyAlgorithm) -> Result<PKey<Private>, BackendError> {
    let private_key = match algorithm {
        KeyAlgorithm::Rsa { modulus_bits } => PKey::from_rsa(Rsa::generate(modulus_bits)?)?,
        KeyAlgorithm::Ecc { curve } => {
            let mut group = EcGroup::from_curve_name(curve.nid())?;
            group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
            PKey::from_ec_key(EcKey::generate(&group)?)?
        }
    };
    Ok(private_key)
}
