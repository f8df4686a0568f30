//! The two certificate extensions rcgen has no builder for.

use rcgen::CustomExtension;
use yasna::models::ObjectIdentifier;
use yasna::Tag;

use crate::errors::BackendError;

/// id-pe-authorityInfoAccess
const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];
const OID_AD_OCSP: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 1];
/// netscape-comment, used to tag forged certificates.
const OID_NETSCAPE_COMMENT: &[u64] = &[2, 16, 840, 1, 113730, 1, 13];

// GeneralName uniformResourceIdentifier
const GENERAL_NAME_URI: u64 = 6;

/// Authority information access with a single OCSP responder location.
pub(crate) fn ocsp_responder_extension(uri: &str) -> Result<CustomExtension, BackendError> {
    Ok(CustomExtension::from_oid_content(
        OID_AUTHORITY_INFO_ACCESS,
        authority_info_access_ocsp(uri)?,
    ))
}

pub(crate) fn forged_mark_extension(text: &str) -> Result<CustomExtension, BackendError> {
    Ok(CustomExtension::from_oid_content(
        OID_NETSCAPE_COMMENT,
        ia5_string(text)?,
    ))
}

fn authority_info_access_ocsp(uri: &str) -> Result<Vec<u8>, BackendError> {
    let uri = require_ia5(uri)?;
    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_sequence(|writer| {
                writer
                    .next()
                    .write_oid(&ObjectIdentifier::from_slice(OID_AD_OCSP));
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(GENERAL_NAME_URI), |writer| {
                        writer.write_ia5_string(uri)
                    });
            });
        });
    }))
}

fn ia5_string(text: &str) -> Result<Vec<u8>, BackendError> {
    let text = require_ia5(text)?;
    Ok(yasna::construct_der(|writer| writer.write_ia5_string(text)))
}

// yasna panics on non-ASCII IA5String input
fn require_ia5(text: &str) -> Result<&str, BackendError> {
    if !text.is_ascii() {
        return Err(BackendError::InvalidMaterial(format!(
            "{text:?} is not representable as IA5String"
        )));
    }
    Ok(text)
}
