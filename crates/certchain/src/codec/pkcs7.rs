//! Degenerate ("certs-only") PKCS#7 SignedData writer.
//!
//! ```text
//! SignedData ::= SEQUENCE {
//!   version           INTEGER 1,
//!   digestAlgorithms  SET {},
//!   contentInfo       SEQUENCE { OID data },
//!   certificates  [0] IMPLICIT SEQUENCE OF Certificate,
//!   signerInfos       SET {} }
//! ```
//!
//! OpenSSL declares the certificate set as a SEQUENCE OF, so the
//! certificates keep chain order instead of DER set ordering. That is why
//! `cms::signed_data::SignedData`, whose `CertificateSet` is sorted, is not
//! used for the outer structure.

use cms::{
    content_info::{CmsVersion, ContentInfo},
    signed_data::{DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignerInfos},
};
use der::{
    asn1::{Any, ObjectIdentifier, SetOfVec},
    Decode, Encode, Sequence,
};

use crate::{
    certificate::Certificate,
    error::{ChainError, ChainResult},
};

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");

#[derive(Clone, Debug, Sequence)]
struct CertsOnlySignedData {
    version: CmsVersion,
    digest_algorithms: DigestAlgorithmIdentifiers,
    encap_content_info: EncapsulatedContentInfo,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    certificates: Vec<Any>,
    signer_infos: SignerInfos,
}

pub fn encode_certs_only(certificates: &[Certificate]) -> ChainResult<Vec<u8>> {
    let failed = |e: der::Error| ChainError::BundleBuildFailed(format!("PKCS7 encoding: {e}"));

    let certificates = certificates
        .iter()
        .map(|cert| Any::from_der(&cert.der))
        .collect::<Result<Vec<_>, _>>()
        .map_err(failed)?;

    let signed_data = CertsOnlySignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::from_der(&signed_data.to_der().map_err(failed)?).map_err(failed)?,
    };

    content_info.to_der().map_err(failed)
}

#[cfg(test)]
mod tests {
    use openssl::pkcs7::Pkcs7;

    use super::*;
    use crate::test_support;

    #[test]
    fn test_openssl_reads_encoded_bundle_in_order() {
        let fixture = test_support::TestChain::new();
        let certificates = fixture.certificates();

        let der = encode_certs_only(&certificates).unwrap();
        let pkcs7 = Pkcs7::from_der(&der).unwrap();
        let stack = pkcs7
            .signed()
            .and_then(|signed| signed.certificates())
            .unwrap();

        let decoded: Vec<Vec<u8>> = stack.iter().map(|c| c.to_der().unwrap()).collect();
        let expected: Vec<Vec<u8>> = certificates.iter().map(|c| c.der.to_vec()).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_signed_data_structure() {
        let fixture = test_support::TestChain::new();
        // root first: SET ordering would move it, SEQUENCE OF must not
        let certificates: Vec<_> = fixture.certificates().into_iter().rev().collect();

        let der = encode_certs_only(&certificates).unwrap();
        let content_info = ContentInfo::from_der(&der).unwrap();
        assert_eq!(content_info.content_type, ID_SIGNED_DATA);

        let signed_data =
            CertsOnlySignedData::from_der(&content_info.content.to_der().unwrap()).unwrap();
        assert_eq!(signed_data.version, CmsVersion::V1);
        assert!(signed_data.digest_algorithms.is_empty());
        assert!(signed_data.signer_infos.0.is_empty());
        assert_eq!(signed_data.encap_content_info.econtent_type, ID_DATA);

        let encoded: Vec<Vec<u8>> = signed_data
            .certificates
            .iter()
            .map(|c| c.to_der().unwrap())
            .collect();
        let expected: Vec<Vec<u8>> = certificates.iter().map(|c| c.der.to_vec()).collect();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn test_empty_bundle_is_well_formed() {
        let der = encode_certs_only(&[]).unwrap();
        let content_info = ContentInfo::from_der(&der).unwrap();

        assert_eq!(content_info.content_type, ID_SIGNED_DATA);
    }
}
