//! NOCSRElements envelope (11.18.5.6): an anonymous structure carrying the
//! PKCS#10 request under context tag 1 and the CSR nonce under tag 2.

use crate::{
    constants::{CSR_ELEMENTS_TAG_CSR, CSR_ELEMENTS_TAG_NONCE},
    error::{IssuerError, IssuerResult},
    tlv::{Encoder, TagControl, TlvReader, TlvType},
};

/// Return the CSR carried in `envelope`, borrowed from it.
pub fn extract_csr(envelope: &[u8]) -> IssuerResult<&[u8]> {
    let mut reader = TlvReader::new(envelope);
    extract_csr_from_reader(&mut reader)
}

/// Like [`extract_csr`], for a reader that may already be positioned on the
/// envelope structure. An unpositioned reader is advanced first.
pub fn extract_csr_from_reader<'a>(reader: &mut TlvReader<'a>) -> IssuerResult<&'a [u8]> {
    let envelope = match reader.element() {
        Some(element) => *element,
        None => reader
            .next()?
            .ok_or_else(|| IssuerError::MalformedEnvelope("empty envelope".to_string()))?,
    };
    if envelope.tag != TagControl::Anonymous || envelope.tlv_type != TlvType::Structure {
        return Err(IssuerError::MalformedEnvelope(
            "envelope is not an anonymous structure".to_string(),
        ));
    }

    reader.enter_container()?;
    let csr = reader
        .seek(TagControl::ContextSpecific(CSR_ELEMENTS_TAG_CSR))?
        .ok_or_else(|| IssuerError::MalformedEnvelope("no CSR element".to_string()))?;
    let csr = csr.as_bytes().ok_or_else(|| {
        IssuerError::MalformedEnvelope("CSR element is not a byte string".to_string())
    })?;
    // The structure must be complete even though the rest is unused
    reader.exit_container()?;

    Ok(csr)
}

/// Build a NOCSRElements envelope, as a commissionee does in its CSRResponse.
pub fn encode_csr_elements(csr: &[u8], nonce: Option<&[u8]>) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.start_structure(TagControl::Anonymous);
    encoder.put_bytes(TagControl::ContextSpecific(CSR_ELEMENTS_TAG_CSR), csr);
    if let Some(nonce) = nonce {
        encoder.put_bytes(TagControl::ContextSpecific(CSR_ELEMENTS_TAG_NONCE), nonce);
    }
    encoder.end_container();
    encoder.inner()
}
