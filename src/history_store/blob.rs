// Blob version prefix helpers. [version: u8][wincode payload].
// A blob with an unknown version (or no payload) is treated as absent by the caller.

pub(super) const BLOB_VERSION: u8 = 1;

pub(super) fn with_version_prefix(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(BLOB_VERSION);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte, or `None` when the version is not ours.
pub(super) fn versioned_payload(bytes: &[u8]) -> Option<&[u8]> {
    match bytes.split_first() {
        Some((&BLOB_VERSION, rest)) => Some(rest),
        _ => None,
    }
}
