//! Integrity Verifier: SHA-256 over installation media.

use crate::error::BuildError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Sentinel for media whose checksum has not been pinned yet.
pub const PLACEHOLDER_CHECKSUM: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// True when `expected` carries no real checksum. Verification is skipped for
/// these and the computed value is logged instead.
pub fn is_placeholder(expected: &str) -> bool {
    let value = normalize(expected);
    value.is_empty()
        || value == PLACEHOLDER_CHECKSUM
        || value == "unknown"
        || value == "placeholder"
}

/// Lower-case, trimmed, with an optional `sha256:` prefix removed.
fn normalize(checksum: &str) -> String {
    let value = checksum.trim().to_lowercase();
    match value.strip_prefix("sha256:") {
        Some(rest) => rest.to_string(),
        None => value,
    }
}

/// Stream the file through SHA-256 and return the lower-case hex digest.
pub fn compute_sha256(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify `path` against `expected`, returning the computed digest.
///
/// Comparison ignores case and surrounding whitespace. A placeholder
/// expectation always passes, with the computed digest logged for pinning.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<String, BuildError> {
    let actual = compute_sha256(path).map_err(|e| BuildError::io(path, e))?;

    if is_placeholder(expected) {
        log::warn!(
            "[Checksum] No pinned checksum for {}; computed sha256 = {}",
            path.display(),
            actual
        );
        return Ok(actual);
    }

    let expected = normalize(expected);
    if actual != expected {
        return Err(BuildError::ChecksumMismatch {
            path: path.display().to_string(),
            expected,
            actual,
        });
    }

    log::debug!("[Checksum] Verified {} ({})", path.display(), actual);
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HELLO_SHA256: &str = "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447";

    #[test]
    fn test_compute_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.iso");
        fs::write(&path, b"hello world\n").unwrap();
        assert_eq!(compute_sha256(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.iso");
        fs::write(&path, b"hello world\n").unwrap();
        assert!(verify_checksum(&path, &HELLO_SHA256.to_uppercase()).is_ok());
        assert!(verify_checksum(&path, &format!("sha256:{}", HELLO_SHA256)).is_ok());
    }

    #[test]
    fn test_single_byte_corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.iso");
        fs::write(&path, b"hello world\n").unwrap();
        let original = compute_sha256(&path).unwrap();

        fs::write(&path, b"hello World\n").unwrap();
        let corrupted = compute_sha256(&path).unwrap();
        assert_ne!(original, corrupted);

        match verify_checksum(&path, &original) {
            Err(BuildError::ChecksumMismatch { expected, actual, .. }) => {
                assert_eq!(expected, original);
                assert_eq!(actual, corrupted);
            }
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholder_skips_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media.iso");
        fs::write(&path, b"anything").unwrap();
        assert!(is_placeholder(PLACEHOLDER_CHECKSUM));
        assert!(is_placeholder(""));
        assert!(!is_placeholder(HELLO_SHA256));
        assert!(verify_checksum(&path, PLACEHOLDER_CHECKSUM).is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = verify_checksum(Path::new("/nonexistent/media.iso"), HELLO_SHA256).unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
    }
}
