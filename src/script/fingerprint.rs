/// Cache key generation for scripts
///
/// The fingerprint is a content address over:
/// - A format-version tag (bumped when the cache layout changes)
/// - The scaffold metadata policy (it changes what gets compiled)
/// - The full script bytes, metadata block included
use sha2::{Digest, Sha256};
use std::fmt;

use super::scaffold::MetadataPolicy;

/// Bump when the on-disk layout or build semantics change
const FORMAT_TAG: &[u8] = b"binscript-fingerprint-v1";

/// Hex-encoded SHA-256 digest identifying one cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex digest
    pub const LEN: usize = 64;

    /// Compute the fingerprint of a script
    pub fn compute(script_body: &[u8], policy: MetadataPolicy) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(FORMAT_TAG);
        hasher.update([0u8]);
        hasher.update(policy.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(script_body);

        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a cache directory name back into a fingerprint
    pub fn from_hex(name: &str) -> Option<Self> {
        let valid = name.len() == Self::LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &[u8] = b"// binscript-begin\n// script_src: a.c\n// build_cmd: make\n// target_bin: ./a\n// binscript-end\nint main() { return 0; }\n";

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::compute(SCRIPT, MetadataPolicy::Retain);
        let b = Fingerprint::compute(SCRIPT, MetadataPolicy::Retain);

        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), Fingerprint::LEN);
    }

    #[test]
    fn test_fingerprint_changes_with_any_byte() {
        let base = Fingerprint::compute(SCRIPT, MetadataPolicy::Retain);

        // Flip one byte inside the metadata block and one in the program body
        for index in [25, SCRIPT.len() - 3] {
            let mut changed = SCRIPT.to_vec();
            changed[index] ^= 0x01;
            assert_ne!(base, Fingerprint::compute(&changed, MetadataPolicy::Retain));
        }
    }

    #[test]
    fn test_fingerprint_depends_on_policy() {
        assert_ne!(
            Fingerprint::compute(SCRIPT, MetadataPolicy::Retain),
            Fingerprint::compute(SCRIPT, MetadataPolicy::Strip)
        );
    }

    #[test]
    fn test_from_hex() {
        let fp = Fingerprint::compute(b"", MetadataPolicy::Retain);
        assert_eq!(Fingerprint::from_hex(fp.as_str()), Some(fp.clone()));
        assert_eq!(fp.short().len(), 12);

        assert!(Fingerprint::from_hex(".locks").is_none());
        assert!(Fingerprint::from_hex(&"G".repeat(64)).is_none());
        assert!(Fingerprint::from_hex(&fp.as_str()[..63]).is_none());
    }
}
