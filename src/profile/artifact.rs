//! Encoding of the four profile artifacts and their integrity checks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{PatchguardError, Result};

use super::manifest::ArtifactRef;

/// Stored form of the decision threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdArtifact {
    pub threshold: f32,
}

/// Encoded artifact bytes plus the reference recorded in the manifest.
pub struct EncodedArtifact {
    pub reference: ArtifactRef,
    pub data: Bytes,
}

impl EncodedArtifact {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        let reference = ArtifactRef {
            name: name.to_string(),
            size: data.len(),
            checksum: xxh3_64(&data),
        };
        Self {
            reference,
            data: Bytes::from(data),
        }
    }
}

/// Validate stored bytes against the manifest's reference.
pub fn verify(reference: &ArtifactRef, data: &[u8]) -> Result<()> {
    if data.len() != reference.size {
        return Err(PatchguardError::Validation(format!(
            "{}: expected {} bytes, found {}",
            reference.name,
            reference.size,
            data.len()
        )));
    }
    let actual = xxh3_64(data);
    if actual != reference.checksum {
        return Err(PatchguardError::ChecksumMismatch {
            expected: reference.checksum,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_detects_flipped_byte() {
        let artifact = EncodedArtifact::new("memory.bin", vec![1, 2, 3, 4]);
        verify(&artifact.reference, &artifact.data).unwrap();

        let tampered = [1u8, 2, 3, 5];
        let err = verify(&artifact.reference, &tampered).unwrap_err();
        assert_eq!(err.kind(), "checksum_mismatch");
    }

    #[test]
    fn verify_detects_truncation() {
        let artifact = EncodedArtifact::new("index.bin", vec![9; 16]);
        assert!(verify(&artifact.reference, &artifact.data[..8]).is_err());
    }
}
