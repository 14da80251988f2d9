//! File identity hashing
//!
//! A file's identity is derived from its vault path and last-modified time,
//! so the same path at the same mtime always maps to the same ledger row.

use crate::types::FileRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a file hash in hex characters
pub const HASH_LEN: usize = 12;

/// Truncated SHA-256 identity of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHash(String);

impl FileHash {
    /// Accept an externally supplied hash after shape validation
    pub fn parse(s: &str) -> Option<Self> {
        validate_hash(s).then(|| FileHash(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of `path + modified_ms`, lowercase hex, first 12 characters
pub fn generate_file_hash(file: &FileRef) -> FileHash {
    let mut hasher = Sha256::new();
    hasher.update(file.path.to_string_lossy().as_bytes());
    hasher.update(file.modified_ms.to_string().as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    FileHash(hex[..HASH_LEN].to_string())
}

/// Shape check only: 12 lowercase hex characters
pub fn validate_hash(s: &str) -> bool {
    s.len() == HASH_LEN && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_valid() {
        let file = FileRef::new("Inbox/note.md", 1_700_000_000_000, 10);
        let a = generate_file_hash(&file);
        let b = generate_file_hash(&file.clone());
        assert_eq!(a, b);
        assert!(validate_hash(a.as_str()));
    }

    #[test]
    fn test_size_does_not_affect_identity() {
        let a = generate_file_hash(&FileRef::new("Inbox/note.md", 5, 10));
        let b = generate_file_hash(&FileRef::new("Inbox/note.md", 5, 999));
        assert_eq!(a, b);
    }

    #[test]
    fn test_mtime_or_path_change_changes_hash() {
        let base = generate_file_hash(&FileRef::new("Inbox/note.md", 5, 0));
        assert_ne!(base, generate_file_hash(&FileRef::new("Inbox/note.md", 6, 0)));
        assert_ne!(base, generate_file_hash(&FileRef::new("Inbox/other.md", 5, 0)));
    }

    #[test]
    fn test_known_digest_prefix() {
        // sha256("a.md0")
        let expected: String = Sha256::digest(b"a.md0")
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        let hash = generate_file_hash(&FileRef::new("a.md", 0, 0));
        assert_eq!(hash.as_str(), &expected[..12]);
    }

    #[test]
    fn test_validate_hash_shape() {
        assert!(validate_hash("0123456789ab"));
        assert!(!validate_hash("0123456789a"));
        assert!(!validate_hash("0123456789abc"));
        assert!(!validate_hash("0123456789AB"));
        assert!(!validate_hash("zzzzzzzzzzzz"));
        assert!(FileHash::parse("not-a-hash").is_none());
        assert_eq!(FileHash::parse("0123456789ab").unwrap().to_string(), "0123456789ab");
    }
}
