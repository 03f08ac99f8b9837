//! Encoding store: identity to embeddings, persisted as one JSON snapshot.
//!
//! The snapshot is always rewritten in full: serialize to a sibling temp file,
//! then rename over the previous snapshot. There is no incremental on-disk
//! format and no locking between concurrent writers.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("encoding snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to write encoding snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// In-memory mapping from identity name to its enrolled embeddings.
///
/// Iteration is in lexicographic identity order; that order is the
/// "store order" the matcher scans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encodings {
    identities: BTreeMap<String, Vec<Embedding>>,
}

impl Encodings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a mapping with `vectors` appended to `identity`'s record.
    ///
    /// Creates the identity if absent, so an empty `vectors` still registers
    /// the key.
    pub fn append(mut self, identity: &str, vectors: Vec<Embedding>) -> Self {
        self.identities
            .entry(identity.to_string())
            .or_default()
            .extend(vectors);
        self
    }

    pub fn get(&self, identity: &str) -> Option<&[Embedding]> {
        self.identities.get(identity).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Embedding])> {
        self.identities
            .iter()
            .map(|(name, vectors)| (name.as_str(), vectors.as_slice()))
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of embeddings across all identities.
    pub fn total_vectors(&self) -> usize {
        self.identities.values().map(Vec::len).sum()
    }
}

impl FromIterator<(String, Vec<Embedding>)> for Encodings {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Embedding>)>>(iter: I) -> Self {
        Self {
            identities: iter.into_iter().collect(),
        }
    }
}

/// On-disk snapshot envelope.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    /// SHA-256 hex of the compact JSON serialization of `identities`.
    checksum: String,
    identities: Encodings,
}

/// File-backed encoding store.
#[derive(Debug, Clone)]
pub struct EncodingStore {
    path: PathBuf,
}

impl EncodingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted mapping. A missing snapshot yields an empty mapping.
    pub fn load(&self) -> Result<Encodings, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no snapshot yet, starting empty");
                return Ok(Encodings::new());
            }
            Err(e) => return Err(self.corrupt(format!("unreadable: {e}"))),
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(format!("parse: {e}")))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(self.corrupt(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let actual = checksum(&snapshot.identities).map_err(|e| self.corrupt(e.to_string()))?;
        if actual != snapshot.checksum {
            return Err(self.corrupt(format!(
                "checksum mismatch: recorded {}, computed {actual}",
                snapshot.checksum
            )));
        }

        let encodings = snapshot.identities;

        tracing::debug!(
            path = %self.path.display(),
            identities = encodings.len(),
            vectors = encodings.total_vectors(),
            "loaded encodings"
        );
        Ok(encodings)
    }

    /// Replace the snapshot with `encodings`.
    pub fn save(&self, encodings: &Encodings) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            version: u32,
            checksum: String,
            identities: &'a Encodings,
        }

        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            checksum: checksum(encodings).map_err(|e| self.write_err(e.into()))?,
            identities: encodings,
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| self.write_err(e.into()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, &bytes).map_err(|e| self.write_err(e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(self.write_err(e));
        }

        tracing::info!(
            path = %self.path.display(),
            identities = encodings.len(),
            vectors = encodings.total_vectors(),
            "saved encodings"
        );
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }

    fn write_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Identities are a BTreeMap, so the compact serialization is canonical.
fn checksum(encodings: &Encodings) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(encodings)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn sample() -> Encodings {
        Encodings::new()
            .append("alice", vec![emb(&[0.1, 0.2]), emb(&[0.3, 0.4])])
            .append("bob", vec![emb(&[-1.0, 0.5])])
            .append("carol", vec![])
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.json"));
        let encodings = store.load().unwrap();
        assert!(encodings.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.json"));
        let encodings = sample();
        store.save(&encodings).unwrap();
        assert_eq!(store.load().unwrap(), encodings);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("nested/deeper/encodings.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.json"));
        store.save(&sample()).unwrap();

        let replacement = Encodings::new().append("dave", vec![emb(&[1.0])]);
        store.save(&replacement).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, replacement);
        assert!(loaded.get("alice").is_none());
        assert!(!dir.path().join("encodings.json.tmp").exists());
    }

    #[test]
    fn test_checksum_is_lowercase_sha256_hex() {
        // sha256 of the canonical empty map "{}".
        assert_eq!(
            checksum(&Encodings::new()).unwrap(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
        let digest = checksum(&sample()).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        std::fs::write(&path, b"\x80\x04not json").unwrap();
        let err = EncodingStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn test_tampered_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        let store = EncodingStore::new(&path);
        store.save(&sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("alice", "mallory")).unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[test]
    fn test_unwritable_path_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = EncodingStore::new(blocker.join("encodings.json"));
        let err = store.save(&sample()).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "got {err:?}");
    }

    #[test]
    fn test_append_empty_only_ensures_key() {
        let before = sample();
        let after = before.clone().append("alice", vec![]);
        assert_eq!(after, before);

        let added = before.clone().append("erin", vec![]);
        assert_eq!(added.get("erin"), Some(&[][..]));
        assert_eq!(added.total_vectors(), before.total_vectors());
    }

    #[test]
    fn test_append_extends_in_order() {
        let encodings = sample().append("alice", vec![emb(&[9.0, 9.0])]);
        let alice = encodings.get("alice").unwrap();
        assert_eq!(alice.len(), 3);
        assert_eq!(alice[2].values, vec![9.0, 9.0]);
        assert_eq!(encodings.get("bob").unwrap().len(), 1);
    }

    #[test]
    fn test_identity_names_are_case_sensitive() {
        let encodings = Encodings::new()
            .append("Alice", vec![emb(&[1.0])])
            .append("alice", vec![emb(&[2.0])]);
        assert_eq!(encodings.len(), 2);
    }
}
