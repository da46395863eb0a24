use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;

use super::MediaFile;

/// stable identity of a local file across attempts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// hash of name, size, content type and modification time
    pub fn of(file: &MediaFile) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file.name.as_bytes());
        hasher.update(b"|");
        hasher.update(file.size().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(file.content_type.as_bytes());
        hasher.update(b"|");
        hasher.update(file.modified.timestamp_millis().to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// remembers which server-side upload belongs to which local file
pub trait ResumeStore: Send + Sync {
    fn find(&self, fingerprint: &Fingerprint) -> Option<String>;
    fn save(&self, fingerprint: &Fingerprint, location: String);
    fn remove(&self, fingerprint: &Fingerprint);
}

#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    entries: DashMap<Fingerprint, String>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn find(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.entries.get(fingerprint).map(|entry| entry.value().clone())
    }

    fn save(&self, fingerprint: &Fingerprint, location: String) {
        self.entries.insert(fingerprint.clone(), location);
    }

    fn remove(&self, fingerprint: &Fingerprint) {
        self.entries.remove(fingerprint);
    }
}
