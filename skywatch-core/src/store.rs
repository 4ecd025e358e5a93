//! String key-value persistence underneath the offline cache, queue and logs.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// One file per key under a directory. Writes go to a temp file and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

const EXTENSION: &str = "json";

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_key(key)))
    }
}

/// Keys may hold `:` and `,`; anything outside `[A-Za-z0-9._-]` is hex-escaped.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", self.dir.display()))?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, value)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&format!(".{EXTENSION}")) else { continue };
            if let Some(key) = decode_key(stem).filter(|k| k.starts_with(prefix)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_roundtrips() {
        let key = "cache:current:openweather:52.52,13.40";
        let encoded = encode_key(key);
        assert!(!encoded.contains(':'));
        assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        assert!(decode_key("%G1").is_none());
    }

    #[tokio::test]
    async fn memory_store_basics() {
        let store = MemoryStore::new();
        store.set("a:1", "x").await.unwrap();
        store.set("a:2", "y").await.unwrap();
        store.set("b:1", "z").await.unwrap();

        assert_eq!(store.get("a:1").await.unwrap().as_deref(), Some("x"));
        assert_eq!(store.keys("a:").await.unwrap(), vec!["a:1", "a:2"]);

        store.remove("a:1").await.unwrap();
        assert!(store.get("a:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));

        assert!(store.keys("").await.unwrap().is_empty());
        store.set("queue:actions", "[]").await.unwrap();
        store.set("cache:current:x:1.00,2.00", "{}").await.unwrap();
        // last write wins
        store.set("queue:actions", "[1]").await.unwrap();

        let reopened = FileStore::new(dir.path().join("data"));
        assert_eq!(reopened.get("queue:actions").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(reopened.keys("cache:").await.unwrap(), vec!["cache:current:x:1.00,2.00"]);

        reopened.remove("queue:actions").await.unwrap();
        reopened.remove("queue:actions").await.unwrap();
        assert!(reopened.get("queue:actions").await.unwrap().is_none());
    }
}
