//! Local filesystem adapter. Writes are atomic (temp file + rename in the
//! destination directory) and blobs can optionally be gzip-compressed;
//! reads sniff the gzip magic so compressed and plain blobs can coexist.

use crate::{classify_io, Result, StorageAdapter, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct FsAdapter {
    root: PathBuf,
    compress: bool,
    tmp_counter: AtomicU64,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), compress: false, tmp_counter: AtomicU64::new(0) }
    }

    /// Enable per-blob gzip compression for subsequent writes.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Map a storage key to a filesystem path, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if rel.is_absolute()
            || rel.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::Permanent(format!("invalid storage key {key:?}")));
        }
        Ok(self.root.join(rel))
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !self.compress {
            return Ok(data.to_vec());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| StorageError::Transient(format!("gzip encode: {e}")))
    }

    fn decode(data: Vec<u8>) -> Result<Bytes> {
        if data.len() >= 2 && data[0..2] == GZIP_MAGIC {
            let mut decoder = GzDecoder::new(&data[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| StorageError::Transient(format!("gzip decode: {e}")))?;
            Ok(Bytes::from(out))
        } else {
            Ok(Bytes::from(data))
        }
    }
}

#[async_trait]
impl StorageAdapter for FsAdapter {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(64)
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(Self::decode(data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(classify_io("read", e)),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io("create dirs", e))?;
        }
        let encoded = self.encode(&data)?;
        // Write to a sibling temp file then rename so readers never see a
        // torn blob.
        let tmp = full.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, &encoded).await.map_err(|e| classify_io("write", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &full).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(classify_io("rename", e));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(classify_io("delete", e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // The prefix may end mid-filename, so walk from the deepest
        // existing directory at or above it and filter.
        let start = {
            let full = self.root.join(prefix);
            if prefix.is_empty() || prefix.ends_with('/') {
                full
            } else {
                full.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone())
            }
        };
        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(classify_io("list", e)),
            };
            while let Some(entry) =
                entries.next_entry().await.map_err(|e| classify_io("list", e))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| classify_io("list", e))?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_after_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        adapter.write("entities/nouns/ab/x/metadata.json", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(
            adapter.read("entities/nouns/ab/x/metadata.json").await.unwrap(),
            Some(Bytes::from_static(b"{}"))
        );
        assert_eq!(adapter.read("entities/nouns/ab/y/metadata.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compressed_blobs_round_trip_and_interoperate() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Bytes::from(vec![b'a'; 4096]);

        let plain = FsAdapter::new(dir.path());
        plain.write("plain.bin", payload.clone()).await.unwrap();

        let gz = FsAdapter::new(dir.path()).with_compression(true);
        gz.write("gz.bin", payload.clone()).await.unwrap();

        // On-disk representation differs, reads agree either way.
        let raw = tokio::fs::read(dir.path().join("gz.bin")).await.unwrap();
        assert_eq!(&raw[0..2], &GZIP_MAGIC);
        assert!(raw.len() < payload.len());
        assert_eq!(gz.read("plain.bin").await.unwrap(), Some(payload.clone()));
        assert_eq!(plain.read("gz.bin").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        assert!(adapter.write("../escape", Bytes::new()).await.is_err());
        assert!(adapter.read("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn list_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        for key in ["branches/main/a/1.json", "branches/main/b/2.json", "branches/exp/a/3.json"] {
            adapter.write(key, Bytes::new()).await.unwrap();
        }
        let mut keys = adapter.list("branches/main/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["branches/main/a/1.json", "branches/main/b/2.json"]);
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        adapter.delete("nothing/here").await.unwrap();
    }
}
