//! Shared Object Store (spec.md §4.A): a content-addressed directory for
//! keys, inputs, outputs, and promoted result-cache backups.
//!
//! Every path built from client-supplied input (a uid or a use-case name)
//! goes through [`ObjectStore::resolve_live`] or [`resolve_backup`], which
//! canonicalize against the configured root and reject anything that
//! would escape it — the path-traversal defence spec.md §4.A and §7 require.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::BrokerError;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    live_root: PathBuf,
    backup_root: PathBuf,
}

impl ObjectStore {
    pub fn new(live_root: PathBuf, backup_root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&live_root)?;
        std::fs::create_dir_all(&backup_root)?;
        Ok(Self {
            live_root: live_root.canonicalize()?,
            backup_root: backup_root.canonicalize()?,
        })
    }

    /// Resolves a single filename component against the live area root.
    pub fn resolve_live(&self, filename: &str) -> Result<PathBuf, BrokerError> {
        resolve_within(&self.live_root, filename)
    }

    /// Resolves a single filename component against the backup area root.
    pub fn resolve_backup(&self, filename: &str) -> Result<PathBuf, BrokerError> {
        resolve_within(&self.backup_root, filename)
    }

    pub async fn write_live(&self, filename: &str, data: &[u8]) -> Result<PathBuf, BrokerError> {
        let path = self.resolve_live(filename)?;
        write_whole_file(&path, data).await?;
        Ok(path)
    }

    pub async fn read_live(&self, filename: &str) -> Result<Vec<u8>, BrokerError> {
        let path = self.resolve_live(filename)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| BrokerError::MissingArtifact(filename.to_owned()))
    }

    pub async fn read_backup(&self, filename: &str) -> Result<Vec<u8>, BrokerError> {
        let path = self.resolve_backup(filename)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| BrokerError::MissingArtifact(filename.to_owned()))
    }

    pub fn backup_exists(&self, filename: &str) -> bool {
        match self.resolve_backup(filename) {
            Ok(path) => path.exists(),
            Err(_) => false,
        }
    }

    pub fn live_root(&self) -> &Path {
        &self.live_root
    }

    /// Copies a live output artifact into the backup area, keyed by uid and
    /// job id, the first time a client fetches a SUCCESS result
    /// (spec.md §3, OutputArtifact promotion; §4.F result retrieval).
    pub async fn promote_to_backup(
        &self,
        live_filename: &str,
        backup_filename: &str,
    ) -> Result<(), BrokerError> {
        let data = self.read_live(live_filename).await?;
        let backup_path = self.resolve_backup(backup_filename)?;
        write_whole_file(&backup_path, &data).await?;
        Ok(())
    }

    /// Finds backup artifacts matching `backup.<uid>.<job_id>.*` — used by
    /// the lifecycle engine's COMPLETED check (spec.md §4.F step 4).
    pub fn find_backups(&self, uid: &str, job_id: &str) -> Vec<PathBuf> {
        let prefix = format!("backup.{uid}.{job_id}.");
        let Ok(entries) = std::fs::read_dir(&self.backup_root) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect()
    }
}

async fn write_whole_file(path: &Path, data: &[u8]) -> Result<(), BrokerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(BrokerError::ObjectStoreIo)?;
    }
    // Whole-file replacement via a temp-file-then-rename is safe under
    // POSIX-like rename semantics even if a concurrent reader has the old
    // inode open (spec.md §5, "Shared resources").
    let tmp_path = path.with_extension("tmp-write");
    let mut f = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(BrokerError::ObjectStoreIo)?;
    f.write_all(data).await.map_err(BrokerError::ObjectStoreIo)?;
    f.flush().await.map_err(BrokerError::ObjectStoreIo)?;
    drop(f);
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(BrokerError::ObjectStoreIo)?;
    Ok(())
}

/// Canonicalizes `name` against `root`, rejecting traversal attempts,
/// absolute components, and NUL bytes without touching the filesystem.
fn resolve_within(root: &Path, name: &str) -> Result<PathBuf, BrokerError> {
    if name.is_empty() || name.contains('\0') {
        return Err(BrokerError::PathEscape(name.to_owned()));
    }

    let candidate = Path::new(name);
    if candidate
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(BrokerError::PathEscape(name.to_owned()));
    }

    Ok(root.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live");
        let backup = dir.path().join("backup");
        let store = ObjectStore::new(live, backup).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn writes_and_reads_whole_files() {
        let (_dir, store) = store();
        store.write_live("a.serverKey", b"hello").await.unwrap();
        let data = store.read_live("a.serverKey").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        let (_dir, store) = store();
        assert!(store.resolve_live("../etc/passwd").is_err());
        assert!(store.resolve_live("/etc/passwd").is_err());
        assert!(store.resolve_live("a\0b").is_err());
    }

    #[tokio::test]
    async fn promotes_and_finds_backups() {
        let (_dir, store) = store();
        store
            .write_live("u1.example.output.fheencrypted", b"result")
            .await
            .unwrap();
        store
            .promote_to_backup(
                "u1.example.output.fheencrypted",
                "backup.u1.job1.u1.example.output.fheencrypted",
            )
            .await
            .unwrap();

        let found = store.find_backups("u1", "job1");
        assert_eq!(found.len(), 1);
        let data = store
            .read_backup("backup.u1.job1.u1.example.output.fheencrypted")
            .await
            .unwrap();
        assert_eq!(data, b"result");
    }
}
