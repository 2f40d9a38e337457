//! Persistent cache of trained models, one per department
//!
//! The filesystem store writes one artifact per department,
//! `dept_<id>.json`, under a fixed directory that is created on the first
//! write. Each artifact starts with a header line carrying a SHA256 of the
//! JSON body:
//!
//! ```text
//! WAITLINE1 <sha256 hex>
//! {"department_id":1,...}
//! ```
//!
//! Writes go to a temporary file that is then renamed over the artifact, so
//! readers see either the old or the new model and concurrent writers resolve
//! to last-write-wins.
//!
//! Disk loads, writes and removals for one department are serialized by a
//! per-department lock, so the read cache never holds a model older than the
//! artifact on disk.

use super::model::{ModelMetadata, TrainedModel};
use crate::error::PersistenceError;
use crate::models::DepartmentId;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Artifact format marker
const ARTIFACT_MAGIC: &str = "WAITLINE1";

const ARTIFACT_PREFIX: &str = "dept_";
const ARTIFACT_SUFFIX: &str = ".json";

/// Storage backend for trained models keyed by department
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Load the model for a department if one is stored
    async fn get(&self, department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError>;

    /// Store a model, replacing any previous model for its department
    async fn put(&self, model: Arc<TrainedModel>) -> Result<(), PersistenceError>;

    /// Remove the model for a department. Returns whether one existed.
    async fn invalidate(&self, department: DepartmentId) -> Result<bool, PersistenceError>;

    /// Metadata of every stored model, ordered by department
    async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError>;

    /// Whether a `put` could succeed right now, without storing anything
    async fn check_writable(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Serialize a model into the on-disk artifact layout
pub fn encode_artifact(model: &TrainedModel) -> Result<Vec<u8>, PersistenceError> {
    let body = serde_json::to_vec(model)?;
    let mut out = format!("{} {}\n", ARTIFACT_MAGIC, compute_checksum(&body)).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse and verify an artifact read from `path`
pub fn decode_artifact(path: &Path, bytes: &[u8]) -> Result<TrainedModel, PersistenceError> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| PersistenceError::corrupt(path, "missing header"))?;
    let header = std::str::from_utf8(&bytes[..newline])
        .map_err(|_| PersistenceError::corrupt(path, "header is not utf-8"))?;
    let body = &bytes[newline + 1..];

    let checksum = match header.split_once(' ') {
        Some((ARTIFACT_MAGIC, checksum)) => checksum.trim(),
        _ => return Err(PersistenceError::corrupt(path, "unknown artifact format")),
    };

    let computed = compute_checksum(body);
    if computed != checksum {
        return Err(PersistenceError::corrupt(
            path,
            format!("checksum mismatch: expected {}, got {}", checksum, computed),
        ));
    }

    serde_json::from_slice(body).map_err(|e| PersistenceError::corrupt(path, e.to_string()))
}

/// Model store on the local filesystem with an in-process read cache
pub struct FsModelStore {
    dir: PathBuf,
    cache: DashMap<DepartmentId, Arc<TrainedModel>>,
    locks: DashMap<DepartmentId, Arc<Mutex<()>>>,
    tmp_counter: AtomicU64,
}

impl FsModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
            locks: DashMap::new(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact path for a department
    pub fn artifact_path(&self, department: DepartmentId) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", ARTIFACT_PREFIX, department.0, ARTIFACT_SUFFIX))
    }

    fn tmp_path(&self, department: DepartmentId) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}{}{}.{}.{}.tmp",
            ARTIFACT_PREFIX,
            department.0,
            ARTIFACT_SUFFIX,
            std::process::id(),
            n
        ))
    }

    fn lock_for(&self, department: DepartmentId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(department).or_default().value())
    }

    fn department_from_file_name(name: &str) -> Option<DepartmentId> {
        name.strip_prefix(ARTIFACT_PREFIX)?
            .strip_suffix(ARTIFACT_SUFFIX)?
            .parse::<i64>()
            .ok()
            .map(DepartmentId)
    }

    async fn load(&self, department: DepartmentId) -> Result<Option<TrainedModel>, PersistenceError> {
        let path = self.artifact_path(department);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        let model = decode_artifact(&path, &bytes)?;
        if model.department_id != department {
            return Err(PersistenceError::corrupt(
                path,
                format!("artifact belongs to department {}", model.department_id),
            ));
        }
        Ok(Some(model))
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn get(&self, department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError> {
        if let Some(model) = self.cache.get(&department) {
            return Ok(Some(Arc::clone(model.value())));
        }

        let lock = self.lock_for(department);
        let _guard = lock.lock().await;
        // A put may have landed while we waited for the lock
        if let Some(model) = self.cache.get(&department) {
            return Ok(Some(Arc::clone(model.value())));
        }

        let Some(model) = self.load(department).await? else {
            return Ok(None);
        };
        let model = Arc::new(model);
        self.cache.insert(department, Arc::clone(&model));
        debug!(department_id = %department, "Loaded model from disk");
        Ok(Some(model))
    }

    async fn put(&self, model: Arc<TrainedModel>) -> Result<(), PersistenceError> {
        let department = model.department_id;
        let lock = self.lock_for(department);
        let _guard = lock.lock().await;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        let bytes = encode_artifact(&model)?;
        let tmp = self.tmp_path(department);
        let path = self.artifact_path(department);

        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = ?tmp, error = %cleanup, "Failed to remove temporary model file");
            }
            return Err(PersistenceError::io(path, e));
        }

        self.cache.insert(department, model);
        debug!(department_id = %department, path = ?path, size = bytes.len(), "Model persisted");
        Ok(())
    }

    async fn invalidate(&self, department: DepartmentId) -> Result<bool, PersistenceError> {
        let lock = self.lock_for(department);
        let _guard = lock.lock().await;

        let cached = self.cache.remove(&department).is_some();
        let path = self.artifact_path(department);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.dir, e)),
        };

        let mut departments = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            if let Some(department) = name.to_str().and_then(Self::department_from_file_name) {
                departments.push(department);
            }
        }
        departments.sort();

        let mut out = Vec::with_capacity(departments.len());
        for department in departments {
            match self.get(department).await {
                Ok(Some(model)) => out.push(model.metadata()),
                Ok(None) => {}
                Err(e) => warn!(department_id = %department, error = %e, "Skipping unreadable model"),
            }
        }
        Ok(out)
    }

    /// Writes a scratch file when the directory exists. Otherwise checks the
    /// nearest existing ancestor, leaving the directory to the first put.
    async fn check_writable(&self) -> Result<(), PersistenceError> {
        match fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => {
                let scratch = self.tmp_path(DepartmentId(0));
                fs::write(&scratch, b"")
                    .await
                    .map_err(|e| PersistenceError::io(&scratch, e))?;
                fs::remove_file(&scratch)
                    .await
                    .map_err(|e| PersistenceError::io(&scratch, e))
            }
            Ok(_) => Err(PersistenceError::io(
                &self.dir,
                std::io::Error::new(ErrorKind::AlreadyExists, "model directory path is a file"),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut ancestor = self.dir.parent();
                while let Some(path) = ancestor {
                    match fs::metadata(path).await {
                        Ok(meta) if !meta.is_dir() => {
                            return Err(PersistenceError::io(
                                path,
                                std::io::Error::new(ErrorKind::AlreadyExists, "not a directory"),
                            ))
                        }
                        Ok(meta) if meta.permissions().readonly() => {
                            return Err(PersistenceError::io(
                                path,
                                std::io::Error::new(ErrorKind::PermissionDenied, "read-only"),
                            ))
                        }
                        Ok(_) => return Ok(()),
                        Err(e) if e.kind() == ErrorKind::NotFound => ancestor = path.parent(),
                        Err(e) => return Err(PersistenceError::io(path, e)),
                    }
                }
                Ok(())
            }
            Err(e) => Err(PersistenceError::io(&self.dir, e)),
        }
    }
}

/// Model store held entirely in memory
#[derive(Default)]
pub struct InMemoryModelStore {
    models: DashMap<DepartmentId, Arc<TrainedModel>>,
    puts: AtomicU64,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls since creation
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn get(&self, department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError> {
        Ok(self.models.get(&department).map(|m| Arc::clone(m.value())))
    }

    async fn put(&self, model: Arc<TrainedModel>) -> Result<(), PersistenceError> {
        self.models.insert(model.department_id, model);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invalidate(&self, department: DepartmentId) -> Result<bool, PersistenceError> {
        Ok(self.models.remove(&department).is_some())
    }

    async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
        let mut out: Vec<ModelMetadata> = self.models.iter().map(|m| m.value().metadata()).collect();
        out.sort_by_key(|m| m.department_id);
        Ok(out)
    }
}
