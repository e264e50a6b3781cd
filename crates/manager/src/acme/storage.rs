//! Certificate store
//!
//! Issued certificates are kept as opaque records identified by a
//! [`CertificateHandle`]. Ownership, name and expiry live only in the
//! record's tags; there is no separate index.
//!
//! # Directory Structure
//!
//! ```text
//! certificates/
//! └── cert-<uuid>/
//!     ├── cert.pem      # Leaf certificate
//!     ├── chain.pem     # Issuer certificates, leaf excluded
//!     ├── key.pem       # Private key (0600)
//!     └── tags.json     # Tag map
//! ```

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use certward_common::CertificateHandle;

use super::error::{StorageError, StorageResult};

/// Material to import into the store
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest<'a> {
    /// Leaf certificate, PEM
    pub certificate_pem: &'a str,
    /// Issuer certificates, PEM, leaf excluded
    pub chain_pem: &'a str,
    /// Private key, PEM
    pub private_key_pem: &'a str,
    /// Overwrite this record in place instead of creating a new one
    pub existing: Option<&'a CertificateHandle>,
}

/// A store record and its tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResource {
    pub handle: CertificateHandle,
    pub tags: BTreeMap<String, String>,
}

/// A complete stored certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub certificate_pem: String,
    pub chain_pem: String,
    pub private_key_pem: String,
    pub tags: BTreeMap<String, String>,
}

/// Import and tagging operations of the certificate store
#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    /// Import certificate material, returning the record's handle.
    ///
    /// With `existing` set, the record is overwritten in place and keeps its
    /// handle and tags; a missing record is `NotFound`.
    async fn import(&self, request: ImportRequest<'_>) -> StorageResult<CertificateHandle>;

    /// Add or replace tags on a record
    async fn add_tags(
        &self,
        handle: &CertificateHandle,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()>;
}

/// Resource type of certificate records in tag queries
pub const CERTIFICATE_RESOURCE_TYPE: &str = "certificate";

/// Tag-based lookup over store records
#[async_trait]
pub trait TagQuery: Send + Sync + Debug {
    /// All records of `resource_type` carrying every given tag with the
    /// given value
    async fn find_by_tags(
        &self,
        resource_type: &str,
        filter: &BTreeMap<String, String>,
    ) -> StorageResult<Vec<TaggedResource>>;
}

fn matches_filter(tags: &BTreeMap<String, String>, filter: &BTreeMap<String, String>) -> bool {
    filter
        .iter()
        .all(|(key, value)| tags.get(key) == Some(value))
}

// ============================================================================
// Filesystem store
// ============================================================================

/// Directory-backed certificate store
#[derive(Debug)]
pub struct FileCertificateStore {
    /// Base storage directory
    base_path: PathBuf,
}

impl FileCertificateStore {
    /// Create a new certificate store at the given path
    ///
    /// Creates the directory if it doesn't exist and sets restrictive
    /// permissions (0700 on Unix).
    pub fn new(base_path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Get the storage base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, handle: &CertificateHandle) -> StorageResult<PathBuf> {
        let id = handle.as_str();
        let safe = !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !safe {
            return Err(StorageError::NotFound {
                handle: id.to_string(),
            });
        }
        Ok(self.base_path.join(id))
    }

    fn read_tags(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        let tags_path = path.join("tags.json");
        if !tags_path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&tags_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn stage(path: &Path, files: &[(&str, &str)]) -> StorageResult<()> {
        for (name, content) in files {
            let tmp_path = path.join(format!("{}.tmp", name));
            fs::write(&tmp_path, content)?;

            // Private key with restrictive permissions
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if *name == "key.pem" {
                    fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
                }
            }
        }
        Ok(())
    }

    /// Load a stored certificate
    pub fn load(&self, handle: &CertificateHandle) -> StorageResult<Option<StoredCertificate>> {
        let path = self.record_path(handle)?;
        let cert_path = path.join("cert.pem");

        if !cert_path.exists() {
            trace!(handle = %handle, "No stored certificate found");
            return Ok(None);
        }

        Ok(Some(StoredCertificate {
            certificate_pem: fs::read_to_string(&cert_path)?,
            chain_pem: fs::read_to_string(path.join("chain.pem"))?,
            private_key_pem: fs::read_to_string(path.join("key.pem"))?,
            tags: Self::read_tags(&path)?,
        }))
    }

    /// List all record handles
    pub fn list_handles(&self) -> StorageResult<Vec<CertificateHandle>> {
        let mut handles = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    handles.push(CertificateHandle::from_string(name));
                }
            }
        }
        handles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(handles)
    }
}

#[async_trait]
impl CertificateStore for FileCertificateStore {
    async fn import(&self, request: ImportRequest<'_>) -> StorageResult<CertificateHandle> {
        let handle = match request.existing {
            Some(handle) => {
                let path = self.record_path(handle)?;
                if !path.is_dir() {
                    return Err(StorageError::NotFound {
                        handle: handle.to_string(),
                    });
                }
                handle.clone()
            }
            None => CertificateHandle::generate(),
        };

        let path = self.record_path(&handle)?;
        fs::create_dir_all(&path)?;

        // Stage every file before touching the live ones, so a failed write
        // never leaves a leaf paired with another certificate's key
        let files = [
            ("cert.pem", request.certificate_pem),
            ("chain.pem", request.chain_pem),
            ("key.pem", request.private_key_pem),
        ];
        if let Err(e) = Self::stage(&path, &files) {
            for (name, _) in &files {
                let _ = fs::remove_file(path.join(format!("{}.tmp", name)));
            }
            warn!(handle = %handle, error = %e, "Failed to stage certificate files");
            return Err(e);
        }

        for (name, _) in &files {
            fs::rename(path.join(format!("{}.tmp", name)), path.join(name))?;
        }

        info!(
            handle = %handle,
            replaced = request.existing.is_some(),
            "Imported certificate"
        );
        Ok(handle)
    }

    async fn add_tags(
        &self,
        handle: &CertificateHandle,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        let path = self.record_path(handle)?;
        if !path.is_dir() {
            return Err(StorageError::NotFound {
                handle: handle.to_string(),
            });
        }

        let mut current = Self::read_tags(&path)?;
        current.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        fs::write(path.join("tags.json"), serde_json::to_string_pretty(&current)?)?;

        debug!(handle = %handle, tag_count = tags.len(), "Tagged certificate");
        Ok(())
    }
}

#[async_trait]
impl TagQuery for FileCertificateStore {
    async fn find_by_tags(
        &self,
        resource_type: &str,
        filter: &BTreeMap<String, String>,
    ) -> StorageResult<Vec<TaggedResource>> {
        let mut found = Vec::new();
        if resource_type != CERTIFICATE_RESOURCE_TYPE {
            return Ok(found);
        }
        for handle in self.list_handles()? {
            let path = self.record_path(&handle)?;
            let tags = match Self::read_tags(&path) {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(handle = %handle, error = %e, "Skipping record with unreadable tags");
                    continue;
                }
            };
            if matches_filter(&tags, filter) {
                found.push(TaggedResource { handle, tags });
            }
        }
        trace!(matches = found.len(), "Tag query complete");
        Ok(found)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process certificate store
#[derive(Debug, Clone, Default)]
pub struct MemoryCertificateStore {
    records: Arc<DashMap<CertificateHandle, StoredCertificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, handle: &CertificateHandle) -> Option<StoredCertificate> {
        self.records.get(handle).map(|r| r.clone())
    }

    /// Insert a record directly, bypassing import
    pub fn insert(&self, handle: CertificateHandle, record: StoredCertificate) {
        self.records.insert(handle, record);
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn import(&self, request: ImportRequest<'_>) -> StorageResult<CertificateHandle> {
        match request.existing {
            Some(handle) => {
                let mut record =
                    self.records
                        .get_mut(handle)
                        .ok_or_else(|| StorageError::NotFound {
                            handle: handle.to_string(),
                        })?;
                record.certificate_pem = request.certificate_pem.to_string();
                record.chain_pem = request.chain_pem.to_string();
                record.private_key_pem = request.private_key_pem.to_string();
                Ok(handle.clone())
            }
            None => {
                let handle = CertificateHandle::generate();
                self.records.insert(
                    handle.clone(),
                    StoredCertificate {
                        certificate_pem: request.certificate_pem.to_string(),
                        chain_pem: request.chain_pem.to_string(),
                        private_key_pem: request.private_key_pem.to_string(),
                        tags: BTreeMap::new(),
                    },
                );
                Ok(handle)
            }
        }
    }

    async fn add_tags(
        &self,
        handle: &CertificateHandle,
        tags: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(handle)
            .ok_or_else(|| StorageError::NotFound {
                handle: handle.to_string(),
            })?;
        record
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[async_trait]
impl TagQuery for MemoryCertificateStore {
    async fn find_by_tags(
        &self,
        resource_type: &str,
        filter: &BTreeMap<String, String>,
    ) -> StorageResult<Vec<TaggedResource>> {
        if resource_type != CERTIFICATE_RESOURCE_TYPE {
            return Ok(Vec::new());
        }
        let mut found: Vec<TaggedResource> = self
            .records
            .iter()
            .filter(|entry| matches_filter(&entry.tags, filter))
            .map(|entry| TaggedResource {
                handle: entry.key().clone(),
                tags: entry.tags.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.handle.as_str().cmp(b.handle.as_str()));
        Ok(found)
    }
}
