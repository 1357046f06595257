//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Permanent object store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for promoted objects.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage path must not be empty".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Chunk store configuration.
///
/// The chunk store holds in-flight bytes written by the chunk-upload
/// protocol until they are promoted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChunkStoreConfig {
    /// Directory shared with the chunk-upload protocol server.
    Filesystem {
        /// Root directory for chunk data and info files.
        path: PathBuf,
    },
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/chunks"),
        }
    }
}

impl ChunkStoreConfig {
    /// Validate chunk store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ChunkStoreConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("chunk store path must not be empty".to_string())
            }
            ChunkStoreConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path, or `:memory:`.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer STOWAGE_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// PostgreSQL cancels statements that run longer than this.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Where `RecordProgress` takes its byte count from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    /// Trust the client-reported number (advisory, UI only).
    #[default]
    Client,
    /// Ignore the reported number and ask the chunk store for its offset.
    ChunkStore,
}

/// Upload lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Session lifetime from initiation, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Failed completions allowed before a session can no longer resume.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on the serialized size of client metadata.
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
    #[serde(default = "default_max_file_name_len")]
    pub max_file_name_len: usize,
    /// Deadline for streaming, hashing and writing one promotion.
    #[serde(default = "default_promotion_timeout_secs")]
    pub promotion_timeout_secs: u64,
    /// Age after which an unfinished promotion claim may be taken over.
    #[serde(default = "default_promotion_lease_secs")]
    pub promotion_lease_secs: u64,
    #[serde(default)]
    pub progress_source: ProgressSource,
    /// Folder used when neither a target path nor a classification folder applies.
    #[serde(default = "default_folder")]
    pub default_folder: String,
    /// Base URL handed to clients for the chunk-upload protocol.
    #[serde(default = "default_upload_endpoint")]
    pub upload_endpoint: String,
}

fn default_session_ttl_secs() -> u64 {
    crate::DEFAULT_SESSION_TTL_SECS
}

fn default_max_retries() -> u32 {
    crate::DEFAULT_MAX_RETRIES
}

fn default_max_metadata_bytes() -> usize {
    crate::DEFAULT_MAX_METADATA_BYTES
}

fn default_max_file_name_len() -> usize {
    255
}

fn default_promotion_timeout_secs() -> u64 {
    600
}

fn default_promotion_lease_secs() -> u64 {
    900
}

fn default_folder() -> String {
    "attachments".to_string()
}

fn default_upload_endpoint() -> String {
    "/files".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            max_retries: default_max_retries(),
            max_metadata_bytes: default_max_metadata_bytes(),
            max_file_name_len: default_max_file_name_len(),
            promotion_timeout_secs: default_promotion_timeout_secs(),
            promotion_lease_secs: default_promotion_lease_secs(),
            progress_source: ProgressSource::default(),
            default_folder: default_folder(),
            upload_endpoint: default_upload_endpoint(),
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.session_ttl_secs as i64)
    }

    pub fn promotion_timeout(&self) -> Duration {
        Duration::from_secs(self.promotion_timeout_secs)
    }

    pub fn promotion_lease(&self) -> time::Duration {
        time::Duration::seconds(self.promotion_lease_secs as i64)
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_ttl_secs == 0 {
            return Err("upload.session_ttl_secs must be greater than 0".to_string());
        }
        if self.session_ttl_secs > i64::MAX as u64 || self.promotion_lease_secs > i64::MAX as u64
        {
            return Err("upload durations are out of range".to_string());
        }
        if self.max_file_name_len == 0 {
            return Err("upload.max_file_name_len must be greater than 0".to_string());
        }
        if self.promotion_timeout_secs == 0 {
            return Err("upload.promotion_timeout_secs must be greater than 0".to_string());
        }
        // A live promotion must never look abandoned.
        if self.promotion_lease_secs < self.promotion_timeout_secs {
            return Err(format!(
                "upload.promotion_lease_secs ({}) must be at least promotion_timeout_secs ({})",
                self.promotion_lease_secs, self.promotion_timeout_secs
            ));
        }
        if self.default_folder.trim_matches('/').is_empty() {
            return Err("upload.default_folder must not be empty".to_string());
        }
        if self.default_folder.contains("..") {
            return Err("upload.default_folder must not contain '..'".to_string());
        }
        if self.upload_endpoint.is_empty() {
            return Err("upload.upload_endpoint must not be empty".to_string());
        }
        Ok(())
    }
}

/// Expiration sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweeper_interval_secs")]
    pub interval_secs: u64,
    /// Sessions fetched per batch.
    #[serde(default = "default_sweeper_batch_size")]
    pub batch_size: u32,
    /// Batches processed per run before yielding to the next interval.
    #[serde(default = "default_sweeper_max_batches")]
    pub max_batches: u32,
    /// Delete chunk-store entries whose session is gone or terminal.
    #[serde(default = "default_reclaim_orphans")]
    pub reclaim_orphans: bool,
    /// Minimum age of a chunk entry before it may be reclaimed as an orphan.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweeper_interval_secs() -> u64 {
    300
}

fn default_sweeper_batch_size() -> u32 {
    100
}

fn default_sweeper_max_batches() -> u32 {
    100
}

fn default_reclaim_orphans() -> bool {
    true
}

fn default_orphan_grace_secs() -> u64 {
    3600
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweeper_interval_secs(),
            batch_size: default_sweeper_batch_size(),
            max_batches: default_sweeper_max_batches(),
            reclaim_orphans: default_reclaim_orphans(),
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn orphan_grace(&self) -> time::Duration {
        time::Duration::seconds(self.orphan_grace_secs.min(i64::MAX as u64) as i64)
    }

    /// Validate sweeper configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("sweeper.interval_secs must be greater than 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("sweeper.batch_size must be greater than 0".to_string());
        }
        if self.max_batches == 0 {
            return Err("sweeper.max_batches must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Folder resolution configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FoldersConfig {
    /// Classification id (as a string key) to folder path.
    #[serde(default)]
    pub classifications: BTreeMap<String, String>,
}

impl FoldersConfig {
    /// Validate folder configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        for (key, folder) in &self.classifications {
            if key.parse::<i64>().is_err() {
                return Err(format!(
                    "folders.classifications key '{key}' is not an integer id"
                ));
            }
            if folder.trim_matches('/').is_empty() {
                return Err(format!(
                    "folders.classifications entry '{key}' has an empty folder"
                ));
            }
            if folder.contains("..") {
                return Err(format!(
                    "folders.classifications entry '{key}' must not contain '..'"
                ));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Permanent object store.
    #[serde(default)]
    pub storage: StorageConfig,
    /// In-flight chunk store.
    #[serde(default)]
    pub chunk_store: ChunkStoreConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub folders: FoldersConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** The background sweeper is disabled so tests
    /// drive sweeps explicitly.
    pub fn for_testing() -> Self {
        Self {
            sweeper: SweeperConfig {
                enabled: false,
                ..SweeperConfig::default()
            },
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
            },
            ..Self::default()
        }
    }

    /// Validate every section, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.chunk_store.validate()?;
        self.metadata.validate()?;
        self.upload.validate()?;
        self.sweeper.validate()?;
        self.folders.validate()?;
        Ok(())
    }
}
