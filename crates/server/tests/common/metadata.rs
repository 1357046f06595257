//! Metadata stores for integration tests.
//!
//! Every test gets its own SQLite database file. PostgreSQL runs in a
//! throwaway container when Docker is reachable.

use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use stowage_metadata::{MetadataStore, PostgresStore, SqliteStore};
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Prefix of setup errors that mean "no Docker here" rather than a broken
/// schema or connection.
const CONTAINER_UNAVAILABLE: &str = "postgres container unavailable:";

/// File-backed SQLite store living in its own temp directory.
#[allow(dead_code)]
pub struct SqliteTestMetadata {
    store: Arc<SqliteStore>,
    _dir: TempDir,
}

impl SqliteTestMetadata {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(dir.path().join("stowage.db"))
            .await
            .expect("Failed to open SQLite metadata store");
        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// PostgreSQL store backed by a container that stops when this is dropped.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    async fn start() -> Result<Self, String> {
        let unavailable =
            |e: testcontainers::TestcontainersError| format!("{CONTAINER_UNAVAILABLE} {e}");
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .map_err(unavailable)?;
        let host = container.get_host().await.map_err(unavailable)?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .map_err(unavailable)?;

        // testcontainers-modules defaults to postgres/postgres.
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::from_url(&url, 8, None)
            .await
            .map_err(|e| format!("failed to open PostgreSQL metadata store: {e}"))?;
        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Raw pool for tests that rewrite rows directly.
    pub fn pool(&self) -> &PgPool {
        self.store.pool()
    }
}

/// Start a PostgreSQL store, or `None` when SKIP_POSTGRES_TESTS is set or
/// Docker is unavailable. Any other setup failure panics.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestMetadata> {
    if std::env::var_os("SKIP_POSTGRES_TESTS").is_some() {
        return None;
    }
    match PostgresTestMetadata::start().await {
        Ok(metadata) => Some(metadata),
        Err(msg) if msg.starts_with(CONTAINER_UNAVAILABLE) => {
            eprintln!("Skipping PostgreSQL test: {msg}");
            None
        }
        Err(msg) => panic!("PostgreSQL test setup failed: {msg}"),
    }
}

/// Run the same test body against SQLite, then PostgreSQL when available.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut,
    Fut: Future<Output = ()>,
{
    let sqlite = SqliteTestMetadata::new().await;
    test_fn(sqlite.store()).await;

    if let Some(postgres) = postgres_or_skip().await {
        test_fn(postgres.store()).await;
    }
}
