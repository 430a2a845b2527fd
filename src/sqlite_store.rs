use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use thiserror::Error;

use crate::policy::Tier;
use crate::registry::{DirectoryError, TenantDirectory};
use crate::tenant::TenantRecord;

/// File-backed tenant directory: `tenants` plus `tenant_domains`, the
/// source of truth behind the edge cache.
#[derive(Clone, Debug)]
pub struct SqliteDirectory {
    path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SqliteDirectoryError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unknown tier in tenants row: {0}")]
    UnknownTier(String),
}

impl SqliteDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), SqliteDirectoryError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteDirectoryError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    /// Write surface for the provisioning path and tests. Lookups never
    /// call this.
    pub async fn provision_tenant(
        &self,
        record: TenantRecord,
        hostnames: Vec<String>,
    ) -> Result<(), SqliteDirectoryError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteDirectoryError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tenants (id, slug, platform, tier) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     slug = excluded.slug,
                     platform = excluded.platform,
                     tier = excluded.tier",
                rusqlite::params![
                    record.id,
                    record.slug,
                    record.platform,
                    record.tier.as_str()
                ],
            )?;
            for hostname in hostnames {
                tx.execute(
                    "INSERT INTO tenant_domains (hostname, tenant_slug) VALUES (?1, ?2)
                     ON CONFLICT(hostname) DO UPDATE SET tenant_slug = excluded.tenant_slug",
                    rusqlite::params![hostname.to_ascii_lowercase(), record.slug],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn fetch_by_hostname(
        &self,
        hostname: &str,
    ) -> Result<Option<TenantRecord>, SqliteDirectoryError> {
        let path = self.path.clone();
        let hostname = hostname.to_ascii_lowercase();
        tokio::task::spawn_blocking(move || -> Result<Option<TenantRecord>, SqliteDirectoryError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let row = conn
                .query_row(
                    "SELECT t.id, t.slug, t.platform, t.tier
                     FROM tenant_domains d
                     JOIN tenants t ON t.slug = d.tenant_slug
                     WHERE d.hostname = ?1",
                    [hostname],
                    read_row,
                )
                .optional()?;
            row.map(into_record).transpose()
        })
        .await?
    }

    pub async fn fetch_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<TenantRecord>, SqliteDirectoryError> {
        let path = self.path.clone();
        let slug = slug.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<TenantRecord>, SqliteDirectoryError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let row = conn
                .query_row(
                    "SELECT id, slug, platform, tier FROM tenants WHERE slug = ?1",
                    [slug],
                    read_row,
                )
                .optional()?;
            row.map(into_record).transpose()
        })
        .await?
    }
}

#[async_trait]
impl TenantDirectory for SqliteDirectory {
    async fn tenant_by_hostname(
        &self,
        hostname: &str,
    ) -> Result<Option<TenantRecord>, DirectoryError> {
        self.fetch_by_hostname(hostname)
            .await
            .map_err(|err| DirectoryError(err.to_string()))
    }

    async fn tenant_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError> {
        self.fetch_by_slug(slug)
            .await
            .map_err(|err| DirectoryError(err.to_string()))
    }
}

struct RawTenantRow {
    id: String,
    slug: String,
    platform: Option<String>,
    tier: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTenantRow> {
    Ok(RawTenantRow {
        id: row.get(0)?,
        slug: row.get(1)?,
        platform: row.get(2)?,
        tier: row.get(3)?,
    })
}

fn into_record(raw: RawTenantRow) -> Result<TenantRecord, SqliteDirectoryError> {
    let tier = Tier::parse(&raw.tier)
        .ok_or_else(|| SqliteDirectoryError::UnknownTier(raw.tier.clone()))?;
    Ok(TenantRecord {
        id: raw.id,
        slug: raw.slug,
        platform: raw.platform,
        tier,
    })
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            platform TEXT,
            tier TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tenant_domains (
            hostname TEXT PRIMARY KEY NOT NULL,
            tenant_slug TEXT NOT NULL REFERENCES tenants(slug)
        );

        CREATE INDEX IF NOT EXISTS idx_tenant_domains_slug
            ON tenant_domains(tenant_slug);",
    )
}
