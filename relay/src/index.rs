//! The durable package index.
//!
//! One SQLite table maps the dedup key `(repository_id, package, version,
//! architecture)` to the stored control stanza and restore location. The
//! UNIQUE constraint is the index's only atomic primitive: concurrent
//! ingests of the same key cannot both insert, and a duplicate surfaces as
//! a typed, benign error rather than an overwrite.

use crate::error::{RelayError, RelayResult};
use crate::sources::RestoreLocation;
use apt_repository::ControlFile;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// One indexed package.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Identity of the configured source that produced the entry.
    pub repository_id: String,
    /// Component the entry is published under.
    pub component: String,
    /// Full control metadata.
    pub control: ControlFile,
    /// Opaque payload to reopen the artifact bytes.
    pub restore: RestoreLocation,
}

impl IndexEntry {
    /// Canonical pool path the entry is served under, derived from its
    /// strongest digest. `None` when the stanza carries no digest at all.
    pub fn pool_filename(&self) -> Option<String> {
        let (_, digest) = self.control.strongest_digest()?;
        let architecture = self.control.architecture().unwrap_or("unknown");
        Some(format!(
            "pool/{}/binary-{}/{}.deb",
            self.component, architecture, digest
        ))
    }
}

/// Filter for [`PackageIndex::find`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct PackageQuery {
    /// Restrict to these source identities.
    pub repository_ids: Option<Vec<String>>,
    /// Restrict to one component.
    pub component: Option<String>,
    /// Restrict to one package name.
    pub package: Option<String>,
    /// Restrict to one architecture. A concrete architecture also matches
    /// `all` entries; querying `all` itself matches only `all`.
    pub architecture: Option<String>,
    /// Restrict to one version.
    pub version: Option<String>,
}

/// Handle to the index database.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    pool: SqlitePool,
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY,
    repository_id TEXT NOT NULL,
    component TEXT NOT NULL,
    package TEXT NOT NULL,
    version TEXT NOT NULL,
    architecture TEXT NOT NULL,
    digest TEXT,
    control TEXT NOT NULL,
    restore_location TEXT NOT NULL,
    UNIQUE (repository_id, package, version, architecture)
);
CREATE INDEX IF NOT EXISTS packages_scope
    ON packages (repository_id, component, architecture);
";

impl PackageIndex {
    /// Open (and create if missing) the index at a SQLite URL.
    pub async fn open(url: &str) -> RelayResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// An in-memory index. A single pooled connection keeps the database
    /// alive for the handle's lifetime.
    pub async fn in_memory() -> RelayResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> RelayResult<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Insert an entry. The conditional insert is atomic at the database;
    /// an existing key yields [`RelayError::Duplicate`] and leaves the
    /// stored entry untouched.
    pub async fn add(&self, entry: &IndexEntry) -> RelayResult<()> {
        let package = entry.control.require("Package")?;
        let version = entry.control.require("Version")?;
        let architecture = entry.control.require("Architecture")?;
        let digest = entry
            .control
            .strongest_digest()
            .map(|(_, hex)| hex.to_string());
        let restore = serde_json::to_string(&entry.restore)
            .map_err(|e| RelayError::MalformedRemote(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO packages \
             (repository_id, component, package, version, architecture, digest, control, restore_location) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.repository_id)
        .bind(&entry.component)
        .bind(package)
        .bind(version)
        .bind(architecture)
        .bind(&digest)
        .bind(entry.control.to_stanza())
        .bind(&restore)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RelayError::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find entries matching a filter, in insertion order.
    pub async fn find(&self, query: &PackageQuery) -> RelayResult<Vec<IndexEntry>> {
        let mut sql = String::from(
            "SELECT repository_id, component, control, restore_location FROM packages WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(ids) = &query.repository_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(" AND repository_id IN (");
            sql.push_str(&vec!["?"; ids.len()].join(", "));
            sql.push(')');
            binds.extend(ids.iter().cloned());
        }
        if let Some(component) = &query.component {
            sql.push_str(" AND component = ?");
            binds.push(component.clone());
        }
        if let Some(package) = &query.package {
            sql.push_str(" AND package = ?");
            binds.push(package.clone());
        }
        if let Some(architecture) = &query.architecture {
            if architecture == "all" {
                sql.push_str(" AND architecture = 'all'");
            } else {
                sql.push_str(" AND (architecture = ? OR architecture = 'all')");
                binds.push(architecture.clone());
            }
        }
        if let Some(version) = &query.version {
            sql.push_str(" AND version = ?");
            binds.push(version.clone());
        }
        sql.push_str(" ORDER BY id");

        let mut statement = sqlx::query(&sql);
        for bind in &binds {
            statement = statement.bind(bind);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        rows.iter().map(Self::entry_from_row).collect()
    }

    /// Find the entry whose strongest digest matches.
    pub async fn find_by_digest(&self, digest: &str) -> RelayResult<Option<IndexEntry>> {
        let row = sqlx::query(
            "SELECT repository_id, component, control, restore_location \
             FROM packages WHERE digest = ? ORDER BY id LIMIT 1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::entry_from_row).transpose()
    }

    /// Distinct architectures across the given sources, sorted.
    pub async fn distinct_architectures(&self, ids: &[String]) -> RelayResult<Vec<String>> {
        self.distinct("architecture", ids).await
    }

    /// Distinct components across the given sources, sorted.
    pub async fn distinct_components(&self, ids: &[String]) -> RelayResult<Vec<String>> {
        self.distinct("component", ids).await
    }

    async fn distinct(&self, column: &str, ids: &[String]) -> RelayResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT {column} AS value FROM packages WHERE repository_id IN ({}) \
             ORDER BY value",
            vec!["?"; ids.len()].join(", ")
        );
        let mut statement = sqlx::query(&sql);
        for id in ids {
            statement = statement.bind(id);
        }
        let rows = statement.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get("value")).collect())
    }

    /// Delete every entry whose source identity is not in the live set.
    /// Returns the number of pruned entries.
    pub async fn prune_except(&self, live_ids: &[String]) -> RelayResult<u64> {
        let result = if live_ids.is_empty() {
            sqlx::query("DELETE FROM packages").execute(&self.pool).await?
        } else {
            let sql = format!(
                "DELETE FROM packages WHERE repository_id NOT IN ({})",
                vec!["?"; live_ids.len()].join(", ")
            );
            let mut statement = sqlx::query(&sql);
            for id in live_ids {
                statement = statement.bind(id);
            }
            statement.execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> RelayResult<IndexEntry> {
        let control_text: String = row.get("control");
        let restore_text: String = row.get("restore_location");
        Ok(IndexEntry {
            repository_id: row.get("repository_id"),
            component: row.get("component"),
            control: ControlFile::parse(&control_text)?,
            restore: serde_json::from_str(&restore_text)
                .map_err(|e| RelayError::MalformedRemote(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(repo: &str, component: &str, pkg: &str, version: &str, arch: &str) -> IndexEntry {
        let control = ControlFile::parse(&format!(
            "Package: {pkg}\nVersion: {version}\nArchitecture: {arch}\nSize: 10\n\
             SHA256: {pkg}{version}{arch}sum\n"
        ))
        .unwrap();
        IndexEntry {
            repository_id: repo.to_string(),
            component: component.to_string(),
            control,
            restore: RestoreLocation::Url {
                url: format!("https://example.org/{pkg}_{version}_{arch}.deb"),
            },
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_and_first_wins() {
        let index = PackageIndex::in_memory().await.unwrap();
        index.add(&entry("r1", "main", "a", "1.0", "amd64")).await.unwrap();

        let mut second = entry("r1", "main", "a", "1.0", "amd64");
        second.restore = RestoreLocation::Url {
            url: "https://elsewhere.example/a.deb".to_string(),
        };
        let err = index.add(&second).await.unwrap_err();
        assert!(matches!(err, RelayError::Duplicate));

        let found = index
            .find(&PackageQuery {
                package: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].restore,
            RestoreLocation::Url {
                url: "https://example.org/a_1.0_amd64.deb".to_string()
            }
        );
    }

    #[tokio::test]
    async fn same_key_under_other_repository_is_allowed() {
        let index = PackageIndex::in_memory().await.unwrap();
        index.add(&entry("r1", "main", "a", "1.0", "amd64")).await.unwrap();
        index.add(&entry("r2", "main", "a", "1.0", "amd64")).await.unwrap();
        assert_eq!(index.find(&PackageQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concrete_architecture_includes_all_without_duplication() {
        let index = PackageIndex::in_memory().await.unwrap();
        index.add(&entry("r1", "main", "a", "1.0", "amd64")).await.unwrap();
        index.add(&entry("r1", "main", "b", "1.0", "all")).await.unwrap();
        index.add(&entry("r1", "main", "c", "1.0", "arm64")).await.unwrap();

        let amd64 = index
            .find(&PackageQuery {
                architecture: Some("amd64".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<_> = amd64
            .iter()
            .map(|e| e.control.package().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let all = index
            .find(&PackageQuery {
                architecture: Some("all".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].control.package(), Some("b"));
    }

    #[tokio::test]
    async fn prune_removes_only_stale_sources() {
        let index = PackageIndex::in_memory().await.unwrap();
        index.add(&entry("live", "main", "a", "1.0", "amd64")).await.unwrap();
        index.add(&entry("stale", "main", "b", "1.0", "amd64")).await.unwrap();

        let pruned = index.prune_except(&["live".to_string()]).await.unwrap();
        assert_eq!(pruned, 1);
        let rest = index.find(&PackageQuery::default()).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].repository_id, "live");

        assert_eq!(index.prune_except(&[]).await.unwrap(), 1);
        assert!(index.find(&PackageQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn distinct_values_are_scoped_and_sorted() {
        let index = PackageIndex::in_memory().await.unwrap();
        index.add(&entry("r1", "main", "a", "1.0", "arm64")).await.unwrap();
        index.add(&entry("r1", "contrib", "b", "1.0", "amd64")).await.unwrap();
        index.add(&entry("r2", "other", "c", "1.0", "riscv64")).await.unwrap();

        let ids = vec!["r1".to_string()];
        assert_eq!(
            index.distinct_architectures(&ids).await.unwrap(),
            vec!["amd64", "arm64"]
        );
        assert_eq!(
            index.distinct_components(&ids).await.unwrap(),
            vec!["contrib", "main"]
        );
        assert!(index.distinct_components(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_by_digest_roundtrips() {
        let index = PackageIndex::in_memory().await.unwrap();
        let entry = entry("r1", "main", "a", "1.0", "amd64");
        let digest = entry.control.strongest_digest().unwrap().1.to_string();
        index.add(&entry).await.unwrap();

        let found = index.find_by_digest(&digest).await.unwrap().unwrap();
        assert_eq!(found.control.package(), Some("a"));
        assert_eq!(
            found.pool_filename().unwrap(),
            format!("pool/main/binary-amd64/{digest}.deb")
        );
        assert!(index.find_by_digest("missing").await.unwrap().is_none());
    }
}
