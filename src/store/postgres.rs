//! PostgreSQL store implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{FlowError, FlowResult};
use crate::types::{
    DeploymentRecord, DeploymentStatus, EntityId, EntityMeta, PackageIdentifier, Release,
    ReleaseDraft, StreamDefinition, StreamName,
};

use super::{DefinitionPage, FlowStore};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str) -> FlowResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> FlowResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> FlowResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stream_definitions (
                seq BIGSERIAL,
                id TEXT NOT NULL,
                object_version BIGINT NOT NULL DEFAULT 0,
                name TEXT PRIMARY KEY,
                definition TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stream_deployments (
                id TEXT NOT NULL,
                object_version BIGINT NOT NULL,
                stream TEXT PRIMARY KEY REFERENCES stream_definitions(name) ON DELETE CASCADE,
                status TEXT NOT NULL,
                current_version BIGINT,
                properties JSONB NOT NULL,
                error TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stream_releases (
                stream TEXT NOT NULL REFERENCES stream_definitions(name) ON DELETE CASCADE,
                version BIGINT NOT NULL,
                package_name TEXT NOT NULL,
                package_version TEXT NOT NULL,
                manifest TEXT NOT NULL,
                properties JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (stream, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_stream_definitions_seq
            ON stream_definitions (seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_definition(row: &sqlx::postgres::PgRow) -> FlowResult<StreamDefinition> {
        let id: String = row.get("id");
        let object_version: i64 = row.get("object_version");
        let name: String = row.get("name");
        let definition: String = row.get("definition");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

        Ok(StreamDefinition {
            meta: EntityMeta {
                id: EntityId::new(id),
                object_version,
            },
            name: StreamName::new(name)?,
            definition,
            created_at,
        })
    }

    fn row_to_deployment(row: &sqlx::postgres::PgRow) -> FlowResult<DeploymentRecord> {
        let id: String = row.get("id");
        let object_version: i64 = row.get("object_version");
        let stream: String = row.get("stream");
        let status_str: String = row.get("status");
        let current_version: Option<i64> = row.get("current_version");
        let properties_json: serde_json::Value = row.get("properties");
        let error: Option<String> = row.get("error");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let status: DeploymentStatus = status_str.parse().map_err(|e| {
            FlowError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;

        let properties = serde_json::from_value(properties_json).map_err(|e| {
            FlowError::Serialisation(format!("failed to deserialise properties: {e}"))
        })?;

        Ok(DeploymentRecord {
            meta: EntityMeta {
                id: EntityId::new(id),
                object_version,
            },
            stream: StreamName::new(stream)?,
            status,
            current_version: current_version.map(|v| v as u64),
            properties,
            error,
            updated_at,
        })
    }

    fn row_to_release(row: &sqlx::postgres::PgRow) -> FlowResult<Release> {
        let stream: String = row.get("stream");
        let version: i64 = row.get("version");
        let package_name: String = row.get("package_name");
        let package_version: String = row.get("package_version");
        let manifest: String = row.get("manifest");
        let properties_json: serde_json::Value = row.get("properties");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

        let properties = serde_json::from_value(properties_json).map_err(|e| {
            FlowError::Serialisation(format!("failed to deserialise properties: {e}"))
        })?;

        Ok(Release {
            stream: StreamName::new(stream)?,
            version: version as u64,
            package: PackageIdentifier {
                name: package_name,
                version: package_version,
            },
            manifest,
            properties,
            created_at,
        })
    }
}

#[async_trait]
impl FlowStore for PostgresStore {
    async fn insert_definition(&self, definition: &StreamDefinition) -> FlowResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO stream_definitions (id, object_version, name, definition, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(definition.meta.id.as_str())
        .bind(definition.meta.object_version)
        .bind(definition.name.as_str())
        .bind(&definition.definition)
        .bind(definition.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FlowError::DuplicateStream {
                stream: definition.name.to_string(),
            });
        }

        Ok(())
    }

    async fn get_definition(&self, name: &StreamName) -> FlowResult<Option<StreamDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT id, object_version, name, definition, created_at
            FROM stream_definitions
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_definition(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_definitions(&self, limit: Option<u32>) -> FlowResult<DefinitionPage> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stream_definitions")
            .fetch_one(&self.pool)
            .await?;

        let mut query = String::from(
            r#"
            SELECT id, object_version, name, definition, created_at
            FROM stream_definitions
            ORDER BY seq ASC
            "#,
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(Self::row_to_definition)
            .collect::<FlowResult<Vec<_>>>()?;

        Ok(DefinitionPage {
            items,
            total: total as u64,
        })
    }

    async fn delete_stream(&self, name: &StreamName) -> FlowResult<()> {
        let result = sqlx::query("DELETE FROM stream_definitions WHERE name = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(FlowError::not_found(name.as_str(), "destroy"));
        }

        Ok(())
    }

    async fn get_deployment(&self, name: &StreamName) -> FlowResult<Option<DeploymentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, object_version, stream, status, current_version,
                   properties, error, updated_at
            FROM stream_deployments
            WHERE stream = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_deployment(&r)?)),
            None => Ok(None),
        }
    }

    async fn put_deployment(&self, record: &DeploymentRecord) -> FlowResult<i64> {
        let properties_json = serde_json::to_value(&record.properties).map_err(|e| {
            FlowError::Serialisation(format!("failed to serialise properties: {e}"))
        })?;

        let new_version = record.meta.object_version + 1;

        let result = if record.meta.object_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO stream_deployments (
                    id, object_version, stream, status, current_version,
                    properties, error, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (stream) DO NOTHING
                "#,
            )
            .bind(record.meta.id.as_str())
            .bind(new_version)
            .bind(record.stream.as_str())
            .bind(record.status.as_str())
            .bind(record.current_version.map(|v| v as i64))
            .bind(&properties_json)
            .bind(&record.error)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE stream_deployments
                SET object_version = $1, status = $2, current_version = $3,
                    properties = $4, error = $5, updated_at = $6
                WHERE stream = $7 AND object_version = $8
                "#,
            )
            .bind(new_version)
            .bind(record.status.as_str())
            .bind(record.current_version.map(|v| v as i64))
            .bind(&properties_json)
            .bind(&record.error)
            .bind(record.updated_at)
            .bind(record.stream.as_str())
            .bind(record.meta.object_version)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(FlowError::ConcurrentModification {
                stream: record.stream.to_string(),
            });
        }

        Ok(new_version)
    }

    async fn append_release(&self, draft: ReleaseDraft) -> FlowResult<Release> {
        let properties_json = serde_json::to_value(&draft.properties).map_err(|e| {
            FlowError::Serialisation(format!("failed to serialise properties: {e}"))
        })?;

        // The subselect assigns the next contiguous version; the primary key
        // turns a lost race into a unique violation rather than a gap.
        let row = sqlx::query(
            r#"
            INSERT INTO stream_releases (
                stream, version, package_name, package_version,
                manifest, properties, created_at
            )
            VALUES (
                $1,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM stream_releases WHERE stream = $1),
                $2, $3, $4, $5, NOW()
            )
            RETURNING stream, version, package_name, package_version,
                      manifest, properties, created_at
            "#,
        )
        .bind(draft.stream.as_str())
        .bind(&draft.package.name)
        .bind(&draft.package.version)
        .bind(&draft.manifest)
        .bind(&properties_json)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_release(&row)
    }

    async fn get_release(&self, name: &StreamName, version: u64) -> FlowResult<Option<Release>> {
        let row = sqlx::query(
            r#"
            SELECT stream, version, package_name, package_version,
                   manifest, properties, created_at
            FROM stream_releases
            WHERE stream = $1 AND version = $2
            "#,
        )
        .bind(name.as_str())
        .bind(version as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_release(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_releases(
        &self,
        name: &StreamName,
        limit: Option<usize>,
    ) -> FlowResult<Vec<Release>> {
        let mut query = String::from(
            r#"
            SELECT stream, version, package_name, package_version,
                   manifest, properties, created_at
            FROM stream_releases
            WHERE stream = $1
            ORDER BY version DESC
            "#,
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&query)
            .bind(name.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_release).collect()
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
