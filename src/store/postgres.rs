//! Postgres-backed store on sqlx and pgvector.
//!
//! One [`PostgresStore`] implements all three storage traits over a shared
//! connection pool. The similarity index is an HNSW index over the
//! `embeddings.vector` column, built for the configured metric's operator
//! class; searches pin the candidate breadth with `SET LOCAL
//! hnsw.ef_search` inside the same transaction as the scan, so the
//! setting never leaks to other pool users.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::error::{NotFoundKind, RagError, RagResult};
use crate::vector::DistanceMetric;

use super::{
    ChunkRecord, DocumentSource, DocumentStatus, IndexEntry, SearchHit, Turn, TurnRole, TurnStore,
    VectorStore,
};

impl FromRow<'_, PgRow> for ChunkRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for Turn {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let role = role.parse::<TurnRole>().map_err(|err| sqlx::Error::ColumnDecode {
            index: "role".into(),
            source: Box::new(err),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            role,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for SearchHit {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let vector: pgvector::Vector = row.try_get("vector")?;
        // pgvector distance operators return double precision.
        let distance: f64 = row.try_get("distance")?;
        Ok(Self {
            chunk_id: row.try_get("chunk_id")?,
            document_id: row.try_get("document_id")?,
            embedding: vector.to_vec(),
            distance: distance as f32,
        })
    }
}

pub struct PostgresStore {
    pool: PgPool,
    dimension: usize,
    metric: DistanceMetric,
}

impl PostgresStore {
    pub fn new(pool: PgPool, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            pool,
            dimension,
            metric,
        }
    }

    /// Connects a pool and wraps it. Schema setup is separate; call
    /// [`ensure_schema`](Self::ensure_schema) once at startup.
    pub async fn connect(
        database_url: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> RagResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, dimension, metric))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the extension, tables, and indexes if missing. The vector
    /// column dimension and the HNSW operator class are fixed here; both
    /// are deployment constants, so changing either needs a reindex.
    pub async fn ensure_schema(&self) -> RagResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_document_idx ON chunks (document_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id UUID PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                vector VECTOR({}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.dimension
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS embeddings_document_idx ON embeddings (document_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS embeddings_vector_hnsw_idx ON embeddings \
             USING hnsw (vector {}) WITH (m = 16, ef_construction = 64)",
            self.metric.hnsw_opclass()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id UUID PRIMARY KEY,
                seq BIGSERIAL,
                chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS messages_chat_recency_idx ON messages (chat_id, seq DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_document(&self, content: &str) -> RagResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO documents (id, content, status) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(content)
            .bind(DocumentStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn create_chat(&self) -> RagResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO chats (id) VALUES ($1)")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }
}

fn search_sql(metric: DistanceMetric, filtered: bool) -> String {
    let op = metric.pg_operator();
    if filtered {
        format!(
            "SELECT chunk_id, document_id, vector, vector {op} $1 AS distance \
             FROM embeddings WHERE document_id = ANY($2) \
             ORDER BY vector {op} $1 LIMIT $3"
        )
    } else {
        format!(
            "SELECT chunk_id, document_id, vector, vector {op} $1 AS distance \
             FROM embeddings ORDER BY vector {op} $1 LIMIT $2"
        )
    }
}

#[async_trait]
impl DocumentSource for PostgresStore {
    async fn fetch_text(&self, document_id: Uuid) -> RagResult<String> {
        let content: Option<String> =
            sqlx::query_scalar("SELECT content FROM documents WHERE id = $1")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        content.ok_or_else(|| RagError::not_found(NotFoundKind::Document, document_id))
    }

    async fn status(&self, document_id: Uuid) -> RagResult<DocumentStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM documents WHERE id = $1")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        status
            .ok_or_else(|| RagError::not_found(NotFoundKind::Document, document_id))?
            .parse()
    }

    async fn set_status(&self, document_id: Uuid, status: DocumentStatus) -> RagResult<()> {
        let result =
            sqlx::query("UPDATE documents SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(document_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RagError::not_found(NotFoundKind::Document, document_id));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for PostgresStore {
    async fn upsert(&self, chunk_id: Uuid, document_id: Uuid, vector: &[f32]) -> RagResult<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, document_id, vector)
            VALUES ($1, $2, $3)
            ON CONFLICT (chunk_id) DO UPDATE SET
                vector = EXCLUDED.vector,
                document_id = EXCLUDED.document_id,
                updated_at = NOW()
            "#,
        )
        .bind(chunk_id)
        .bind(document_id)
        .bind(pgvector::Vector::from(vector.to_vec()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_document_index(
        &self,
        document_id: Uuid,
        entries: Vec<IndexEntry>,
    ) -> RagResult<()> {
        let mut tx = self.pool.begin().await?;

        // Chunk deletion cascades to the embedding rows.
        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for entry in &entries {
            sqlx::query("INSERT INTO chunks (id, document_id, content) VALUES ($1, $2, $3)")
                .bind(entry.chunk_id)
                .bind(document_id)
                .bind(&entry.content)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO embeddings (chunk_id, document_id, vector) VALUES ($1, $2, $3)",
            )
            .bind(entry.chunk_id)
            .bind(document_id)
            .bind(pgvector::Vector::from(entry.vector.clone()))
            .execute(&mut *tx)
            .await?;
        }

        let result =
            sqlx::query("UPDATE documents SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(document_id)
                .bind(DocumentStatus::Embedded.as_str())
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the writes above.
            return Err(RagError::not_found(NotFoundKind::Document, document_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        fetch_k: usize,
        search_width: u32,
        document_filter: Option<&[Uuid]>,
    ) -> RagResult<Vec<SearchHit>> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL takes no bind parameters; the value is an integer.
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {search_width}"))
            .execute(&mut *tx)
            .await?;

        let query_vector = pgvector::Vector::from(query.to_vec());
        let rows = match document_filter {
            Some(ids) => {
                sqlx::query(&search_sql(self.metric, true))
                    .bind(&query_vector)
                    .bind(ids.to_vec())
                    .bind(fetch_k as i64)
                    .fetch_all(&mut *tx)
                    .await?
            }
            None => {
                sqlx::query(&search_sql(self.metric, false))
                    .bind(&query_vector)
                    .bind(fetch_k as i64)
                    .fetch_all(&mut *tx)
                    .await?
            }
        };
        tx.commit().await?;

        rows.iter()
            .map(|row| SearchHit::from_row(row).map_err(RagError::from))
            .collect()
    }

    async fn chunk_contents(&self, chunk_ids: &[Uuid]) -> RagResult<Vec<ChunkRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, document_id, content, created_at FROM chunks WHERE id = ANY($1)",
        )
        .bind(chunk_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| ChunkRecord::from_row(row).map_err(RagError::from))
            .collect()
    }
}

#[async_trait]
impl TurnStore for PostgresStore {
    async fn append_turn(&self, chat_id: Uuid, role: TurnRole, content: &str) -> RagResult<Turn> {
        let id = Uuid::new_v4();
        // Insert-where-exists collapses the chat check and the append into
        // one statement; no row back means the chat is unknown.
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, role, content)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (SELECT 1 FROM chats WHERE id = $2)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(chat_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RagError::not_found(NotFoundKind::Chat, chat_id))?;

        Ok(Turn {
            id,
            chat_id,
            role,
            content: content.to_string(),
            created_at: row.try_get("created_at").map_err(RagError::from)?,
        })
    }

    async fn recent_turns(&self, chat_id: Uuid, limit: usize) -> RagResult<Vec<Turn>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM chats WHERE id = $1)")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(RagError::not_found(NotFoundKind::Chat, chat_id));
        }

        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, role, content, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(chat_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Turn::from_row(row).map_err(RagError::from))
            .collect()
    }
}
