use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::srs::{MemoryRecord, RecordState};

use super::{RecordStore, StoreError, UpsertReport, VocabItem, VocabSource};

const RECORD_COLUMNS: &str = r#""learner_id","item_id","stability","difficulty","state",
    "review_count","consecutive_successes","due_at","last_reviewed_at","created_at","updated_at""#;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `DATABASE_URL`, defaulting
    /// to a local file, and applies pending migrations.
    pub async fn from_env() -> Result<Self, StoreError> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://lexikon.db".to_string());
        Self::connect(&url).await
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StoreError::Sql)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn seed_vocab(&self, items: &[VocabItem]) -> Result<(), StoreError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO "vocab_items" ("item_id","lemma","definition","book_id")
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&item.item_id)
            .bind(&item.lemma)
            .bind(&item.definition)
            .bind(&item.book_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_record(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> Result<Option<MemoryRecord>, StoreError> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "learner_id" = ? AND "item_id" = ? LIMIT 1"#
        );
        let row = sqlx::query(&sql)
            .bind(learner_id)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(map_record_row))
    }

    async fn due_records(
        &self,
        learner_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "learner_id" = ? AND "due_at" <= ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(learner_id)
            .bind(as_of)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(map_record_row).collect())
    }

    async fn learner_records(&self, learner_id: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        let sql =
            format!(r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "learner_id" = ?"#);
        let rows = sqlx::query(&sql)
            .bind(learner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().filter_map(map_record_row).collect())
    }

    async fn upsert_records(&self, records: &[MemoryRecord]) -> Result<UpsertReport, StoreError> {
        // A connection-level failure before any write is a transient outage:
        // the whole batch stays retryable.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut report = UpsertReport::default();
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO "memory_records"
                  ("learner_id","item_id","stability","difficulty","state","review_count",
                   "consecutive_successes","due_at","last_reviewed_at","created_at","updated_at")
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT ("learner_id","item_id") DO UPDATE SET
                  "stability" = excluded."stability",
                  "difficulty" = excluded."difficulty",
                  "state" = excluded."state",
                  "review_count" = excluded."review_count",
                  "consecutive_successes" = excluded."consecutive_successes",
                  "due_at" = excluded."due_at",
                  "last_reviewed_at" = excluded."last_reviewed_at",
                  "updated_at" = excluded."updated_at"
                WHERE excluded."review_count" >= "memory_records"."review_count"
                "#,
            )
            .bind(&record.learner_id)
            .bind(&record.item_id)
            .bind(record.stability)
            .bind(record.difficulty)
            .bind(record.state.as_str())
            .bind(record.review_count)
            .bind(record.consecutive_successes)
            .bind(record.due_at)
            .bind(record.last_reviewed_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *conn)
            .await;

            match result {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    warn!(item_id = %record.item_id, error = %e, "record upsert failed");
                    report.failed_ids.push(record.item_id.clone());
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl VocabSource for SqliteStore {
    async fn fetch_candidates(
        &self,
        _learner_id: &str,
        book_id: Option<&str>,
        offset: i64,
        limit: i64,
        filter: Option<&str>,
    ) -> Result<Vec<VocabItem>, StoreError> {
        let mut sql = String::from(
            r#"SELECT "item_id","lemma","definition","book_id" FROM "vocab_items" WHERE 1=1"#,
        );
        if book_id.is_some() {
            sql.push_str(r#" AND "book_id" = ?"#);
        }
        if filter.is_some() {
            sql.push_str(r#" AND "lemma" LIKE ?"#);
        }
        sql.push_str(r#" ORDER BY "rowid" LIMIT ? OFFSET ?"#);

        let mut query = sqlx::query(&sql);
        if let Some(book) = book_id {
            query = query.bind(book);
        }
        if let Some(prefix) = filter {
            query = query.bind(format!("{prefix}%"));
        }
        let rows = query
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| VocabItem {
                item_id: row.get("item_id"),
                lemma: row.get("lemma"),
                definition: row.try_get("definition").ok(),
                book_id: row.try_get("book_id").ok(),
            })
            .collect())
    }
}

fn map_record_row(row: &SqliteRow) -> Option<MemoryRecord> {
    let state_raw: String = row.try_get("state").ok()?;
    let Some(state) = RecordState::parse(&state_raw) else {
        warn!(state = %state_raw, "unknown record state in store, skipping row");
        return None;
    };
    Some(MemoryRecord {
        learner_id: row.try_get("learner_id").ok()?,
        item_id: row.try_get("item_id").ok()?,
        stability: row.try_get("stability").ok()?,
        difficulty: row.try_get("difficulty").ok()?,
        state,
        review_count: row.try_get("review_count").ok()?,
        consecutive_successes: row.try_get("consecutive_successes").ok()?,
        due_at: row.try_get("due_at").ok()?,
        last_reviewed_at: row.try_get("last_reviewed_at").ok(),
        created_at: row.try_get("created_at").ok()?,
        updated_at: row.try_get("updated_at").ok()?,
    })
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    info!("running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "_migrations" (
            "id" INTEGER PRIMARY KEY AUTOINCREMENT,
            "name" TEXT NOT NULL UNIQUE,
            "applied_at" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Vec<String> =
        sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
            .fetch_all(pool)
            .await?;

    let migrations = [("001_init_schema", INIT_SCHEMA_SQL)];

    for (name, sql) in migrations {
        if applied.iter().any(|m| m == name) {
            continue;
        }
        info!(migration = name, "applying migration");
        for statement in split_statements(sql) {
            sqlx::query(&statement).execute(pool).await?;
        }
        sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES (?)"#)
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}

fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const INIT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "memory_records" (
    "learner_id" TEXT NOT NULL,
    "item_id" TEXT NOT NULL,
    "stability" REAL NOT NULL,
    "difficulty" REAL NOT NULL,
    "state" TEXT NOT NULL DEFAULT 'new',
    "review_count" INTEGER NOT NULL DEFAULT 0,
    "consecutive_successes" INTEGER NOT NULL DEFAULT 0,
    "due_at" TEXT NOT NULL,
    "last_reviewed_at" TEXT,
    "created_at" TEXT NOT NULL,
    "updated_at" TEXT NOT NULL,
    PRIMARY KEY ("learner_id","item_id")
);

CREATE INDEX IF NOT EXISTS "idx_memory_records_due"
    ON "memory_records" ("learner_id","due_at");

CREATE TABLE IF NOT EXISTS "vocab_items" (
    "item_id" TEXT PRIMARY KEY,
    "lemma" TEXT NOT NULL,
    "definition" TEXT,
    "book_id" TEXT
);

CREATE INDEX IF NOT EXISTS "idx_vocab_items_book"
    ON "vocab_items" ("book_id")
"#;
