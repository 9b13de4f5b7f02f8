use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::semantic::{
    decode_embedding_blob, embedding_text_hash, encode_embedding_blob, normalize_whitespace,
};
use crate::util::{ensure_parent_directory, now_utc_string};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub chunk_embeddings: usize,
    pub query_embeddings: usize,
}

/// SQLite cache of chunk and query vectors keyed by model and text hash.
pub struct EmbeddingStore {
    connection: Connection,
}

pub fn query_text_hash(text: &str) -> String {
    embedding_text_hash(&normalize_whitespace(text))
}

impl EmbeddingStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_directory(path)?;

        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open embedding store: {}", path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for embedding store")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL for embedding store")?;

        let store = Self { connection };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chunk_embeddings(
                  model_id TEXT NOT NULL,
                  text_hash TEXT NOT NULL,
                  embedding BLOB NOT NULL,
                  embedding_dim INTEGER NOT NULL,
                  generated_at TEXT NOT NULL,
                  PRIMARY KEY(model_id, text_hash)
                );
                CREATE TABLE IF NOT EXISTS query_embeddings(
                  model_id TEXT NOT NULL,
                  text_hash TEXT NOT NULL,
                  query_text TEXT NOT NULL,
                  embedding BLOB NOT NULL,
                  embedding_dim INTEGER NOT NULL,
                  generated_at TEXT NOT NULL,
                  PRIMARY KEY(model_id, text_hash)
                );
                ",
            )
            .context("failed to create embedding store schema")
    }

    pub fn upsert_chunk_embeddings(
        &mut self,
        model_id: &str,
        rows: &[(String, Vec<f32>)],
    ) -> Result<usize> {
        let generated_at = now_utc_string();
        let tx = self
            .connection
            .transaction()
            .context("failed to start chunk embedding transaction")?;
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO chunk_embeddings(model_id, text_hash, embedding, embedding_dim, generated_at)
                VALUES(?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(model_id, text_hash) DO UPDATE SET
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  generated_at=excluded.generated_at
                ",
            )?;
            for (text_hash, vector) in rows {
                statement.execute(params![
                    model_id,
                    text_hash,
                    encode_embedding_blob(vector),
                    vector.len() as i64,
                    generated_at,
                ])?;
            }
        }
        tx.commit()
            .context("failed to commit chunk embedding transaction")?;

        Ok(rows.len())
    }

    pub fn load_chunk_embedding(
        &self,
        model_id: &str,
        text_hash: &str,
        expected_dim: usize,
    ) -> Result<Option<Vec<f32>>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT embedding, embedding_dim
                FROM chunk_embeddings
                WHERE model_id = ?1 AND text_hash = ?2
                LIMIT 1
                ",
                params![model_id, text_hash],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("failed to read chunk embedding")?;

        Ok(row.and_then(|(blob, dim)| {
            if dim as usize != expected_dim {
                return None;
            }
            decode_embedding_blob(&blob, expected_dim)
        }))
    }

    pub fn upsert_query_embeddings(
        &mut self,
        model_id: &str,
        rows: &[(String, Vec<f32>)],
    ) -> Result<usize> {
        let generated_at = now_utc_string();
        let tx = self
            .connection
            .transaction()
            .context("failed to start query embedding transaction")?;
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO query_embeddings(model_id, text_hash, query_text, embedding, embedding_dim, generated_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(model_id, text_hash) DO UPDATE SET
                  query_text=excluded.query_text,
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  generated_at=excluded.generated_at
                ",
            )?;
            for (query_text, vector) in rows {
                statement.execute(params![
                    model_id,
                    query_text_hash(query_text),
                    query_text,
                    encode_embedding_blob(vector),
                    vector.len() as i64,
                    generated_at,
                ])?;
            }
        }
        tx.commit()
            .context("failed to commit query embedding transaction")?;

        Ok(rows.len())
    }

    pub fn load_query_embeddings(
        &self,
        model_id: &str,
        expected_dim: usize,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut statement = self.connection.prepare(
            "
            SELECT text_hash, embedding, embedding_dim
            FROM query_embeddings
            WHERE model_id = ?1
            ORDER BY text_hash ASC
            ",
        )?;

        let mut rows = statement.query(params![model_id])?;
        let mut out = HashMap::<String, Vec<f32>>::new();
        while let Some(row) = rows.next()? {
            let text_hash: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let dim: i64 = row.get(2)?;
            if dim as usize != expected_dim {
                continue;
            }
            if let Some(vector) = decode_embedding_blob(&blob, expected_dim) {
                out.insert(text_hash, vector);
            }
        }

        Ok(out)
    }

    pub fn counts(&self, model_id: &str) -> Result<StoreCounts> {
        let count = |table: &str| -> Result<usize> {
            let value: i64 = self
                .connection
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE model_id = ?1"),
                    params![model_id],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to count rows in {table}"))?;
            Ok(value as usize)
        };

        Ok(StoreCounts {
            chunk_embeddings: count("chunk_embeddings")?,
            query_embeddings: count("query_embeddings")?,
        })
    }
}
