//! Retry queue persistence.

use super::{RetryEntry, RetryFilter, RetryKind, Storage};
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

impl Storage {
    /// Insert an entry unless one with the same id exists.
    ///
    /// Returns `true` when a new row was written.
    pub async fn insert_retry(&self, entry: &RetryEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO retry_queue (
                id, kind, chain_id, nft_address, did, params,
                number_retries, next_retry, first_added, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&entry.id)
        .bind(entry.kind.as_str())
        .bind(entry.chain_id as i64)
        .bind(entry.nft_address.as_deref().map(str::to_ascii_lowercase))
        .bind(entry.did.as_deref())
        .bind(entry.params.to_string())
        .bind(entry.number_retries as i64)
        .bind(entry.next_retry)
        .bind(entry.first_added)
        .bind(entry.last_error.as_deref())
        .execute(&self.pool)
        .await
        .context("Failed to insert retry entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one entry by id.
    pub async fn get_retry(&self, id: &str) -> Result<Option<RetryEntry>> {
        let row = sqlx::query("SELECT * FROM retry_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch retry entry")?;

        row.map(Self::row_to_retry_entry).transpose()
    }

    /// Entries of a chain whose `next_retry <= now`, oldest schedule first.
    pub async fn due_retries(&self, chain_id: u64, now: i64, limit: u32) -> Result<Vec<RetryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM retry_queue
            WHERE chain_id = ? AND next_retry <= ?
            ORDER BY next_retry, first_added
            LIMIT ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due retry entries")?;

        rows.into_iter().map(Self::row_to_retry_entry).collect()
    }

    /// Reschedule an entry after a failed replay.
    pub async fn reschedule_retry(
        &self,
        id: &str,
        number_retries: u32,
        next_retry: i64,
        last_error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE retry_queue
            SET number_retries = ?, next_retry = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(number_retries as i64)
        .bind(next_retry)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule retry entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove an entry.
    pub async fn delete_retry(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM retry_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete retry entry")?;

        Ok(result.rows_affected() > 0)
    }

    /// List entries matching a filter, oldest first.
    pub async fn list_retries(&self, filter: &RetryFilter) -> Result<Vec<RetryEntry>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM retry_queue WHERE 1 = 1");

        if let Some(chain_id) = filter.chain_id {
            builder.push(" AND chain_id = ").push_bind(chain_id as i64);
        }
        if let Some(nft) = &filter.nft_address {
            builder
                .push(" AND nft_address = ")
                .push_bind(nft.to_ascii_lowercase());
        }
        if let Some(did) = &filter.did {
            builder.push(" AND did = ").push_bind(did.clone());
        }
        if let Some(kind) = filter.kind {
            builder.push(" AND kind = ").push_bind(kind.as_str());
        }
        builder.push(" ORDER BY first_added, id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list retry entries")?;

        rows.into_iter().map(Self::row_to_retry_entry).collect()
    }

    fn row_to_retry_entry(row: SqliteRow) -> Result<RetryEntry> {
        let kind: String = row.get("kind");
        let params: String = row.get("params");

        Ok(RetryEntry {
            id: row.get("id"),
            kind: kind.parse::<RetryKind>()?,
            chain_id: row.get::<i64, _>("chain_id") as u64,
            nft_address: row.get("nft_address"),
            did: row.get("did"),
            params: serde_json::from_str(&params).context("Retry params are not valid JSON")?,
            number_retries: row.get::<i64, _>("number_retries") as u32,
            next_retry: row.get("next_retry"),
            first_added: row.get("first_added"),
            last_error: row.get("last_error"),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::storage;
    use crate::storage::{RetryEntry, RetryFilter, RetryKind};
    use serde_json::json;

    fn entry(id: &str, kind: RetryKind, chain_id: u64, next_retry: i64) -> RetryEntry {
        RetryEntry {
            id: id.to_string(),
            kind,
            chain_id,
            nft_address: Some("0xAA".to_string()),
            did: Some(format!("did:op:{id}")),
            params: json!({"chainId": chain_id}),
            number_retries: 0,
            next_retry,
            first_added: 1_000,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let (storage, _file) = storage().await;

        assert!(storage.insert_retry(&entry("a", RetryKind::Tx, 1, 10)).await.unwrap());
        let mut again = entry("a", RetryKind::Tx, 1, 99);
        again.number_retries = 5;
        assert!(!storage.insert_retry(&again).await.unwrap());

        let stored = storage.get_retry("a").await.unwrap().unwrap();
        assert_eq!(stored.number_retries, 0);
        assert_eq!(stored.next_retry, 10);
        assert_eq!(stored.nft_address.as_deref(), Some("0xaa"));
    }

    #[tokio::test]
    async fn test_due_and_reschedule() {
        let (storage, _file) = storage().await;
        storage.insert_retry(&entry("a", RetryKind::Tx, 1, 10)).await.unwrap();
        storage.insert_retry(&entry("b", RetryKind::Block, 1, 50)).await.unwrap();
        storage.insert_retry(&entry("c", RetryKind::Event, 2, 10)).await.unwrap();

        let due = storage.due_retries(1, 20, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "a");

        storage.reschedule_retry("a", 1, 100, "boom").await.unwrap();
        assert!(storage.due_retries(1, 20, 10).await.unwrap().is_empty());
        let a = storage.get_retry("a").await.unwrap().unwrap();
        assert_eq!(a.number_retries, 1);
        assert_eq!(a.last_error.as_deref(), Some("boom"));

        assert!(storage.delete_retry("a").await.unwrap());
        assert!(storage.get_retry("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (storage, _file) = storage().await;
        storage.insert_retry(&entry("a", RetryKind::Tx, 1, 10)).await.unwrap();
        storage.insert_retry(&entry("b", RetryKind::Block, 1, 50)).await.unwrap();
        storage.insert_retry(&entry("c", RetryKind::Event, 2, 10)).await.unwrap();

        let all = storage.list_retries(&RetryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let chain_one_blocks = storage
            .list_retries(&RetryFilter {
                chain_id: Some(1),
                kind: Some(RetryKind::Block),
                ..RetryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(chain_one_blocks.len(), 1);
        assert_eq!(chain_one_blocks[0].id, "b");

        let by_nft = storage
            .list_retries(&RetryFilter {
                nft_address: Some("0xAa".into()),
                ..RetryFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_nft.len(), 3);
    }
}
