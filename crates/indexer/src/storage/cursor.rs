//! Per-chain block cursors.
//!
//! Writes through [`Storage::advance_cursor`] never move a cursor backwards;
//! only [`Storage::reset_cursor`] may, and it is reserved for operator resets.

use super::{unix_now, CursorKind, CursorStatus, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Read a cursor, `None` when never written.
    pub async fn get_cursor(&self, chain_id: u64, kind: CursorKind) -> Result<Option<u64>> {
        Ok(self
            .get_cursor_status(chain_id, kind)
            .await?
            .map(|status| status.last_block))
    }

    /// Read a cursor together with its last write time.
    pub async fn get_cursor_status(
        &self,
        chain_id: u64,
        kind: CursorKind,
    ) -> Result<Option<CursorStatus>> {
        let row = sqlx::query(
            r#"
            SELECT last_block, updated_at
            FROM cursors
            WHERE chain_id = ? AND kind = ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch cursor")?;

        Ok(row.map(|row| CursorStatus {
            last_block: row.get::<i64, _>("last_block") as u64,
            updated_at: row.get("updated_at"),
        }))
    }

    /// Move a cursor forward.
    ///
    /// Returns `false` when the stored value is already `>= block`; the row
    /// is left untouched in that case.
    pub async fn advance_cursor(&self, chain_id: u64, kind: CursorKind, block: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO cursors (chain_id, kind, last_block, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chain_id, kind) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at
            WHERE excluded.last_block > cursors.last_block
            "#,
        )
        .bind(chain_id as i64)
        .bind(kind.as_str())
        .bind(block as i64)
        .bind(unix_now())
        .execute(&self.pool)
        .await
        .context("Failed to advance cursor")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite a cursor unconditionally.
    pub async fn reset_cursor(&self, chain_id: u64, kind: CursorKind, block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cursors (chain_id, kind, last_block, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chain_id, kind) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chain_id as i64)
        .bind(kind.as_str())
        .bind(block as i64)
        .bind(unix_now())
        .execute(&self.pool)
        .await
        .context("Failed to reset cursor")?;

        Ok(())
    }

    /// Chains that have a `logs` cursor, ascending.
    pub async fn list_chains(&self) -> Result<Vec<u64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT chain_id FROM cursors WHERE kind = ? ORDER BY chain_id",
        )
        .bind(CursorKind::Logs.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list chains")?;

        Ok(ids.into_iter().map(|id| id as u64).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::storage;
    use crate::storage::CursorKind;

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let (storage, _file) = storage().await;

        assert_eq!(storage.get_cursor(1, CursorKind::Logs).await.unwrap(), None);

        assert!(storage.advance_cursor(1, CursorKind::Logs, 100).await.unwrap());
        assert!(!storage.advance_cursor(1, CursorKind::Logs, 50).await.unwrap());
        assert!(!storage.advance_cursor(1, CursorKind::Logs, 100).await.unwrap());
        assert_eq!(storage.get_cursor(1, CursorKind::Logs).await.unwrap(), Some(100));

        assert!(storage.advance_cursor(1, CursorKind::Logs, 101).await.unwrap());
        assert_eq!(storage.get_cursor(1, CursorKind::Logs).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn test_cursor_kinds_and_chains_are_independent() {
        let (storage, _file) = storage().await;

        storage.advance_cursor(1, CursorKind::Logs, 10).await.unwrap();
        storage.advance_cursor(1, CursorKind::NftOwnership, 99).await.unwrap();
        storage.advance_cursor(137, CursorKind::Logs, 5).await.unwrap();

        assert_eq!(storage.get_cursor(1, CursorKind::Logs).await.unwrap(), Some(10));
        assert_eq!(
            storage.get_cursor(1, CursorKind::NftOwnership).await.unwrap(),
            Some(99)
        );
        assert_eq!(storage.list_chains().await.unwrap(), vec![1, 137]);
    }

    #[tokio::test]
    async fn test_reset_cursor_moves_backwards() {
        let (storage, _file) = storage().await;

        storage.advance_cursor(1, CursorKind::Logs, 500).await.unwrap();
        storage.reset_cursor(1, CursorKind::Logs, 7).await.unwrap();
        assert_eq!(storage.get_cursor(1, CursorKind::Logs).await.unwrap(), Some(7));
    }
}
