//! Processing state records.

use super::{DdoState, StateLookup, Storage};
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Storage {
    /// Record the outcome for `(chain, nft, tx)`, replacing any previous one.
    pub async fn record_state(&self, state: &DdoState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ddo_state (chain_id, nft_address, tx_id, did, valid, message, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, nft_address, tx_id) DO UPDATE SET
                did = excluded.did,
                valid = excluded.valid,
                message = excluded.message,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(state.chain_id as i64)
        .bind(state.nft.to_ascii_lowercase())
        .bind(state.tx.to_ascii_lowercase())
        .bind(state.did.as_deref())
        .bind(state.valid)
        .bind(&state.message)
        .bind(state.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to record ddo state")?;

        Ok(())
    }

    /// Latest state record matching the lookup, optionally restricted to a chain.
    pub async fn get_did_state(
        &self,
        chain_id: Option<u64>,
        lookup: &StateLookup,
    ) -> Result<Option<DdoState>> {
        let (column, value) = match lookup {
            StateLookup::Nft(nft) => ("nft_address", nft.to_ascii_lowercase()),
            StateLookup::Tx(tx) => ("tx_id", tx.to_ascii_lowercase()),
            StateLookup::Did(did) => ("did", did.clone()),
        };

        let sql = format!(
            r#"
            SELECT chain_id, nft_address, tx_id, did, valid, message, timestamp
            FROM ddo_state
            WHERE {column} = ? AND (? IS NULL OR chain_id = ?)
            ORDER BY timestamp DESC, rowid DESC
            LIMIT 1
            "#
        );
        let chain = chain_id.map(|id| id as i64);

        let row = sqlx::query(&sql)
            .bind(value)
            .bind(chain)
            .bind(chain)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch ddo state")?;

        Ok(row.map(Self::row_to_state))
    }

    fn row_to_state(row: SqliteRow) -> DdoState {
        DdoState {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            nft: row.get("nft_address"),
            tx: row.get("tx_id"),
            did: row.get("did"),
            valid: row.get("valid"),
            message: row.get("message"),
            timestamp: row.get("timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::storage;
    use crate::storage::{DdoState, StateLookup};

    fn state(tx: &str, valid: bool, message: &str, timestamp: i64) -> DdoState {
        DdoState {
            chain_id: 1,
            nft: "0xAbCd".into(),
            tx: tx.into(),
            did: Some("did:op:1".into()),
            valid,
            message: message.into(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_record_overwrites_same_key() {
        let (storage, _file) = storage().await;

        storage.record_state(&state("0x01", false, "retrying", 10)).await.unwrap();
        storage.record_state(&state("0x01", true, "created", 20)).await.unwrap();

        let found = storage
            .get_did_state(Some(1), &StateLookup::Tx("0x01".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(found.valid);
        assert_eq!(found.message, "created");
        assert_eq!(storage.stats().await.unwrap().state_count, 1);
    }

    #[tokio::test]
    async fn test_lookup_returns_latest() {
        let (storage, _file) = storage().await;

        storage.record_state(&state("0x01", true, "created", 10)).await.unwrap();
        storage.record_state(&state("0x02", true, "updated", 30)).await.unwrap();
        storage.record_state(&state("0x03", false, "bad hash", 20)).await.unwrap();

        let by_nft = storage
            .get_did_state(None, &StateLookup::Nft("0xABCD".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_nft.tx, "0x02");

        let by_did = storage
            .get_did_state(Some(1), &StateLookup::Did("did:op:1".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_did.message, "updated");

        let other_chain = storage
            .get_did_state(Some(5), &StateLookup::Did("did:op:1".into()))
            .await
            .unwrap();
        assert!(other_chain.is_none());
    }
}
