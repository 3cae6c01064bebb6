//! DDO document store.
//!
//! Documents are stored as JSON text keyed by did. Field filters use SQLite's
//! `json_extract`, so any path inside the document can be searched.

use super::{unix_now, DocumentQuery, Storage};
use anyhow::{Context, Result};
use ddocache_core::did::lowercase_address;
use ddocache_core::{AssetRecord, Did};
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite};

impl Storage {
    /// Fetch the raw stored document.
    pub async fn get_ddo(&self, id: &Did) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT document FROM ddos WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch ddo")?;

        row.map(|row| {
            let text: String = row.get("document");
            serde_json::from_str(&text).context("Stored ddo is not valid JSON")
        })
        .transpose()
    }

    /// Fetch and decode a stored asset.
    pub async fn get_asset(&self, id: &Did) -> Result<Option<AssetRecord>> {
        let row = sqlx::query("SELECT chain_id, document FROM ddos WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch ddo")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let chain_id = row.get::<i64, _>("chain_id") as u64;
        let text: String = row.get("document");
        let doc: Value = serde_json::from_str(&text).context("Stored ddo is not valid JSON")?;
        let record = AssetRecord::from_document(chain_id, doc)
            .with_context(|| format!("Stored ddo {} does not match the asset model", id))?;
        Ok(Some(record))
    }

    /// Insert or replace an asset.
    pub async fn put_asset(&self, record: &AssetRecord) -> Result<()> {
        let document = record
            .to_document()
            .context("Failed to render asset document")?;
        self.put_ddo(
            &record.id,
            record.chain_id,
            &lowercase_address(&record.nft.address),
            &document,
        )
        .await
    }

    /// Insert or replace an asset written by an event processor.
    ///
    /// Reconciliation owns `purgatory` and `stats.allocated` and writes them
    /// with [`Storage::set_field`] at any time, so the stored values win over
    /// the ones in `record`. A record without `purgatory` (soft-deleted) drops
    /// the stored flag.
    pub async fn put_asset_keeping_overlays(&self, record: &AssetRecord) -> Result<()> {
        let document = record
            .to_document()
            .context("Failed to render asset document")?;
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT INTO ddos (id, chain_id, nft_address, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                chain_id = excluded.chain_id,
                nft_address = excluded.nft_address,
                document = json_set(
                    CASE
                        WHEN json_type(excluded.document, '$.purgatory') IS NULL
                            OR json_type(ddos.document, '$.purgatory') IS NULL
                        THEN excluded.document
                        ELSE json_set(
                            excluded.document,
                            '$.purgatory',
                            json(json_extract(ddos.document, '$.purgatory'))
                        )
                    END,
                    '$.stats.allocated',
                    COALESCE(
                        json_extract(ddos.document, '$.stats.allocated'),
                        json_extract(excluded.document, '$.stats.allocated')
                    )
                ),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.chain_id as i64)
        .bind(lowercase_address(&record.nft.address))
        .bind(document.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to store ddo")?;

        Ok(())
    }

    /// Insert or replace a raw document.
    pub async fn put_ddo(
        &self,
        id: &Did,
        chain_id: u64,
        nft_address: &str,
        document: &Value,
    ) -> Result<()> {
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT INTO ddos (id, chain_id, nft_address, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                chain_id = excluded.chain_id,
                nft_address = excluded.nft_address,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(chain_id as i64)
        .bind(nft_address.to_ascii_lowercase())
        .bind(document.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to store ddo")?;

        Ok(())
    }

    /// Replace the document of an existing row. Returns `false` if absent.
    pub async fn update_ddo(&self, id: &Did, document: &Value) -> Result<bool> {
        let result = sqlx::query("UPDATE ddos SET document = ?, updated_at = ? WHERE id = ?")
            .bind(document.to_string())
            .bind(unix_now())
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to update ddo")?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite one path inside a stored document, leaving the rest as is.
    ///
    /// Used by reconciliation, which owns `purgatory`, `stats.allocated` and
    /// `nft.owner`. Returns `false` if absent.
    pub async fn set_field(&self, id: &Did, json_path: &str, value: &Value) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ddos SET document = json_set(document, ?, json(?)), updated_at = ? WHERE id = ?",
        )
        .bind(json_path)
        .bind(value.to_string())
        .bind(unix_now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to set {} on ddo", json_path))?;

        Ok(result.rows_affected() > 0)
    }

    /// dids whose purgatory overlay is set, ordered by did.
    pub async fn purgatory_flagged(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT id FROM ddos WHERE json_extract(document, '$.purgatory.state') = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list purgatory flags")
    }

    /// Hard-delete a document. Returns `false` if absent.
    pub async fn delete_ddo(&self, id: &Did) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ddos WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to delete ddo")?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether a document exists for `id`.
    pub async fn ddo_exists(&self, id: &Did) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ddos WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check ddo existence")?;

        Ok(found.is_some())
    }

    /// Number of stored documents.
    pub async fn count_ddos(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ddos")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count ddos")?;

        Ok(count as u64)
    }

    /// Search documents, ordered by did.
    pub async fn search_ddos(&self, query: &DocumentQuery) -> Result<Vec<Value>> {
        Ok(self
            .fetch_matching(query)
            .await?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    /// Search and decode matching assets.
    pub async fn search_assets(&self, query: &DocumentQuery) -> Result<Vec<AssetRecord>> {
        self.fetch_matching(query)
            .await?
            .into_iter()
            .map(|(chain_id, doc)| {
                AssetRecord::from_document(chain_id, doc)
                    .context("Stored ddo does not match the asset model")
            })
            .collect()
    }

    async fn fetch_matching(&self, query: &DocumentQuery) -> Result<Vec<(u64, Value)>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT chain_id, document FROM ddos WHERE 1 = 1");

        if let Some(chain_id) = query.chain_id {
            builder.push(" AND chain_id = ").push_bind(chain_id as i64);
        }
        for (path, value) in &query.equals {
            builder
                .push(" AND lower(json_extract(document, ")
                .push_bind(path.clone())
                .push(")) = lower(")
                .push_bind(value.clone())
                .push(")");
        }
        if let Some(text) = &query.text {
            builder
                .push(" AND document LIKE ")
                .push_bind(format!("%{}%", text));
        }
        builder.push(" ORDER BY id");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to search ddos")?;

        rows.into_iter()
            .map(|row| {
                let chain_id = row.get::<i64, _>("chain_id") as u64;
                let text: String = row.get("document");
                let doc: Value =
                    serde_json::from_str(&text).context("Stored ddo is not valid JSON")?;
                Ok::<_, anyhow::Error>((chain_id, doc))
            })
            .collect()
    }
}
