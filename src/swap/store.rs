use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};

use super::{SwapRecord, SwapStatus};

const SWAP_COLUMNS: &str = r#"
  swap_id,
  currency,
  capacity,
  buyer_pubkey,
  bolt11_invoice,
  payment_hash,
  seller_p2sh_address,
  onchain_swap_address,
  redeem_script_hex,
  timeout_block_height,
  claim_txid,
  status
"#;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_swap(&mut self, record: &SwapRecord) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO swaps ({SWAP_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    &record.swap_id,
                    &record.currency,
                    record.capacity,
                    &record.buyer_pubkey,
                    &record.bolt11_invoice,
                    &record.payment_hash,
                    &record.seller_p2sh_address,
                    &record.onchain_swap_address,
                    &record.redeem_script_hex,
                    record.timeout_block_height,
                    &record.claim_txid,
                    status_to_str(record.status),
                ],
            )
            .with_context(|| format!("insert swap {}", record.swap_id))?;
        Ok(())
    }

    pub fn get_swap(&self, swap_id: &str) -> Result<Option<SwapRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE swap_id = ?1"),
                params![swap_id],
                swap_from_row,
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))
    }

    /// Moves a `created` swap to `claimed`. Any other status is left alone.
    pub fn mark_claimed(&mut self, swap_id: &str, claim_txid: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET status = ?2, claim_txid = ?3 \
                 WHERE swap_id = ?1 AND status = ?4",
                params![
                    swap_id,
                    status_to_str(SwapStatus::Claimed),
                    claim_txid,
                    status_to_str(SwapStatus::Created),
                ],
            )
            .with_context(|| format!("mark swap claimed {swap_id}"))?;
        if rows == 1 {
            return Ok(());
        }

        match self.get_swap(swap_id)? {
            None => anyhow::bail!("swap not found: {swap_id}"),
            Some(record) => anyhow::bail!(
                "swap {swap_id} is {:?}, not claimable",
                record.status
            ),
        }
    }

    pub fn list_swaps(&self) -> Result<Vec<SwapRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SWAP_COLUMNS} FROM swaps ORDER BY swap_id"))
            .context("prepare list swaps")?;

        let rows = stmt
            .query_map([], swap_from_row)
            .context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

fn swap_from_row(row: &Row<'_>) -> rusqlite::Result<SwapRecord> {
    let capacity: i64 = row.get(2)?;
    let timeout_block_height: Option<i64> = row.get(9)?;
    let status_str: String = row.get(11)?;

    Ok(SwapRecord {
        swap_id: row.get(0)?,
        currency: row.get(1)?,
        capacity: u64::try_from(capacity).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                format!("invalid capacity {capacity}").into(),
            )
        })?,
        buyer_pubkey: row.get(3)?,
        bolt11_invoice: row.get(4)?,
        payment_hash: row.get(5)?,
        seller_p2sh_address: row.get(6)?,
        onchain_swap_address: row.get(7)?,
        redeem_script_hex: row.get(8)?,
        timeout_block_height: timeout_block_height
            .map(|height| {
                u32::try_from(height).map_err(|_| {
                    rusqlite::Error::FromSqlConversionFailure(
                        9,
                        rusqlite::types::Type::Integer,
                        format!("invalid timeout_block_height {height}").into(),
                    )
                })
            })
            .transpose()?,
        claim_txid: row.get(10)?,
        status: status_from_str(&status_str, 11)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  currency TEXT NOT NULL,
  capacity INTEGER NOT NULL,
  buyer_pubkey TEXT NOT NULL,
  bolt11_invoice TEXT NOT NULL,
  payment_hash TEXT NOT NULL UNIQUE,
  seller_p2sh_address TEXT,
  onchain_swap_address TEXT,
  redeem_script_hex TEXT,
  timeout_block_height INTEGER,
  claim_txid TEXT,
  status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_status_idx ON swaps(status);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn status_to_str(status: SwapStatus) -> &'static str {
    match status {
        SwapStatus::Created => "created",
        SwapStatus::OnchainFailed => "onchain_failed",
        SwapStatus::Claimed => "claimed",
    }
}

fn status_from_str(s: &str, col: usize) -> rusqlite::Result<SwapStatus> {
    match s {
        "created" => Ok(SwapStatus::Created),
        "onchain_failed" => Ok(SwapStatus::OnchainFailed),
        "claimed" => Ok(SwapStatus::Claimed),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown swap status: {other}").into(),
        )),
    }
}
