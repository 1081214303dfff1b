// SPDX-License-Identifier: Apache-2.0, MIT

//! SQLite-backed repositories: the single embedded database file under
//! `rootDir` (see §6 of `SPEC_FULL.md`), one table per entity.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{status_as_str, status_from_str, DowntimeRepo, FeeRepo, MetricsRepo, NodeRepo,
    PayoutRepo, PingRepo, RecordRepo, RepoResult};
use crate::error::RepoError;
use crate::models::{
    Downtime, LatestBlockMetrics, Metrics, Node, Payout, Record,
};

/// Opens (creating if absent) the single database file and runs the
/// idempotent schema migration. Cheap to clone: internally an `SqlitePool`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, RepoError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(RepoError::from)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> RepoResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                node_url TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                payout_address TEXT NOT NULL,
                token TEXT NOT NULL,
                last_used INTEGER NOT NULL,
                penalized INTEGER NOT NULL,
                penalty_count INTEGER NOT NULL,
                cooldown INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pings (
                node_id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metrics (
                node_id TEXT PRIMARY KEY,
                peer_count INTEGER NOT NULL,
                best_block_height INTEGER NOT NULL,
                finalized_block_height INTEGER NOT NULL,
                target_block_height INTEGER NOT NULL,
                ready_transaction_count INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS downtimes (
                node_id TEXT NOT NULL,
                start INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                duration_secs INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS records (
                node_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS payouts (
                timestamp INTEGER NOT NULL,
                payment_details TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fees (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                balance REAL NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;

        sqlx::query("INSERT OR IGNORE INTO fees (id, balance) VALUES (0, 0.0)")
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;

        Ok(())
    }

    pub fn node_repo(&self, whitelist: Option<HashSet<String>>) -> SqliteNodeRepo {
        SqliteNodeRepo {
            pool: self.pool.clone(),
            whitelist: whitelist.map(Arc::new),
        }
    }

    pub fn ping_repo(&self) -> SqlitePingRepo {
        SqlitePingRepo {
            pool: self.pool.clone(),
        }
    }

    pub fn metrics_repo(&self) -> SqliteMetricsRepo {
        SqliteMetricsRepo {
            pool: self.pool.clone(),
        }
    }

    pub fn downtime_repo(&self) -> SqliteDowntimeRepo {
        SqliteDowntimeRepo {
            pool: self.pool.clone(),
        }
    }

    pub fn record_repo(&self) -> SqliteRecordRepo {
        SqliteRecordRepo {
            pool: self.pool.clone(),
        }
    }

    pub fn payout_repo(&self) -> SqlitePayoutRepo {
        SqlitePayoutRepo {
            pool: self.pool.clone(),
        }
    }

    pub fn fee_repo(&self) -> SqliteFeeRepo {
        SqliteFeeRepo {
            pool: self.pool.clone(),
        }
    }
}

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Node {
    Node {
        id: row.get("id"),
        node_url: row.get("node_url"),
        config_hash: row.get("config_hash"),
        payout_address: row.get("payout_address"),
        token: row.get("token"),
        last_used: row.get("last_used"),
        penalized: row.get::<i64, _>("penalized") != 0,
        penalty_count: row.get::<i64, _>("penalty_count") as u32,
        cooldown: row.get("cooldown"),
    }
}

pub struct SqliteNodeRepo {
    pool: SqlitePool,
    whitelist: Option<Arc<HashSet<String>>>,
}

#[async_trait]
impl NodeRepo for SqliteNodeRepo {
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(row.as_ref().map(row_to_node))
    }

    async fn get_all(&self) -> RepoResult<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes")
            .fetch_all(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn get_active_nodes(&self) -> RepoResult<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE penalized = 0")
            .fetch_all(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn get_penalized_nodes(&self) -> RepoResult<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE penalized = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(rows.iter().map(row_to_node).collect())
    }

    async fn save(&self, node: Node) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO nodes (id, node_url, config_hash, payout_address, token, last_used, penalized, penalty_count, cooldown)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 node_url = excluded.node_url,
                 config_hash = excluded.config_hash,
                 payout_address = excluded.payout_address,
                 token = excluded.token,
                 last_used = excluded.last_used,
                 penalized = excluded.penalized,
                 penalty_count = excluded.penalty_count,
                 cooldown = excluded.cooldown"#,
        )
        .bind(&node.id)
        .bind(&node.node_url)
        .bind(&node.config_hash)
        .bind(&node.payout_address)
        .bind(&node.token)
        .bind(node.last_used)
        .bind(node.penalized as i64)
        .bind(node.penalty_count as i64)
        .bind(node.cooldown)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }

    async fn penalize_node(&self, id: &str) -> RepoResult<Node> {
        sqlx::query("UPDATE nodes SET penalty_count = penalty_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        self.find_by_id(id).await?.ok_or(RepoError::NotFound)
    }

    async fn reward_node(&self, id: &str, now: i64) -> RepoResult<()> {
        sqlx::query("UPDATE nodes SET last_used = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn is_node_whitelisted(&self, id: &str) -> RepoResult<bool> {
        Ok(match &self.whitelist {
            None => true,
            Some(set) => set.contains(id),
        })
    }
}

pub struct SqlitePingRepo {
    pool: SqlitePool,
}

#[async_trait]
impl PingRepo for SqlitePingRepo {
    async fn find_by_node_id(&self, node_id: &str) -> RepoResult<Option<i64>> {
        let row = sqlx::query("SELECT timestamp FROM pings WHERE node_id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(row.map(|r| r.get::<i64, _>("timestamp")))
    }

    async fn save(&self, node_id: &str, timestamp: i64) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO pings (node_id, timestamp) VALUES (?, ?)
             ON CONFLICT(node_id) DO UPDATE SET timestamp = excluded.timestamp",
        )
        .bind(node_id)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }

    async fn reset_all_pings(&self) -> RepoResult<()> {
        sqlx::query("DELETE FROM pings")
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn calculate_downtime(&self, node_id: &str, now: i64) -> RepoResult<Option<i64>> {
        Ok(self
            .find_by_node_id(node_id)
            .await?
            .map(|prev| now - prev))
    }
}

pub struct SqliteMetricsRepo {
    pool: SqlitePool,
}

#[async_trait]
impl MetricsRepo for SqliteMetricsRepo {
    async fn find_by_id(&self, node_id: &str) -> RepoResult<Option<Metrics>> {
        let row = sqlx::query("SELECT * FROM metrics WHERE node_id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(row.map(|r| Metrics {
            peer_count: r.get::<i64, _>("peer_count") as u64,
            best_block_height: r.get("best_block_height"),
            finalized_block_height: r.get("finalized_block_height"),
            target_block_height: r.get("target_block_height"),
            ready_transaction_count: r.get::<i64, _>("ready_transaction_count") as u64,
            timestamp: r.get("timestamp"),
        }))
    }

    async fn save(&self, node_id: &str, metrics: Metrics) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO metrics (node_id, peer_count, best_block_height, finalized_block_height, target_block_height, ready_transaction_count, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(node_id) DO UPDATE SET
                 peer_count = excluded.peer_count,
                 best_block_height = excluded.best_block_height,
                 finalized_block_height = excluded.finalized_block_height,
                 target_block_height = excluded.target_block_height,
                 ready_transaction_count = excluded.ready_transaction_count,
                 timestamp = excluded.timestamp"#,
        )
        .bind(node_id)
        .bind(metrics.peer_count as i64)
        .bind(metrics.best_block_height)
        .bind(metrics.finalized_block_height)
        .bind(metrics.target_block_height)
        .bind(metrics.ready_transaction_count as i64)
        .bind(metrics.timestamp)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }

    async fn get_latest_block_metrics(&self) -> RepoResult<Option<LatestBlockMetrics>> {
        // The pool-best timestamp must be the observation that produced
        // best_block_height, not the newest row across all nodes, or the
        // time-adjusted lag formula's `age` never grows in a busy pool.
        let best_row = sqlx::query(
            "SELECT best_block_height, timestamp FROM metrics ORDER BY best_block_height DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(RepoError::from)?;
        let Some(best_row) = best_row else {
            return Ok(None);
        };
        let finalized: i64 =
            sqlx::query_scalar("SELECT MAX(finalized_block_height) FROM metrics")
                .fetch_one(&self.pool)
                .await
                .map_err(RepoError::from)?;
        Ok(Some(LatestBlockMetrics {
            best_block_height: best_row.get("best_block_height"),
            finalized_block_height: finalized,
            timestamp: best_row.get("timestamp"),
        }))
    }
}

pub struct SqliteDowntimeRepo {
    pool: SqlitePool,
}

#[async_trait]
impl DowntimeRepo for SqliteDowntimeRepo {
    async fn save(&self, downtime: Downtime) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO downtimes (node_id, start, end_ts, duration_secs) VALUES (?, ?, ?, ?)",
        )
        .bind(&downtime.node_id)
        .bind(downtime.start)
        .bind(downtime.end)
        .bind(downtime.duration_secs)
        .execute(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }
}

pub struct SqliteRecordRepo {
    pool: SqlitePool,
}

#[async_trait]
impl RecordRepo for SqliteRecordRepo {
    async fn save(&self, record: Record) -> RepoResult<()> {
        sqlx::query("INSERT INTO records (node_id, timestamp, status) VALUES (?, ?, ?)")
            .bind(&record.node_id)
            .bind(record.timestamp)
            .bind(status_as_str(record.status))
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn count_failed(&self, node_id: &str) -> RepoResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM records WHERE node_id = ? AND status = 'failed'")
            .bind(node_id)
            .fetch_one(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(row.get::<i64, _>("c") as u64)
    }

    async fn count_successful(&self, node_id: &str) -> RepoResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS c FROM records WHERE node_id = ? AND status = 'successful'")
            .bind(node_id)
            .fetch_one(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(row.get::<i64, _>("c") as u64)
    }

    async fn find_successful_records_inside_interval(
        &self,
        start: i64,
        end: i64,
    ) -> RepoResult<Vec<Record>> {
        let rows = sqlx::query(
            "SELECT * FROM records WHERE status = 'successful' AND timestamp >= ? AND timestamp < ?",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(RepoError::from)?;
        Ok(rows
            .iter()
            .map(|r| Record {
                node_id: r.get("node_id"),
                timestamp: r.get("timestamp"),
                status: status_from_str(r.get::<&str, _>("status")),
            })
            .collect())
    }
}

pub struct SqlitePayoutRepo {
    pool: SqlitePool,
}

#[async_trait]
impl PayoutRepo for SqlitePayoutRepo {
    async fn get_all(&self) -> RepoResult<Vec<Payout>> {
        let rows = sqlx::query("SELECT * FROM payouts ORDER BY timestamp ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(rows
            .iter()
            .map(|r| Payout {
                timestamp: r.get("timestamp"),
                payment_details: r.get("payment_details"),
            })
            .collect())
    }

    async fn save(&self, payout: Payout) -> RepoResult<()> {
        sqlx::query("INSERT INTO payouts (timestamp, payment_details) VALUES (?, ?)")
            .bind(payout.timestamp)
            .bind(&payout.payment_details)
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }
}

pub struct SqliteFeeRepo {
    pool: SqlitePool,
}

#[async_trait]
impl FeeRepo for SqliteFeeRepo {
    async fn accumulate(&self, amount: f64) -> RepoResult<()> {
        sqlx::query("UPDATE fees SET balance = balance + ? WHERE id = 0")
            .bind(amount)
            .execute(&self.pool)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn settle(&self) -> RepoResult<f64> {
        let mut tx = self.pool.begin().await.map_err(RepoError::from)?;
        let row = sqlx::query("SELECT balance FROM fees WHERE id = 0")
            .fetch_one(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        let balance: f64 = row.get("balance");
        sqlx::query("UPDATE fees SET balance = 0.0 WHERE id = 0")
            .execute(&mut *tx)
            .await
            .map_err(RepoError::from)?;
        tx.commit().await.map_err(RepoError::from)?;
        Ok(balance)
    }
}
