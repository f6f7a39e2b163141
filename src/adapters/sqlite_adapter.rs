//! SQLite adapter: candles plus run state (decisions, trades, positions,
//! snapshots, cost log), all keyed by `run_id`.

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};

use crate::domain::budget::CostLogEntry;
use crate::domain::decision::Decision;
use crate::domain::error::TradeloomError;
use crate::domain::ohlcv::{Candle, CandleSeries};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::position::{Position, Side, Trade};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataPort;
use crate::ports::persistence_port::PersistencePort;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS candles (
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (symbol, timeframe, timestamp)
);
CREATE TABLE IF NOT EXISTS decisions (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    action TEXT NOT NULL,
    quantity REAL,
    price REAL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    approved INTEGER NOT NULL,
    source TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_run ON decisions(run_id);
CREATE TABLE IF NOT EXISTS trades (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    decision_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    price REAL NOT NULL,
    commission REAL NOT NULL,
    timestamp TEXT NOT NULL,
    realized_pnl REAL
);
CREATE INDEX IF NOT EXISTS idx_trades_run ON trades(run_id);
CREATE TABLE IF NOT EXISTS positions (
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    quantity REAL NOT NULL,
    avg_entry_price REAL NOT NULL,
    unrealized_pnl REAL NOT NULL,
    opened_at TEXT NOT NULL,
    PRIMARY KEY (run_id, symbol)
);
CREATE TABLE IF NOT EXISTS snapshots (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    cash REAL NOT NULL,
    total_equity REAL NOT NULL,
    unrealized_pnl REAL NOT NULL,
    realized_pnl REAL NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_run ON snapshots(run_id);
CREATE TABLE IF NOT EXISTS cost_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    tier TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    tokens_in INTEGER NOT NULL,
    tokens_out INTEGER NOT NULL,
    estimated_cost REAL NOT NULL,
    cost REAL NOT NULL,
    latency_ms INTEGER NOT NULL,
    outcome TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cost_log_run ON cost_log(run_id);
CREATE INDEX IF NOT EXISTS idx_cost_log_time ON cost_log(timestamp);";

/// Clones share one pool.
#[derive(Clone)]
pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> TradeloomError {
    TradeloomError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> TradeloomError {
    TradeloomError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn ts_column(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_err(column, e))
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeloomError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| TradeloomError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    /// Single-connection in-memory database; every pooled connection to
    /// `:memory:` would otherwise be a separate database.
    pub fn in_memory() -> Result<Self, TradeloomError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradeloomError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TradeloomError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    pub fn insert_candles(&self, timeframe: &str, candles: &[Candle]) -> Result<(), TradeloomError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for candle in candles {
            tx.execute(
                "INSERT OR REPLACE INTO candles (symbol, timeframe, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    candle.symbol,
                    timeframe,
                    ts_text(candle.timestamp),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn query_candles(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Candle>, TradeloomError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(query_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(Candle {
                    symbol: row.get(0)?,
                    timestamp: ts_column(row, 1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl MarketDataPort for SqliteAdapter {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CandleSeries, TradeloomError> {
        let candles = self.query_candles(
            "SELECT symbol, timestamp, open, high, low, close, volume
             FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND timestamp >= ?3 AND timestamp <= ?4
             ORDER BY timestamp ASC",
            &[&symbol, &timeframe, &ts_text(start), &ts_text(end)],
        )?;
        Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
    }

    fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: &str,
        end: DateTime<Utc>,
        count: usize,
    ) -> Result<CandleSeries, TradeloomError> {
        let candles = self.query_candles(
            "SELECT symbol, timestamp, open, high, low, close, volume
             FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND timestamp <= ?3
             ORDER BY timestamp DESC
             LIMIT ?4",
            &[&symbol, &timeframe, &ts_text(end), &(count as i64)],
        )?;
        Ok(CandleSeries::from_candles(symbol, timeframe, candles)?)
    }
}

impl PersistencePort for SqliteAdapter {
    fn save_decision(&self, decision: &Decision) -> Result<(), TradeloomError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO decisions
                 (id, run_id, symbol, action, quantity, price, confidence, reasoning, approved, source, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    decision.id(),
                    decision.run_id(),
                    decision.symbol(),
                    decision.action().to_string(),
                    decision.quantity(),
                    decision.price(),
                    decision.confidence(),
                    decision.reasoning(),
                    decision.approved(),
                    decision.source().to_string(),
                    ts_text(decision.timestamp()),
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn decision_count(&self, run_id: &str) -> Result<u64, TradeloomError> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM decisions WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count.max(0) as u64)
    }

    fn append_trade(&self, trade: &Trade) -> Result<(), TradeloomError> {
        self.conn()?
            .execute(
                "INSERT INTO trades
                 (run_id, decision_id, symbol, side, quantity, price, commission, timestamp, realized_pnl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    trade.run_id,
                    trade.decision_id,
                    trade.symbol,
                    trade.side.to_string(),
                    trade.quantity,
                    trade.price,
                    trade.commission,
                    ts_text(trade.timestamp),
                    trade.realized_pnl,
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn save_positions(&self, run_id: &str, positions: &[Position]) -> Result<(), TradeloomError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute("DELETE FROM positions WHERE run_id = ?1", params![run_id])
            .map_err(query_err)?;
        for position in positions {
            tx.execute(
                "INSERT INTO positions (run_id, symbol, quantity, avg_entry_price, unrealized_pnl, opened_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    position.symbol,
                    position.quantity,
                    position.avg_entry_price,
                    position.unrealized_pnl,
                    ts_text(position.opened_at),
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), TradeloomError> {
        self.conn()?
            .execute(
                "INSERT INTO snapshots (run_id, cash, total_equity, unrealized_pnl, realized_pnl, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.run_id,
                    snapshot.cash,
                    snapshot.total_equity,
                    snapshot.unrealized_pnl,
                    snapshot.realized_pnl,
                    ts_text(snapshot.timestamp),
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn append_cost_log(&self, entries: &[CostLogEntry]) -> Result<(), TradeloomError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for entry in entries {
            tx.execute(
                "INSERT INTO cost_log
                 (run_id, stage, tier, attempt, tokens_in, tokens_out, estimated_cost, cost, latency_ms, outcome, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.run_id,
                    entry.stage,
                    entry.tier.to_string(),
                    entry.attempt,
                    entry.tokens_in as i64,
                    entry.tokens_out as i64,
                    entry.estimated_cost,
                    entry.cost,
                    entry.latency_ms as i64,
                    entry.outcome.to_string(),
                    ts_text(entry.timestamp),
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    fn cost_since(&self, since: DateTime<Utc>) -> Result<(u64, f64), TradeloomError> {
        let (tokens, cost): (i64, f64) = self
            .conn()?
            .query_row(
                "SELECT COALESCE(SUM(tokens_in + tokens_out), 0), COALESCE(SUM(cost), 0.0)
                 FROM cost_log WHERE timestamp >= ?1",
                params![ts_text(since)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(query_err)?;
        Ok((tokens.max(0) as u64, cost))
    }

    fn load_trades(&self, run_id: &str) -> Result<Vec<Trade>, TradeloomError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, decision_id, symbol, side, quantity, price, commission, timestamp, realized_pnl
                 FROM trades WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let side: String = row.get(3)?;
                let side = side.parse::<Side>().map_err(|e| {
                    conversion_err(3, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                })?;
                Ok(Trade {
                    run_id: row.get(0)?,
                    decision_id: row.get(1)?,
                    symbol: row.get(2)?,
                    side,
                    quantity: row.get(4)?,
                    price: row.get(5)?,
                    commission: row.get(6)?,
                    timestamp: ts_column(row, 7)?,
                    realized_pnl: row.get(8)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn load_positions(&self, run_id: &str) -> Result<Vec<Position>, TradeloomError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, quantity, avg_entry_price, unrealized_pnl, opened_at
                 FROM positions WHERE run_id = ?1 ORDER BY symbol",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(Position {
                    symbol: row.get(0)?,
                    quantity: row.get(1)?,
                    avg_entry_price: row.get(2)?,
                    unrealized_pnl: row.get(3)?,
                    opened_at: ts_column(row, 4)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn latest_snapshot(&self, run_id: &str) -> Result<Option<PortfolioSnapshot>, TradeloomError> {
        self.conn()?
            .query_row(
                "SELECT run_id, cash, total_equity, unrealized_pnl, realized_pnl, timestamp
                 FROM snapshots WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![run_id],
                |row| {
                    Ok(PortfolioSnapshot {
                        run_id: row.get(0)?,
                        cash: row.get(1)?,
                        total_equity: row.get(2)?,
                        unrealized_pnl: row.get(3)?,
                        realized_pnl: row.get(4)?,
                        timestamp: ts_column(row, 5)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }
}
