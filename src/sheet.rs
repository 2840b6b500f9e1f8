//! Spreadsheet abstraction.
//!
//! The runner only ever talks to a [`SheetStore`]: read all rows once, write
//! a batch of cell updates. Writes are always batched (one store call per
//! commit, never per-cell) to keep write-quota usage down on remote engines.
//!
//! Two stores ship here: an in-memory sheet for tests and a local SQLite
//! sheet for offline runs. Remote spreadsheet engines plug in behind the
//! same trait.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;

/// Rows written per transaction when flushing a large batch.
const WRITE_BATCH_SIZE: usize = 500;

// ============================================================================
// Column layout
// ============================================================================

/// Zero-based column positions for the sheet layout. Configurable because
/// real sheets drift; defaults match the standard layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub artist: usize,
    pub title: usize,
    pub primary_link: usize,
    pub secondary_link: usize,
    pub version_tag: usize,
    pub thumbnail: usize,
    pub alternate_link: usize,
    pub notes: usize,
}

impl Default for ColumnMap {
    fn default() -> Self {
        ColumnMap {
            artist: 0,
            title: 1,
            primary_link: 3,
            secondary_link: 4,
            version_tag: 6,
            thumbnail: 8,
            alternate_link: 9,
            notes: 10,
        }
    }
}

/// One cell write, zero-based column, 1-based row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    pub value: String,
}

// ============================================================================
// Store trait
// ============================================================================

pub trait SheetStore {
    /// All populated rows in order, first element being row 1. Cells beyond
    /// the populated range read as empty string, never as missing.
    fn read_all_rows(&self) -> Result<Vec<Vec<String>>>;

    /// Apply a batch of cell updates as one operation.
    fn batch_write(&mut self, updates: &[CellUpdate]) -> Result<()>;

    /// Delete every cell. Used by the dedup rewrite.
    fn clear(&mut self) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Test double and scratch sheet. Tracks how many write calls were made so
/// tests can assert batching, and can be told to fail upcoming writes.
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Vec<Vec<String>>,
    pub write_calls: usize,
    fail_next_writes: usize,
}

impl MemorySheet {
    pub fn new() -> Self {
        MemorySheet::default()
    }

    /// Seed from row literals, first literal becoming row 1.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        MemorySheet {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            write_calls: 0,
            fail_next_writes: 0,
        }
    }

    /// Make the next `n` write calls fail.
    pub fn fail_next_writes(&mut self, n: usize) {
        self.fail_next_writes = n;
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

}

impl SheetStore for MemorySheet {
    fn read_all_rows(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.rows.clone())
    }

    fn batch_write(&mut self, updates: &[CellUpdate]) -> Result<()> {
        self.write_calls += 1;
        if self.fail_next_writes > 0 {
            self.fail_next_writes -= 1;
            anyhow::bail!("simulated write failure");
        }
        for update in updates {
            if update.row == 0 {
                anyhow::bail!("cell updates are 1-based, got row 0");
            }
            if self.rows.len() < update.row {
                self.rows.resize(update.row, Vec::new());
            }
            let row = &mut self.rows[update.row - 1];
            if row.len() <= update.col {
                row.resize(update.col + 1, String::new());
            }
            row[update.col] = update.value.clone();
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Local sheet backed by a `cells(row, col, value)` table.
pub struct SqliteSheet {
    conn: Connection,
}

impl SqliteSheet {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sheet database at {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cells (
                row   INTEGER NOT NULL,
                col   INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (row, col)
            );",
        )?;
        Ok(SqliteSheet { conn })
    }
}

impl SheetStore for SqliteSheet {
    fn read_all_rows(&self) -> Result<Vec<Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT row, col, value FROM cells ORDER BY row, col")?;
        let mut rows_out: Vec<Vec<String>> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            let row: i64 = r.get(0)?;
            let col: i64 = r.get(1)?;
            let value: String = r.get(2)?;
            let (row, col) = (row as usize, col as usize);
            if row == 0 {
                continue;
            }
            if rows_out.len() < row {
                rows_out.resize(row, Vec::new());
            }
            let cells = &mut rows_out[row - 1];
            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }
        Ok(rows_out)
    }

    fn batch_write(&mut self, updates: &[CellUpdate]) -> Result<()> {
        for chunk in updates.chunks(WRITE_BATCH_SIZE) {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO cells (row, col, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT (row, col) DO UPDATE SET value = excluded.value",
                )?;
                for update in chunk {
                    stmt.execute(rusqlite::params![
                        update.row as i64,
                        update.col as i64,
                        update.value
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM cells", [])?;
        Ok(())
    }
}
