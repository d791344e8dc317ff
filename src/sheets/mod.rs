pub mod cell;
pub mod google;
pub mod local;

use crate::archive::config::{ArchiverConfig, SheetBackend};
use crate::sheets::cell::CellRef;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A header row plus data rows, all cells as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    /// First row is the header. Blank rows are dropped and short rows padded
    /// to the header width, since sheet APIs omit trailing empty cells.
    pub fn from_grid(mut grid: Vec<Vec<String>>) -> Self {
        if grid.is_empty() {
            return Self::default();
        }
        let mut header = grid.remove(0);
        while header.last().is_some_and(|h| h.trim().is_empty()) {
            header.pop();
        }
        let width = header.len();
        let rows = grid
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|mut row| {
                row.resize(width.max(row.len()), String::new());
                row.truncate(width);
                row
            })
            .collect();
        Self { header, rows }
    }

    pub fn to_grid(&self) -> Vec<Vec<String>> {
        let mut grid = Vec::with_capacity(self.rows.len() + 1);
        grid.push(self.header.clone());
        grid.extend(self.rows.iter().cloned());
        grid
    }
}

/// Spreadsheet operations used by an archive run. Every call targets one
/// spreadsheet document fixed at construction.
pub trait SheetStore {
    /// Reads the table whose header sits on `start_row`. A sheet that does
    /// not exist reads as an empty table.
    fn read_table(&self, sheet: &str, start_row: u32) -> Result<SheetTable>;

    /// Writes `table` with its header at `start`. With `replace` the sheet
    /// is cleared first; the previous content must survive a failed write.
    fn write_table(&self, table: &SheetTable, sheet: &str, start: CellRef, replace: bool)
    -> Result<()>;

    fn update_cells(&self, sheet: &str, start: CellRef, values: &[String]) -> Result<()>;
}

pub fn build_store(cfg: &ArchiverConfig) -> Result<Box<dyn SheetStore>> {
    match cfg.gsheet.backend {
        SheetBackend::Local => {
            let dir = cfg
                .gsheet
                .local_dir
                .clone()
                .context("gsheet.local_dir is required for the local backend")?;
            Ok(Box::new(local::LocalSheets::new(dir, &cfg.gsheet_name)))
        }
        SheetBackend::Google => {
            let token = cfg
                .gsheet
                .access_token
                .as_deref()
                .context("gsheet.access_token is required for the google backend")?;
            Ok(Box::new(google::GoogleSheets::new(
                &cfg.gsheet.api_base,
                &cfg.gsheet_name,
                token,
                cfg.http.timeout_secs,
            )?))
        }
    }
}
