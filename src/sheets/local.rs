use crate::archive::util::{file_safe_name, write_atomic};
use crate::sheets::cell::CellRef;
use crate::sheets::{SheetStore, SheetTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Spreadsheet stand-in backed by one JSON cell grid per sheet under
/// `<dir>/<document>/`.
pub struct LocalSheets {
    root: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Grid {
    cells: Vec<Vec<String>>,
}

impl Grid {
    fn place(&mut self, start: CellRef, rows: &[Vec<String>]) {
        let first_row = start.row.saturating_sub(1) as usize;
        let first_col = start.col as usize;
        if self.cells.len() < first_row + rows.len() {
            self.cells.resize(first_row + rows.len(), Vec::new());
        }
        for (offset, values) in rows.iter().enumerate() {
            let row = &mut self.cells[first_row + offset];
            if row.len() < first_col + values.len() {
                row.resize(first_col + values.len(), String::new());
            }
            for (i, value) in values.iter().enumerate() {
                row[first_col + i] = value.clone();
            }
        }
    }
}

impl LocalSheets {
    pub fn new(dir: PathBuf, document: &str) -> Self {
        Self {
            root: dir.join(file_safe_name(document)),
        }
    }

    fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_safe_name(sheet)))
    }

    fn load(&self, sheet: &str) -> Result<Option<Grid>> {
        let path = self.sheet_path(sheet);
        if !path.exists() {
            return Ok(None);
        }
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let grid = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(grid))
    }

    fn save(&self, sheet: &str, grid: &Grid) -> Result<()> {
        let data = serde_json::to_string_pretty(grid)?;
        write_atomic(&self.sheet_path(sheet), format!("{data}\n").as_bytes())
    }
}

impl SheetStore for LocalSheets {
    fn read_table(&self, sheet: &str, start_row: u32) -> Result<SheetTable> {
        let Some(grid) = self.load(sheet)? else {
            return Ok(SheetTable::default());
        };
        let skip = start_row.saturating_sub(1) as usize;
        Ok(SheetTable::from_grid(grid.cells.into_iter().skip(skip).collect()))
    }

    fn write_table(
        &self,
        table: &SheetTable,
        sheet: &str,
        start: CellRef,
        replace: bool,
    ) -> Result<()> {
        let mut grid = if replace {
            Grid::default()
        } else {
            self.load(sheet)?.unwrap_or_default()
        };
        grid.place(start, &table.to_grid());
        self.save(sheet, &grid)
    }

    fn update_cells(&self, sheet: &str, start: CellRef, values: &[String]) -> Result<()> {
        let mut grid = self.load(sheet)?.unwrap_or_default();
        grid.place(start, &[values.to_vec()]);
        self.save(sheet, &grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn missing_sheet_reads_as_empty() {
        let tmp = tempdir().expect("tempdir");
        let store = LocalSheets::new(tmp.path().to_path_buf(), "doc");
        assert!(store.read_table("general", 3).expect("read").is_empty());
    }

    #[test]
    fn table_and_marker_round_trip_through_start_row() {
        let tmp = tempdir().expect("tempdir");
        let store = LocalSheets::new(tmp.path().to_path_buf(), "doc");
        let table = SheetTable {
            header: strings(&["ts", "text"]),
            rows: vec![strings(&["100", "a"]), strings(&["200", "b"])],
        };

        store
            .write_table(&table, "general", CellRef::new(0, 3), true)
            .expect("write");
        store
            .update_cells(
                "general",
                CellRef::new(0, 1),
                &strings(&["Last merged on:", "2024-01-01"]),
            )
            .expect("marker");

        assert_eq!(store.read_table("general", 3).expect("read"), table);
        let marker = store.read_table("general", 1).expect("read marker");
        assert_eq!(marker.header, strings(&["Last merged on:", "2024-01-01"]));
    }

    #[test]
    fn replace_clears_previous_rows() {
        let tmp = tempdir().expect("tempdir");
        let store = LocalSheets::new(tmp.path().to_path_buf(), "doc");
        let long = SheetTable {
            header: strings(&["ts"]),
            rows: vec![strings(&["1"]), strings(&["2"]), strings(&["3"])],
        };
        let short = SheetTable {
            header: strings(&["ts"]),
            rows: vec![strings(&["9"])],
        };
        store.write_table(&long, "s", CellRef::new(0, 3), true).expect("long");
        store.write_table(&short, "s", CellRef::new(0, 3), true).expect("short");
        assert_eq!(store.read_table("s", 3).expect("read"), short);
    }
}
