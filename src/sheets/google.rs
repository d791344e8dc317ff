use crate::error::ArchiveError;
use crate::sheets::cell::CellRef;
use crate::sheets::{SheetStore, SheetTable};
use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const SCRATCH_SUFFIX: &str = "__archiver_scratch";
const MIN_GRID_COLUMNS: u32 = 26;
const GRID_ROW_HEADROOM: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SheetProps {
    id: i64,
    title: String,
}

/// Google Sheets v4 REST client for one spreadsheet document.
pub struct GoogleSheets {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    token: String,
}

fn quote_sheet(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn values_grid(json: &Value) -> Vec<Vec<String>> {
    json.get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_value).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

impl GoogleSheets {
    pub fn new(api_base: &str, spreadsheet_id: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build sheets http client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/spreadsheets", self.api_base))
            .with_context(|| format!("invalid sheets api base {}", self.api_base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("sheets api base cannot hold a path: {}", self.api_base))?
            .push(&self.spreadsheet_id)
            .extend(tail);
        Ok(url)
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        debug!(call = what, "sheets api call");
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|err| ArchiveError::Sheet(format!("{what}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ArchiveError::Sheet(format!("{what}: http status {status}: {body}")).into());
        }
        let json = response
            .json::<Value>()
            .map_err(|err| ArchiveError::Sheet(format!("{what}: invalid json: {err}")))?;
        Ok(json)
    }

    fn list_sheets(&self) -> Result<Vec<SheetProps>> {
        let url = self.url(&[])?;
        let json = self.send(
            self.client
                .get(url)
                .query(&[("fields", "sheets.properties(sheetId,title)")]),
            "spreadsheets.get",
        )?;
        let sheets = json
            .get("sheets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(sheets
            .iter()
            .filter_map(|sheet| {
                let props = sheet.get("properties")?;
                Some(SheetProps {
                    id: props.get("sheetId").and_then(Value::as_i64).unwrap_or(0),
                    title: props.get("title").and_then(Value::as_str)?.to_string(),
                })
            })
            .collect())
    }

    fn find_sheet(&self, title: &str) -> Result<Option<SheetProps>> {
        Ok(self.list_sheets()?.into_iter().find(|s| s.title == title))
    }

    fn batch_update(&self, requests: Vec<Value>, what: &str) -> Result<Value> {
        let url = self.url(&[])?;
        let url = Url::parse(&format!("{url}:batchUpdate"))
            .with_context(|| format!("invalid batchUpdate url for {}", self.spreadsheet_id))?;
        self.send(
            self.client.post(url).json(&json!({ "requests": requests })),
            what,
        )
    }

    fn add_sheet(&self, title: &str, rows: u32, cols: u32) -> Result<SheetProps> {
        let reply = self.batch_update(
            vec![json!({
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": {"rowCount": rows, "columnCount": cols}
                    }
                }
            })],
            "batchUpdate.addSheet",
        )?;
        let id = reply
            .get("replies")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(|r| r.get("addSheet"))
            .and_then(|r| r.get("properties"))
            .and_then(|p| p.get("sheetId"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ArchiveError::Sheet(format!("addSheet `{title}` returned no sheetId")))?;
        Ok(SheetProps {
            id,
            title: title.to_string(),
        })
    }

    fn delete_sheet(&self, id: i64) -> Result<()> {
        self.batch_update(
            vec![json!({"deleteSheet": {"sheetId": id}})],
            "batchUpdate.deleteSheet",
        )?;
        Ok(())
    }

    fn put_values(&self, sheet: &str, start: CellRef, grid: &[Vec<String>]) -> Result<()> {
        let range = format!("{}!{start}", quote_sheet(sheet));
        let url = self.url(&["values", &range])?;
        self.send(
            self.client
                .put(url)
                .query(&[("valueInputOption", "RAW")])
                .json(&json!({
                    "range": range,
                    "majorDimension": "ROWS",
                    "values": grid,
                })),
            "values.update",
        )?;
        Ok(())
    }

    fn ensure_sheet(&self, title: &str, rows: u32, cols: u32) -> Result<()> {
        if self.find_sheet(title)?.is_none() {
            self.add_sheet(title, rows, cols)?;
        }
        Ok(())
    }

    /// Fill a scratch sheet, then delete the old sheet and rename the
    /// scratch in one batchUpdate, which the API applies all-or-nothing.
    fn replace_atomically(&self, table: &SheetTable, sheet: &str, start: CellRef) -> Result<()> {
        let grid = table.to_grid();
        let width = grid.iter().map(Vec::len).max().unwrap_or(0) as u32;
        let rows = start.row + grid.len() as u32 + GRID_ROW_HEADROOM;
        let cols = (start.col + width).max(MIN_GRID_COLUMNS);

        let scratch_title = format!("{sheet}{SCRATCH_SUFFIX}");
        let existing = self.list_sheets()?;
        if let Some(stale) = existing.iter().find(|s| s.title == scratch_title) {
            warn!(sheet = %scratch_title, "removing leftover scratch sheet");
            self.delete_sheet(stale.id)?;
        }
        let target = existing.into_iter().find(|s| s.title == sheet);

        let scratch = self.add_sheet(&scratch_title, rows, cols)?;
        if let Err(err) = self.put_values(&scratch_title, start, &grid) {
            if let Err(cleanup) = self.delete_sheet(scratch.id) {
                warn!(sheet = %scratch_title, error = %cleanup, "failed to remove scratch sheet");
            }
            return Err(err);
        }

        let mut requests = Vec::new();
        if let Some(target) = target {
            requests.push(json!({"deleteSheet": {"sheetId": target.id}}));
        }
        requests.push(json!({
            "updateSheetProperties": {
                "properties": {"sheetId": scratch.id, "title": sheet},
                "fields": "title"
            }
        }));
        self.batch_update(requests, "batchUpdate.swapSheet")?;
        Ok(())
    }
}

impl SheetStore for GoogleSheets {
    fn read_table(&self, sheet: &str, start_row: u32) -> Result<SheetTable> {
        if self.find_sheet(sheet)?.is_none() {
            return Ok(SheetTable::default());
        }
        let range = quote_sheet(sheet);
        let url = self.url(&["values", &range])?;
        let json = self.send(
            self.client
                .get(url)
                .query(&[("valueRenderOption", "UNFORMATTED_VALUE")]),
            "values.get",
        )?;
        let skip = start_row.saturating_sub(1) as usize;
        Ok(SheetTable::from_grid(
            values_grid(&json).into_iter().skip(skip).collect(),
        ))
    }

    fn write_table(
        &self,
        table: &SheetTable,
        sheet: &str,
        start: CellRef,
        replace: bool,
    ) -> Result<()> {
        if replace {
            return self.replace_atomically(table, sheet, start);
        }
        let grid = table.to_grid();
        let width = grid.iter().map(Vec::len).max().unwrap_or(0) as u32;
        self.ensure_sheet(
            sheet,
            start.row + grid.len() as u32 + GRID_ROW_HEADROOM,
            (start.col + width).max(MIN_GRID_COLUMNS),
        )?;
        self.put_values(sheet, start, &grid)
    }

    fn update_cells(&self, sheet: &str, start: CellRef, values: &[String]) -> Result<()> {
        self.ensure_sheet(sheet, GRID_ROW_HEADROOM, MIN_GRID_COLUMNS)?;
        self.put_values(sheet, start, &[values.to_vec()])
    }
}
