use crate::archive::timestamp::Timestamp;
use crate::error::ArchiveError;
use crate::sheets::SheetTable;
use crate::slack::ChatApi;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub const READABLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const COL_TS: &str = "ts";
const COL_USER: &str = "user";
const COL_USERNAME: &str = "username";
const COL_TEXT: &str = "text";
const COL_THREAD_TS: &str = "thread_ts";
const COL_READABLE_TIME: &str = "readable_time";
const COL_DATE: &str = "date";
const COL_ARCHIVE_TIME: &str = "archive_time";

const FIXED_COLUMNS: [&str; 8] = [
    COL_TS,
    COL_USER,
    COL_USERNAME,
    COL_TEXT,
    COL_THREAD_TS,
    COL_READABLE_TIME,
    COL_DATE,
    COL_ARCHIVE_TIME,
];

/// Outcome of resolving a message author's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Username {
    Resolved(String),
    /// The lookup was attempted and failed.
    Unresolved,
    /// The message carries no user id.
    NoUser,
}

impl Username {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Resolved(name) => Some(name),
            Self::Unresolved | Self::NoUser => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMessage {
    pub ts: Timestamp,
    pub user: Option<String>,
    pub thread_ts: Option<Timestamp>,
    pub text: Option<String>,
    pub readable_time: NaiveDateTime,
    pub date: NaiveDate,
    pub archive_time: Option<DateTime<Utc>>,
    pub username: Username,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    pub min: Timestamp,
    pub max: Timestamp,
}

/// Messages of one channel, ordered by `ts`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelTable {
    pub rows: Vec<EnrichedMessage>,
}

impl ChannelTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn bounds(&self) -> Option<WindowBounds> {
        let min = self.rows.iter().map(|r| &r.ts).min()?;
        let max = self.rows.iter().map(|r| &r.ts).max()?;
        Some(WindowBounds {
            min: min.clone(),
            max: max.clone(),
        })
    }

    #[cfg(test)]
    pub fn timestamps(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.ts.as_str()).collect()
    }
}

fn calendar_fields(ts: &Timestamp) -> Option<(NaiveDateTime, NaiveDate)> {
    let utc = ts.to_utc()?;
    let readable = DateTime::from_timestamp(utc.timestamp(), 0)?.naive_utc();
    Some((readable, readable.date()))
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn invalid_message(reason: String) -> anyhow::Error {
    ArchiveError::chat_api("conversations.history", reason).into()
}

fn message_from_json(
    raw: &Value,
    archive_time: DateTime<Utc>,
    username: impl FnOnce(Option<&str>) -> Username,
) -> Result<EnrichedMessage> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid_message("message is not a JSON object".to_string()))?;
    let ts_value = object.get(COL_TS).unwrap_or(&Value::Null);
    let ts = Timestamp::from_json(ts_value)
        .ok_or_else(|| invalid_message(format!("message has invalid ts {ts_value}")))?;
    let thread_ts = match object.get(COL_THREAD_TS) {
        None | Some(Value::Null) => None,
        Some(value) => Some(Timestamp::from_json(value).ok_or_else(|| {
            invalid_message(format!("message {ts} has invalid thread_ts {value}"))
        })?),
    };
    let (readable_time, date) = calendar_fields(&ts)
        .ok_or_else(|| invalid_message(format!("message ts {ts} is out of calendar range")))?;

    let user = non_empty(object.get(COL_USER));
    let text = object.get(COL_TEXT).and_then(Value::as_str).map(ToOwned::to_owned);
    let extra = object
        .iter()
        .filter(|(key, _)| !FIXED_COLUMNS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(EnrichedMessage {
        username: username(user.as_deref()),
        ts,
        user,
        thread_ts,
        text,
        readable_time,
        date,
        archive_time: Some(archive_time),
        extra,
    })
}

/// Turn one page of raw platform messages into an ordered [`ChannelTable`].
///
/// Every row shares `archive_time`. Usernames are looked up per row; a
/// failed lookup marks only that row [`Username::Unresolved`]. Successful
/// lookups are reused within the call, failed ones are retried for the next
/// row that needs them.
pub fn enrich(raw: &[Value], archive_time: DateTime<Utc>, api: &dyn ChatApi) -> Result<ChannelTable> {
    let mut resolved: BTreeMap<String, String> = BTreeMap::new();
    let mut rows = Vec::with_capacity(raw.len());

    for message in raw {
        let row = message_from_json(message, archive_time, |user| {
            let Some(user) = user else {
                return Username::NoUser;
            };
            if let Some(name) = resolved.get(user) {
                return Username::Resolved(name.clone());
            }
            match api.get_user(user) {
                Ok(name) => {
                    resolved.insert(user.to_string(), name.clone());
                    Username::Resolved(name)
                }
                Err(err) => {
                    warn!(user, error = %format!("{err:#}"), "user lookup failed; username left empty");
                    Username::Unresolved
                }
            }
        })?;
        rows.push(row);
    }

    rows.sort_by(|a, b| a.ts.cmp(&b.ts));
    let before = rows.len();
    rows.dedup_by(|later, earlier| later.ts == earlier.ts);
    if rows.len() != before {
        warn!(
            dropped = before - rows.len(),
            "fetched window repeated message timestamps; kept first occurrence"
        );
    }

    Ok(ChannelTable { rows })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fixed columns first, then every passthrough field seen in any row.
pub fn to_sheet(table: &ChannelTable) -> SheetTable {
    let extra_columns: BTreeSet<&str> = table
        .rows
        .iter()
        .flat_map(|r| r.extra.keys().map(String::as_str))
        .collect();

    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(extra_columns.iter().map(|c| c.to_string()));

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![
                row.ts.as_str().to_string(),
                row.user.clone().unwrap_or_default(),
                row.username.as_deref().unwrap_or_default().to_string(),
                row.text.clone().unwrap_or_default(),
                row.thread_ts
                    .as_ref()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                row.readable_time.format(READABLE_TIME_FORMAT).to_string(),
                row.date.format(DATE_FORMAT).to_string(),
                row.archive_time
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            ];
            cells.extend(
                extra_columns
                    .iter()
                    .map(|key| row.extra.get(*key).map(render_value).unwrap_or_default()),
            );
            cells
        })
        .collect();

    SheetTable { header, rows }
}

fn parse_archive_time(cell: &str) -> Option<DateTime<Utc>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(cell) {
        return Some(parsed.with_timezone(&Utc));
    }
    let legacy: Timestamp = cell.parse().ok()?;
    legacy.to_utc()
}

/// Read a previously persisted table back into typed rows.
///
/// Optional columns may be absent. A missing `ts` column or a row whose `ts`
/// does not parse is [`ArchiveError::MalformedPersistedState`].
pub fn from_sheet(sheet_name: &str, sheet: &SheetTable) -> Result<ChannelTable> {
    if sheet.header.is_empty() && sheet.rows.is_empty() {
        return Ok(ChannelTable::default());
    }
    let malformed = |reason: String| -> anyhow::Error {
        ArchiveError::MalformedPersistedState {
            sheet: sheet_name.to_string(),
            reason,
        }
        .into()
    };

    let ts_col = sheet
        .column(COL_TS)
        .ok_or_else(|| malformed("no `ts` column in header".to_string()))?;
    let col = |name: &str| sheet.column(name);
    let user_col = col(COL_USER);
    let username_col = col(COL_USERNAME);
    let text_col = col(COL_TEXT);
    let thread_col = col(COL_THREAD_TS);
    let archive_col = col(COL_ARCHIVE_TIME);
    let derived = [ts_col]
        .into_iter()
        .chain(
            [COL_USER, COL_USERNAME, COL_TEXT, COL_THREAD_TS, COL_READABLE_TIME, COL_DATE, COL_ARCHIVE_TIME]
                .iter()
                .filter_map(|c| col(*c)),
        )
        .collect::<BTreeSet<_>>();

    let mut rows = Vec::with_capacity(sheet.rows.len());
    for (index, cells) in sheet.rows.iter().enumerate() {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };
        let raw_ts = cell(Some(ts_col)).unwrap_or_default();
        let ts: Timestamp = raw_ts
            .parse()
            .map_err(|_| malformed(format!("row {} has invalid ts `{raw_ts}`", index + 1)))?;
        let thread_ts = match cell(thread_col) {
            Some(raw) => Some(raw.parse::<Timestamp>().map_err(|_| {
                malformed(format!("row {} has invalid thread_ts `{raw}`", index + 1))
            })?),
            None => None,
        };
        let (readable_time, date) = calendar_fields(&ts)
            .ok_or_else(|| malformed(format!("row {} ts {ts} is out of range", index + 1)))?;

        let user = cell(user_col).map(ToOwned::to_owned);
        let username = match (cell(username_col), &user) {
            (Some(name), _) => Username::Resolved(name.to_string()),
            (None, Some(_)) => Username::Unresolved,
            (None, None) => Username::NoUser,
        };

        let mut extra = BTreeMap::new();
        for (i, name) in sheet.header.iter().enumerate() {
            if derived.contains(&i) || name.trim().is_empty() {
                continue;
            }
            if let Some(value) = cell(Some(i)) {
                extra.insert(name.trim().to_string(), Value::String(value.to_string()));
            }
        }

        rows.push(EnrichedMessage {
            ts,
            user,
            thread_ts,
            text: cell(text_col).map(ToOwned::to_owned),
            readable_time,
            date,
            archive_time: cell(archive_col).and_then(parse_archive_time),
            username,
            extra,
        });
    }

    Ok(ChannelTable { rows })
}
