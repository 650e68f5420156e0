//! Source readers
//!
//! - Relational source: every configured table read in full over one
//!   connection, closed afterwards whatever happened
//! - Spreadsheet source: one file per entity (xlsx/xls/xlsb/ods or csv);
//!   a missing or unreadable file leaves that entity absent

use crate::config::RelationalTables;
use crate::harmonize::harmonize;
use crate::rows::{excel_serial_to_datetime, parse_datetime, RowSet, Value};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use sqlx::{Connection, PgConnection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Entity {
    Orders,
    Customers,
    Employees,
    Region,
    Territories,
    EmployeeTerritories,
}

impl Entity {
    pub const ALL: [Entity; 6] = [
        Entity::Orders,
        Entity::Customers,
        Entity::Employees,
        Entity::Region,
        Entity::Territories,
        Entity::EmployeeTerritories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Orders => "orders",
            Entity::Customers => "customers",
            Entity::Employees => "employees",
            Entity::Region => "region",
            Entity::Territories => "territories",
            Entity::EmployeeTerritories => "employee_territories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Relational,
    Spreadsheet,
}

static NO_ROWS: RowSet = RowSet {
    name: String::new(),
    columns: Vec::new(),
    rows: Vec::new(),
};

/// Everything one source produced, keyed by entity
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub kind: SourceKind,
    tables: BTreeMap<Entity, RowSet>,
}

impl SourceTables {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            tables: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, entity: Entity, rows: RowSet) {
        self.tables.insert(entity, rows);
    }

    /// The entity's rows, or an empty table when the source lacks it
    pub fn rows(&self, entity: Entity) -> &RowSet {
        self.tables.get(&entity).unwrap_or(&NO_ROWS)
    }

    /// Apply the column harmonizer to every table of this source
    pub fn harmonize(&mut self) {
        let kind = self.kind;
        for (entity, rows) in self.tables.iter_mut() {
            harmonize(kind, *entity, rows);
        }
    }
}

// =============================================================================
// RELATIONAL SOURCE
// =============================================================================

/// Table names come from operator config; refuse anything that is not a
/// plain (optionally schema-qualified or quoted) identifier.
fn checked_table_name(name: &str) -> Result<&str> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '"');
    if !ok {
        anyhow::bail!("Invalid source table name '{}'", name);
    }
    Ok(name)
}

/// Read every relational entity, always releasing the connection
pub async fn extract_relational(db_url: &str, tables: &RelationalTables) -> Result<SourceTables> {
    info!("extracting relational source");
    let mut conn = PgConnection::connect(db_url)
        .await
        .context("Failed to connect to source database")?;

    let result = read_relational_tables(&mut conn, tables).await;

    match conn.close().await {
        Ok(()) => info!("source connection closed"),
        Err(e) => warn!(error = %e, "source connection did not close cleanly"),
    }
    result
}

async fn read_relational_tables(
    conn: &mut PgConnection,
    tables: &RelationalTables,
) -> Result<SourceTables> {
    let mut out = SourceTables::new(SourceKind::Relational);
    for entity in Entity::ALL {
        let table = checked_table_name(tables.table_for(entity))?;
        let sql = format!("SELECT row_to_json(t) FROM {table} t");
        let records: Vec<serde_json::Value> = sqlx::query_scalar(&sql)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("Failed to read source table {table}"))?;

        let rows = rowset_from_json(entity.as_str(), records);
        info!(
            entity = entity.as_str(),
            rows = rows.len(),
            columns = rows.columns.len(),
            "extracted relational table"
        );
        out.insert(entity, rows);
    }
    Ok(out)
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

/// Build a row set from `row_to_json` records; columns in first-seen order
pub fn rowset_from_json(name: &str, records: Vec<serde_json::Value>) -> RowSet {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        if let serde_json::Value::Object(map) = record {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut set = RowSet::new(name, columns);
    for record in records {
        let mut map = match record {
            serde_json::Value::Object(map) => map,
            _ => continue,
        };
        let row = set
            .columns
            .iter()
            .map(|c| map.remove(c).map(json_to_value).unwrap_or(Value::Null))
            .collect();
        set.push(row);
    }
    set
}

// =============================================================================
// SPREADSHEET SOURCE
// =============================================================================

/// Read each configured spreadsheet; missing/unreadable files are reported
/// and skipped, never fatal.
pub fn extract_spreadsheets(files: &[(Entity, PathBuf)]) -> SourceTables {
    info!(files = files.len(), "extracting spreadsheet source");
    let mut out = SourceTables::new(SourceKind::Spreadsheet);
    for (entity, path) in files {
        if !path.exists() {
            warn!(entity = entity.as_str(), path = %path.display(), "spreadsheet not found");
            continue;
        }
        match read_spreadsheet(entity.as_str(), path) {
            Ok(rows) => {
                info!(
                    entity = entity.as_str(),
                    rows = rows.len(),
                    columns = rows.columns.len(),
                    "extracted spreadsheet"
                );
                out.insert(*entity, rows);
            }
            Err(e) => {
                error!(entity = entity.as_str(), path = %path.display(), error = ?e, "failed to read spreadsheet");
            }
        }
    }
    out
}

fn is_csv_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

pub fn read_spreadsheet(name: &str, path: &Path) -> Result<RowSet> {
    if is_csv_file(path) {
        let bytes = std::fs::read(path).context("Failed to read CSV file")?;
        parse_csv(name, &decode_text(&bytes))
    } else {
        read_workbook(name, path)
    }
}

/// First sheet of a workbook; row 1 is the header
fn read_workbook(name: &str, path: &Path) -> Result<RowSet> {
    // calamine auto-detects format: xls, xlsx, xlsb, ods
    let mut workbook: calamine::Sheets<_> =
        open_workbook_auto(path).context("Failed to open workbook")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names.first().context("Workbook has no sheets")?.clone();

    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read sheet")?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|cell| match cell {
                Data::String(s) => s.trim().to_string(),
                Data::Empty => String::new(),
                other => format!("{}", other),
            })
            .collect(),
        None => return Ok(RowSet::empty(name)),
    };

    let width = headers.len();
    let mut set = RowSet::new(name, headers);
    for row in rows {
        let mut values: Vec<Value> = row.iter().take(width).map(cell_value).collect();
        values.resize(width, Value::Null);
        if values.iter().all(Value::is_null) {
            continue;
        }
        set.push(values);
    }
    Ok(set)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::String(s) => Value::Text(s.clone()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Data::DateTimeIso(s) => parse_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

/// UTF-8 when valid, otherwise Windows-1252 (Excel's default CSV export)
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parse CSV content; every cell is kept as text and typed lazily
pub fn parse_csv(name: &str, content: &str) -> Result<RowSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let width = headers.len();
    let mut set = RowSet::new(name, headers);
    for (line_idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line_idx + 2, error = %e, "skipping unreadable CSV line");
                continue;
            }
        };
        let mut values: Vec<Value> = record
            .iter()
            .take(width)
            .map(|s| {
                if s.is_empty() {
                    Value::Null
                } else {
                    Value::Text(s.to_string())
                }
            })
            .collect();
        values.resize(width, Value::Null);
        set.push(values);
    }
    Ok(set)
}
