//! SQLite storage for the school dataset.
//!
//! Tables are created from CSV files with column types inferred from the
//! data. Queries return column names plus JSON-valued cells.

use crate::error::{EduError, Result};
use csv::{ReaderBuilder, StringRecord};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Data tables loaded from `<table>.csv`. The user-role table is read by the
/// resolver and never loaded, so generated SQL cannot reach it.
pub const DATA_TABLES: [&str; 5] = ["students", "homework", "submissions", "quizzes", "performance"];

/// Secondary indexes: (table, columns).
const INDEXES: &[(&str, &[&str])] = &[
    ("students", &["grade", "section"]),
    ("students", &["region"]),
    ("homework", &["grade", "section"]),
    ("submissions", &["student_id"]),
    ("submissions", &["homework_id"]),
    ("quizzes", &["grade", "section"]),
    ("performance", &["student_id"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    /// Narrowest type every non-empty cell fits into.
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut inferred = ColumnType::Integer;
        let mut saw_value = false;
        for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
            saw_value = true;
            if inferred == ColumnType::Integer && parse_integer(cell).is_none() {
                inferred = ColumnType::Real;
            }
            if inferred == ColumnType::Real && cell.parse::<f64>().is_err() {
                return ColumnType::Text;
            }
        }
        if saw_value {
            inferred
        } else {
            ColumnType::Text
        }
    }

    fn coerce(&self, cell: &str) -> SqlValue {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return SqlValue::Null;
        }
        match self {
            ColumnType::Integer => parse_integer(trimmed)
                .map(SqlValue::Integer)
                .unwrap_or_else(|| SqlValue::Text(trimmed.to_string())),
            ColumnType::Real => trimmed
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or_else(|_| SqlValue::Text(trimmed.to_string())),
            ColumnType::Text => SqlValue::Text(trimmed.to_string()),
        }
    }
}

fn parse_integer(cell: &str) -> Option<i64> {
    if cell.eq_ignore_ascii_case("true") {
        return Some(1);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Some(0);
    }
    cell.parse::<i64>().ok()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rows loaded into one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: usize,
    pub columns: usize,
}

/// Tabular query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column by name.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(idx)).collect())
    }

    /// Render as CSV with a header row. NULL cells are left empty.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(csv_cell))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| EduError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) a writable database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self { conn })
    }

    /// Open an existing database file for querying only.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EduError::Config(format!(
                "database not found at {}; load the CSV dataset first",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened database read-only: {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// (Re)create every data table from `<dir>/<table>.csv`.
    ///
    /// Missing files are skipped with a warning; finding none at all is an error.
    pub fn load_csv_dir(&mut self, dir: impl AsRef<Path>) -> Result<Vec<TableLoad>> {
        let dir = dir.as_ref();
        let mut loaded = Vec::new();

        for table in DATA_TABLES {
            let path = dir.join(format!("{}.csv", table));
            if !path.exists() {
                warn!("No CSV for table '{}' at {}", table, path.display());
                continue;
            }
            let file = std::fs::File::open(&path)?;
            loaded.push(self.load_csv_table(table, file)?);
        }

        if loaded.is_empty() {
            return Err(EduError::Config(format!(
                "no dataset CSV files found in {}",
                dir.display()
            )));
        }

        self.create_indexes()?;
        Ok(loaded)
    }

    /// Replace `table` with the contents of a CSV document.
    pub fn load_csv_table<R: std::io::Read>(&mut self, table: &str, reader: R) -> Result<TableLoad> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let records: Vec<StringRecord> = rdr.records().collect::<std::result::Result<_, _>>()?;

        let types: Vec<ColumnType> = (0..headers.len())
            .map(|i| ColumnType::infer(records.iter().filter_map(|r| r.get(i))))
            .collect();

        let column_defs = headers
            .iter()
            .zip(&types)
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = headers.iter().map(|h| quote_ident(h)).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; headers.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({defs});",
            table = quote_ident(table),
            defs = column_defs
        ))?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                column_list,
                placeholders
            ))?;
            for record in &records {
                let values = types
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| ty.coerce(record.get(i).unwrap_or("")));
                insert.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        info!("Loaded {} rows into '{}'", records.len(), table);
        Ok(TableLoad {
            table: table.to_string(),
            rows: records.len(),
            columns: headers.len(),
        })
    }

    fn create_indexes(&self) -> Result<()> {
        for (table, columns) in INDEXES {
            let existing = self.column_names(table)?;
            if !columns.iter().all(|c| existing.iter().any(|e| e == c)) {
                continue;
            }
            let index = format!("idx_{}_{}", table, columns.join("_"));
            self.conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&index),
                quote_ident(table),
                columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
            ))?;
        }
        Ok(())
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// `CREATE TABLE` statements of every table, for the LLM prompt.
    pub fn table_info(&self) -> Result<String> {
        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let statements = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(statements.join(";\n\n"))
    }

    /// Run one query. SQLite errors come back as [`EduError::Database`]
    /// carrying the engine message unchanged.
    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        debug!(sql = %sql, "Executing query");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(json_value(row.get_ref(i)?));
            }
            out.push(values);
        }

        Ok(QueryResult { columns, rows: out })
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}
