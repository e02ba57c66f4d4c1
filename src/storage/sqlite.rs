//! `SQLite` backend: read-only connections, SQL helper functions, and the
//! fixed lookups (facts, documents, overview) the explorer issues.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use itertools::Itertools;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Statement, params, params_from_iter};
use tracing::{debug, warn};

use crate::error::{ExplorerError, Result};
use crate::export::{CellValue, TabularResult};
use crate::model::types::{DatasetOverview, FireIntervalRange, parse_zone_list};
use crate::search::catalog::{FactKind, MODEL_KEY, MODEL_TABLE, SchemaCatalog, quote_ident};
use crate::search::query::{contains_ci, starts_with_ci};

/// Name of the SQL function implementing case-insensitive substring match.
pub const CONTAINS_FN: &str = "bps_contains";
/// Name of the SQL function implementing case-insensitive prefix match.
pub const STARTS_WITH_FN: &str = "bps_starts_with";

/// Pause before the single retry of a failed open.
const REOPEN_BACKOFF: Duration = Duration::from_millis(50);

/// Severities in the order the fire-regime summaries present them.
const SEVERITY_ORDER: &[&str] = &["All Fires", "Low (Surface)", "Moderate (Mixed)", "Replacement"];

/// Handle on the BPS database file.
///
/// Holds no connection. Every request opens its own read-only connection, so
/// concurrent requests never queue behind one another.
#[derive(Debug, Clone)]
pub struct BpsStore {
    path: PathBuf,
}

impl BpsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a read-only connection, retrying once before reporting `DataUnavailable`.
    ///
    /// `reason` is logged alongside the open duration so callers can
    /// identify which operation triggered the open.
    pub fn connect(&self, reason: &str) -> Result<Connection> {
        match self.open_once(reason) {
            Ok(conn) => Ok(conn),
            Err(first) => {
                warn!(
                    path = %self.path.display(),
                    reason = reason,
                    error = %first,
                    "opening database failed; retrying once"
                );
                std::thread::sleep(REOPEN_BACKOFF);
                self.open_once(reason)
                    .map_err(|e| ExplorerError::unavailable(&self.path, reason, e))
            }
        }
    }

    fn open_once(&self, reason: &str) -> rusqlite::Result<Connection> {
        let start = Instant::now();
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_readonly_pragmas(&conn)?;
        register_functions(&conn)?;
        // Touch the schema so a missing or corrupt file fails here, not mid-query.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        debug!(
            path = %self.path.display(),
            elapsed_ms = millis(start.elapsed()),
            reason = reason,
            "opened read-only SQLite connection"
        );
        Ok(conn)
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn apply_readonly_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA query_only = ON;
        PRAGMA temp_store = MEMORY;
        PRAGMA cache_size = -16384; -- 16MB
        ",
    )
}

/// Register the matching functions the generated search statement relies on.
///
/// They evaluate the same predicates as [`contains_ci`] and [`starts_with_ci`],
/// so SQL-side filtering and Rust-side match reporting always agree.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function(CONTAINS_FN, 2, flags, |ctx| {
        let haystack = value_text(ctx.get_raw(0));
        let needle = value_text(ctx.get_raw(1));
        Ok(match (haystack, needle) {
            (Some(h), Some(n)) => contains_ci(&h, &n),
            _ => false,
        })
    })?;
    conn.create_scalar_function(STARTS_WITH_FN, 2, flags, |ctx| {
        let haystack = value_text(ctx.get_raw(0));
        let prefix = value_text(ctx.get_raw(1));
        Ok(match (haystack, prefix) {
            (Some(h), Some(p)) => starts_with_ci(&h, &p),
            _ => false,
        })
    })?;
    Ok(())
}

/// Text rendering of a stored value. Numbers are stringified; NULL and blobs yield `None`.
pub fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Run `sql` with positional `params` and collect every column.
pub fn read_table(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    max_rows: Option<usize>,
) -> rusqlite::Result<TabularResult> {
    let mut stmt = conn.prepare(sql)?;
    read_statement(&mut stmt, params, max_rows)
}

/// Drain a prepared statement into a [`TabularResult`], stopping after `max_rows`.
pub fn read_statement(
    stmt: &mut Statement<'_>,
    params: &[Value],
    max_rows: Option<usize>,
) -> rusqlite::Result<TabularResult> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut table = TabularResult::new(columns);

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        if max_rows.is_some_and(|max| table.rows.len() >= max) {
            table.truncated = true;
            break;
        }
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(CellValue::from(row.get::<_, Value>(i)?));
        }
        table.rows.push(cells);
    }
    Ok(table)
}

/// Whether `model_id` names a row in `bps_models`.
pub fn model_exists(conn: &Connection, model_id: &str) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
        quote_ident(MODEL_TABLE),
        quote_ident(MODEL_KEY)
    );
    conn.query_row(&sql, params![model_id], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
}

/// Stored document identifier for a model.
///
/// The outer `Option` is `None` when the model does not exist; the inner one
/// when the model has no document recorded.
pub fn model_document(conn: &Connection, model_id: &str) -> rusqlite::Result<Option<Option<String>>> {
    let sql = format!(
        "SELECT document FROM {} WHERE {} = ?1",
        quote_ident(MODEL_TABLE),
        quote_ident(MODEL_KEY)
    );
    conn.query_row(&sql, params![model_id], |row| {
        Ok(value_text(row.get_ref(0)?).filter(|d| !d.trim().is_empty()))
    })
    .optional()
}

/// Per-model rows from one fact table, projected and ordered per the catalog.
pub fn fetch_facts(
    conn: &Connection,
    catalog: &SchemaCatalog,
    kind: FactKind,
    model_id: &str,
) -> rusqlite::Result<Option<TabularResult>> {
    let Some(table) = catalog.fact_table(kind) else {
        return Ok(None);
    };
    let Some(key) = table.model_key else {
        return Ok(None);
    };
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        table.projection(),
        quote_ident(table.name),
        quote_ident(key)
    );
    let order = table.order_clause();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    read_table(conn, &sql, &[Value::Text(model_id.to_string())], None).map(Some)
}

/// Strip the map-zone annotations some vegetation types carry after a newline or "Map Zone".
pub fn clean_vegetation_type(raw: &str) -> Option<String> {
    let first_line = raw.split('\n').next().unwrap_or_default();
    let cleaned = first_line
        .split("Map Zone")
        .next()
        .unwrap_or_default()
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Dataset-wide summary: model count, vegetation types, zones, fire intervals.
pub fn fetch_overview(conn: &Connection) -> rusqlite::Result<DatasetOverview> {
    let total_models: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT bps_model_id) FROM bps_models",
        [],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT vegetation_type FROM bps_models WHERE vegetation_type IS NOT NULL",
    )?;
    let vegetation_types: Vec<String> = stmt
        .query_map([], |row| Ok(value_text(row.get_ref(0)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .filter_map(|v| clean_vegetation_type(&v))
        .sorted()
        .dedup()
        .collect();

    let mut stmt =
        conn.prepare("SELECT DISTINCT map_zones FROM bps_models WHERE map_zones IS NOT NULL")?;
    let map_zones: Vec<u32> = stmt
        .query_map([], |row| Ok(value_text(row.get_ref(0)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .flat_map(|z| parse_zone_list(&z))
        .sorted()
        .dedup()
        .collect();

    let mut stmt = conn.prepare(
        r#"SELECT severity, MIN("return_interval(years)"), MAX("return_interval(years)")
           FROM fire_frequency
           WHERE severity IS NOT NULL
           GROUP BY severity"#,
    )?;
    let fire_ranges: Vec<FireIntervalRange> = stmt
        .query_map([], |row| {
            Ok((
                value_text(row.get_ref(0)?),
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter_map(|(severity, min, max)| {
            Some(FireIntervalRange {
                severity: severity?,
                min_years: min?,
                max_years: max?,
            })
        })
        .sorted_by_key(|r| {
            let rank = SEVERITY_ORDER
                .iter()
                .position(|s| *s == r.severity)
                .unwrap_or(SEVERITY_ORDER.len());
            (rank, r.severity.clone())
        })
        .collect();

    Ok(DatasetOverview {
        total_models,
        vegetation_types,
        map_zones,
        fire_ranges,
    })
}
