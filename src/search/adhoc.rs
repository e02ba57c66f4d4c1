//! Execution of validated ad-hoc queries under a time bound.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use rusqlite::{Connection, ErrorCode};
use tracing::{debug, warn};

use crate::error::{ExplorerError, Result};
use crate::export::TabularResult;
use crate::search::validator::{RejectReason, ValidatedQuery};
use crate::storage::sqlite::{millis, read_statement};

pub struct AdHocExecutor<'a> {
    conn: &'a Connection,
    store_path: &'a Path,
    timeout: Duration,
    max_rows: Option<usize>,
}

impl<'a> AdHocExecutor<'a> {
    pub fn new(conn: &'a Connection, store_path: &'a Path, timeout: Duration) -> Self {
        Self {
            conn,
            store_path,
            timeout,
            max_rows: None,
        }
    }

    pub fn with_max_rows(mut self, max_rows: Option<usize>) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Run `query`, interrupting it if it outlives the timeout.
    ///
    /// The statement must also report itself read-only once prepared; the
    /// lexical check and the engine's own verdict both have to agree.
    pub fn execute(&self, query: &ValidatedQuery) -> Result<TabularResult> {
        let mut stmt = self
            .conn
            .prepare(&query.normalized)
            .map_err(|e| self.classify(e, false))?;
        if !stmt.readonly() {
            warn!(sql = %query.normalized, "engine refused read-only status for accepted query");
            return Err(RejectReason::NotReadOnly.into());
        }

        let interrupt = self.conn.get_interrupt_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let timeout = self.timeout;
        let watchdog = {
            let fired = Arc::clone(&fired);
            std::thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    fired.store(true, Ordering::SeqCst);
                    interrupt.interrupt();
                }
            })
        };

        let start = Instant::now();
        let result = read_statement(&mut stmt, &[], self.max_rows);
        drop(done_tx);
        join_watchdog(watchdog);

        let elapsed_ms = millis(start.elapsed());
        match result {
            Ok(table) => {
                debug!(
                    rows = table.len(),
                    truncated = table.truncated,
                    elapsed_ms,
                    "ad-hoc query finished"
                );
                Ok(table)
            }
            Err(e) => {
                let timed_out = fired.load(Ordering::SeqCst);
                Err(self.classify(e, timed_out))
            }
        }
    }

    fn classify(&self, err: rusqlite::Error, timed_out: bool) -> ExplorerError {
        let code = err.sqlite_error_code();
        if timed_out || code == Some(ErrorCode::OperationInterrupted) {
            warn!(timeout_ms = millis(self.timeout), "ad-hoc query timed out");
            return ExplorerError::QueryTimeout(self.timeout);
        }
        match code {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::CannotOpen,
            ) => ExplorerError::unavailable(self.store_path, "ad-hoc query", err),
            _ => ExplorerError::QueryFailed {
                message: err.to_string(),
            },
        }
    }
}

/// Waits for the watchdog. Returns false, after logging, if it panicked.
fn join_watchdog(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(error = %message, "ad-hoc query watchdog thread panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(sql: &str) -> ValidatedQuery {
        ValidatedQuery {
            normalized: sql.to_string(),
            tables: Vec::new(),
        }
    }

    #[test]
    fn runs_and_caps_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = AdHocExecutor::new(&conn, Path::new(":memory:"), Duration::from_secs(5))
            .with_max_rows(Some(2));
        let table = exec
            .execute(&accepted("SELECT 1 AS a UNION ALL SELECT 2 UNION ALL SELECT 3"))
            .unwrap();
        assert_eq!(table.columns, vec!["a"]);
        assert_eq!(table.len(), 2);
        assert!(table.truncated);
    }

    #[test]
    fn watchdog_panic_is_reported() {
        assert!(join_watchdog(std::thread::spawn(|| {})));
        let panicking = std::thread::spawn(|| {
            panic!("watchdog exploded");
        });
        assert!(!join_watchdog(panicking));
    }

    #[test]
    fn runaway_query_times_out() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = AdHocExecutor::new(&conn, Path::new(":memory:"), Duration::from_millis(50));
        let err = exec
            .execute(&accepted(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
            ))
            .unwrap_err();
        assert!(matches!(err, ExplorerError::QueryTimeout(_)), "{err:?}");

        // The connection stays usable afterwards.
        let table = exec.execute(&accepted("SELECT 42 AS answer")).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn engine_errors_are_query_failures() {
        let conn = Connection::open_in_memory().unwrap();
        let exec = AdHocExecutor::new(&conn, Path::new(":memory:"), Duration::from_secs(5));
        let err = exec.execute(&accepted("SELECT nope FROM nowhere")).unwrap_err();
        assert_eq!(err.code(), "query_failed");
    }

    #[test]
    fn writes_are_refused_by_the_engine_check() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(x)").unwrap();
        let exec = AdHocExecutor::new(&conn, Path::new(":memory:"), Duration::from_secs(5));
        let err = exec.execute(&accepted("INSERT INTO t VALUES (1)")).unwrap_err();
        assert!(matches!(
            err,
            ExplorerError::ValidationRejected(RejectReason::NotReadOnly)
        ));
    }
}
