//! Local SQLite snapshot of the results warehouse.
//!
//! Snapshots use the warehouse schema (`SNAPSHOT_SCHEMA`) with timestamps
//! stored as text in any form SQLite's date functions accept (RFC 3339, or
//! `YYYY-MM-DD HH:MM:SS[.fff][+HH:MM]`). Queries are rendered in the SQLite
//! dialect so those forms compare by instant rather than as strings.

use super::{parse_timestamp, Dialect, RenderedQuery, ResultsStore, RunRow, SqlParam};
use crate::error::{Result, TriageError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::Path;

pub const SNAPSHOT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS builds (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    branch_name TEXT NOT NULL,
    start_date  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS test_results (
    build_id    INTEGER NOT NULL REFERENCES builds(id),
    test_name   TEXT NOT NULL,
    test_status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS test_results_name ON test_results(test_name);
";

pub struct SqliteResultsStore {
    conn: Connection,
}

fn sqlite_err(e: rusqlite::Error) -> TriageError {
    TriageError::StoreUnavailable(format!("sqlite snapshot: {e}"))
}

impl SqliteResultsStore {
    /// Open an existing snapshot read-only.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TriageError::StoreUnavailable(format!(
                "sqlite snapshot '{}' does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(sqlite_err)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

fn to_sql_value(param: &SqlParam) -> SqlValue {
    match param {
        SqlParam::Text(s) => SqlValue::Text(s.clone()),
        SqlParam::Int(i) => SqlValue::Integer(*i),
    }
}

fn value_to_string(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

impl ResultsStore for SqliteResultsStore {
    fn fetch(&self, query: &RenderedQuery) -> Result<Vec<RunRow>> {
        let mut stmt = self.conn.prepare(&query.sql).map_err(sqlite_err)?;
        let params = params_from_iter(query.params.iter().map(to_sql_value));
        let raw: Vec<(SqlValue, String, String, String)> = stmt
            .query_map(params, |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .map_err(sqlite_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(sqlite_err)?;

        raw.into_iter()
            .map(|(id, start, branch_name, test_status)| {
                let build_id = value_to_string(id).ok_or_else(|| {
                    TriageError::StoreUnavailable("malformed row: null build id".into())
                })?;
                let start_date = parse_timestamp(&start).ok_or_else(|| {
                    TriageError::StoreUnavailable(format!(
                        "malformed row: bad start_date '{start}'"
                    ))
                })?;
                Ok(RunRow {
                    build_id,
                    start_date,
                    branch_name,
                    test_status,
                })
            })
            .collect()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::sha;
    use crate::results::{ResultsClient, RunHistory};
    use crate::types::{CommitId, TestStatus};
    use rusqlite::params;

    fn snapshot() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SNAPSHOT_SCHEMA).unwrap();
        conn
    }

    fn insert(conn: &Connection, id: i64, name: &str, branch: &str, start: &str, test: &str, status: &str) {
        conn.execute(
            "INSERT INTO builds (id, name, branch_name, start_date) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, branch, start],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO test_results (build_id, test_name, test_status) VALUES (?1, ?2, ?3)",
            params![id, test, status],
        )
        .unwrap();
    }

    fn client(conn: Connection) -> ResultsClient<SqliteResultsStore> {
        ResultsClient::new(SqliteResultsStore::from_connection(conn), 90, "%UnitTests%")
            .as_of("2024-06-01T00:00:00Z".parse().unwrap())
    }

    const TEST: &str = "pkg/kv/kvserver/TestReplicateQueue";

    #[test]
    fn warehouse_query_runs_against_snapshot() {
        let conn = snapshot();
        let (a, b) = (sha('a'), sha('b'));
        insert(&conn, 1, "Cockroach_UnitTests", &format!("master@{a}"), "2024-05-01T00:00:00Z", TEST, "success");
        insert(&conn, 2, "Cockroach_UnitTests", &format!("master@{b}"), "2024-05-02T00:00:00Z", TEST, "failure");
        let c = client(conn);

        let good = c.find_last_success(TEST, None).unwrap().unwrap();
        assert_eq!(good.commit.unwrap().as_str(), a);

        let at_b = c
            .find_run_at(TEST, &CommitId::parse(&b).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(at_b.status, TestStatus::Failure);
    }

    #[test]
    fn window_family_and_status_filters_apply() {
        let conn = snapshot();
        let a = sha('a');
        // Outside the 90-day window.
        insert(&conn, 1, "Cockroach_UnitTests", &format!("master@{a}"), "2023-12-01T00:00:00Z", TEST, "success");
        // Wrong build family.
        insert(&conn, 2, "Cockroach_Publish", &format!("master@{a}"), "2024-05-01T00:00:00Z", TEST, "success");
        // Excluded status.
        insert(&conn, 3, "Cockroach_UnitTests", &format!("master@{a}"), "2024-05-02T00:00:00Z", TEST, "SKIPPED");
        let c = client(conn);

        assert!(c.find_last_success(TEST, None).unwrap().is_none());
        assert!(c.get_history(TEST, 10, None).unwrap().is_empty());
    }

    #[test]
    fn branch_filter_exact_and_substring() {
        let conn = snapshot();
        let (a, b) = (sha('a'), sha('b'));
        insert(&conn, 1, "Cockroach_UnitTests", &format!("release-24.3.1-rc@{a}"), "2024-05-01T00:00:00Z", TEST, "success");
        insert(&conn, 2, "Cockroach_UnitTests", &format!("release-24.2@{b}"), "2024-05-02T00:00:00Z", TEST, "success");
        let c = client(conn);

        let run = c
            .find_last_success(TEST, Some("release-24.3"))
            .unwrap()
            .unwrap();
        assert_eq!(run.build_id, "1");
    }

    #[test]
    fn history_limit_and_order() {
        let conn = snapshot();
        for i in 1..=5 {
            insert(
                &conn,
                i,
                "Cockroach_UnitTests",
                "master",
                &format!("2024-05-0{i}T00:00:00Z"),
                TEST,
                "success",
            );
        }
        let runs = client(conn).get_history(TEST, 3, None).unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.build_id.as_str()).collect();
        assert_eq!(ids, ["5", "4", "3"]);
    }

    #[test]
    fn window_boundary_holds_for_space_separated_and_offset_timestamps() {
        let conn = snapshot();
        let (a, b, c) = (sha('a'), sha('b'), sha('c'));
        // Window starts 2024-03-03T00:00:00Z.
        insert(&conn, 1, "Cockroach_UnitTests", &format!("master@{a}"), "2024-03-03 10:00:00", TEST, "success");
        insert(&conn, 2, "Cockroach_UnitTests", &format!("master@{b}"), "2024-03-03T09:00:00+00:00", TEST, "failure");
        insert(&conn, 3, "Cockroach_UnitTests", &format!("master@{c}"), "2024-03-02 23:59:59", TEST, "success");
        let runs = client(conn).get_history(TEST, 10, None).unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.build_id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn last_success_tie_breaks_text_build_ids_numerically() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE builds (id TEXT, name TEXT, branch_name TEXT, start_date TEXT);
             CREATE TABLE test_results (build_id TEXT, test_name TEXT, test_status TEXT);",
        )
        .unwrap();
        for (id, c) in [("9", 'a'), ("10", 'b')] {
            conn.execute(
                "INSERT INTO builds VALUES (?1, 'Cockroach_UnitTests', ?2, '2024-05-01T00:00:00Z')",
                params![id, format!("master@{}", sha(c))],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO test_results VALUES (?1, ?2, 'success')",
                params![id, TEST],
            )
            .unwrap();
        }
        let run = client(conn).find_last_success(TEST, None).unwrap().unwrap();
        assert_eq!(run.build_id, "10");
        assert_eq!(run.commit.unwrap().as_str(), sha('b'));
    }

    #[test]
    fn open_missing_snapshot_is_store_unavailable() {
        let err = SqliteResultsStore::open(Path::new("/nonexistent/snapshot.db"))
            .err()
            .unwrap();
        assert!(matches!(err, TriageError::StoreUnavailable(_)));
    }
}
