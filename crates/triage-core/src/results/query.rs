//! Parametrized query builder for the results warehouse.
//!
//! Every caller-supplied value travels as a bound parameter. Placeholders are
//! numbered `$1..$N`, each appears exactly once, and they appear in the SQL
//! text in increasing order, so positional binding works for both the
//! SQL-over-HTTP endpoint and SQLite (which numbers `$name` parameters by
//! first appearance).

use crate::types::CommitId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Statuses the warehouse records for runs that never produced a verdict.
pub const EXCLUDED_STATUSES: &[&str] = &["unknown", "skipped", "error"];

/// SQL flavour a store speaks. Only timestamp handling differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// The warehouse: `start_date` is a real timestamp column.
    #[default]
    Warehouse,
    /// SQLite snapshots: `start_date` is text and is compared through
    /// `julianday()` so every encoding SQLite understands orders correctly.
    Sqlite,
}

impl Dialect {
    fn start_date(self) -> &'static str {
        match self {
            Dialect::Warehouse => "b.start_date",
            Dialect::Sqlite => "julianday(b.start_date)",
        }
    }

    fn timestamp_param(self, placeholder: &str) -> String {
        match self {
            Dialect::Warehouse => placeholder.to_string(),
            Dialect::Sqlite => format!("julianday({placeholder})"),
        }
    }
}

// ---------------------------------------------------------------------------
// SqlParam / RenderedQuery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

impl SqlParam {
    pub fn to_json(&self) -> Value {
        match self {
            SqlParam::Text(s) => Value::String(s.clone()),
            SqlParam::Int(i) => Value::from(*i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

struct Binder {
    params: Vec<SqlParam>,
}

impl Binder {
    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }
}

/// Escape `LIKE` metacharacters so `value` matches literally.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `%value%` with `value` escaped, for substring matching.
pub fn contains_pattern(value: &str) -> String {
    format!("%{}%", escape_like(value))
}

// ---------------------------------------------------------------------------
// RunQuery
// ---------------------------------------------------------------------------

/// Filter over `builds` joined with `test_results`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub test_name: String,
    pub window_start: DateTime<Utc>,
    pub build_name_pattern: String,
    /// Exact branch name or substring of it.
    pub branch: Option<String>,
    /// Restrict to builds whose branch metadata embeds one of these commits.
    pub commits: Vec<CommitId>,
    pub success_only: bool,
    pub limit: Option<u32>,
}

impl RunQuery {
    pub fn new(
        test_name: impl Into<String>,
        window_start: DateTime<Utc>,
        build_name_pattern: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            window_start,
            build_name_pattern: build_name_pattern.into(),
            branch: None,
            commits: Vec::new(),
            success_only: false,
            limit: None,
        }
    }

    pub fn branch(mut self, branch: Option<&str>) -> Self {
        self.branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        self
    }

    pub fn commits(mut self, commits: &[CommitId]) -> Self {
        self.commits = commits.to_vec();
        self
    }

    pub fn success_only(mut self) -> Self {
        self.success_only = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn render(&self) -> RenderedQuery {
        self.render_for(Dialect::Warehouse)
    }

    pub fn render_for(&self, dialect: Dialect) -> RenderedQuery {
        let mut b = Binder { params: Vec::new() };
        let mut sql = String::from(
            "SELECT b.id AS build_id, b.start_date AS start_date, \
             b.branch_name AS branch_name, t.test_status AS test_status\n\
             FROM builds AS b\n\
             JOIN test_results AS t ON t.build_id = b.id\n",
        );

        let test = b.bind(SqlParam::Text(self.test_name.clone()));
        sql.push_str(&format!("WHERE t.test_name = {test}\n"));

        let since = b.bind(SqlParam::Text(
            self.window_start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        sql.push_str(&format!(
            "  AND {} >= {}\n",
            dialect.start_date(),
            dialect.timestamp_param(&since)
        ));

        let family = b.bind(SqlParam::Text(self.build_name_pattern.clone()));
        sql.push_str(&format!("  AND b.name LIKE {family}\n"));

        let excluded = EXCLUDED_STATUSES
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            "  AND lower(t.test_status) NOT IN ({excluded})\n"
        ));

        if let Some(branch) = &self.branch {
            let exact = b.bind(SqlParam::Text(branch.clone()));
            let partial = b.bind(SqlParam::Text(contains_pattern(branch)));
            sql.push_str(&format!(
                "  AND (b.branch_name = {exact} OR b.branch_name LIKE {partial} ESCAPE '\\')\n"
            ));
        }

        if self.success_only {
            sql.push_str("  AND lower(t.test_status) = 'success'\n");
        }

        if !self.commits.is_empty() {
            let clauses = self
                .commits
                .iter()
                .map(|c| {
                    let p = b.bind(SqlParam::Text(contains_pattern(c.as_str())));
                    format!("b.branch_name LIKE {p} ESCAPE '\\'")
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            sql.push_str(&format!("  AND ({clauses})\n"));
        }

        sql.push_str(&format!("ORDER BY {} DESC, b.id DESC", dialect.start_date()));

        if let Some(limit) = self.limit {
            let p = b.bind(SqlParam::Int(i64::from(limit)));
            sql.push_str(&format!("\nLIMIT {p}"));
        }

        RenderedQuery {
            sql,
            params: b.params,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> DateTime<Utc> {
        "2024-03-01T00:00:00Z".parse().unwrap()
    }

    fn placeholder_order(sql: &str) -> Vec<usize> {
        let re = regex::Regex::new(r"\$(\d+)").unwrap();
        re.captures_iter(sql)
            .map(|c| c[1].parse().unwrap())
            .collect()
    }

    #[test]
    fn base_query_binds_test_window_and_family() {
        let q = RunQuery::new("pkg/sql/TestFoo", window(), "%Unit%").render();
        assert_eq!(
            q.params,
            vec![
                SqlParam::Text("pkg/sql/TestFoo".into()),
                SqlParam::Text("2024-03-01T00:00:00Z".into()),
                SqlParam::Text("%Unit%".into()),
            ]
        );
        assert!(q.sql.contains("NOT IN ('unknown', 'skipped', 'error')"));
        assert!(q.sql.ends_with("ORDER BY b.start_date DESC, b.id DESC"));
        assert!(!q.sql.contains("TestFoo"), "values must not be interpolated");
    }

    #[test]
    fn placeholders_are_sequential_and_unique() {
        let commits = vec![
            CommitId::parse(&"a".repeat(40)).unwrap(),
            CommitId::parse(&"b".repeat(40)).unwrap(),
        ];
        let q = RunQuery::new("t", window(), "%")
            .branch(Some("release-24.3"))
            .commits(&commits)
            .success_only()
            .limit(1)
            .render();
        let order = placeholder_order(&q.sql);
        assert_eq!(order, (1..=q.params.len()).collect::<Vec<_>>());
        assert_eq!(q.params.last(), Some(&SqlParam::Int(1)));
    }

    #[test]
    fn branch_filter_matches_exact_or_substring() {
        let q = RunQuery::new("t", window(), "%")
            .branch(Some("release_24.3"))
            .render();
        assert!(q.sql.contains("b.branch_name = $4 OR b.branch_name LIKE $5"));
        assert_eq!(q.params[3], SqlParam::Text("release_24.3".into()));
        assert_eq!(q.params[4], SqlParam::Text("%release\\_24.3%".into()));
    }

    #[test]
    fn blank_branch_is_no_filter() {
        let q = RunQuery::new("t", window(), "%").branch(Some("  ")).render();
        assert!(!q.sql.contains("branch_name ="));
    }

    #[test]
    fn hostile_test_name_stays_a_parameter() {
        let q = RunQuery::new("x'; DROP TABLE builds; --", window(), "%").render();
        assert!(!q.sql.contains("DROP TABLE"));
    }

    #[test]
    fn sqlite_dialect_compares_timestamps_as_julian_days() {
        let q = RunQuery::new("t", window(), "%").render_for(Dialect::Sqlite);
        assert!(q.sql.contains("AND julianday(b.start_date) >= julianday($2)"));
        assert!(q.sql.ends_with("ORDER BY julianday(b.start_date) DESC, b.id DESC"));
        assert_eq!(placeholder_order(&q.sql), vec![1, 2, 3]);
    }

    #[test]
    fn escape_like_escapes_metacharacters() {
        assert_eq!(escape_like(r"a%b_c\d"), r"a\%b\_c\\d");
        assert_eq!(contains_pattern("main"), "%main%");
    }
}
