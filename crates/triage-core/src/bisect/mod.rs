//! Bisection: range computation, first-failure search and the session that
//! ties them to a persisted record.

pub mod range;
pub mod search;
pub mod session;

pub use range::{compute_range, range_from_known_good, BisectionRange};
pub use search::{scan_commits, search_first_failure, ScanStrategy, SearchOutcome};
pub use session::{
    load_record, report_for, run_bisection, save_record, BisectionReport, BisectionRecord,
    BisectionRequest, ManualBisectPlan, Outcome,
};
