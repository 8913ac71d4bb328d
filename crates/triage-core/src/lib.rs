pub mod bisect;
pub mod config;
pub mod error;
pub mod io;
pub mod issue;
pub mod paths;
pub mod repo;
pub mod results;
pub mod types;

pub use error::{Result, TriageError};
