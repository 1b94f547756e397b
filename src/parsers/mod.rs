//! Log parsing: raw session-log bytes to deduplicated Records

mod session_log;

pub use session_log::{ParseOutcome, SessionLogParser};
