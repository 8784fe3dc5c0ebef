//! State tracked while a crawl runs
//!
//! - `FetchAttempt`: one logical fetch across all of its retries
//! - `CrawlSessionState`: seen ids, page cursor and the circuit breaker counter

mod attempt;
mod session_state;

pub use attempt::{FetchAttempt, FetchTarget};
pub use session_state::{CrawlSessionState, PageVerdict, SessionTotals, StopReason};
