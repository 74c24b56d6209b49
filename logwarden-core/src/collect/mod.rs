//! Producer-side collection: filtering, batching, retrying delivery, and
//! file tailing with truncate-after-consume.

pub mod collector;
pub mod filter;
mod queue;
pub mod tailer;

pub use collector::{ErrorCallback, LogCollector, LogSink, SendCallback, Submission};
pub use filter::{KeywordFilter, LevelFilter, LogFilter};
