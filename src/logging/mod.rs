//! Rate-limited logging utilities.
//!
//! The monitoring loop ticks every few seconds; without throttling, a dead
//! data source or a stuck symbol floods the log with identical lines.

mod throttle;

pub use throttle::LogThrottle;
