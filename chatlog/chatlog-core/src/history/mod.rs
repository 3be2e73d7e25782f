//! Token-budgeted conversation history.
//!
//! This module owns the core engine: budget configuration, the authoritative
//! full log, and the FIFO-evicted sliding window that is sent to the model.

mod buffer;
mod config;

pub use buffer::{BufferState, BufferStats, HistoryBuffer, Order};
pub use config::{Budget, BudgetConfig, DEFAULT_MODEL};
