//! Utility modules: retry and timeouts.

pub mod retry;
pub mod timeout;
