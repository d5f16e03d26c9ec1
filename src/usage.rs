//! Session-scoped token usage and cost accounting.
//!
//! A single [`UsageTracker`] is created per session and shared (via `Arc`)
//! with the query pipeline. Every successful model call is recorded exactly
//! once; failed calls record nothing, and recorded usage is never rolled back.

use std::fmt;
use std::sync::Mutex;

use crate::progress::format_number;

/// Running totals across all recorded model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageRecord {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub successful_requests: u64,
    /// Estimated cost in USD.
    pub total_cost: f64,
}

impl fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Token Usage and Cost Summary:")?;
        writeln!(f, "{}", "-".repeat(40))?;
        writeln!(f, "Total Tokens: {}", format_number(self.total_tokens))?;
        writeln!(f, "Prompt Tokens: {}", format_number(self.prompt_tokens))?;
        writeln!(
            f,
            "Completion Tokens: {}",
            format_number(self.completion_tokens)
        )?;
        writeln!(f, "Successful Requests: {}", self.successful_requests)?;
        write!(f, "Total Cost (USD): ${:.4}", self.total_cost)
    }
}

#[derive(Debug, Default)]
pub struct UsageTracker {
    inner: Mutex<UsageRecord>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one successful call's usage to the running totals.
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64, cost: f64) {
        let mut usage = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        usage.prompt_tokens += prompt_tokens;
        usage.completion_tokens += completion_tokens;
        usage.total_tokens += prompt_tokens + completion_tokens;
        usage.total_cost += cost;
        usage.successful_requests += 1;
    }

    pub fn snapshot(&self) -> UsageRecord {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
