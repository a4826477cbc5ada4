//! Call flow metrics
//!
//! Recorded through the `metrics` facade; the embedding process decides
//! whether and how to export them.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!("callme_calls_opened_total", "Call attempts started with open()");
    describe_counter!(
        "callme_calls_activated_total",
        "Calls that reached the agent"
    );
    describe_counter!(
        "callme_calls_ended_total",
        "Call attempts torn down, by reason"
    );
    describe_histogram!(
        "callme_call_duration_seconds",
        "Connected time of finished calls"
    );
    describe_counter!(
        "callme_calls_persisted_total",
        "Call records accepted by the store"
    );
    describe_counter!(
        "callme_persistence_failures_total",
        "Call records the store rejected"
    );
    describe_counter!(
        "callme_tool_calls_total",
        "Agent tool calls, by tool and outcome"
    );
}

pub fn record_call_opened() {
    counter!("callme_calls_opened_total").increment(1);
}

pub fn record_call_activated() {
    counter!("callme_calls_activated_total").increment(1);
}

pub fn record_call_ended(reason: &'static str, duration: Duration) {
    counter!("callme_calls_ended_total", "reason" => reason).increment(1);
    histogram!("callme_call_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_call_persisted() {
    counter!("callme_calls_persisted_total").increment(1);
}

pub fn record_persistence_failure() {
    counter!("callme_persistence_failures_total").increment(1);
}

pub fn record_tool_call(tool: &str, outcome: &'static str) {
    counter!("callme_tool_calls_total", "tool" => tool.to_string(), "outcome" => outcome).increment(1);
}
