//! Metric names recorded by session tasks.

/// Values dropped by a full mailbox (counter, labels: mailbox).
pub const MAILBOX_DROPS_TOTAL: &str = "mailbox_drops_total";
/// Outbound messages dropped by a full transport queue (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "outbound_drops_total";
/// Failed collaborator calls (counter, labels: collaborator, category).
pub const COLLABORATOR_FAILURES_TOTAL: &str = "collaborator_failures_total";
/// Completed utterances (counter).
pub const UTTERANCES_TOTAL: &str = "utterances_total";
/// Intention results delivered to the client (counter).
pub const INTENTION_RESULTS_TOTAL: &str = "intention_results_total";
/// Intention results discarded as stale (counter).
pub const INTENTION_RESULTS_STALE_TOTAL: &str = "intention_results_stale_total";
/// Orchestrator notifications by outcome (counter, labels: outcome).
pub const ACTIONS_TOTAL: &str = "actions_total";
/// Snapshot analyses completed (counter).
pub const SNAPSHOTS_TOTAL: &str = "snapshots_total";
/// Intention analysis duration (histogram).
pub const INTENTION_DURATION_SECONDS: &str = "intention_duration_seconds";
