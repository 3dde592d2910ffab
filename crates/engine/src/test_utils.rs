//! Shared test utilities.
//!
//! Fixture factories used across the engine's unit tests: a deterministic
//! clock helper, a small-value configuration, and a generous policy that
//! individual tests tighten for the ceiling they exercise.

use chrono::{DateTime, TimeZone, Utc};

use crate::config::Config;
use crate::models::MessageSummary;
use crate::policy::{ModePolicy, WindowCeilings};

/// Fixed test epoch plus an offset in seconds.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// Deterministic small-value configuration: 1h email TTL, 30s cache TTL,
/// sweep batches of 2 so batching paths are exercised.
pub fn test_config() -> Config {
    Config {
        email_ttl_secs: 3_600,
        cache_ttl_secs: 30,
        cache_capacity: 100,
        provider_timeout_secs: 5,
        create_attempts: 3,
        sweep_interval_secs: 60,
        sweep_batch: 2,
        compaction_interval_secs: 60,
        ..Config::default()
    }
}

/// Full-mode policy with ceilings far above anything a test trips by
/// accident. Tests tighten exactly the ceiling they are about.
pub fn wide_policy() -> ModePolicy {
    let mut policy = ModePolicy::full();
    let wide = WindowCeilings::new(1_000, 10_000, 100_000);
    for limits in [
        &mut policy.standard,
        &mut policy.privileged,
        &mut policy.admin,
    ] {
        limits.create_email = wide;
        limits.check_inbox = wide;
        limits.read_message = wide;
        limits.admin_action = wide;
    }
    policy
}

/// `n` provider-ordered message summaries.
pub fn messages(n: usize) -> Vec<MessageSummary> {
    (0..n)
        .map(|i| MessageSummary {
            id: 100 + i as i64,
            from: format!("sender{i}@example.com"),
            subject: format!("message {i}"),
            received_at: Some(at(0)),
        })
        .collect()
}
