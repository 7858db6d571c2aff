use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Exponential half-life decay factor for a document last touched at
/// `updated_at`. `half_life_days <= 0` means no decay.
pub(crate) fn decay_factor(half_life_days: f64, updated_at: &str, now: DateTime<Utc>) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }

    let Some(updated) = parse_timestamp(updated_at) else {
        return 1.0;
    };

    let age_days = (now - updated).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }

    2f64.powf(-age_days / half_life_days)
}

pub(crate) fn half_life_from_frontmatter(frontmatter: &JsonValue) -> Option<f64> {
    frontmatter.get("half_life_days").and_then(JsonValue::as_f64)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
