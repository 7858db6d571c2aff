use serde::Serialize;

/// A named policy over a key prefix: quotas and metadata defaults applied at
/// set-time. Zones live in memory only.
#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub name: String,
    pub key_prefix: String,
    pub max_items: Option<usize>,
    pub max_depth: Option<usize>,
    pub default_type: Option<String>,
    pub default_half_life_days: Option<f64>,
}

impl Zone {
    /// A zone matches its prefix exactly and every key nested under it.
    pub(crate) fn matches(&self, key: &str) -> bool {
        key == self.key_prefix || key.starts_with(&format!("{}.", self.key_prefix))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStats {
    pub name: String,
    pub key_prefix: String,
    pub items: usize,
    pub max_items: Option<usize>,
    pub max_depth: Option<usize>,
}

/// Pick the matching zone with the most specific (longest) prefix.
pub(crate) fn matching_zone<'a>(zones: &'a [Zone], key: &str) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|zone| zone.matches(key))
        .max_by_key(|zone| zone.key_prefix.len())
}

#[cfg(test)]
mod tests {
    use super::{matching_zone, Zone};

    fn zone(name: &str, prefix: &str) -> Zone {
        Zone {
            name: name.to_string(),
            key_prefix: prefix.to_string(),
            max_items: None,
            max_depth: None,
            default_type: None,
            default_half_life_days: None,
        }
    }

    #[test]
    fn matches_prefix_and_descendants_only() {
        let core = zone("core", "core");
        assert!(core.matches("core"));
        assert!(core.matches("core.a.b"));
        assert!(!core.matches("corely"));
        assert!(!core.matches("other.core"));
    }

    #[test]
    fn most_specific_zone_wins() {
        let zones = vec![zone("outer", "a"), zone("inner", "a.b")];
        let matched = matching_zone(&zones, "a.b.c").expect("zone should match");
        assert_eq!(matched.name, "inner");
        let matched = matching_zone(&zones, "a.x").expect("zone should match");
        assert_eq!(matched.name, "outer");
    }
}
