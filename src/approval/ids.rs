use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

static GENERATED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^REQ-\d{14}-[0-9a-f]{6}$").unwrap());

/// `REQ-<YYYYMMDDHHMMSS>-<6 hex>`. The random suffix keeps ids minted in the
/// same second apart; the store still refuses to overwrite on collision.
pub fn generate_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("REQ-{}-{:06x}", now.format("%Y%m%d%H%M%S"), suffix)
}

pub fn looks_generated(id: &str) -> bool {
    GENERATED_ID.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_id_carries_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 5).unwrap();
        let id = generate_id(now);
        assert!(id.starts_with("REQ-20240101123005-"), "{}", id);
        assert!(looks_generated(&id));
    }

    #[test]
    fn test_same_second_ids_differ() {
        let now = Utc::now();
        let ids: std::collections::HashSet<String> = (0..50).map(|_| generate_id(now)).collect();
        // 24 bits of entropy; 50 draws colliding is vanishingly unlikely
        assert!(ids.len() >= 49);
    }

    #[test]
    fn test_pattern_rejects_foreign_ids() {
        assert!(!looks_generated("REQ-2024-abc"));
        assert!(!looks_generated("REQ-20240101123005-ABCDEF"));
    }
}
