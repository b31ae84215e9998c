use chrono::{DateTime, TimeZone, Utc};

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Millisecond timestamp → `DateTime<Utc>` (out-of-range values clamp to the epoch)
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Generate a record identifier: `{prefix}_{yyyyMMddHHmmss}_{8 hex}`
///
/// The timestamp part keeps ids roughly sortable by creation time, the random
/// suffix keeps ids generated in the same second apart.
pub fn prefixed_id(prefix: &str, at_millis: i64) -> String {
    let stamp = millis_to_datetime(at_millis).format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, stamp, &suffix[..8])
}

/// Session id (`SESS_...`)
pub fn session_id(at_millis: i64) -> String {
    prefixed_id("SESS", at_millis)
}

/// Wallet transaction id (`TXN_...`)
pub fn transaction_id(at_millis: i64) -> String {
    prefixed_id("TXN", at_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id_format() {
        // 2025-01-15 09:30:00 UTC
        let at = 1_736_933_400_000;
        let id = session_id(at);
        assert!(id.starts_with("SESS_20250115093000_"), "got {}", id);
        assert_eq!(id.len(), "SESS_20250115093000_".len() + 8);
    }

    #[test]
    fn test_ids_are_unique() {
        let at = now_millis();
        assert_ne!(transaction_id(at), transaction_id(at));
    }

    #[test]
    fn test_millis_roundtrip() {
        let at = 1_736_933_400_123;
        assert_eq!(millis_to_datetime(at).timestamp_millis(), at);
    }
}
