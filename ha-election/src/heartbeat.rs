//! Heartbeat values stored in member and leader nodes.

use crate::leader::LeaderRecord;

/// Encode a member heartbeat as decimal text.
///
/// `f64`'s `Display` is the shortest representation that parses back to the
/// same value, so a write followed by a read is exact.
pub fn encode(timestamp: f64) -> Vec<u8> {
    timestamp.to_string().into_bytes()
}

/// Heartbeat carried by any namespace child.
///
/// Leader records are JSON, member nodes are bare decimals. Anything else
/// reads as `0.0`, which makes the node stale.
pub fn decode(raw: &[u8]) -> f64 {
    if let Ok(record) = serde_json::from_slice::<LeaderRecord>(raw) {
        return record.heartbeat;
    }
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Whether a heartbeat taken at `heartbeat` has expired at `now`.
pub fn is_stale(now: f64, heartbeat: f64, max_freshness_secs: f64) -> bool {
    now - heartbeat >= max_freshness_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_is_exact() {
        for ts in [0.0, 1.0, 1_731_000_000.123_456_7, 0.1 + 0.2, 150.000_001] {
            assert_eq!(decode(&encode(ts)), ts);
        }
    }

    #[test]
    fn test_decode_leader_record() {
        let raw = br#"{"member":"WORK_0000000001","instance":"6f1c9c1e-0000-4000-8000-000000000000","heartbeat":12.5}"#;
        assert_eq!(decode(raw), 12.5);
    }

    #[test]
    fn test_garbage_reads_as_epoch() {
        assert_eq!(decode(b""), 0.0);
        assert_eq!(decode(b"not a number"), 0.0);
        assert_eq!(decode(b"NaN"), 0.0);
        assert_eq!(decode(&[0xff, 0xfe]), 0.0);
    }

    #[test]
    fn test_staleness_boundary_is_inclusive() {
        assert!(!is_stale(159.9, 60.0, 100.0));
        assert!(is_stale(160.0, 60.0, 100.0));
        assert!(is_stale(500.0, 60.0, 100.0));
    }
}
