//! Timestamp utilities

use std::time::SystemTime;

/// Milliseconds since the Unix epoch for a filesystem timestamp
///
/// Times before the epoch clamp to 0.
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_time_to_millis() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(system_time_to_millis(t), 1_700_000_000_123);
    }

    #[test]
    fn test_pre_epoch_clamps_to_zero() {
        let t = SystemTime::UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(system_time_to_millis(t), 0);
    }
}
