// Utility functions

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Integer percentage of an amount, rounded down.
///
/// All monetary arithmetic runs on integer sompi, so the house cut is a
/// floor and the remainder stays in the payout pool.
pub fn percent_of(amount: u64, percent: u8) -> u64 {
    ((amount as u128 * percent as u128) / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(6_000_000_000, 5), 300_000_000); // 5% of 60 KAS
        assert_eq!(percent_of(100, 0), 0);
        assert_eq!(percent_of(100, 100), 100);
        assert_eq!(percent_of(99, 5), 4); // floors
    }

    #[test]
    fn test_percent_of_no_overflow() {
        assert_eq!(percent_of(u64::MAX, 100), u64::MAX);
    }
}
