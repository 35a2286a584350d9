//! Dutch auction price curve.

use chrono::{DateTime, Utc};

/// Linear price between `start_price` at `start_time` and `end_price` at
/// `end_time`, clamped to the endpoints outside that window.
///
/// Integer arithmetic; the partial step rounds toward the start price.
/// A zero-length auction jumps to `end_price` at `end_time`.
pub fn dutch_price(
    start_price: u128,
    end_price: u128,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    at: DateTime<Utc>,
) -> u128 {
    if at <= start_time && at < end_time {
        return start_price;
    }
    if at >= end_time {
        return end_price;
    }

    let elapsed = (at - start_time).num_seconds().max(0) as u128;
    let duration = (end_time - start_time).num_seconds().max(1) as u128;

    if start_price >= end_price {
        let drop = (start_price - end_price).saturating_mul(elapsed) / duration;
        start_price - drop
    } else {
        let rise = (end_price - start_price).saturating_mul(elapsed) / duration;
        start_price + rise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn linear_decay_between_endpoints() {
        let (start, end) = (t(10_000), t(10_100));
        assert_eq!(dutch_price(100, 0, start, end, start + Duration::seconds(25)), 75);
        assert_eq!(dutch_price(100, 0, start, end, start + Duration::seconds(50)), 50);
    }

    #[test]
    fn clamps_outside_window() {
        let (start, end) = (t(10_000), t(10_100));
        assert_eq!(dutch_price(100, 0, start, end, start - Duration::seconds(5)), 100);
        assert_eq!(dutch_price(100, 0, start, end, start + Duration::seconds(200)), 0);
        assert_eq!(dutch_price(100, 0, start, end, end), 0);
        assert_eq!(dutch_price(100, 0, start, end, start), 100);
    }

    #[test]
    fn partial_steps_round_toward_start() {
        let (start, end) = (t(0), t(3));
        // 10 * 1 / 3 = 3.33 → drop of 3
        assert_eq!(dutch_price(10, 0, start, end, t(1)), 7);
    }

    #[test]
    fn rising_curve_is_supported() {
        let (start, end) = (t(0), t(100));
        assert_eq!(dutch_price(0, 100, start, end, t(40)), 40);
        assert_eq!(dutch_price(0, 100, start, end, t(400)), 100);
    }

    #[test]
    fn zero_length_auction() {
        assert_eq!(dutch_price(100, 20, t(50), t(50), t(49)), 100);
        assert_eq!(dutch_price(100, 20, t(50), t(50), t(50)), 20);
    }
}
