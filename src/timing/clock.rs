//! Local clock
//!
//! Timestamps are seconds on a monotonic clock. The clock is anchored once per
//! process to the wall clock so values from different hosts are of the same
//! magnitude, then advances with [`Instant`] and never jumps.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    instant: Instant,
    wall: f64,
}

static ANCHOR: OnceLock<Anchor> = OnceLock::new();

fn anchor() -> &'static Anchor {
    ANCHOR.get_or_init(|| Anchor {
        instant: Instant::now(),
        wall: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
    })
}

/// Current local time in seconds
pub fn local_clock() -> f64 {
    let a = anchor();
    a.wall + a.instant.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic() {
        let mut last = local_clock();
        for _ in 0..1000 {
            let now = local_clock();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_advances_in_seconds() {
        let a = local_clock();
        std::thread::sleep(Duration::from_millis(50));
        let elapsed = local_clock() - a;
        assert!(elapsed >= 0.05 && elapsed < 1.0, "elapsed {}", elapsed);
    }
}
