//! Timestamp post-processing
//!
//! Applied to each pulled timestamp in this order:
//!
//! 1. clock sync: add the current offset estimate (remote to local clock)
//! 2. dejitter: replace the timestamp by a linear fit `t = w0 + w1 * n` over
//!    the sample index, updated by recursive least squares with exponential
//!    forgetting (regular-rate streams only)
//! 3. monotonize: never return a timestamp smaller than the previous one

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Post-processing flags of an inlet
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PostProcessing(u32);

impl PostProcessing {
    /// Timestamps are returned as transmitted
    pub const NONE: Self = Self(0);
    /// Map timestamps onto the local clock
    pub const CLOCKSYNC: Self = Self(1);
    /// Smooth timestamps of regular-rate streams
    pub const DEJITTER: Self = Self(2);
    /// Force non-decreasing timestamps
    pub const MONOTONIZE: Self = Self(4);
    /// Serialize pulls from multiple tasks
    pub const THREADSAFE: Self = Self(8);
    /// All of the above
    pub const ALL: Self = Self(15);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Flags from their numeric value; unknown bits are rejected
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PostProcessing {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PostProcessing {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PostProcessing {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for PostProcessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::CLOCKSYNC, "CLOCKSYNC"),
            (Self::DEJITTER, "DEJITTER"),
            (Self::MONOTONIZE, "MONOTONIZE"),
            (Self::THREADSAFE, "THREADSAFE"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            write!(f, "PostProcessing(NONE)")
        } else {
            write!(f, "PostProcessing({})", names.join(" | "))
        }
    }
}

/// Recursive least squares fit of timestamps against sample index
#[derive(Debug, Clone)]
struct Dejitter {
    lambda: f64,
    interval: f64,
    /// Integer part of the first timestamp, subtracted for precision
    base: Option<f64>,
    n: f64,
    w: [f64; 2],
    p: [[f64; 2]; 2],
}

impl Dejitter {
    fn new(srate: f64, halftime: f64) -> Self {
        let lambda = if halftime > 0.0 {
            2f64.powf(-1.0 / (srate * halftime))
        } else {
            // No memory: every timestamp passes through
            0.0
        };
        let mut d = Self {
            lambda,
            interval: 1.0 / srate,
            base: None,
            n: 0.0,
            w: [0.0, 0.0],
            p: [[0.0; 2]; 2],
        };
        d.reset();
        d
    }

    fn reset(&mut self) {
        self.base = None;
        self.n = 0.0;
        self.w = [0.0, self.interval];
        self.p = [[1e10, 0.0], [0.0, 1e10]];
    }

    fn apply(&mut self, t: f64) -> f64 {
        if self.lambda <= 0.0 {
            return t;
        }
        let base = *self.base.get_or_insert(t.floor());
        let y = t - base;
        let x = [1.0, self.n];

        // k = P x / (lambda + x' P x)
        let px = [
            self.p[0][0] * x[0] + self.p[0][1] * x[1],
            self.p[1][0] * x[0] + self.p[1][1] * x[1],
        ];
        let gamma = self.lambda + x[0] * px[0] + x[1] * px[1];
        let k = [px[0] / gamma, px[1] / gamma];

        let err = y - (self.w[0] * x[0] + self.w[1] * x[1]);
        self.w[0] += k[0] * err;
        self.w[1] += k[1] * err;

        // P = (P - k x' P) / lambda; P is symmetric so x' P = px'
        for (i, row) in self.p.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (*cell - k[i] * px[j]) / self.lambda;
            }
        }

        let fitted = self.w[0] + self.w[1] * self.n;
        self.n += 1.0;
        base + fitted
    }
}

/// Per-inlet post-processing state
#[derive(Debug, Clone)]
pub(crate) struct TimestampPostProcessor {
    flags: PostProcessing,
    srate: f64,
    halftime: f64,
    dejitter: Option<Dejitter>,
    last: f64,
    generation: u64,
}

impl TimestampPostProcessor {
    pub(crate) fn new(srate: f64, halftime: f64) -> Self {
        Self {
            flags: PostProcessing::NONE,
            srate,
            halftime,
            dejitter: None,
            last: f64::NEG_INFINITY,
            generation: 0,
        }
    }

    pub(crate) fn flags(&self) -> PostProcessing {
        self.flags
    }

    /// Change flags; filter state restarts
    pub(crate) fn set_flags(&mut self, flags: PostProcessing) {
        self.flags = flags;
        self.restart();
    }

    /// Change the dejitter half-time; filter state restarts
    pub(crate) fn set_halftime(&mut self, halftime: f64) {
        self.halftime = halftime;
        self.restart();
    }

    fn restart(&mut self) {
        self.dejitter = if self.flags.contains(PostProcessing::DEJITTER) && self.srate > 0.0 {
            Some(Dejitter::new(self.srate, self.halftime))
        } else {
            None
        };
        self.last = f64::NEG_INFINITY;
    }

    /// Process one timestamp
    ///
    /// `offset` is the current clock offset estimate and `generation` the
    /// clock reset generation it belongs to; a new generation restarts the
    /// filters.
    pub(crate) fn process(&mut self, timestamp: f64, offset: f64, generation: u64) -> f64 {
        if generation != self.generation {
            self.generation = generation;
            self.restart();
        }

        let mut t = timestamp;
        if self.flags.contains(PostProcessing::CLOCKSYNC) {
            t += offset;
        }
        if let Some(d) = self.dejitter.as_mut() {
            t = d.apply(t);
        }
        if self.flags.contains(PostProcessing::MONOTONIZE) {
            if t < self.last {
                t = self.last;
            }
            self.last = t;
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let f = PostProcessing::CLOCKSYNC | PostProcessing::MONOTONIZE;
        assert!(f.contains(PostProcessing::CLOCKSYNC));
        assert!(!f.contains(PostProcessing::DEJITTER));
        assert_eq!(f.bits(), 5);
        assert_eq!(PostProcessing::from_bits(15), Some(PostProcessing::ALL));
        assert_eq!(PostProcessing::from_bits(16), None);
        assert_eq!(format!("{:?}", f), "PostProcessing(CLOCKSYNC | MONOTONIZE)");
        assert!(PostProcessing::default().is_empty());
    }

    #[test]
    fn test_none_passes_through() {
        let mut p = TimestampPostProcessor::new(100.0, 90.0);
        assert_eq!(p.process(12.5, 3.0, 0), 12.5);
        assert_eq!(p.process(10.0, 3.0, 0), 10.0);
    }

    #[test]
    fn test_clocksync_adds_offset() {
        let mut p = TimestampPostProcessor::new(100.0, 90.0);
        p.set_flags(PostProcessing::CLOCKSYNC);
        assert_eq!(p.process(12.5, 3.0, 0), 15.5);
    }

    #[test]
    fn test_monotonize() {
        let mut p = TimestampPostProcessor::new(0.0, 90.0);
        p.set_flags(PostProcessing::MONOTONIZE);
        let out: Vec<f64> = [1.0, 2.0, 1.5, 3.0, 2.9]
            .iter()
            .map(|t| p.process(*t, 0.0, 0))
            .collect();
        assert_eq!(out, vec![1.0, 2.0, 2.0, 3.0, 3.0]);

        // A clock reset lets time go backwards once
        assert_eq!(p.process(0.5, 0.0, 1), 0.5);
    }

    #[test]
    fn test_dejitter_converges() {
        let srate = 100.0;
        let base = 1_700_000_000.25;
        let mut p = TimestampPostProcessor::new(srate, 90.0);
        p.set_flags(PostProcessing::DEJITTER);

        // Deterministic jitter in [-5ms, 5ms]
        let mut seed: u64 = 12345;
        let mut max_err: f64 = 0.0;
        for n in 0..3000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let jitter = ((seed >> 33) as f64 / (1u64 << 31) as f64 - 0.5) * 0.01;
            let truth = base + n as f64 / srate;
            let out = p.process(truth + jitter, 0.0, 0);
            if n >= 2000 {
                max_err = max_err.max((out - truth).abs());
            }
        }
        assert!(max_err < 0.002, "residual error {}", max_err);
    }

    #[test]
    fn test_dejitter_skips_irregular_streams() {
        let mut p = TimestampPostProcessor::new(0.0, 90.0);
        p.set_flags(PostProcessing::DEJITTER);
        assert_eq!(p.process(5.123, 0.0, 0), 5.123);
        assert_eq!(p.process(5.001, 0.0, 0), 5.001);
    }
}
