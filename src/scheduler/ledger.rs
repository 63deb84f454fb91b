use std::collections::VecDeque;

/// Window used when computing a domain's rolling success rate (spec §4.1:
/// "24 h success rate").
const WINDOW_MS: u64 = 24 * 60 * 60 * 1_000;

/// Caps memory per domain regardless of attempt volume, the same bounded-
/// sampling idea as `backend::session::cache::SessionCache`'s eviction scan:
/// old samples age out of the window anyway, so a hard cap just bounds the
/// cost of a single noisy domain.
const MAX_SAMPLES: usize = 2_048;

/// Rolling `(timestamp, outcome)` ledger for one domain, used to drive the
/// adaptive-rate multiplier in §4.1.
#[derive(Clone, Debug, Default)]
pub struct SuccessLedger {
    samples: VecDeque<(u64, bool)>,
}

impl SuccessLedger {
    pub fn new() -> Self {
        Self { samples: VecDeque::new() }
    }

    pub fn record(&mut self, now_ms: u64, ok: bool) {
        self.samples.push_back((now_ms, ok));
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Success rate over the trailing 24h window. Returns `1.0` (assume
    /// healthy) when there's no evidence either way, so a quiet domain is
    /// never penalized with a stretched interval.
    pub fn success_rate(&self, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(WINDOW_MS);
        let mut total = 0u32;
        let mut ok = 0u32;
        for &(ts, outcome) in self.samples.iter().rev() {
            if ts < cutoff {
                break;
            }
            total += 1;
            if outcome {
                ok += 1;
            }
        }
        if total == 0 { 1.0 } else { ok as f64 / total as f64 }
    }
}
