// sentinel-gate-core/src/ratecell.rs
// ============================================================================
// Module: GCRA rate limiting primitives
// Description: The Generic Cell Rate Algorithm, implemented against a
//              per-key Theoretical Arrival Time (TAT), plus the cleanup
//              sweeper that bounds map growth across the key space.
// Purpose: Give both the IP-keyed and identity-keyed rate limiters in the
//          gateway the same, independently testable decision function.
// Dependencies: time
// ============================================================================

//! ## Overview
//! GCRA tracks one Theoretical Arrival Time (TAT) per key. On each request,
//! it takes `tat := max(stored_tat, now)` and compares `now` against
//! `allow_at := tat - burst_offset`: if `now` falls before that allowance,
//! the request is denied and the existing TAT is left untouched; otherwise
//! the request is admitted and the TAT advances to `tat + emission_interval`.
//! This yields a smooth, no-burst-accumulation-beyond-`burst` limiter with
//! O(1) state per key — no token bucket to refill on a timer, no sliding
//! window to store.
//!
//! `emission_interval = period / rate`; `burst_offset = burst * emission_interval`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};

/// The three tunables a GCRA limiter needs: how many requests (`rate`) are
/// allowed per `period`, and how many requests beyond the steady-state rate
/// (`burst`) may be admitted back-to-back before the limiter starts denying.
#[derive(Debug, Clone, Copy)]
pub struct GcraParams {
    /// Requests allowed per `period` at steady state.
    pub rate: u32,
    /// The period `rate` is measured over.
    pub period: StdDuration,
    /// Additional requests a key may burst by beyond steady state.
    pub burst: u32,
}

impl GcraParams {
    fn emission_interval(&self) -> Duration {
        let period_nanos = self.period.as_nanos();
        let rate = u128::from(self.rate.max(1));
        Duration::nanoseconds(i64::try_from(period_nanos / rate).unwrap_or(i64::MAX))
    }

    fn burst_offset(&self) -> Duration {
        self.emission_interval() * i32::try_from(self.burst).unwrap_or(i32::MAX)
    }
}

/// The outcome of a single GCRA admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// True if the request is admitted.
    pub allowed: bool,
    /// When denied, how long the caller should wait before retrying.
    pub retry_after: Option<StdDuration>,
    /// How long until the key's rate-limit state fully resets to empty,
    /// regardless of whether this request was allowed.
    pub reset_after: StdDuration,
}

/// Per-key GCRA state: just the Theoretical Arrival Time.
#[derive(Debug, Clone, Copy)]
struct Cell {
    tat: OffsetDateTime,
}

/// A mutex-guarded map of GCRA cells, one limiter instance per rate-limit
/// tier (IP-keyed pre-auth, identity-keyed post-auth).
#[derive(Debug)]
pub struct GcraLimiter {
    params: GcraParams,
    cells: Mutex<HashMap<String, Cell>>,
}

impl GcraLimiter {
    /// Builds a limiter with the given parameters and an empty key space.
    #[must_use]
    pub fn new(params: GcraParams) -> Self {
        Self {
            params,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates and, if admitted, records one request against `key` at
    /// `now`. Fails open is the caller's responsibility at a higher layer
    /// (this function cannot fail: a poisoned mutex is recovered, never
    /// propagated, since losing rate-limit precision is preferable to
    /// denying traffic due to an unrelated panic elsewhere).
    pub fn check(&self, key: &str, now: OffsetDateTime) -> Decision {
        let emission = self.params.emission_interval();
        let burst_offset = self.params.burst_offset();
        let mut cells = self.cells.lock().unwrap_or_else(|poison| poison.into_inner());

        let current_tat = cells.get(key).map_or(now, |cell| cell.tat.max(now));
        let allow_at = current_tat - burst_offset;

        if now < allow_at {
            let retry_after = allow_at - now;
            let reset_after = current_tat - now;
            return Decision {
                allowed: false,
                retry_after: Some(duration_to_std(retry_after)),
                reset_after: duration_to_std(reset_after.max(Duration::ZERO)),
            };
        }

        let new_tat = current_tat + emission;
        cells.insert(key.to_string(), Cell { tat: new_tat });
        let reset_after = new_tat - now;
        Decision {
            allowed: true,
            retry_after: None,
            reset_after: duration_to_std(reset_after.max(Duration::ZERO)),
        }
    }

    /// Removes every cell whose TAT has already passed at `now`: the key has
    /// gone fully idle and carries no state worth retaining. Returns the
    /// number of cells removed.
    pub fn sweep_idle(&self, now: OffsetDateTime) -> usize {
        let mut cells = self.cells.lock().unwrap_or_else(|poison| poison.into_inner());
        let before = cells.len();
        cells.retain(|_, cell| cell.tat > now);
        before - cells.len()
    }

    /// Returns the number of keys currently tracked. Exposed for health
    /// reporting.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(|poison| poison.into_inner());
        cells.len()
    }
}

fn duration_to_std(d: Duration) -> StdDuration {
    if d <= Duration::ZERO {
        StdDuration::ZERO
    } else {
        StdDuration::new(
            u64::try_from(d.whole_seconds()).unwrap_or(0),
            u32::try_from(d.subsec_nanoseconds().max(0)).unwrap_or(0),
        )
    }
}
