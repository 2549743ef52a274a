//! Humanized send delays within a batch

use chrono::Duration;
use rand::Rng;

/// Delay bounds for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub delay_min_secs: i64,
    pub delay_max_secs: i64,
    /// Recipients between extra pauses; 0 disables them
    pub pause_every: usize,
    pub pause_min_secs: i64,
    pub pause_max_secs: i64,
}

fn ordered(a: i64, b: i64) -> (i64, i64) {
    let (a, b) = (a.max(0), b.max(0));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Offsets from the batch start for `count` sends.
///
/// `base + index * step` with `base` and `step` drawn from the delay bounds,
/// ±20% jitter per send, never earlier than the previous send, plus an
/// extra pause every `pause_every` recipients.
pub fn humanized_offsets<R: Rng>(rng: &mut R, count: usize, pacing: &Pacing) -> Vec<Duration> {
    let (min, max) = ordered(pacing.delay_min_secs, pacing.delay_max_secs);
    let (pause_min, pause_max) = ordered(pacing.pause_min_secs, pacing.pause_max_secs);

    let base = rng.random_range(min..=max) as f64;
    let step = rng.random_range(min..=max) as f64;

    let mut offsets = Vec::with_capacity(count);
    let mut previous_ms = 0i64;
    let mut extra_ms = 0i64;

    for index in 0..count {
        if pacing.pause_every > 0 && index > 0 && index % pacing.pause_every == 0 {
            extra_ms += rng.random_range(pause_min..=pause_max) * 1000;
        }

        let raw = base + index as f64 * step;
        let jitter = rng.random_range(0.8..=1.2);
        let at_ms = ((raw * jitter * 1000.0) as i64 + extra_ms).max(previous_ms);

        offsets.push(Duration::milliseconds(at_ms));
        previous_ms = at_ms;
    }

    offsets
}
