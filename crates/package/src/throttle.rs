// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-package progress throttling, per spec.md §4.9: the first update for a
//! package always emits; later updates are rate-limited by how close the
//! percentage is to either edge and by how large the jump was since the
//! last emission; the final 100% update always emits.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const NEAR_EDGE: f32 = 5.0;
const LARGE_JUMP: f32 = 10.0;
const MEDIUM_JUMP: f32 = 3.0;

const FAST: Duration = Duration::from_millis(50);
const MEDIUM: Duration = Duration::from_millis(100);
const SLOW: Duration = Duration::from_millis(200);

struct PackageState {
    last_emit: Instant,
    last_percent: f32,
}

/// Mutex-guarded (by the caller) per-package throttle state.
pub struct Throttler {
    packages: HashMap<String, PackageState>,
}

impl Throttler {
    pub fn new() -> Self {
        Self { packages: HashMap::new() }
    }

    /// Decides whether a progress update for `package` at `percent` should
    /// be emitted right now, recording the decision either way.
    pub fn should_emit(&mut self, package: &str, percent: f32) -> bool {
        let now = Instant::now();

        let Some(state) = self.packages.get_mut(package) else {
            self.packages.insert(
                package.to_owned(),
                PackageState {
                    last_emit: now,
                    last_percent: percent,
                },
            );
            return true;
        };

        if percent >= 100.0 {
            state.last_emit = now;
            state.last_percent = percent;
            return true;
        }

        let delta = (percent - state.last_percent).abs();
        let near_edge = percent <= NEAR_EDGE || percent >= 100.0 - NEAR_EDGE;

        let interval = if near_edge || delta >= LARGE_JUMP {
            FAST
        } else if delta >= MEDIUM_JUMP {
            MEDIUM
        } else {
            SLOW
        };

        if now.duration_since(state.last_emit) >= interval {
            state.last_emit = now;
            state.last_percent = percent;
            true
        } else {
            false
        }
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_update_always_emits() {
        let mut throttle = Throttler::new();
        assert!(throttle.should_emit("pkg", 3.0));
    }

    #[test]
    fn final_hundred_percent_always_emits() {
        let mut throttle = Throttler::new();
        throttle.should_emit("pkg", 50.0);
        assert!(throttle.should_emit("pkg", 100.0));
    }

    #[test]
    fn immediate_small_change_away_from_edges_is_suppressed() {
        let mut throttle = Throttler::new();
        throttle.should_emit("pkg", 50.0);
        assert!(!throttle.should_emit("pkg", 51.0));
    }

    #[test]
    fn large_jump_is_not_suppressed() {
        let mut throttle = Throttler::new();
        throttle.should_emit("pkg", 50.0);
        assert!(throttle.should_emit("pkg", 65.0));
    }
}
