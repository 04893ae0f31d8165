//! Compile-time sizing constants and the runtime configuration knobs.

use std::env;

/// log2 of the arena size in bytes. Arenas are allocated with alignment equal
/// to their size so that any object address can be masked down to its arena.
pub const ARENA_SIZE_EXP: usize = 16;
pub const ARENA_SIZE: usize = 1 << ARENA_SIZE_EXP;

/// log2 of the cell size in bytes. Cells are the smallest allocation unit
/// inside an arena.
pub const CELL_SIZE_EXP: usize = 4;
pub const CELL_SIZE: usize = 1 << CELL_SIZE_EXP;

pub const ARENA_CELLS: usize = ARENA_SIZE / CELL_SIZE;

/// log2 of the largest allocation served from arenas. Anything bigger goes
/// through the huge-block table.
pub const LARGE_ALLOC_THRESHOLD_EXP: usize = 13;
pub const LARGE_ALLOC_THRESHOLD: usize = 1 << LARGE_ALLOC_THRESHOLD_EXP;

/// Shadow-stack capacity in root slots.
pub const SHADOWSTACK_SIZE: usize = 4096;

/// Minimum number of entries an incremental mark slice processes per
/// work-list, so small backlogs still drain instead of halving forever.
pub const INC_MARK_MIN: usize = 64;

/// Number of exact-size fit lists (block sizes 1..=N cells).
pub const SMALL_FREE_LIST_COUNT: usize = 16;

pub const DEFAULT_MAJOR_THRESHOLD: usize = 16 * 1024 * 1024;
pub const DEFAULT_INCMARK_THRESHOLD: usize = 2 * 1024 * 1024;

const MAJOR_THRESHOLD_ENV: &str = "CINDERS_MAJOR_COLLECTION";
const INCMARK_THRESHOLD_ENV: &str = "CINDERS_INCMARK";

/// Collection pacing, read once when the collector is constructed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes allocated between full collections.
    pub major_threshold: usize,
    /// Bytes allocated between incremental mark slices.
    pub incmark_threshold: usize,
}

impl Config {
    /// Read both thresholds from the environment. Absent or malformed values
    /// fall back to the compile-time defaults.
    pub fn from_env() -> Self {
        Self {
            major_threshold: env_or_fallback(MAJOR_THRESHOLD_ENV, DEFAULT_MAJOR_THRESHOLD),
            incmark_threshold: env_or_fallback(INCMARK_THRESHOLD_ENV, DEFAULT_INCMARK_THRESHOLD),
        }
    }

    pub fn with_major_threshold(mut self, bytes: usize) -> Self {
        self.major_threshold = bytes;
        self
    }

    pub fn with_incmark_threshold(mut self, bytes: usize) -> Self {
        self.incmark_threshold = bytes;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            major_threshold: DEFAULT_MAJOR_THRESHOLD,
            incmark_threshold: DEFAULT_INCMARK_THRESHOLD,
        }
    }
}

fn env_or_fallback(name: &str, fallback: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = Config::default()
            .with_major_threshold(1024)
            .with_incmark_threshold(64);
        assert_eq!(config.major_threshold, 1024);
        assert_eq!(config.incmark_threshold, 64);
    }

    #[test]
    fn malformed_env_falls_back() {
        // SAFETY: test-local variable, nothing else in the process reads it
        // concurrently.
        unsafe { env::set_var(MAJOR_THRESHOLD_ENV, "not-a-number") };
        let config = Config::from_env();
        assert_eq!(config.major_threshold, DEFAULT_MAJOR_THRESHOLD);
        unsafe { env::remove_var(MAJOR_THRESHOLD_ENV) };
    }

    #[test]
    fn large_threshold_fits_in_an_arena() {
        assert!(LARGE_ALLOC_THRESHOLD / CELL_SIZE < ARENA_CELLS);
    }
}
