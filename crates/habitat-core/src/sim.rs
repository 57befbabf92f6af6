//! Mission state and the determinism hash.

use crate::fixed::{Fixed64, Ticks};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Mission state
// ---------------------------------------------------------------------------

/// Caller-visible mission progress. Mutated only by the clock and event
/// effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionState {
    /// Ticks completed since mission start.
    pub tick: Ticks,
    /// Sols completed since mission start.
    pub sol: u64,
    /// Tick within the current sol.
    pub hour: u32,
    pub running: bool,
    pub paused: bool,
    pub ended: bool,
    pub crew_size: u32,
    pub crew_alive: u32,
    pub end_reason: Option<String>,
}

impl MissionState {
    /// Fresh state at tick 0 with the whole crew alive.
    pub fn new(crew_size: u32) -> Self {
        Self {
            tick: 0,
            sol: 0,
            hour: 0,
            running: false,
            paused: false,
            ended: false,
            crew_size,
            crew_alive: crew_size,
            end_reason: None,
        }
    }

    /// Grow or shrink the crew. Crew size never drops below one; a decrease
    /// caps the living crew, an increase brings everyone aboard alive.
    pub fn change_crew(&mut self, delta: i32) {
        let size = i64::from(self.crew_size) + i64::from(delta);
        self.crew_size = u32::try_from(size.max(1)).unwrap_or(u32::MAX);
        if delta < 0 {
            self.crew_alive = self.crew_alive.min(self.crew_size);
        } else {
            self.crew_alive = self.crew_size;
        }
    }

    /// End the mission. Only the first reason sticks.
    pub(crate) fn end(&mut self, reason: impl Into<String>) {
        if !self.ended {
            self.ended = true;
            self.running = false;
            self.end_reason = Some(reason.into());
        }
    }
}

/// Snapshot returned by `MissionClock::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStatus {
    #[serde(flatten)]
    pub state: MissionState,
    pub total_ticks: Ticks,
    pub progress: f64,
    pub operational_units: usize,
    pub failed_units: usize,
    pub active_events: Vec<String>,
    pub pending_events: usize,
    pub total_power_demand: f64,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of mission state for reproducibility checks.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
