use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which non-homogeneous HMM state family to use.
///
/// The dependence of the transition distribution on the French time step `j`
/// is summarized into a small number of time-zones; each zone indexes an
/// independent distortion group. `Homo` uses a single zone, `Ends` gives the
/// sentence boundaries their own statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFamily {
    Homo,
    Ends,
}

// Time-zones of the `Ends` family.
pub(crate) const ZONE_INIT: usize = 0; // j = -1
pub(crate) const ZONE_MIDDLE: usize = 1; // 0 <= j < J-1
pub(crate) const ZONE_PENFINAL: usize = 2; // j = J-1
pub(crate) const ZONE_FINAL: usize = 3; // j = J

impl StateFamily {
    pub fn num_zones(&self) -> usize {
        match self {
            StateFamily::Homo => 1,
            StateFamily::Ends => 4,
        }
    }

    /// The time-zone summarizing French time step `j` (which runs from -1,
    /// the virtual start, to `j_len`).
    pub fn zone(&self, j: isize, j_len: usize) -> usize {
        match self {
            StateFamily::Homo => 0,
            StateFamily::Ends => {
                if j == -1 {
                    ZONE_INIT
                } else if j == j_len as isize - 1 {
                    ZONE_PENFINAL
                } else if j == j_len as isize {
                    ZONE_FINAL
                } else {
                    ZONE_MIDDLE
                }
            }
        }
    }

    pub fn num_distortion_groups(&self) -> usize {
        self.num_zones()
    }

    pub fn distortion_group(&self, zone: usize) -> usize {
        zone
    }
}

impl FromStr for StateFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "homo" => Ok(StateFamily::Homo),
            "ends" => Ok(StateFamily::Ends),
            _ => Err(format!("unknown state family {:?}", s)),
        }
    }
}

/// A hidden state of the alignment HMM for an English sentence of length
/// `I`: the most recent (including current) English position that was not
/// null-aligned, and whether the current French word is aligned at all.
///
/// `(-1, aligned)` is the unique initial state and `(I, aligned)` the unique
/// final state; `(I, not aligned)` is impossible and never constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaState {
    pub i: isize,
    pub curr_aligned: bool,
}

impl WaState {
    pub fn new(i: isize, curr_aligned: bool) -> Self {
        Self { i, curr_aligned }
    }

    /// Whether the combination is a representable state for a sentence of
    /// length `i_len`.
    pub fn is_valid(i: isize, curr_aligned: bool, i_len: usize) -> bool {
        // Cannot have the last real alignment beyond the sentence while
        // being null-aligned.
        !(i == i_len as isize && !curr_aligned)
    }

    pub fn init_state() -> WaState {
        WaState::new(-1, true)
    }

    pub fn final_state(i_len: usize) -> WaState {
        WaState::new(i_len as isize, true)
    }

    pub fn is_init(&self) -> bool {
        self.i == -1 && self.curr_aligned
    }

    pub fn is_final(&self, i_len: usize) -> bool {
        self.i == i_len as isize && self.curr_aligned
    }

    /// Whether a transition from this state into `to` is legal.
    pub fn valid_transition(&self, to: &WaState, i_len: usize) -> bool {
        // A run of null alignments keeps referring back to the same last
        // real position.
        if !to.curr_aligned && self.i != to.i {
            return false;
        }
        if to.is_init() {
            return false;
        }
        if self.is_final(i_len) {
            return false;
        }
        true
    }
}
