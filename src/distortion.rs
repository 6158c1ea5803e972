use serde::{Deserialize, Serialize};

use crate::utils::normalize_force;

/// Number of offset buckets on each side of zero. Offsets beyond the window
/// are collapsed into the closest fringe bucket.
pub const WINDOW_SIZE: usize = 5;

const NUM_BUCKETS: usize = 2 * WINDOW_SIZE + 1;

/// Models distortion: the conditional distribution `P(a_j = i | a_{j-1} = h)`
/// over the offset `d = i - h`, bucketed into a window of `2W+1` cells and
/// conditioned on a distortion group (a time-zone of the hidden-state
/// family, or group 0 for the position-agnostic models).
///
/// Queries split a fringe bucket's mass uniformly over the absolute
/// positions that collapse into it and renormalize by the mass of the
/// offsets actually reachable within the sentence, so the distribution over
/// `i` in `[0, I]` sums to 1 for every `h`. Accumulation (`add`) stores the
/// raw expected count: the maximum-likelihood update of a bucketed
/// multinomial does not scale the count, only the query-time probability is
/// split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "DistortProbTableRepr", into = "DistortProbTableRepr")]
pub struct DistortProbTable {
    probs: Vec<Vec<f64>>,
    // sums[group][k] = probs[group][0] + ... + probs[group][k-1]
    sums: Vec<Vec<f64>>,
}

impl DistortProbTable {
    /// The group count is an explicit parameter; it comes from the
    /// hidden-state family for the HMM and is 1 for the other models.
    pub fn new(num_groups: usize) -> Self {
        let mut table = Self {
            probs: vec![vec![0.0; NUM_BUCKETS]; num_groups],
            sums: vec![vec![0.0; NUM_BUCKETS + 1]; num_groups],
        };
        table.compute_sums();
        table
    }

    pub fn num_groups(&self) -> usize {
        self.probs.len()
    }

    pub fn buckets(&self, group: usize) -> &[f64] {
        &self.probs[group]
    }

    // Mass of the offsets reachable from h within a sentence of length I,
    // i.e. probs[group][mind] + ... + probs[group][maxd] for the clipped
    // offset range.
    fn compute_norm(&self, group: usize, h: isize, i_len: usize) -> f64 {
        let w = WINDOW_SIZE as isize;
        let mind = (-h).max(-w);
        let maxd = (i_len as isize - h).min(w);
        if mind > maxd {
            log::error!(
                "empty reachable offset range: group={} h={} I={}",
                group,
                h,
                i_len
            );
            return 0.0;
        }
        self.sums[group][(maxd + w + 1) as usize] - self.sums[group][(mind + w) as usize]
    }

    /// `P(a_j = i | a_{j-1} = h)` for an English sentence of length `i_len`.
    /// Positions run over `[0, i_len]`; `h` may be -1 for the initial state.
    pub fn get(&self, group: usize, h: isize, i: isize, i_len: usize) -> f64 {
        let w = WINDOW_SIZE as isize;
        let mut d = i - h;
        // div = number of positions i in [0, I] that share this fringe
        // bucket for this h, among which its mass is split uniformly.
        let div = if d <= -w {
            d = -w;
            h - w + 1
        } else if d >= w {
            d = w;
            i_len as isize - (h + w) + 1
        } else {
            1
        };
        let norm = self.compute_norm(group, h, i_len);
        if norm == 0.0 {
            return 0.0;
        }
        if div <= 0 {
            log::error!(
                "empty fringe bucket split: group={} h={} i={} I={} div={}",
                group,
                h,
                i,
                i_len,
                div
            );
            return 0.0;
        }
        self.probs[group][(d + w) as usize] / div as f64 / norm
    }

    /// Accumulate an expected count for the transition `h -> i`. The count
    /// goes into the clipped bucket undivided.
    pub fn add(&mut self, group: usize, h: isize, i: isize, count: f64) {
        let w = WINDOW_SIZE as isize;
        let d = (i - h).clamp(-w, w);
        self.probs[group][(d + w) as usize] += count;
    }

    /// Normalize every group's bucket vector to sum to 1, falling back to a
    /// uniform distribution when a group accumulated no mass at all.
    pub fn normalize(&mut self) {
        for (group, probs) in self.probs.iter_mut().enumerate() {
            if !normalize_force(probs) {
                log::error!(
                    "normalize(): distortion group {} has sum 0, using uniform",
                    group
                );
            }
        }
        self.compute_sums();
    }

    pub fn init_uniform(&mut self) {
        for probs in self.probs.iter_mut() {
            probs.iter_mut().for_each(|p| *p = 1.0 / NUM_BUCKETS as f64);
        }
        self.compute_sums();
    }

    pub fn init_zero(&mut self) {
        for probs in self.probs.iter_mut() {
            probs.iter_mut().for_each(|p| *p = 0.0);
        }
        self.compute_sums();
    }

    /// Overwrite this table with the contents of another of the same shape.
    pub fn assign(&mut self, other: &DistortProbTable) {
        self.probs.clone_from(&other.probs);
        self.sums.clone_from(&other.sums);
    }

    fn compute_sums(&mut self) {
        for (group, probs) in self.probs.iter().enumerate() {
            let sums = &mut self.sums[group];
            sums[0] = 0.0;
            for (k, &p) in probs.iter().enumerate() {
                sums[k + 1] = sums[k] + p;
            }
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct DistortProbTableRepr {
    probs: Vec<Vec<f64>>,
}

impl TryFrom<DistortProbTableRepr> for DistortProbTable {
    type Error = String;

    fn try_from(repr: DistortProbTableRepr) -> Result<Self, Self::Error> {
        if repr.probs.iter().any(|row| row.len() != NUM_BUCKETS) {
            return Err(format!(
                "distortion groups must have {} buckets",
                NUM_BUCKETS
            ));
        }
        let num_groups = repr.probs.len();
        let mut table = DistortProbTable {
            probs: repr.probs,
            sums: vec![vec![0.0; NUM_BUCKETS + 1]; num_groups],
        };
        table.compute_sums();
        Ok(table)
    }
}

impl From<DistortProbTable> for DistortProbTableRepr {
    fn from(table: DistortProbTable) -> Self {
        Self { probs: table.probs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_init_uniform() {
        let mut table = DistortProbTable::new(2);
        table.init_uniform();
        for group in 0..2 {
            for &p in table.buckets(group) {
                assert_approx_eq!(p, 1.0 / 11.0, 1e-12);
            }
        }
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let mut table = DistortProbTable::new(1);
        table.add(0, 0, 1, 3.0);
        table.add(0, 0, 2, 1.0);
        table.normalize();
        let total: f64 = table.buckets(0).iter().sum();
        assert_approx_eq!(total, 1.0, 1e-12);
    }

    #[test]
    fn test_normalize_idempotent() {
        let mut table = DistortProbTable::new(1);
        table.add(0, 2, 4, 5.0);
        table.add(0, 2, 1, 2.0);
        table.normalize();
        let once = table.buckets(0).to_vec();
        table.normalize();
        assert_eq!(once, table.buckets(0));
    }

    #[test]
    fn test_zero_mass_falls_back_to_uniform() {
        let mut table = DistortProbTable::new(1);
        table.normalize();
        for &p in table.buckets(0) {
            assert_approx_eq!(p, 1.0 / 11.0, 1e-12);
        }
    }

    #[test]
    fn test_peaked_observation_prefers_same_position() {
        let mut table = DistortProbTable::new(1);
        table.add(0, 2, 2, 1.0);
        table.normalize();
        assert!(table.get(0, 2, 2, 10) > table.get(0, 2, 7, 10));
    }

    #[test]
    fn test_reachable_range_sums_to_one() {
        let mut table = DistortProbTable::new(1);
        table.add(0, 0, 1, 2.0);
        table.add(0, 3, 1, 1.0);
        table.add(0, 3, 9, 4.0);
        table.normalize();
        // For any h, probabilities over the reachable positions [0, I] must
        // sum to 1, fringe splitting included.
        for i_len in [3usize, 8, 20] {
            for h in -1..=(i_len as isize) {
                let total: f64 = (0..=i_len as isize)
                    .map(|i| table.get(0, h, i, i_len))
                    .sum();
                assert_approx_eq!(total, 1.0, 1e-9);
            }
        }
    }

    #[test]
    fn test_add_accumulates_raw_counts() {
        // The fringe bucket receives the undivided count even though `get`
        // splits its mass.
        let mut table = DistortProbTable::new(1);
        table.add(0, 0, 9, 1.0);
        table.add(0, 0, 10, 1.0);
        assert_eq!(table.buckets(0)[2 * WINDOW_SIZE], 2.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut table = DistortProbTable::new(2);
        table.add(1, 0, 3, 2.5);
        table.normalize();
        let json = serde_json::to_string(&table).unwrap();
        let loaded: DistortProbTable = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.buckets(1), table.buckets(1));
        // Prefix sums are rebuilt on load.
        assert_approx_eq!(loaded.get(1, 0, 3, 10), table.get(1, 0, 3, 10), 1e-12);
    }
}
