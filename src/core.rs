use std::collections::HashMap;

use fnv::{FnvHashMap, FnvHashSet};
use rand::distributions::WeightedIndex;
use rand::prelude::*;

use crate::parallelism::MaybeParallelRefIterator;
use crate::Result;

/// The virtual word every sentence may generate from nothing. It occupies
/// the extra position `I` at the end of the English sentence.
pub const NULL_WORD: &str = "(NULL)";

/// A pair of mutually translated sentences. Following the IBM-model
/// convention the conditioning side is called English (length `I`) and the
/// generated side French (length `J`), whatever the actual languages are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    pub id: usize,
    pub english: Vec<String>,
    pub french: Vec<String>,
}

impl SentencePair {
    pub fn new(id: usize, english: Vec<String>, french: Vec<String>) -> Self {
        Self {
            id,
            english,
            french,
        }
    }

    /// Length of the English sentence, usually written `I`.
    pub fn i_len(&self) -> usize {
        self.english.len()
    }

    /// Length of the French sentence, usually written `J`.
    pub fn j_len(&self) -> usize {
        self.french.len()
    }

    pub fn en(&self, i: usize) -> &str {
        &self.english[i]
    }

    pub fn fr(&self, j: usize) -> &str {
        &self.french[j]
    }

    /// The same pair with the roles of the two sentences swapped.
    pub fn reverse(&self) -> SentencePair {
        SentencePair {
            id: self.id,
            english: self.french.clone(),
            french: self.english.clone(),
        }
    }
}

/// A set of position correspondences for one sentence pair.
///
/// Alignments serve two purposes: they hold a system's guessed alignment and
/// the gold-standard annotation. Pairs are keyed by
/// `(english_position, french_position)` and come in two tiers, "sure" and
/// "possible", where every sure pair is also possible. The `strengths` map
/// holds the posterior mass assigned to a pair by the model, independent of
/// whether it was kept by decoding.
#[derive(Debug, Clone, Default)]
pub struct Alignment {
    sure: FnvHashSet<(usize, usize)>,
    possible: FnvHashSet<(usize, usize)>,
    strengths: FnvHashMap<(usize, usize), f64>,
}

impl Alignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an alignment between English position `i` and French position
    /// `j`. Sure pairs are always recorded as possible too.
    pub fn add(&mut self, i: usize, j: usize, sure: bool) {
        if sure {
            self.sure.insert((i, j));
        }
        self.possible.insert((i, j));
    }

    pub fn contains_sure(&self, i: usize, j: usize) -> bool {
        self.sure.contains(&(i, j))
    }

    pub fn contains_possible(&self, i: usize, j: usize) -> bool {
        self.possible.contains(&(i, j))
    }

    pub fn set_strength(&mut self, i: usize, j: usize, strength: f64) {
        self.strengths.insert((i, j), strength);
    }

    pub fn strength(&self, i: usize, j: usize) -> f64 {
        self.strengths.get(&(i, j)).copied().unwrap_or(0.0)
    }

    pub fn sure_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sure.iter().copied()
    }

    pub fn possible_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.possible.iter().copied()
    }

    pub fn num_sure(&self) -> usize {
        self.sure.len()
    }

    /// Drop the strength map, keeping only the decoded pairs.
    pub fn condense(&mut self) {
        self.strengths.clear();
    }

    /// The same alignment with the roles of the two sentences swapped.
    pub fn reverse(&self) -> Alignment {
        let mut reversed = Alignment::new();
        for &(i, j) in &self.possible {
            reversed.add(j, i, self.sure.contains(&(i, j)));
        }
        for (&(i, j), &strength) in &self.strengths {
            reversed.set_strength(j, i, strength);
        }
        reversed
    }

    /// Keep every pair whose posterior is at or above `threshold`.
    /// `posteriors` is indexed `[french][english]`.
    pub fn threshold_posteriors(posteriors: &[Vec<f64>], threshold: f64) -> Alignment {
        let mut alignment = Alignment::new();
        for (j, row) in posteriors.iter().enumerate() {
            for (i, &p) in row.iter().enumerate() {
                alignment.set_strength(i, j, p);
                if p >= threshold {
                    alignment.add(i, j, true);
                }
            }
        }
        alignment
    }

    /// Re-threshold an already decoded alignment by its recorded strengths.
    pub fn threshold_by_strength(&self, threshold: f64) -> Alignment {
        let mut alignment = Alignment::new();
        for (&(i, j), &strength) in &self.strengths {
            alignment.set_strength(i, j, strength);
            if strength >= threshold {
                alignment.add(i, j, true);
            }
        }
        alignment
    }

    /// Draw one English position (or none) per French position from the
    /// posterior rows. Rows with zero mass stay unaligned. `posteriors` is
    /// indexed `[french][english]` and each row is expected to carry the
    /// residual null mass implicitly (rows need not sum to 1).
    pub fn sample_posteriors<R: Rng>(posteriors: &[Vec<f64>], rng: &mut R) -> Alignment {
        let mut alignment = Alignment::new();
        for (j, row) in posteriors.iter().enumerate() {
            for (i, &p) in row.iter().enumerate() {
                alignment.set_strength(i, j, p);
            }
            let mass: f64 = row.iter().sum();
            if mass == 0.0 {
                continue;
            }
            // The leftover mass stands in for the null position.
            let null_mass = (1.0 - mass).max(0.0);
            let mut weights = row.clone();
            weights.push(null_mass);
            if let Ok(dist) = WeightedIndex::new(&weights) {
                let i = dist.sample(rng);
                if i < row.len() {
                    alignment.add(i, j, true);
                }
            }
        }
        alignment
    }
}

/// A word aligner produces, for a sentence pair, an alignment giving an
/// English source for every French word that is not aligned to null.
pub trait WordAligner: Sync {
    fn name(&self) -> String;

    fn align_sentence_pair(&self, pair: &SentencePair) -> Result<Alignment>;

    fn align_sentence_pairs(&self, pairs: &[SentencePair]) -> Result<HashMap<usize, Alignment>> {
        log::info!("{}: aligning {} sentence pairs", self.name(), pairs.len());
        pairs
            .maybe_par_iter()
            .map(|pair| Ok((pair.id, self.align_sentence_pair(pair)?)))
            .collect()
    }
}

/// Aligns every French position to the English position closest to the
/// diagonal. Used as an evaluation floor.
pub struct BaselineWordAligner;

impl WordAligner for BaselineWordAligner {
    fn name(&self) -> String {
        "Baseline".to_string()
    }

    fn align_sentence_pair(&self, pair: &SentencePair) -> Result<Alignment> {
        let mut alignment = Alignment::new();
        let (i_len, j_len) = (pair.i_len(), pair.j_len());
        if i_len == 0 {
            return Ok(alignment);
        }
        for j in 0..j_len {
            let i = (i_len * j / j_len.max(1)).min(i_len - 1);
            alignment.add(i, j, true);
            alignment.set_strength(i, j, 1.0);
        }
        Ok(alignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sure_is_possible() {
        let mut a = Alignment::new();
        a.add(0, 1, true);
        a.add(1, 1, false);
        assert!(a.contains_sure(0, 1));
        assert!(a.contains_possible(0, 1));
        assert!(!a.contains_sure(1, 1));
        assert!(a.contains_possible(1, 1));
    }

    #[test]
    fn test_threshold_posteriors() {
        let posteriors = vec![vec![0.9, 0.1], vec![0.4, 0.6]];
        let a = Alignment::threshold_posteriors(&posteriors, 0.5);
        assert!(a.contains_sure(0, 0));
        assert!(a.contains_sure(1, 1));
        assert!(!a.contains_possible(1, 0));
        assert_eq!(a.strength(0, 1), 0.4);
    }

    #[test]
    fn test_reverse() {
        let mut a = Alignment::new();
        a.add(2, 0, true);
        a.set_strength(2, 0, 0.7);
        let r = a.reverse();
        assert!(r.contains_sure(0, 2));
        assert_eq!(r.strength(0, 2), 0.7);
    }

    #[test]
    fn test_baseline_aligner() {
        let pair = SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        );
        let a = BaselineWordAligner.align_sentence_pair(&pair).unwrap();
        assert!(a.contains_sure(0, 0));
        assert!(a.contains_sure(1, 1));
    }
}
