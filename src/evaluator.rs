use std::collections::HashMap;

use crate::core::{Alignment, SentencePair, WordAligner};
use crate::Result;

/// Precision/recall/AER of a set of proposed alignments against two-tier
/// gold annotations: precision is measured against the possible set, recall
/// against the sure set.
#[derive(Debug, Clone, Default)]
pub struct Performance {
    pub precision: f64,
    pub recall: f64,
    pub aer: f64,
    pub num_proposed: usize,
    pub num_sure: usize,
    pub num_proposed_sure: usize,
    pub num_proposed_possible: usize,
}

impl Performance {
    fn add_point(&mut self, proposed: bool, sure: bool, possible: bool) {
        if proposed {
            self.num_proposed += 1;
        }
        if sure {
            self.num_sure += 1;
        }
        if proposed && sure {
            self.num_proposed_sure += 1;
        }
        if proposed && possible {
            self.num_proposed_possible += 1;
        }
    }

    fn compute_from_counts(&mut self) {
        self.precision = if self.num_proposed == 0 {
            0.0
        } else {
            self.num_proposed_possible as f64 / self.num_proposed as f64
        };
        self.recall = if self.num_sure == 0 {
            0.0
        } else {
            self.num_proposed_sure as f64 / self.num_sure as f64
        };
        let denominator = self.num_proposed + self.num_sure;
        self.aer = if denominator == 0 {
            0.0
        } else {
            1.0 - (self.num_proposed_sure + self.num_proposed_possible) as f64
                / denominator as f64
        };
    }

    pub fn dump(&self) {
        log::info!(
            "Precision = {:.4}, Recall = {:.4}, AER = {:.4} (proposed {}, sure {})",
            self.precision,
            self.recall,
            self.aer,
            self.num_proposed,
            self.num_sure
        );
    }
}

/// Scores word aligners against held-out sentence pairs with gold
/// alignments. Used by the trainers to monitor AER after each iteration.
pub struct Evaluator {
    pub test_pairs: Vec<SentencePair>,
    pub references: HashMap<usize, Alignment>,
}

impl Evaluator {
    pub fn new(test_pairs: Vec<SentencePair>, references: HashMap<usize, Alignment>) -> Self {
        Self {
            test_pairs,
            references,
        }
    }

    pub fn test(&self, aligner: &dyn WordAligner) -> Result<Performance> {
        let proposed = aligner.align_sentence_pairs(&self.test_pairs)?;
        Ok(Self::eval(&self.test_pairs, &self.references, &proposed))
    }

    /// Evaluate proposed alignments against reference alignments. Sentences
    /// missing a reference or a proposal are silently skipped.
    pub fn eval(
        test_pairs: &[SentencePair],
        references: &HashMap<usize, Alignment>,
        proposed: &HashMap<usize, Alignment>,
    ) -> Performance {
        let mut perf = Performance::default();

        for pair in test_pairs {
            let (proposal, reference) = match (proposed.get(&pair.id), references.get(&pair.id)) {
                (Some(p), Some(r)) => (p, r),
                _ => continue,
            };

            for j in 0..pair.j_len() {
                for i in 0..pair.i_len() {
                    perf.add_point(
                        proposal.contains_sure(i, j),
                        reference.contains_sure(i, j),
                        reference.contains_possible(i, j),
                    );
                }
            }
        }

        perf.compute_from_counts();
        perf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn toy_pair() -> SentencePair {
        SentencePair::new(
            7,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        )
    }

    #[test]
    fn test_perfect_proposal_has_zero_aer() {
        let pair = toy_pair();
        let mut gold = Alignment::new();
        gold.add(0, 0, true);
        gold.add(1, 1, true);

        let mut references = HashMap::new();
        references.insert(pair.id, gold.clone());
        let mut proposed = HashMap::new();
        proposed.insert(pair.id, gold);

        let perf = Evaluator::eval(&[pair], &references, &proposed);
        assert_approx_eq!(perf.aer, 0.0, 1e-12);
        assert_approx_eq!(perf.precision, 1.0, 1e-12);
        assert_approx_eq!(perf.recall, 1.0, 1e-12);
    }

    #[test]
    fn test_possible_only_pairs_do_not_hurt_precision() {
        let pair = toy_pair();
        let mut gold = Alignment::new();
        gold.add(0, 0, true);
        gold.add(1, 1, false); // possible only

        let mut proposal = Alignment::new();
        proposal.add(0, 0, true);
        proposal.add(1, 1, true);

        let mut references = HashMap::new();
        references.insert(pair.id, gold);
        let mut proposed = HashMap::new();
        proposed.insert(pair.id, proposal);

        let perf = Evaluator::eval(&[pair], &references, &proposed);
        assert_approx_eq!(perf.precision, 1.0, 1e-12);
        assert_approx_eq!(perf.recall, 1.0, 1e-12);
        // AER = 1 - (1 + 2) / (2 + 1)
        assert_approx_eq!(perf.aer, 0.0, 1e-12);
    }

    #[test]
    fn test_wrong_proposal_is_penalized() {
        let pair = toy_pair();
        let mut gold = Alignment::new();
        gold.add(0, 0, true);

        let mut proposal = Alignment::new();
        proposal.add(1, 0, true);

        let mut references = HashMap::new();
        references.insert(pair.id, gold);
        let mut proposed = HashMap::new();
        proposed.insert(pair.id, proposal);

        let perf = Evaluator::eval(&[pair], &references, &proposed);
        assert_approx_eq!(perf.precision, 0.0, 1e-12);
        assert_approx_eq!(perf.recall, 0.0, 1e-12);
        assert_approx_eq!(perf.aer, 1.0, 1e-12);
    }
}
