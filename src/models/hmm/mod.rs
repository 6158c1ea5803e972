pub mod cache;
pub mod state;
pub mod trellis;

use std::sync::Arc;

use crate::core::{Alignment, NULL_WORD};
use crate::models::hmm::cache::TrellisCache;
use crate::models::hmm::state::WaState;
use crate::models::hmm::trellis::{TrellisOutput, WaTrellis};
use crate::models::{en_word_at, update_trans_probs, ExpAlign, PairState};
use crate::params::Params;
use crate::trainer::AlignerOptions;
use crate::{Error, Result};

/// The HMM alignment model (Vogel et al., 1996) for one sentence pair.
///
/// The translation table supplies the emission weights, the distortion
/// table (through the trellis) the transition weights. The trellis for this
/// sentence's English length is fetched from the shared cache.
pub struct HmmState<'a> {
    en: &'a [String],
    fr: &'a [String],
    params: &'a Params,
    opts: &'a AlignerOptions,
    trellis: Arc<WaTrellis>,
    output: Option<TrellisOutput>,
    likelihood: f64,
}

impl<'a> HmmState<'a> {
    pub(crate) fn new(
        en: &'a [String],
        fr: &'a [String],
        params: &'a Params,
        opts: &'a AlignerOptions,
        cache: &TrellisCache,
    ) -> Self {
        let trellis = cache.get_or_create(
            opts.state_family,
            en.len(),
            opts.null_prob,
            &params.distort_probs,
        );
        Self {
            en,
            fr,
            params,
            opts,
            trellis,
            output: None,
            likelihood: f64::NAN,
        }
    }

    // P(f_j | a_j = i,b): generate from the English word, or from null while
    // unaligned. The final state emits nothing.
    fn emission_prob(&self, j: usize, state: &WaState) -> f64 {
        let v = &self.fr[j];
        if !state.curr_aligned {
            self.params.trans_probs.get(NULL_WORD, v, 0.0)
        } else if state.i >= 0 && (state.i as usize) < self.en.len() {
            self.params
                .trans_probs
                .get(&self.en[state.i as usize], v, 0.0)
        } else {
            0.0
        }
    }

    fn emission_weights(&self) -> Vec<Vec<f64>> {
        (0..self.fr.len())
            .map(|j| {
                self.trellis
                    .states()
                    .iter()
                    .map(|state| self.emission_prob(j, state))
                    .collect()
            })
            .collect()
    }
}

impl PairState for HmmState<'_> {
    fn i_len(&self) -> usize {
        self.en.len()
    }

    fn j_len(&self) -> usize {
        self.fr.len()
    }

    fn en_word(&self, i: usize) -> &str {
        en_word_at(self.en, i)
    }

    fn fr_word(&self, j: usize) -> &str {
        &self.fr[j]
    }

    fn compute_exp_align(&mut self) -> ExpAlign {
        let mut output = TrellisOutput::new(&self.trellis, self.emission_weights());
        if output.likelihood == 0.0 {
            log::error!(
                "likelihood = 0 for sentence with length ({}, {}); to prevent underflow, set to 1 (ignores the sentence)",
                self.en.len(),
                self.fr.len()
            );
            output.likelihood = 1.0;
        }
        self.likelihood = output.likelihood;

        let (i_len, j_len) = (self.en.len(), self.fr.len());
        let mut exp = ExpAlign::zeros(j_len, i_len);
        for j in 0..j_len {
            for (s, state) in self.trellis.states().iter().enumerate() {
                let posterior = output.node_posterior(j, s);
                if !state.curr_aligned {
                    // A null-aligned position contributes to the null
                    // column whatever its anchor is.
                    exp.set(j, i_len, exp.get(j, i_len) + posterior);
                } else if state.i >= 0 && (state.i as usize) < i_len {
                    let i = state.i as usize;
                    exp.set(j, i, exp.get(j, i) + posterior);
                }
            }
        }

        self.output = Some(output);
        exp
    }

    fn update_new_params(&self, exp: &ExpAlign, new_params: &mut Params) {
        // Translation.
        update_trans_probs(self, exp, new_params, self.opts.use_normed_objective);
        // Transition.
        match &self.output {
            Some(output) => self
                .trellis
                .update_transition_probs(output, &mut new_params.distort_probs),
            None => log::error!("update_new_params called before compute_exp_align"),
        }
    }

    fn viterbi(&self, reverse: bool) -> Alignment {
        let path = self.trellis.viterbi_path(&self.emission_weights());
        let mut alignment = Alignment::new();
        for (j, &s) in path.iter().enumerate() {
            let state = self.trellis.state(s);
            if state.curr_aligned && state.i >= 0 && (state.i as usize) < self.en.len() {
                let i = state.i as usize;
                if !reverse {
                    alignment.add(i, j, true);
                } else {
                    alignment.add(j, i, true);
                }
            }
        }
        alignment
    }

    fn likelihood(&self) -> f64 {
        self.likelihood
    }

    fn path_likelihood(&self, _pos: &[usize]) -> Result<f64> {
        Err(Error::UnsupportedModel("HMM"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SentencePair;
    use crate::models::StateFamily;
    use crate::params::TransProbTable;
    use assert_approx_eq::assert_approx_eq;

    fn uniform_params(pair: &SentencePair, family: StateFamily) -> Params {
        let mut params = Params::new(
            "HMM:normal",
            false,
            family.num_distortion_groups(),
            Some(family),
        );
        params.trans_probs =
            TransProbTable::allocate(std::slice::from_ref(pair), false, None, 0.0);
        params.init_uniform();
        params
    }

    fn toy_pair() -> SentencePair {
        SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        )
    }

    #[test]
    fn test_uniform_hmm_has_finite_likelihood() {
        let pair = toy_pair();
        let params = uniform_params(&pair, StateFamily::Ends);
        let opts = AlignerOptions::default();
        let cache = TrellisCache::new(100);

        let mut sps = HmmState::new(&pair.english, &pair.french, &params, &opts, &cache);
        let exp = sps.compute_exp_align();

        assert!(sps.likelihood().is_finite());
        assert!(sps.likelihood() > 0.0);

        // Each French position's expectations form a distribution over the
        // English positions plus null.
        for j in 0..2 {
            let total: f64 = (0..=2).map(|i| exp.get(j, i)).sum();
            assert_approx_eq!(total, 1.0, 1e-9);
        }
    }

    #[test]
    fn test_e_step_is_deterministic() {
        let pair = toy_pair();
        let params = uniform_params(&pair, StateFamily::Ends);
        let opts = AlignerOptions::default();
        let cache = TrellisCache::new(100);

        let mut sps = HmmState::new(&pair.english, &pair.french, &params, &opts, &cache);
        let first = sps.compute_exp_align();
        let second = sps.compute_exp_align();
        assert_eq!(first, second);
    }

    #[test]
    fn test_viterbi_tracks_peaked_translations() {
        let pair = toy_pair();
        let mut params = uniform_params(&pair, StateFamily::Homo);
        params.trans_probs.set("a", "x", 0.9);
        params.trans_probs.set("a", "y", 0.1);
        params.trans_probs.set("b", "x", 0.1);
        params.trans_probs.set("b", "y", 0.9);
        params.trans_probs.set(NULL_WORD, "x", 0.01);
        params.trans_probs.set(NULL_WORD, "y", 0.01);
        let opts = AlignerOptions::builder()
            .state_family(StateFamily::Homo)
            .build()
            .unwrap();
        let cache = TrellisCache::new(100);

        let sps = HmmState::new(&pair.english, &pair.french, &params, &opts, &cache);
        let alignment = sps.viterbi(false);
        assert!(alignment.contains_sure(0, 0));
        assert!(alignment.contains_sure(1, 1));
    }

    #[test]
    fn test_m_step_accumulates_both_tables() {
        let pair = toy_pair();
        let params = uniform_params(&pair, StateFamily::Ends);
        let opts = AlignerOptions::default();
        let cache = TrellisCache::new(100);

        let mut sps = HmmState::new(&pair.english, &pair.french, &params, &opts, &cache);
        let exp = sps.compute_exp_align();

        let mut new_params = params.clone();
        new_params.init_zero();
        sps.update_new_params(&exp, &mut new_params);

        assert!(new_params.trans_probs.get("a", "x", 0.0) > 0.0);
        let interior: f64 = new_params.distort_probs.buckets(1).iter().sum();
        assert!(interior > 0.0);
    }
}
