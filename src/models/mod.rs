pub mod hmm;
mod model1;
mod model2;

use std::str::FromStr;

pub use hmm::state::StateFamily;
pub use hmm::HmmState;
pub use model1::Model1State;
pub use model2::Model2State;

use crate::core::{Alignment, NULL_WORD};
use crate::models::hmm::cache::TrellisCache;
use crate::params::Params;
use crate::trainer::AlignerOptions;
use crate::Result;

/// Which generative alignment model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Model1,
    Model2,
    Hmm,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Model1 => "Model1",
            ModelKind::Model2 => "Model2",
            ModelKind::Hmm => "HMM",
        }
    }

    /// Distortion group count for a table used by this model. The
    /// position-independent models share a single group; the HMM gets one
    /// per time-zone of its state family.
    pub fn num_distortion_groups(&self, family: StateFamily) -> usize {
        match self {
            ModelKind::Model1 | ModelKind::Model2 => 1,
            ModelKind::Hmm => family.num_distortion_groups(),
        }
    }

    pub fn uses_state_family(&self) -> bool {
        matches!(self, ModelKind::Hmm)
    }

    pub(crate) fn create_state<'a>(
        &self,
        en: &'a [String],
        fr: &'a [String],
        params: &'a Params,
        opts: &'a AlignerOptions,
        cache: &TrellisCache,
    ) -> Box<dyn PairState + 'a> {
        match self {
            ModelKind::Model1 => Box::new(Model1State::new(en, fr, params, opts)),
            ModelKind::Model2 => Box::new(Model2State::new(en, fr, params, opts)),
            ModelKind::Hmm => Box::new(HmmState::new(en, fr, params, opts, cache)),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "model1" => Ok(ModelKind::Model1),
            "model2" => Ok(ModelKind::Model2),
            "hmm" => Ok(ModelKind::Hmm),
            _ => Err(format!("unknown model {:?}", s)),
        }
    }
}

/// Operations a model supports for one particular sentence pair: the E-step
/// (expected alignments), its contribution to the candidate parameters, and
/// the two decoders.
pub(crate) trait PairState {
    fn i_len(&self) -> usize;
    fn j_len(&self) -> usize;

    /// The English word at position `i`, where position `I` is the null
    /// word.
    fn en_word(&self, i: usize) -> &str;
    fn fr_word(&self, j: usize) -> &str;

    /// The E-step for this sentence. Also computes the sentence likelihood.
    fn compute_exp_align(&mut self) -> ExpAlign;

    /// Accumulate this sentence's expected counts into the candidate
    /// parameter snapshot.
    fn update_new_params(&self, exp: &ExpAlign, new_params: &mut Params);

    /// Single best alignment. With `reverse`, emitted pairs are swapped back
    /// into the original orientation.
    fn viterbi(&self, reverse: bool) -> Alignment;

    /// Likelihood of the sentence, available after `compute_exp_align`.
    fn likelihood(&self) -> f64;

    fn log_likelihood(&self) -> f64 {
        self.likelihood().ln()
    }

    /// Joint likelihood of one complete assignment `j -> pos[j]` (with `I`
    /// standing for null). Only defined for the position-independent models.
    fn path_likelihood(&self, pos: &[usize]) -> Result<f64>;
}

/// Expected alignment counts for one sentence pair: a dense `J x (I+1)`
/// matrix whose last column is the null position.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpAlign {
    i_len: usize,
    mat: Vec<Vec<f64>>,
}

impl ExpAlign {
    pub fn new(i_len: usize, mat: Vec<Vec<f64>>) -> Self {
        debug_assert!(mat.iter().all(|row| row.len() == i_len + 1));
        Self { i_len, mat }
    }

    pub fn zeros(j_len: usize, i_len: usize) -> Self {
        Self {
            i_len,
            mat: vec![vec![0.0; i_len + 1]; j_len],
        }
    }

    pub fn i_len(&self) -> usize {
        self.i_len
    }

    pub fn j_len(&self) -> usize {
        self.mat.len()
    }

    /// `P(a_j = i)`; `i = I` is the null position.
    pub fn get(&self, j: usize, i: usize) -> f64 {
        self.mat[j][i]
    }

    pub fn set(&mut self, j: usize, i: usize, p: f64) {
        self.mat[j][i] = p;
    }

    /// Merge two directional expectations into one shared one: each
    /// non-null entry becomes the product of the two opposing posteriors,
    /// written back to both sides, so both M-steps consume the same
    /// symmetric expectation. With `consider_null` the null column is
    /// reconstituted as the mass left over in each row.
    pub fn merge(ea1: &mut ExpAlign, ea2: &mut ExpAlign, consider_null: bool) {
        let (j_len, i_len) = (ea1.j_len(), ea1.i_len());
        debug_assert_eq!(ea2.j_len(), i_len);
        debug_assert_eq!(ea2.i_len(), j_len);

        for j in 0..j_len {
            for i in 0..i_len {
                let p = ea1.get(j, i) * ea2.get(i, j);
                ea1.set(j, i, p);
                ea2.set(i, j, p);
            }
        }
        if consider_null {
            for j in 0..j_len {
                let mass: f64 = (0..i_len).map(|i| ea1.get(j, i)).sum();
                ea1.set(j, i_len, (1.0 - mass).max(0.0));
            }
            for i in 0..i_len {
                let mass: f64 = (0..j_len).map(|j| ea2.get(i, j)).sum();
                ea2.set(i, j_len, (1.0 - mass).max(0.0));
            }
        }
    }
}

// The translation-table part of the M-step, shared by all models.
pub(crate) fn update_trans_probs(
    sps: &dyn PairState,
    exp: &ExpAlign,
    new_params: &mut Params,
    use_normed_objective: bool,
) {
    let (i_len, j_len) = (sps.i_len(), sps.j_len());
    for j in 0..j_len {
        let v = sps.fr_word(j);
        for i in 0..=i_len {
            let u = sps.en_word(i);
            let mut p = exp.get(j, i);
            if !p.is_finite() {
                log::error!("non-finite expected count for ({:?}, {:?}): {}", u, v, p);
                continue;
            }
            if use_normed_objective {
                p /= (i_len * j_len) as f64;
            }
            new_params.trans_probs.incr(u, v, p);
        }
    }
}

// Helper shared by the position-independent models.
pub(crate) fn en_word_at<'a>(en: &'a [String], i: usize) -> &'a str {
    if i == en.len() {
        NULL_WORD
    } else {
        &en[i]
    }
}

/// Resolve the null-probability option for a sentence of English length
/// `i_len`: the value 1 is a sentinel for "one count among I+1 positions".
pub(crate) fn resolve_null_prob(null_prob: f64, i_len: usize) -> f64 {
    if null_prob == 1.0 {
        1.0 / (i_len + 1) as f64
    } else {
        null_prob
    }
}
