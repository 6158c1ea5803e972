use crate::core::Alignment;
use crate::models::model1::{
    independent_exp_align, independent_path_likelihood, independent_viterbi,
};
use crate::models::{en_word_at, resolve_null_prob, update_trans_probs, ExpAlign, PairState};
use crate::params::Params;
use crate::trainer::AlignerOptions;
use crate::Result;

/// The diagonal variant of Model 1: the positional prior is the distortion
/// table queried at the diagonal projection of the French position, biasing
/// alignments towards the diagonal. Uses distortion group 0.
pub struct Model2State<'a> {
    en: &'a [String],
    fr: &'a [String],
    params: &'a Params,
    opts: &'a AlignerOptions,
    null_prob: f64,
    likelihood: f64,
}

impl<'a> Model2State<'a> {
    pub(crate) fn new(
        en: &'a [String],
        fr: &'a [String],
        params: &'a Params,
        opts: &'a AlignerOptions,
    ) -> Self {
        Self {
            en,
            fr,
            params,
            opts,
            null_prob: resolve_null_prob(opts.null_prob, en.len()),
            likelihood: f64::NAN,
        }
    }

    // The diagonal projection of French position j into the English
    // sentence.
    fn diag(&self, j: usize) -> usize {
        self.en.len() * j / self.fr.len()
    }

    // P(a_j = i), peaked around the diagonal.
    fn align_prob(&self, j: usize, i: usize) -> f64 {
        let i_len = self.en.len();
        if i == i_len {
            self.null_prob
        } else {
            let diag_i = self.diag(j);
            (1.0 - self.null_prob)
                * self
                    .params
                    .distort_probs
                    .get(0, i as isize, diag_i as isize, i_len)
        }
    }
}

impl PairState for Model2State<'_> {
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
        let (exp, likelihood) =
            independent_exp_align(self.en, self.fr, self.params, &|j, i| self.align_prob(j, i));
        self.likelihood = likelihood;
        exp
    }

    fn update_new_params(&self, exp: &ExpAlign, new_params: &mut Params) {
        update_trans_probs(self, exp, new_params, self.opts.use_normed_objective);

        // Distortion parameters.
        for j in 0..self.fr.len() {
            let diag_i = self.diag(j);
            for i in 0..self.en.len() {
                new_params
                    .distort_probs
                    .add(0, i as isize, diag_i as isize, exp.get(j, i));
            }
        }
    }

    fn viterbi(&self, reverse: bool) -> Alignment {
        independent_viterbi(
            self.en,
            self.fr,
            self.params,
            &|j, i| self.align_prob(j, i),
            reverse,
        )
    }

    fn likelihood(&self) -> f64 {
        self.likelihood
    }

    fn path_likelihood(&self, pos: &[usize]) -> Result<f64> {
        Ok(independent_path_likelihood(
            self.en,
            self.fr,
            self.params,
            &|j, i| self.align_prob(j, i),
            pos,
        ))
    }
}
