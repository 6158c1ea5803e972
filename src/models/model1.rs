use crate::core::Alignment;
use crate::models::{en_word_at, resolve_null_prob, update_trans_probs, ExpAlign, PairState};
use crate::params::Params;
use crate::trainer::AlignerOptions;
use crate::Result;

/// IBM Model 1 for one sentence pair: a flat positional prior plus the
/// translation table. Positions are independent given the sentence, so the
/// E-step needs no dynamic programming.
pub struct Model1State<'a> {
    en: &'a [String],
    fr: &'a [String],
    params: &'a Params,
    opts: &'a AlignerOptions,
    null_prob: f64,
    likelihood: f64,
}

impl<'a> Model1State<'a> {
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

    // P(a_j = i), uniform over the real positions.
    fn align_prob(&self, _j: usize, i: usize) -> f64 {
        if i == self.en.len() {
            self.null_prob
        } else {
            (1.0 - self.null_prob) / self.en.len() as f64
        }
    }
}

impl PairState for Model1State<'_> {
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
        // Distortion parameters: don't change.
        new_params.distort_probs.assign(&self.params.distort_probs);
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

// The E-step shared by the position-independent models: normalize
// prior x emission per French position, accumulating the likelihood as the
// product of the per-position sums.
pub(super) fn independent_exp_align(
    en: &[String],
    fr: &[String],
    params: &Params,
    align_prob: &dyn Fn(usize, usize) -> f64,
) -> (ExpAlign, f64) {
    let (i_len, j_len) = (en.len(), fr.len());
    let mut mat = vec![vec![0.0; i_len + 1]; j_len];
    let mut likelihood = 1.0;

    for (j, row) in mat.iter_mut().enumerate() {
        let v = &fr[j];
        let mut sum = 0.0;
        for (i, cell) in row.iter_mut().enumerate() {
            let u = en_word_at(en, i);
            *cell = align_prob(j, i) * params.trans_probs.get(u, v, 0.0);
            sum += *cell;
        }
        if sum == 0.0 {
            // Can't normalize, zero the row instead of blowing up.
            row.iter_mut().for_each(|cell| *cell = 0.0);
            log::warn!(
                "sum of expected counts = 0, can't normalize (I={}, J={}, j={})",
                i_len,
                j_len,
                j
            );
        } else {
            row.iter_mut().for_each(|cell| *cell /= sum);
            likelihood *= sum;
        }
    }
    (ExpAlign::new(i_len, mat), likelihood)
}

pub(super) fn independent_viterbi(
    en: &[String],
    fr: &[String],
    params: &Params,
    align_prob: &dyn Fn(usize, usize) -> f64,
    reverse: bool,
) -> Alignment {
    let (i_len, j_len) = (en.len(), fr.len());
    let mut alignment = Alignment::new();

    for j in 0..j_len {
        let v = &fr[j];
        let mut best_i = None;
        let mut best_p = -1.0;
        for i in 0..=i_len {
            let u = en_word_at(en, i);
            let p = align_prob(j, i) * params.trans_probs.get(u, v, 0.0);
            if i != i_len {
                let (real_i, real_j) = if reverse { (j, i) } else { (i, j) };
                alignment.set_strength(real_i, real_j, p);
            }
            if p > best_p {
                best_p = p;
                best_i = Some(i);
            }
        }
        match best_i {
            Some(i) if i != i_len => {
                // Null stays implicit.
                if !reverse {
                    alignment.add(i, j, true);
                } else {
                    alignment.add(j, i, true);
                }
            }
            _ => {}
        }
    }
    alignment
}

pub(super) fn independent_path_likelihood(
    en: &[String],
    fr: &[String],
    params: &Params,
    align_prob: &dyn Fn(usize, usize) -> f64,
    pos: &[usize],
) -> f64 {
    let mut likelihood = 1.0;
    for (j, v) in fr.iter().enumerate() {
        let i = pos[j];
        let u = en_word_at(en, i);
        likelihood *= align_prob(j, i) * params.trans_probs.get(u, v, 0.0);
    }
    likelihood
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SentencePair;
    use crate::params::TransProbTable;
    use assert_approx_eq::assert_approx_eq;

    fn uniform_params(pair: &SentencePair) -> Params {
        let mut params = Params::new("Model1:normal", false, 1, None);
        params.trans_probs =
            TransProbTable::allocate(std::slice::from_ref(pair), false, None, 0.0);
        params.init_uniform();
        params
    }

    #[test]
    fn test_uniform_e_step() {
        let pair = SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        );
        let params = uniform_params(&pair);
        let opts = AlignerOptions::builder().null_prob(0.2).build().unwrap();

        let mut sps = Model1State::new(&pair.english, &pair.french, &params, &opts);
        let exp = sps.compute_exp_align();

        // With uniform translation probabilities the posterior reduces to
        // the positional prior: (1-p0)/I per real position, p0 for null.
        for j in 0..2 {
            assert_approx_eq!(exp.get(j, 0), 0.4, 1e-12);
            assert_approx_eq!(exp.get(j, 1), 0.4, 1e-12);
            assert_approx_eq!(exp.get(j, 2), 0.2, 1e-12);
        }
        assert!(sps.likelihood() > 0.0);
    }

    #[test]
    fn test_null_prob_sentinel() {
        let pair = SentencePair::new(0, vec!["a".into()], vec!["x".into()]);
        let params = uniform_params(&pair);
        let opts = AlignerOptions::default();

        let mut sps = Model1State::new(&pair.english, &pair.french, &params, &opts);
        let exp = sps.compute_exp_align();

        // null_prob = 1 means 1/(I+1) = 1/2 here.
        assert_approx_eq!(exp.get(0, 0), 0.5, 1e-12);
        assert_approx_eq!(exp.get(0, 1), 0.5, 1e-12);
    }

    #[test]
    fn test_e_step_is_deterministic() {
        let pair = SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        );
        let params = uniform_params(&pair);
        let opts = AlignerOptions::default();

        let mut sps = Model1State::new(&pair.english, &pair.french, &params, &opts);
        let first = sps.compute_exp_align();
        let second = sps.compute_exp_align();
        assert_eq!(first, second);
    }

    #[test]
    fn test_viterbi_prefers_learned_pair() {
        let pair = SentencePair::new(
            0,
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
        );
        let mut params = uniform_params(&pair);
        params.trans_probs.set("a", "x", 0.9);
        params.trans_probs.set("a", "y", 0.1);
        params.trans_probs.set("b", "x", 0.1);
        params.trans_probs.set("b", "y", 0.9);
        let opts = AlignerOptions::builder().null_prob(0.1).build().unwrap();

        let sps = Model1State::new(&pair.english, &pair.french, &params, &opts);
        let alignment = sps.viterbi(false);
        assert!(alignment.contains_sure(0, 0));
        assert!(alignment.contains_sure(1, 1));
        assert!(!alignment.contains_sure(0, 1));
    }
}
