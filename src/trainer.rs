use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derive_builder::Builder;
use rand::Rng;

use crate::core::{Alignment, SentencePair, WordAligner, NULL_WORD};
use crate::evaluator::Evaluator;
use crate::exact::compute_exact_exp_align;
use crate::models::hmm::cache::TrellisCache;
use crate::models::{ExpAlign, ModelKind, StateFamily};
use crate::params::{Params, TransProbTable};
use crate::stats::WordPairStats;
use crate::utils::transpose;
use crate::{Error, Result};

/// Options shared by every model, threaded explicitly into table and state
/// construction.
#[non_exhaustive]
#[derive(Builder, Clone, Debug)]
pub struct AlignerOptions {
    /// Probability of a null alignment; the value 1 is a sentinel for
    /// `1/(I+1)`.
    #[builder(default = "1.0")]
    pub null_prob: f64,
    /// Decode by thresholding posteriors instead of taking the Viterbi
    /// path.
    #[builder(default = "true")]
    pub posterior_decoding: bool,
    /// Threshold in [0, 1] for deciding whether an alignment should exist.
    #[builder(default = "0.5")]
    pub posterior_threshold: f64,
    /// When merging expected sufficient statistics, reconstitute the null
    /// columns from the leftover mass.
    #[builder(default = "false")]
    pub merge_consider_null: bool,
    /// Merge only on the final iteration.
    #[builder(default = "false")]
    pub merge_only_on_last_iteration: bool,
    /// Compute the exact joint posterior instead of the approximate merge
    /// during joint training.
    #[builder(default = "false")]
    pub exact_joint_exp: bool,
    /// Maximum sentence length the exponential exact enumeration is
    /// attempted for; longer sentences fall back to the approximate merge.
    #[builder(default = "8")]
    pub exact_joint_max_length: usize,
    /// Don't fail on word pairs missing from the translation table.
    #[builder(default = "false")]
    pub handle_unknown_words: bool,
    /// Divide expected translation counts by I*J.
    #[builder(default = "false")]
    pub use_normed_objective: bool,
    /// Hidden-state family of the HMM model.
    #[builder(default = "StateFamily::Ends")]
    pub state_family: StateFamily,
    /// Trellises for sentences longer than this are not cached.
    #[builder(default = "100")]
    pub max_cached_length: usize,
}

impl AlignerOptions {
    pub fn builder() -> AlignerOptionsBuilder {
        AlignerOptionsBuilder::default()
    }
}

impl Default for AlignerOptions {
    fn default() -> Self {
        Self::builder().build().unwrap()
    }
}

/// An EM-trained directional word aligner over one of the generative
/// models. Alignments always go from English to French: `P(F | E)`; with
/// `reverse` the roles of the two sides are swapped while decoded
/// alignments are still emitted in the original orientation.
///
/// Training keeps two parameter snapshots: `params` is read during the
/// E-step, the candidate is accumulated into and promoted (by swap) at the
/// end of each iteration. The trellis cache is cleared at every swap since
/// its transition weights bake in the old distortion parameters.
pub struct EmAligner {
    pub kind: ModelKind,
    pub reverse: bool,
    pub opts: AlignerOptions,
    pub params: Params,
    new_params: Params,
    cache: TrellisCache,
    iter: usize,
    num_iters: usize,
    pub aer: f64,
    stop: Arc<AtomicBool>,
}

impl EmAligner {
    pub fn new(kind: ModelKind, reverse: bool, opts: AlignerOptions) -> Result<Self> {
        if !(opts.null_prob > 0.0 && opts.null_prob <= 1.0) {
            return Err(Error::Config(format!(
                "null_prob must be in (0, 1], got {}",
                opts.null_prob
            )));
        }
        if !(0.0..=1.0).contains(&opts.posterior_threshold) {
            return Err(Error::Config(format!(
                "posterior_threshold must be in [0, 1], got {}",
                opts.posterior_threshold
            )));
        }

        let state_family = kind.uses_state_family().then_some(opts.state_family);
        let num_groups = kind.num_distortion_groups(opts.state_family);
        let name = format!("{}{}", kind.name(), if reverse { ":reversed" } else { ":normal" });
        let params = Params::new(name, reverse, num_groups, state_family);
        let new_params = params.clone();
        let cache = TrellisCache::new(opts.max_cached_length);

        Ok(Self {
            kind,
            reverse,
            opts,
            params,
            new_params,
            cache,
            iter: 0,
            num_iters: 0,
            aer: f64::NAN,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A flag that, once set, stops training after the current iteration.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn iteration(&self) -> usize {
        self.iter
    }

    fn en_fr<'a>(&self, pair: &'a SentencePair) -> (&'a [String], &'a [String]) {
        if !self.reverse {
            (&pair.english, &pair.french)
        } else {
            (&pair.french, &pair.english)
        }
    }

    /// Fix the translation table's key set from the training corpus,
    /// initialize both tables uniformly and lock the keys.
    pub fn init_params(
        &mut self,
        sentences: &[SentencePair],
        stats: Option<&WordPairStats>,
        dice_threshold: f64,
    ) {
        self.params.trans_probs =
            TransProbTable::allocate(sentences, self.reverse, stats, dice_threshold);
        self.params.init_uniform();
        self.params.trans_probs.lock();
        self.new_params = self.params.clone();
        self.cache.clear();
        log::info!(
            "{}: initialized {} translation rows",
            self.name(),
            self.params.trans_probs.num_rows()
        );
    }

    // Unknown vocabulary is a configuration error caught before training
    // begins, unless handling unknown words was explicitly enabled.
    fn validate_coverage(&self, sentences: &[SentencePair]) -> Result<()> {
        for pair in sentences {
            let (en, fr) = self.en_fr(pair);
            for v in fr {
                for u in en {
                    self.params.trans_probs.get_checked(u, v)?;
                }
                self.params.trans_probs.get_checked(NULL_WORD, v)?;
            }
        }
        Ok(())
    }

    fn init_train(&mut self, num_iters: usize) {
        self.num_iters = num_iters;
        self.iter = 1;
    }

    fn train_done(&self) -> bool {
        self.iter > self.num_iters || self.stop.load(Ordering::Relaxed)
    }

    // Promote the candidate snapshot: swap it with the active one and
    // invalidate the trellis cache in the same breath. The old active
    // snapshot becomes the next candidate.
    fn switch_to_new_params(&mut self, evaluator: Option<&Evaluator>) {
        let change = self.params.diff(&self.new_params);
        log::info!("Change in parameters: {:.6}", change);

        std::mem::swap(&mut self.params, &mut self.new_params);
        self.cache.clear();

        if let Some(evaluator) = evaluator {
            match evaluator.test(self) {
                Ok(perf) => {
                    self.aer = perf.aer;
                    log::info!("AER = {:.4}", perf.aer);
                }
                Err(e) => log::warn!("evaluation failed: {}", e),
            }
        }

        self.iter += 1;
    }

    /// Run EM for `num_iters` iterations over the corpus, optionally
    /// scoring AER against held-out gold alignments after each iteration.
    pub fn train(
        &mut self,
        sentences: &[SentencePair],
        num_iters: usize,
        evaluator: Option<&Evaluator>,
    ) -> Result<()> {
        log::info!(
            "{}: EM training on {} sentences for {} iterations",
            self.name(),
            sentences.len(),
            num_iters
        );
        if !self.opts.handle_unknown_words {
            self.validate_coverage(sentences)?;
        }
        self.init_train(num_iters);

        while !self.train_done() {
            log::info!("Iteration {}/{}", self.iter, self.num_iters);
            self.new_params.init_zero();

            let mut log_likelihood = 0.0;
            for pair in sentences {
                let (en, fr) = self.en_fr(pair);
                // E-step.
                let mut sps = self
                    .kind
                    .create_state(en, fr, &self.params, &self.opts, &self.cache);
                let exp = sps.compute_exp_align();
                log_likelihood += sps.log_likelihood();
                // M-step (partial).
                sps.update_new_params(&exp, &mut self.new_params);
            }

            // M-step (finish).
            self.new_params.finish();
            log::info!("Log-likelihood = {:.4}", log_likelihood);
            self.switch_to_new_params(evaluator);
        }
        Ok(())
    }

    /// Posterior alignment probabilities for a sentence pair, as a
    /// `[french][english]` matrix in the pair's original orientation (the
    /// null column is dropped).
    pub fn posteriors(&self, pair: &SentencePair) -> Vec<Vec<f64>> {
        let (en, fr) = self.en_fr(pair);
        let mut sps = self
            .kind
            .create_state(en, fr, &self.params, &self.opts, &self.cache);
        let exp = sps.compute_exp_align();

        let mut posteriors = vec![vec![0.0; en.len()]; fr.len()];
        for (j, row) in posteriors.iter_mut().enumerate() {
            for (i, cell) in row.iter_mut().enumerate() {
                *cell = exp.get(j, i);
            }
        }
        if self.reverse {
            transpose(&posteriors)
        } else {
            posteriors
        }
    }

    /// Draw one alignment from the posterior rows instead of thresholding
    /// or maximizing them.
    pub fn sample_alignment<R: Rng>(&self, pair: &SentencePair, rng: &mut R) -> Alignment {
        let posteriors = self.posteriors(pair);
        Alignment::sample_posteriors(&posteriors, rng)
    }

    pub fn save_params(&self, path: &str) -> Result<()> {
        self.params.save(path)
    }

    /// Load a persisted snapshot, rejecting one trained under a different
    /// hidden-state family. The aligner adopts the snapshot's orientation.
    pub fn load_params(&mut self, path: &str) -> Result<()> {
        let expected = self.kind.uses_state_family().then_some(self.opts.state_family);
        self.params = Params::load(path, expected)?;
        self.reverse = self.params.reverse;
        self.new_params = self.params.clone();
        self.cache.clear();
        Ok(())
    }
}

impl WordAligner for EmAligner {
    fn name(&self) -> String {
        self.params.name.clone()
    }

    fn align_sentence_pair(&self, pair: &SentencePair) -> Result<Alignment> {
        if self.opts.posterior_decoding {
            let posteriors = self.posteriors(pair);
            Ok(Alignment::threshold_posteriors(
                &posteriors,
                self.opts.posterior_threshold,
            ))
        } else {
            let (en, fr) = self.en_fr(pair);
            let sps = self
                .kind
                .create_state(en, fr, &self.params, &self.opts, &self.cache);
            Ok(sps.viterbi(self.reverse))
        }
    }
}

/// Train the two directional models jointly, in lockstep per sentence.
///
/// With `merge`, the two directional expectations are combined into one
/// shared expectation after each sentence's E-step (the key step of
/// symmetrized EM), so both M-steps see the same symmetric counts. The
/// exact-joint option swaps the approximate merge for the brute-force
/// enumeration on sentences short enough to afford it.
pub fn joint_train(
    wa1: &mut EmAligner,
    wa2: &mut EmAligner,
    sentences: &[SentencePair],
    num_iters: usize,
    merge: bool,
    evaluator: Option<&Evaluator>,
) -> Result<()> {
    if wa1.reverse == wa2.reverse {
        return Err(Error::Config(
            "joint training takes two aligners of opposite directions".into(),
        ));
    }
    let exact = (wa1.opts.exact_joint_exp || wa2.opts.exact_joint_exp) && merge;
    if exact && (wa1.kind.uses_state_family() || wa2.kind.uses_state_family()) {
        return Err(Error::Config(
            "exact joint expectations are only defined for the position-independent models".into(),
        ));
    }
    if !wa1.opts.handle_unknown_words {
        wa1.validate_coverage(sentences)?;
    }
    if !wa2.opts.handle_unknown_words {
        wa2.validate_coverage(sentences)?;
    }

    log::info!(
        "jointTrain(): {} sentences; merge = {}",
        sentences.len(),
        merge
    );
    wa1.init_train(num_iters);
    wa2.init_train(num_iters);

    while !wa1.train_done() && !wa2.train_done() {
        log::info!("Iteration {}/{}", wa1.iter, num_iters);
        wa1.new_params.init_zero();
        wa2.new_params.init_zero();

        let mut log_likelihood1 = 0.0;
        let mut log_likelihood2 = 0.0;
        for pair in sentences {
            let (en1, fr1) = wa1.en_fr(pair);
            let (en2, fr2) = wa2.en_fr(pair);
            let mut sps1 = wa1
                .kind
                .create_state(en1, fr1, &wa1.params, &wa1.opts, &wa1.cache);
            let mut sps2 = wa2
                .kind
                .create_state(en2, fr2, &wa2.params, &wa2.opts, &wa2.cache);

            let use_exact =
                exact && pair.i_len().max(pair.j_len()) <= wa1.opts.exact_joint_max_length;

            let (exp1, exp2) = if use_exact {
                compute_exact_exp_align(sps1.as_ref(), sps2.as_ref())?
            } else {
                // E-step.
                let mut exp1 = sps1.compute_exp_align();
                let mut exp2 = sps2.compute_exp_align();
                log_likelihood1 += sps1.log_likelihood();
                log_likelihood2 += sps2.log_likelihood();

                if merge && (!wa1.opts.merge_only_on_last_iteration || wa1.iter == num_iters) {
                    ExpAlign::merge(&mut exp1, &mut exp2, wa1.opts.merge_consider_null);
                }
                (exp1, exp2)
            };

            // M-step (partial).
            sps1.update_new_params(&exp1, &mut wa1.new_params);
            sps2.update_new_params(&exp2, &mut wa2.new_params);
        }

        // M-step (finish).
        wa1.new_params.finish();
        wa2.new_params.finish();
        log::info!("Log-likelihood 1 = {:.4}", log_likelihood1);
        log::info!("Log-likelihood 2 = {:.4}", log_likelihood2);
        wa1.switch_to_new_params(evaluator);
        wa2.switch_to_new_params(evaluator);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_corpus() -> Vec<SentencePair> {
        vec![
            SentencePair::new(
                0,
                vec!["the".into(), "dog".into()],
                vec!["le".into(), "chien".into()],
            ),
            SentencePair::new(
                1,
                vec!["the".into(), "cat".into()],
                vec!["le".into(), "chat".into()],
            ),
            SentencePair::new(
                2,
                vec!["a".into(), "dog".into()],
                vec!["un".into(), "chien".into()],
            ),
        ]
    }

    #[test]
    fn test_model1_training_concentrates_translations() {
        let corpus = toy_corpus();
        let mut aligner =
            EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
        aligner.init_params(&corpus, None, 0.0);
        aligner.train(&corpus, 5, None).unwrap();

        let t = &aligner.params.trans_probs;
        assert!(t.get("dog", "chien", 0.0) > t.get("dog", "le", 0.0));
        assert!(t.get("the", "le", 0.0) > t.get("the", "chien", 0.0));
    }

    #[test]
    fn test_unknown_vocabulary_is_fatal_at_setup() {
        let corpus = toy_corpus();
        let mut aligner =
            EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
        aligner.init_params(&corpus[..1], None, 0.0);
        assert!(matches!(
            aligner.train(&corpus, 1, None),
            Err(Error::UnknownWordPair(..))
        ));
    }

    #[test]
    fn test_unknown_vocabulary_can_be_handled() {
        let corpus = toy_corpus();
        let opts = AlignerOptions::builder()
            .handle_unknown_words(true)
            .build()
            .unwrap();
        let mut aligner = EmAligner::new(ModelKind::Model1, false, opts).unwrap();
        aligner.init_params(&corpus[..1], None, 0.0);
        aligner.train(&corpus, 1, None).unwrap();
    }

    #[test]
    fn test_stop_flag_halts_training() {
        let corpus = toy_corpus();
        let mut aligner =
            EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
        aligner.init_params(&corpus, None, 0.0);
        aligner.stop_handle().store(true, Ordering::Relaxed);
        aligner.train(&corpus, 100, None).unwrap();
        assert_eq!(aligner.iteration(), 1);
    }

    #[test]
    fn test_joint_training_requires_opposite_directions() {
        let mut wa1 = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
        let mut wa2 = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
        assert!(matches!(
            joint_train(&mut wa1, &mut wa2, &[], 1, true, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_exact_joint_rejects_hmm() {
        let corpus = toy_corpus();
        let opts = AlignerOptions::builder().exact_joint_exp(true).build().unwrap();
        let mut wa1 = EmAligner::new(ModelKind::Hmm, false, opts.clone()).unwrap();
        let mut wa2 = EmAligner::new(ModelKind::Hmm, true, opts).unwrap();
        wa1.init_params(&corpus, None, 0.0);
        wa2.init_params(&corpus, None, 0.0);
        assert!(matches!(
            joint_train(&mut wa1, &mut wa2, &corpus, 1, true, None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let opts = AlignerOptions::builder().null_prob(0.0).build().unwrap();
        assert!(EmAligner::new(ModelKind::Model1, false, opts).is_err());

        let opts = AlignerOptions::builder()
            .posterior_threshold(1.5)
            .build()
            .unwrap();
        assert!(EmAligner::new(ModelKind::Model1, false, opts).is_err());
    }
}
