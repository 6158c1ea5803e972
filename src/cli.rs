use std::collections::HashMap;
use std::str::FromStr;

use crossalign::{
    corpus, joint_train, Alignment, AlignerOptions, EmAligner, Evaluator, ModelKind, StateFamily,
    WordAligner, WordPairStats,
};

mod flags {
    xflags::xflags! {
        cmd crossalign {
            /// Train alignment models on a parallel corpus.
            cmd train {
                /// Which model to train: model1, model2 or hmm.
                required -m, --model model: String
                /// Output directory for parameter snapshots and alignments.
                required -o, --output output: String
                /// English side of the training corpus, one sentence per line.
                required --english english: String
                /// French side of the training corpus.
                required --french french: String

                /// Training mode: normal, reverse, both-indep or both-joint.
                optional --mode mode: String
                /// Number of EM iterations.
                optional -i, --iters iters: usize
                /// Maximum number of training sentences to use.
                optional --max-sentences max_sentences: usize

                // --- Evaluation ---
                /// English side of the held-out test corpus.
                optional --test-english test_english: String
                /// French side of the held-out test corpus.
                optional --test-french test_french: String
                /// Gold alignments for the test corpus (Pharaoh format).
                optional --gold gold: String

                // --- Model options ---
                /// Null-alignment probability (1 means 1/(I+1)).
                optional --null-prob null_prob: f64
                /// Posterior decoding threshold.
                optional --posterior-threshold posterior_threshold: f64
                /// Decode with Viterbi instead of thresholded posteriors.
                optional --viterbi
                /// HMM state family: homo or ends.
                optional --state-family state_family: String
                /// Don't fail on unknown words.
                optional --handle-unknown-words
                /// Prune word pairs whose Dice coefficient is below this.
                optional --dice-threshold dice_threshold: f64

                // --- Joint training ---
                /// Disable merging of the two directions' expectations.
                optional --no-merge
                /// Merge expectations only on the final iteration.
                optional --merge-only-on-last-iteration
                /// Reconstitute null mass when merging.
                optional --merge-consider-null
                /// Use the exact joint posterior on short sentences.
                optional --exact-joint
                /// Normalize expected counts by I*J.
                optional --normed-objective
            }

            /// Align a parallel corpus with a trained parameter snapshot.
            cmd align {
                /// Parameter snapshot produced by `train`.
                required -p, --params params: String
                /// Which model the snapshot belongs to: model1, model2 or hmm.
                required -m, --model model: String
                /// English side of the corpus.
                required --english english: String
                /// French side of the corpus.
                required --french french: String

                /// Output file for Pharaoh alignments. Otherwise stdout.
                optional -o, --output output: String
                /// Posterior decoding threshold.
                optional --posterior-threshold posterior_threshold: f64
                /// Decode with Viterbi instead of thresholded posteriors.
                optional --viterbi
                /// Sample alignments from the posteriors.
                optional --sample
                /// HMM state family: homo or ends.
                optional --state-family state_family: String
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TrainingMode {
    Normal,
    Reverse,
    BothIndep,
    BothJoint,
}

impl FromStr for TrainingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TrainingMode::Normal),
            "reverse" => Ok(TrainingMode::Reverse),
            "both-indep" => Ok(TrainingMode::BothIndep),
            "both-joint" => Ok(TrainingMode::BothJoint),
            _ => Err(format!("unknown training mode {:?}", s)),
        }
    }
}

fn parse_or_exit<T: FromStr<Err = String>>(value: &str) -> T {
    T::from_str(value).unwrap_or_else(|e| panic!("{}", e))
}

#[allow(clippy::too_many_arguments)]
fn build_options(
    null_prob: Option<f64>,
    posterior_threshold: Option<f64>,
    viterbi: bool,
    state_family: Option<&str>,
    handle_unknown_words: bool,
    merge_only_on_last_iteration: bool,
    merge_consider_null: bool,
    exact_joint: bool,
    normed_objective: bool,
) -> AlignerOptions {
    let mut builder = AlignerOptions::builder();
    if let Some(p) = null_prob {
        builder.null_prob(p);
    }
    if let Some(t) = posterior_threshold {
        builder.posterior_threshold(t);
    }
    if let Some(family) = state_family {
        builder.state_family(parse_or_exit::<StateFamily>(family));
    }
    builder
        .posterior_decoding(!viterbi)
        .handle_unknown_words(handle_unknown_words)
        .merge_only_on_last_iteration(merge_only_on_last_iteration)
        .merge_consider_null(merge_consider_null)
        .exact_joint_exp(exact_joint)
        .use_normed_objective(normed_objective)
        .build()
        .unwrap_or_else(|e| panic!("invalid options: {}", e))
}

fn load_evaluator(
    test_english: Option<&str>,
    test_french: Option<&str>,
    gold: Option<&str>,
) -> Option<Evaluator> {
    match (test_english, test_french, gold) {
        (Some(en), Some(fr), Some(gold)) => {
            let pairs = corpus::read_parallel_corpus(en, fr, usize::MAX, 0)
                .unwrap_or_else(|e| panic!("failed to read test corpus: {}", e));
            let references = corpus::read_gold_alignments(gold, 0)
                .unwrap_or_else(|e| panic!("failed to read gold alignments: {}", e));
            Some(Evaluator::new(pairs, references))
        }
        (None, None, None) => None,
        _ => panic!("--test-english, --test-french and --gold must be given together"),
    }
}

fn evaluate_and_dump(aligner: &EmAligner, evaluator: Option<&Evaluator>, output: &str) {
    let Some(evaluator) = evaluator else {
        return;
    };
    let perf = aligner
        .align_sentence_pairs(&evaluator.test_pairs)
        .map(|proposed| {
            let path = format!("{}/{}.align", output, aligner.name());
            let mut file =
                std::fs::File::create(&path).unwrap_or_else(|e| panic!("create {:?}: {}", path, e));
            corpus::write_alignments(&mut file, &evaluator.test_pairs, &proposed)
                .unwrap_or_else(|e| panic!("write {:?}: {}", path, e));
            Evaluator::eval(&evaluator.test_pairs, &evaluator.references, &proposed)
        })
        .unwrap_or_else(|e| panic!("alignment failed: {}", e));
    perf.dump();
}

#[allow(clippy::too_many_arguments)]
fn train(flags: flags::Train) {
    let mode = flags
        .mode
        .as_deref()
        .map(parse_or_exit::<TrainingMode>)
        .unwrap_or(TrainingMode::Normal);
    let kind = parse_or_exit::<ModelKind>(&flags.model);
    let iters = flags.iters.unwrap_or(5);
    let merge = !flags.no_merge;

    let opts = build_options(
        flags.null_prob,
        flags.posterior_threshold,
        flags.viterbi,
        flags.state_family.as_deref(),
        flags.handle_unknown_words,
        flags.merge_only_on_last_iteration,
        flags.merge_consider_null,
        flags.exact_joint,
        flags.normed_objective,
    );

    let sentences = corpus::read_parallel_corpus(
        &flags.english,
        &flags.french,
        flags.max_sentences.unwrap_or(usize::MAX),
        0,
    )
    .unwrap_or_else(|e| panic!("failed to read training corpus: {}", e));

    let mut stats = WordPairStats::new();
    stats.compute_stats(&sentences);

    let evaluator = load_evaluator(
        flags.test_english.as_deref(),
        flags.test_french.as_deref(),
        flags.gold.as_deref(),
    );

    std::fs::create_dir_all(&flags.output)
        .unwrap_or_else(|e| panic!("create {:?}: {}", flags.output, e));

    let dice_threshold = flags.dice_threshold.unwrap_or(0.0);
    let new_aligner = |reverse: bool| {
        let mut aligner = EmAligner::new(kind, reverse, opts.clone())
            .unwrap_or_else(|e| panic!("invalid configuration: {}", e));
        aligner.init_params(&sentences, Some(&stats), dice_threshold);
        aligner
    };

    let trained: Vec<EmAligner> = match mode {
        TrainingMode::Normal | TrainingMode::Reverse => {
            let mut aligner = new_aligner(mode == TrainingMode::Reverse);
            aligner
                .train(&sentences, iters, evaluator.as_ref())
                .unwrap_or_else(|e| panic!("training failed: {}", e));
            vec![aligner]
        }
        TrainingMode::BothIndep => {
            let mut forward = new_aligner(false);
            let mut backward = new_aligner(true);
            forward
                .train(&sentences, iters, evaluator.as_ref())
                .unwrap_or_else(|e| panic!("training failed: {}", e));
            backward
                .train(&sentences, iters, evaluator.as_ref())
                .unwrap_or_else(|e| panic!("training failed: {}", e));
            vec![forward, backward]
        }
        TrainingMode::BothJoint => {
            let mut forward = new_aligner(false);
            let mut backward = new_aligner(true);
            joint_train(
                &mut forward,
                &mut backward,
                &sentences,
                iters,
                merge,
                evaluator.as_ref(),
            )
            .unwrap_or_else(|e| panic!("joint training failed: {}", e));
            vec![forward, backward]
        }
    };

    for (idx, aligner) in trained.iter().enumerate() {
        let path = format!("{}/{}.params.json", flags.output, idx + 1);
        aligner
            .save_params(&path)
            .unwrap_or_else(|e| panic!("failed to save {:?}: {}", path, e));
        evaluate_and_dump(aligner, evaluator.as_ref(), &flags.output);
    }
}

fn align(flags: flags::Align) {
    let kind = parse_or_exit::<ModelKind>(&flags.model);
    let opts = build_options(
        None,
        flags.posterior_threshold,
        flags.viterbi,
        flags.state_family.as_deref(),
        true,
        false,
        false,
        false,
        false,
    );

    let mut aligner = EmAligner::new(kind, false, opts)
        .unwrap_or_else(|e| panic!("invalid configuration: {}", e));
    aligner
        .load_params(&flags.params)
        .unwrap_or_else(|e| panic!("failed to load {:?}: {}", flags.params, e));

    let sentences = corpus::read_parallel_corpus(&flags.english, &flags.french, usize::MAX, 0)
        .unwrap_or_else(|e| panic!("failed to read corpus: {}", e));

    let alignments: HashMap<usize, Alignment> = if flags.sample {
        let mut rng = rand::thread_rng();
        sentences
            .iter()
            .map(|pair| (pair.id, aligner.sample_alignment(pair, &mut rng)))
            .collect()
    } else {
        aligner
            .align_sentence_pairs(&sentences)
            .unwrap_or_else(|e| panic!("alignment failed: {}", e))
    };

    match flags.output.as_deref() {
        Some(path) => {
            let mut file =
                std::fs::File::create(path).unwrap_or_else(|e| panic!("create {:?}: {}", path, e));
            corpus::write_alignments(&mut file, &sentences, &alignments)
                .unwrap_or_else(|e| panic!("write {:?}: {}", path, e));
        }
        None => {
            let stdout = std::io::stdout();
            corpus::write_alignments(&mut stdout.lock(), &sentences, &alignments)
                .unwrap_or_else(|e| panic!("write to stdout: {}", e));
        }
    }
}

fn main() {
    env_logger::init();

    match flags::Crossalign::from_env_or_exit().subcommand {
        flags::CrossalignCmd::Train(train_flags) => train(train_flags),
        flags::CrossalignCmd::Align(align_flags) => align(align_flags),
    }
}
