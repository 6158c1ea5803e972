use std::collections::HashMap;

use crossalign::{
    corpus, joint_train, AlignerOptions, Alignment, EmAligner, Evaluator, ModelKind, StateFamily,
    WordAligner, WordPairStats,
};

fn pair(id: usize, english: &str, french: &str) -> crossalign::SentencePair {
    crossalign::SentencePair::new(
        id,
        english.split_whitespace().map(str::to_string).collect(),
        french.split_whitespace().map(str::to_string).collect(),
    )
}

fn toy_corpus() -> Vec<crossalign::SentencePair> {
    vec![
        pair(0, "the dog", "le chien"),
        pair(1, "the cat", "le chat"),
        pair(2, "a dog barks", "un chien aboie"),
        pair(3, "the cat sleeps", "le chat dort"),
        pair(4, "a cat", "un chat"),
    ]
}

fn gold_alignments() -> HashMap<usize, Alignment> {
    corpus::parse_gold_alignments("0-0 1-1\n0-0 1-1\n0-0 1-1 2-2\n0-0 1-1 2-2\n0-0 1-1\n", 0)
        .unwrap()
}

#[test]
fn model1_training_recovers_toy_dictionary() {
    let sentences = toy_corpus();
    let mut aligner = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
    aligner.init_params(&sentences, None, 0.0);
    aligner.train(&sentences, 10, None).unwrap();

    let t = &aligner.params.trans_probs;
    for (en, fr) in [("dog", "chien"), ("cat", "chat"), ("the", "le"), ("a", "un")] {
        for other in ["le", "chien", "chat", "un"] {
            if other != fr {
                assert!(
                    t.get(en, fr, 0.0) > t.get(en, other, 0.0),
                    "expected p({fr}|{en}) > p({other}|{en})"
                );
            }
        }
    }
}

#[test]
fn hmm_training_and_posterior_decoding() {
    let sentences = toy_corpus();
    let opts = AlignerOptions::builder()
        .state_family(StateFamily::Ends)
        .build()
        .unwrap();
    let mut aligner = EmAligner::new(ModelKind::Hmm, false, opts).unwrap();
    aligner.init_params(&sentences, None, 0.0);
    aligner.train(&sentences, 5, None).unwrap();

    let alignment = aligner.align_sentence_pair(&sentences[0]).unwrap();
    assert!(alignment.contains_sure(0, 0), "the-le should align");
    assert!(alignment.contains_sure(1, 1), "dog-chien should align");

    // Posterior rows (plus the implicit null mass) stay below 1.
    let posteriors = aligner.posteriors(&sentences[0]);
    for row in &posteriors {
        let mass: f64 = row.iter().sum();
        assert!(mass.is_finite());
        assert!(mass <= 1.0 + 1e-9);
    }
}

#[test]
fn model2_prefers_diagonal_alignments() {
    let sentences = toy_corpus();
    let mut aligner = EmAligner::new(ModelKind::Model2, false, AlignerOptions::default()).unwrap();
    aligner.init_params(&sentences, None, 0.0);
    aligner.train(&sentences, 10, None).unwrap();

    let posteriors = aligner.posteriors(&sentences[2]);
    for j in 0..3 {
        for i in 0..3 {
            if i != j {
                assert!(
                    posteriors[j][j] > posteriors[j][i],
                    "diagonal should dominate at j={j}"
                );
            }
        }
    }
}

#[test]
fn joint_training_reaches_zero_aer_on_toy_corpus() {
    let sentences = toy_corpus();
    let evaluator = Evaluator::new(sentences.clone(), gold_alignments());

    let opts = AlignerOptions::default();
    let mut forward = EmAligner::new(ModelKind::Model1, false, opts.clone()).unwrap();
    let mut backward = EmAligner::new(ModelKind::Model1, true, opts).unwrap();
    forward.init_params(&sentences, None, 0.0);
    backward.init_params(&sentences, None, 0.0);

    joint_train(
        &mut forward,
        &mut backward,
        &sentences,
        10,
        true,
        Some(&evaluator),
    )
    .unwrap();

    assert!(
        forward.aer < 0.2,
        "joint training should align the toy corpus, aer = {}",
        forward.aer
    );

    // Both directions decode into the original orientation.
    let f = forward.align_sentence_pair(&sentences[0]).unwrap();
    let b = backward.align_sentence_pair(&sentences[0]).unwrap();
    assert!(f.contains_sure(1, 1));
    assert!(b.contains_sure(1, 1));
}

#[test]
fn exact_joint_training_runs_on_short_sentences() {
    let sentences = toy_corpus();
    let opts = AlignerOptions::builder()
        .exact_joint_exp(true)
        .exact_joint_max_length(4)
        .build()
        .unwrap();
    let mut forward = EmAligner::new(ModelKind::Model1, false, opts.clone()).unwrap();
    let mut backward = EmAligner::new(ModelKind::Model1, true, opts).unwrap();
    forward.init_params(&sentences, None, 0.0);
    backward.init_params(&sentences, None, 0.0);

    joint_train(&mut forward, &mut backward, &sentences, 3, true, None).unwrap();

    let t = &forward.params.trans_probs;
    assert!(t.get("dog", "chien", 0.0) > t.get("dog", "le", 0.0));
}

#[test]
fn snapshots_round_trip_through_disk() {
    let sentences = toy_corpus();
    let mut aligner = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
    aligner.init_params(&sentences, None, 0.0);
    aligner.train(&sentences, 3, None).unwrap();

    let dir = std::env::temp_dir().join("crossalign-integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("model1.params.json");
    let path = path.to_str().unwrap();
    aligner.save_params(path).unwrap();

    let mut loaded = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
    loaded.load_params(path).unwrap();

    let before = aligner.align_sentence_pairs(&sentences).unwrap();
    let after = loaded.align_sentence_pairs(&sentences).unwrap();
    for pair in &sentences {
        for j in 0..pair.j_len() {
            for i in 0..pair.i_len() {
                assert_eq!(
                    before[&pair.id].contains_sure(i, j),
                    after[&pair.id].contains_sure(i, j)
                );
            }
        }
    }
}

#[test]
fn evaluator_scores_trained_aligner_better_than_baseline_floor() {
    let sentences = toy_corpus();
    let evaluator = Evaluator::new(sentences.clone(), gold_alignments());

    let mut aligner = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
    aligner.init_params(&sentences, None, 0.0);
    aligner.train(&sentences, 10, None).unwrap();

    let trained = evaluator.test(&aligner).unwrap();
    assert!(trained.aer.is_finite());
    assert!(trained.precision > 0.5);
}

#[test]
fn word_pair_stats_support_dice_pruning() {
    let sentences = toy_corpus();
    let mut stats = WordPairStats::new();
    stats.compute_stats(&sentences);

    let opts = AlignerOptions::builder()
        .handle_unknown_words(true)
        .build()
        .unwrap();
    let mut aligner = EmAligner::new(ModelKind::Model1, false, opts).unwrap();
    // Prune everything below a high Dice threshold; training stays
    // functional on the surviving pairs.
    aligner.init_params(&sentences, Some(&stats), 0.4);
    aligner.train(&sentences, 3, None).unwrap();

    let t = &aligner.params.trans_probs;
    assert!(t.get("dog", "chien", 0.0) > 0.0);
}
