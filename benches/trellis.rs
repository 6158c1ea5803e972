use criterion::{black_box, criterion_group, criterion_main, Criterion};

use crossalign::{AlignerOptions, EmAligner, ModelKind, SentencePair, StateFamily};

fn synthetic_corpus(num_sentences: usize, len: usize) -> Vec<SentencePair> {
    (0..num_sentences)
        .map(|id| {
            let english = (0..len).map(|i| format!("e{}", (i + id) % 50)).collect();
            let french = (0..len).map(|j| format!("f{}", (j + id) % 50)).collect();
            SentencePair::new(id, english, french)
        })
        .collect()
}

fn bench_hmm_e_step(c: &mut Criterion) {
    let sentences = synthetic_corpus(16, 20);
    let opts = AlignerOptions::builder()
        .state_family(StateFamily::Ends)
        .build()
        .unwrap();
    let mut aligner = EmAligner::new(ModelKind::Hmm, false, opts).unwrap();
    aligner.init_params(&sentences, None, 0.0);

    c.bench_function("hmm_posteriors_20x20", |b| {
        b.iter(|| {
            for pair in &sentences {
                black_box(aligner.posteriors(pair));
            }
        })
    });
}

fn bench_model1_iteration(c: &mut Criterion) {
    let sentences = synthetic_corpus(64, 16);
    let mut aligner = EmAligner::new(ModelKind::Model1, false, AlignerOptions::default()).unwrap();
    aligner.init_params(&sentences, None, 0.0);

    c.bench_function("model1_em_iteration", |b| {
        b.iter(|| {
            aligner.train(black_box(&sentences), 1, None).unwrap();
        })
    });
}

criterion_group!(benches, bench_hmm_e_step, bench_model1_iteration);
criterion_main!(benches);
