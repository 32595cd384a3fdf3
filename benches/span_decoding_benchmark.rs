#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use match_lstm::match_lstm::{
    decode_spans, MatchLstmConfig, MatchLstmForQuestionAnswering, DEFAULT_MAX_ANSWER_LENGTH,
};
use std::time::{Duration, Instant};
use tch::kind::Kind;
use tch::{nn, no_grad, Device, Tensor};

static BATCH_SIZE: i64 = 32;
static CONTEXT_LENGTH: i64 = 300;
static QUESTION_LENGTH: i64 = 25;

fn span_decoding(iters: u64, start_logits: &Tensor, end_logits: &Tensor) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = decode_spans(start_logits, end_logits, DEFAULT_MAX_ANSWER_LENGTH);
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn forward_pass(
    iters: u64,
    model: &MatchLstmForQuestionAnswering,
    context_ids: &Tensor,
    question_ids: &Tensor,
) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = no_grad(|| model.forward_t(context_ids, question_ids, false)).unwrap();
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn bench_match_lstm(c: &mut Criterion) {
    let device = Device::cuda_if_available();

    //    Define input
    let start_logits = Tensor::randn(&[BATCH_SIZE, CONTEXT_LENGTH], (Kind::Float, device));
    let end_logits = Tensor::randn(&[BATCH_SIZE, CONTEXT_LENGTH], (Kind::Float, device));
    c.bench_function("Span decoding", |b| {
        b.iter_custom(|iters| black_box(span_decoding(iters, &start_logits, &end_logits)))
    });

    //    Set-up model
    let vs = nn::VarStore::new(device);
    let config = MatchLstmConfig::default();
    let model = MatchLstmForQuestionAnswering::new(vs.root() / "match_lstm", &config).unwrap();
    let context_ids = Tensor::randint_low(
        1,
        config.word_vocab_size,
        &[BATCH_SIZE, CONTEXT_LENGTH],
        (Kind::Int64, device),
    );
    let question_ids = Tensor::randint_low(
        1,
        config.word_vocab_size,
        &[BATCH_SIZE, QUESTION_LENGTH],
        (Kind::Int64, device),
    );
    c.bench_function("Forward pass", |b| {
        b.iter_custom(|iters| black_box(forward_pass(iters, &model, &context_ids, &question_ids)))
    });
}

criterion_group! {
name = benches;
config = Criterion::default().sample_size(10);
targets = bench_match_lstm
}

criterion_main!(benches);
