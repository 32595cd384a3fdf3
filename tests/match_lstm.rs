use match_lstm::match_lstm::{
    MatchLstmConfig, MatchLstmForQuestionAnswering, MatchLstmTrainer, QaBatch, QaFeature,
    TrainingConfig,
};
use match_lstm::pipelines::question_answering::{
    QaInput, QuestionAnsweringConfig, QuestionAnsweringModel,
};
use match_lstm::resources::LocalResource;
use match_lstm::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tch::{nn, no_grad, Device, Kind, Tensor};

const VOCAB: [&str; 12] = [
    "[PAD]", "[UNK]", "amy", "lives", "in", "amsterdam", "where", "does", "live", "?", "who", ".",
];

fn tiny_config() -> MatchLstmConfig {
    MatchLstmConfig {
        word_vocab_size: VOCAB.len() as i64,
        word_emb_size: 8,
        rnn_hidden_units: 8,
        train_word_embeddings: true,
        input_emb_keep_prob: 1.0,
        output_dropout_keep_prob: 1.0,
        dropout_keep_prob: 1.0,
        random_seed: Some(11),
        ..Default::default()
    }
}

fn token_ids(tokens: &[&str]) -> Vec<i64> {
    tokens
        .iter()
        .map(|token| VOCAB.iter().position(|entry| entry == token).unwrap_or(1) as i64)
        .collect()
}

fn write_resources(directory: &Path, vocab: &[&str]) -> anyhow::Result<(PathBuf, PathBuf, PathBuf)> {
    let vocab_path = directory.join("vocab.txt");
    fs::write(&vocab_path, vocab.join("\n"))?;
    let config_path = directory.join("config.json");
    fs::write(&config_path, serde_json::to_string(&tiny_config())?)?;
    let weights_path = directory.join("match_lstm.ot");

    let features = vec![
        QaFeature {
            qa_id: "where".into(),
            context_ids: token_ids(&["amy", "lives", "in", "amsterdam", "."]),
            question_ids: token_ids(&["where", "does", "amy", "live", "?"]),
            answer_span: Some((3, 3)),
        },
        QaFeature {
            qa_id: "who".into(),
            context_ids: token_ids(&["amy", "lives", "in", "amsterdam", "."]),
            question_ids: token_ids(&["who", "lives", "in", "amsterdam", "?"]),
            answer_span: Some((0, 0)),
        },
    ];
    let training_config = TrainingConfig {
        learning_rate: 1e-2,
        log_every: 0,
        ..Default::default()
    };
    let mut trainer = MatchLstmTrainer::new(&tiny_config(), training_config, Device::Cpu)?;
    let batch = QaBatch::from_features(&features, trainer.device())?;
    for _ in 0..300 {
        trainer.train_step(&batch)?;
    }
    assert_eq!(trainer.evaluate(&batch)?.exact_match, 1.0);
    trainer.save(&weights_path)?;
    Ok((vocab_path, config_path, weights_path))
}

fn qa_config(vocab: &Path, config: &Path, weights: &Path) -> QuestionAnsweringConfig {
    QuestionAnsweringConfig::new(
        Box::new(LocalResource::from(weights.to_path_buf())),
        Box::new(LocalResource::from(config.to_path_buf())),
        Box::new(LocalResource::from(vocab.to_path_buf())),
        true,
        Device::Cpu,
    )
}

#[test]
fn match_lstm_forward_pass() -> anyhow::Result<()> {
    //    Set-up model
    let vs = nn::VarStore::new(Device::Cpu);
    let config = MatchLstmConfig {
        word_vocab_size: 100,
        word_emb_size: 16,
        rnn_hidden_units: 12,
        ..Default::default()
    };
    let model = MatchLstmForQuestionAnswering::new(vs.root() / "match_lstm", &config)?;

    //    Define input
    let context_ids = Tensor::randint_low(1, 100, &[3, 30], (Kind::Int64, Device::Cpu));
    let context_ids = context_ids.index_fill(1, &Tensor::from_slice(&[27i64, 28, 29]), 0);
    let question_ids = Tensor::randint_low(1, 100, &[3, 7], (Kind::Int64, Device::Cpu));

    //    Forward pass
    let output = no_grad(|| model.forward_t(&context_ids, &question_ids, false))?;
    let spans = model.predict_spans(&output);

    //    Check output
    assert_eq!(output.start_logits.size(), vec![3, 27]);
    assert_eq!(output.end_logits.size(), vec![3, 27]);
    for index in 0..3 {
        let start = spans.start.int64_value(&[index]);
        let end = spans.end.int64_value(&[index]);
        assert!(start <= end);
        assert!(end - start <= 15);
        let score = spans.score.double_value(&[index]);
        assert!(score > 0.0 && score <= 1.0);
    }
    Ok(())
}

#[test]
fn match_lstm_config_from_file() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "word_vocab_size": 50, "word_emb_size": 10, "rnn_hidden_units": 4,
            "train_word_embeddings": false, "input_emb_keep_prob": 0.9,
            "input_dropout_keep_prob": 1.0, "output_dropout_keep_prob": 0.8,
            "state_dropout_keep_prob": 1.0, "dropout_keep_prob": 0.8,
            "l1_reg": 0.0, "l2_reg": 0.001, "random_seed": null,
            "max_answer_length": null, "batch_size": 8
        }"#,
    )?;

    let config = MatchLstmConfig::from_file(&path)?;
    assert_eq!(config.word_vocab_size, 50);
    assert_eq!(config.get_max_answer_length(), 15);
    assert!(config.validate().is_ok());
    assert!(MatchLstmConfig::from_file(directory.path().join("missing.json")).is_err());
    Ok(())
}

#[test]
fn match_lstm_question_answering() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let directory = tempfile::tempdir()?;
    let (vocab, config, weights) = write_resources(directory.path(), &VOCAB)?;

    //    Set-up model
    let qa_model = QuestionAnsweringModel::new(qa_config(&vocab, &config, &weights))?;

    //    Define input
    let context = String::from("Amy lives in Amsterdam.");
    let inputs = [
        QaInput {
            question: String::from("Where does Amy live ?"),
            context: context.clone(),
        },
        QaInput {
            question: String::from("Who lives in Amsterdam?"),
            context: context.clone(),
        },
    ];

    //    Get answer
    let answers = qa_model.predict(&inputs)?;

    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0].answer, "Amsterdam");
    assert_eq!((answers[0].start, answers[0].end), (13, 22));
    assert_eq!(answers[1].answer, "Amy");
    assert_eq!((answers[1].start, answers[1].end), (0, 3));
    for answer in &answers {
        assert!(answer.score > 0.0 && answer.score <= 1.0);
    }

    let top_answers = qa_model.predict_top_k(&inputs, 3)?;
    assert_eq!(top_answers.len(), 2);
    for (answers, best) in top_answers.iter().zip(["Amsterdam", "Amy"]) {
        assert_eq!(answers.len(), 3);
        assert_eq!(answers[0].answer, best);
        assert!(answers[0].score >= answers[1].score);
        assert!(answers[1].score >= answers[2].score);
    }
    Ok(())
}

#[test]
fn match_lstm_rejects_vocabulary_without_leading_padding() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let mut vocab = VOCAB.to_vec();
    vocab.swap(0, 1);
    let (vocab, config, weights) = write_resources(directory.path(), &vocab)?;

    assert!(QuestionAnsweringModel::new(qa_config(&vocab, &config, &weights)).is_err());
    Ok(())
}
