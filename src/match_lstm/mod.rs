//! # Machine Comprehension Using Match-LSTM and Answer Pointer (Wang & Jiang)
//!
//! Implementation of the Match-LSTM extractive question answering model
//! ([https://arxiv.org/abs/1608.07905](https://arxiv.org/abs/1608.07905) Wang, Jiang, 2016), boundary variant.
//! The full model is implemented in the `match_lstm::MatchLstmForQuestionAnswering` struct, built from:
//! - `WordEmbeddings`: word embedding matrix shared by question and context, with embedding dropout
//! - `MatchLstmEncoder`: LSTM preprocessing layer
//! - `MatchLstmDecoder`: bidirectional match layer and answer pointer
//!
//! Spans are decoded with `decode_spans` (answers of at most `max_answer_length + 1` tokens) and
//! the model can be trained with `MatchLstmTrainer`.
//!
//! # Model set-up and weights loading
//!
//! The model expects the following resources:
//! - Configuration file following the structure of `MatchLstmConfig`
//! - Model weights saved from a `VarStore` (e.g. by `MatchLstmTrainer::save`) under the `match_lstm` root
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmForQuestionAnswering};
//! use match_lstm::Config;
//! use tch::{nn, Device};
//!
//! let device = Device::cuda_if_available();
//! let mut vs = nn::VarStore::new(device);
//! let config = MatchLstmConfig::from_file("path/to/config.json")?;
//! let model = MatchLstmForQuestionAnswering::new(vs.root() / "match_lstm", &config)?;
//! vs.load("path/to/match_lstm.ot")?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod decoder;
mod embeddings;
mod encoder;
mod match_lstm_model;
mod training;

pub use attention::AdditiveAttention;
pub use decoder::{AnswerPointer, DecoderOutput, MatchLayer, MatchLstmDecoder};
pub use embeddings::WordEmbeddings;
pub use encoder::MatchLstmEncoder;
pub use match_lstm_model::{
    decode_spans, regularization_loss, MatchLstmConfig, MatchLstmForQuestionAnswering,
    MatchLstmLoss, MatchLstmOutput, PreparedBatch, QaBatch, QaFeature, SpanPrediction,
    DEFAULT_MAX_ANSWER_LENGTH, PADDING_ID,
};
pub use training::{EvaluationMetrics, MatchLstmTrainer, TrainingConfig};
