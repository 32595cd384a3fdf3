//! # Ready-to-use pipelines
//!
//! #### Question Answering
//! Extractive question answering from a given question and context, with a Match-LSTM model
//! trained on SQuAD-style data (see `match_lstm::match_lstm::MatchLstmTrainer`).
//!
//! ```no_run
//! use match_lstm::pipelines::question_answering::{
//!     QaInput, QuestionAnsweringConfig, QuestionAnsweringModel,
//! };
//! use match_lstm::resources::RemoteResource;
//! use tch::Device;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = QuestionAnsweringConfig::new(
//!     Box::new(RemoteResource::from_pretrained(("match-lstm-squad/model", "https://example.org/match_lstm.ot"))),
//!     Box::new(RemoteResource::from_pretrained(("match-lstm-squad/config", "https://example.org/config.json"))),
//!     Box::new(RemoteResource::from_pretrained(("match-lstm-squad/vocab", "https://example.org/vocab.txt"))),
//!     true,
//!     Device::cuda_if_available(),
//! );
//! let qa_model = QuestionAnsweringModel::new(config)?;
//!
//! let question = String::from("Where does Amy live ?");
//! let context = String::from("Amy lives in Amsterdam");
//! let answers = qa_model.predict_top_k(&[QaInput { question, context }], 3)?;
//! # Ok(())
//! # }
//! ```

pub mod question_answering;
