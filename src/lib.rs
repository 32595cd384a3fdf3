//! Match-LSTM extractive question answering, built on libtorch through the `tch-rs` bindings.
//!
//! The crate provides:
//! - the Match-LSTM model with an answer pointer (boundary model) and its building blocks
//! - span decoding restricted to answers of bounded length
//! - a training loop with L1/L2 regularization and checkpointing
//! - a ready-to-use question answering pipeline working on raw strings
//!
//! # Loading pre-trained models
//!
//! Model resources (weights, configuration and vocabulary) can be local files or remote files
//! downloaded and cached on first use (`remote` feature, enabled by default). The cache location
//! can be set with the `MATCH_LSTM_CACHE` environment variable.
//!
//! ```no_run
//! use match_lstm::pipelines::question_answering::{
//!     QaInput, QuestionAnsweringConfig, QuestionAnsweringModel,
//! };
//! use match_lstm::resources::LocalResource;
//! use std::path::PathBuf;
//! use tch::Device;
//!
//! # fn main() -> anyhow::Result<()> {
//! let qa_model = QuestionAnsweringModel::new(QuestionAnsweringConfig::new(
//!     Box::new(LocalResource::from(PathBuf::from("path/to/match_lstm.ot"))),
//!     Box::new(LocalResource::from(PathBuf::from("path/to/config.json"))),
//!     Box::new(LocalResource::from(PathBuf::from("path/to/vocab.txt"))),
//!     true,
//!     Device::cuda_if_available(),
//! ))?;
//! let answers = qa_model.predict(&[QaInput {
//!     question: "Where does Amy live ?".into(),
//!     context: "Amy lives in Amsterdam".into(),
//! }])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! Model construction, training progress and resource resolution emit `tracing` events. Install
//! any `tracing` subscriber in the application to collect them.

pub mod common;
pub mod match_lstm;
pub mod pipelines;

pub use common::error::MatchLstmError;
pub use common::resources;
pub use common::Config;
