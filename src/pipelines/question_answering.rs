// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Question Answering pipeline
//! Extractive question answering from a given question and context, using a Match-LSTM model.
//! The input is split into words (and punctuation) by a `BaseTokenizer` whose vocabulary maps the
//! padding token `[PAD]` to index 0, and the predicted token span is mapped back to a character
//! span of the context.
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
//! let config = QuestionAnsweringConfig::new(
//!     Box::new(LocalResource::from(PathBuf::from("path/to/match_lstm.ot"))),
//!     Box::new(LocalResource::from(PathBuf::from("path/to/config.json"))),
//!     Box::new(LocalResource::from(PathBuf::from("path/to/vocab.txt"))),
//!     true,
//!     Device::cuda_if_available(),
//! );
//! let qa_model = QuestionAnsweringModel::new(config)?;
//!
//! let question = String::from("Where does Amy live ?");
//! let context = String::from("Amy lives in Amsterdam");
//!
//! let answers = qa_model.predict(&[QaInput { question, context }])?;
//! # Ok(())
//! # }
//! ```
//!
//! Output: \
//! `[Answer { score: 0.9976, start: 13, end: 22, answer: "Amsterdam" }]`

use crate::common::resources::ResourceProvider;
use crate::match_lstm::{
    MatchLstmConfig, MatchLstmForQuestionAnswering, MatchLstmOutput, QaBatch, QaFeature,
    SpanPrediction, PADDING_ID,
};
use crate::{Config, MatchLstmError};
use ordered_float::OrderedFloat;
use rust_tokenizers::tokenizer::{BaseTokenizer, Tokenizer};
use rust_tokenizers::vocab::{BaseVocab, Vocab};
use rust_tokenizers::Offset;
use tch::{nn, Device};

const PADDING_TOKEN: &str = "[PAD]";

/// # Input for Question Answering
/// Includes a context (containing the answer) and question strings
#[derive(Debug, Clone)]
pub struct QaInput {
    /// Question string
    pub question: String,
    /// Context containing the answer
    pub context: String,
}

/// # Output for Question Answering
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Confidence score
    pub score: f64,
    /// Start position of the answer in the context (in characters)
    pub start: usize,
    /// End position of the answer in the context (in characters, exclusive)
    pub end: usize,
    /// Answer text
    pub answer: String,
}

/// # Configuration for question answering
/// Contains information regarding the model to load and device to place the model on.
pub struct QuestionAnsweringConfig {
    /// Model weights resource, a `VarStore` saved under the `match_lstm` root
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// Config resource (`MatchLstmConfig`)
    pub config_resource: Box<dyn ResourceProvider + Send>,
    /// Vocab resource, one token per line with `[PAD]` on the first line
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Automatically lower case all input upon tokenization (assumes a lower-cased model)
    pub lower_case: bool,
    /// Flag indicating if the tokenizer should strip accents (normalization)
    pub strip_accents: bool,
    /// Device to place the model on (default: CUDA/GPU when available)
    pub device: Device,
    /// Number of examples processed by a single forward pass
    pub batch_size: usize,
    /// Contexts longer than this number of tokens are truncated
    pub max_context_length: Option<usize>,
}

impl QuestionAnsweringConfig {
    /// Instantiate a new question answering configuration
    ///
    /// # Arguments
    ///
    /// * `model_resource` - The `ResourceProvider` pointing to the model weights
    /// * `config_resource` - The `ResourceProvider` pointing to the model configuration
    /// * `vocab_resource` - The `ResourceProvider` pointing to the tokenizer's vocabulary
    /// * `lower_case` - A `bool` indicating whether the tokenizer should lower case all input
    /// * `device` - Device to place the model on
    pub fn new(
        model_resource: Box<dyn ResourceProvider + Send>,
        config_resource: Box<dyn ResourceProvider + Send>,
        vocab_resource: Box<dyn ResourceProvider + Send>,
        lower_case: bool,
        device: Device,
    ) -> QuestionAnsweringConfig {
        QuestionAnsweringConfig {
            model_resource,
            config_resource,
            vocab_resource,
            lower_case,
            strip_accents: false,
            device,
            batch_size: 32,
            max_context_length: Some(400),
        }
    }
}

/// Tokenized example, with the context token offsets needed to recover the answer text.
struct EncodedExample {
    feature: QaFeature,
    offsets: Vec<Option<Offset>>,
}

/// # Question Answering model
pub struct QuestionAnsweringModel {
    tokenizer: BaseTokenizer<BaseVocab>,
    model: MatchLstmForQuestionAnswering,
    var_store: nn::VarStore,
    batch_size: usize,
    max_context_length: Option<usize>,
}

impl QuestionAnsweringModel {
    /// Build a new `QuestionAnsweringModel`
    ///
    /// # Arguments
    ///
    /// * `question_answering_config` - `QuestionAnsweringConfig` object containing the resource references (model, vocabulary, configuration) and device placement (CPU/GPU)
    pub fn new(
        question_answering_config: QuestionAnsweringConfig,
    ) -> Result<QuestionAnsweringModel, MatchLstmError> {
        let vocab_path = question_answering_config.vocab_resource.get_local_path()?;
        let config_path = question_answering_config.config_resource.get_local_path()?;
        let weights_path = question_answering_config.model_resource.get_local_path()?;

        let tokenizer: BaseTokenizer<BaseVocab> = BaseTokenizer::from_file(
            &vocab_path,
            question_answering_config.lower_case,
            question_answering_config.strip_accents,
        )?;
        let vocab = tokenizer.vocab().values();
        if vocab.get(PADDING_TOKEN) != Some(&PADDING_ID) {
            return Err(MatchLstmError::InvalidConfigurationError(format!(
                "{PADDING_TOKEN} must be the first entry of the vocabulary {}",
                vocab_path.display()
            )));
        }
        let config = MatchLstmConfig::from_file(&config_path)?;
        if vocab.len() as i64 > config.word_vocab_size {
            return Err(MatchLstmError::InvalidConfigurationError(format!(
                "Vocabulary of {} tokens does not fit the {} embeddings of the model",
                vocab.len(),
                config.word_vocab_size
            )));
        }
        if question_answering_config.batch_size == 0 {
            return Err(MatchLstmError::InvalidConfigurationError(
                "batch_size must be strictly positive".into(),
            ));
        }

        let mut var_store = nn::VarStore::new(question_answering_config.device);
        let model = MatchLstmForQuestionAnswering::new(var_store.root() / "match_lstm", &config)?;
        var_store.load(&weights_path)?;
        tracing::info!(
            weights = %weights_path.display(),
            vocab_size = vocab.len(),
            device = ?question_answering_config.device,
            "loaded question answering model"
        );

        Ok(QuestionAnsweringModel {
            tokenizer,
            model,
            var_store,
            batch_size: question_answering_config.batch_size,
            max_context_length: question_answering_config.max_context_length,
        })
    }

    fn encode(&self, qa_input: &QaInput, index: usize) -> Result<EncodedExample, MatchLstmError> {
        let question_tokens = self.tokenizer.tokenize(&qa_input.question);
        let mut context = self.tokenizer.tokenize_with_offsets(&qa_input.context);
        if let Some(max_context_length) = self.max_context_length {
            context.tokens.truncate(max_context_length);
            context.offsets.truncate(max_context_length);
        }
        if question_tokens.is_empty() || context.tokens.is_empty() {
            return Err(MatchLstmError::ValueError(format!(
                "Input {index} has an empty question or context after tokenization"
            )));
        }

        let feature = QaFeature {
            qa_id: index.to_string(),
            context_ids: self.tokenizer.convert_tokens_to_ids(&context.tokens),
            question_ids: self.tokenizer.convert_tokens_to_ids(&question_tokens),
            answer_span: None,
        };
        Ok(EncodedExample {
            feature,
            offsets: context.offsets,
        })
    }

    fn forward_batch(
        &self,
        examples: &[EncodedExample],
    ) -> Result<(MatchLstmOutput, SpanPrediction), MatchLstmError> {
        let features = examples
            .iter()
            .map(|example| example.feature.clone())
            .collect::<Vec<_>>();
        let batch = QaBatch::from_features(&features, self.var_store.device())?;
        tch::no_grad(|| -> Result<(MatchLstmOutput, SpanPrediction), MatchLstmError> {
            let output = self
                .model
                .forward_t(&batch.context_ids, &batch.question_ids, false)?;
            let spans = self.model.predict_spans(&output);
            Ok((output, spans))
        })
    }

    fn encode_chunk(
        &self,
        chunk: &[QaInput],
        first_index: usize,
    ) -> Result<Vec<EncodedExample>, MatchLstmError> {
        chunk
            .iter()
            .enumerate()
            .map(|(index, qa_input)| self.encode(qa_input, first_index + index))
            .collect()
    }

    /// Perform extractive question answering given a list of `QaInputs`
    ///
    /// # Arguments
    ///
    /// * `qa_inputs` - `&[QaInput]` Array of Question Answering inputs (context and question pairs)
    ///
    /// # Returns
    /// * `Vec<Answer>` One answer per input, the most likely span of at most
    /// `max_answer_length + 1` tokens
    pub fn predict(&self, qa_inputs: &[QaInput]) -> Result<Vec<Answer>, MatchLstmError> {
        let mut answers = Vec::with_capacity(qa_inputs.len());
        for (chunk_index, chunk) in qa_inputs.chunks(self.batch_size).enumerate() {
            let examples = self.encode_chunk(chunk, chunk_index * self.batch_size)?;
            let (_, spans) = self.forward_batch(&examples)?;
            let start = Vec::<i64>::try_from(&spans.start)?;
            let end = Vec::<i64>::try_from(&spans.end)?;
            let score = Vec::<f32>::try_from(&spans.score)?;

            for (example_index, (qa_input, example)) in chunk.iter().zip(examples.iter()).enumerate() {
                answers.push(build_answer(
                    &qa_input.context,
                    &example.offsets,
                    start[example_index] as usize,
                    end[example_index] as usize,
                    score[example_index] as f64,
                )?);
            }
        }
        Ok(answers)
    }

    /// Returns the `top_k` most likely answers for each input, sorted by decreasing score.
    /// Candidate spans are all pairs `start <= end <= start + max_answer_length` within the
    /// context, scored by the product of their boundary probabilities.
    pub fn predict_top_k(
        &self,
        qa_inputs: &[QaInput],
        top_k: usize,
    ) -> Result<Vec<Vec<Answer>>, MatchLstmError> {
        let max_answer_length = self.model.max_answer_length() as usize;
        let mut all_answers = Vec::with_capacity(qa_inputs.len());
        for (chunk_index, chunk) in qa_inputs.chunks(self.batch_size).enumerate() {
            let examples = self.encode_chunk(chunk, chunk_index * self.batch_size)?;
            let (output, _) = self.forward_batch(&examples)?;

            for (example_index, (qa_input, example)) in chunk.iter().zip(examples.iter()).enumerate() {
                let context_length = example.feature.context_ids.len();
                let start_probs = Vec::<f32>::try_from(&output.start_probs.get(example_index as i64))?;
                let end_probs = Vec::<f32>::try_from(&output.end_probs.get(example_index as i64))?;

                let mut candidates = Vec::new();
                for start in 0..context_length {
                    let last = (start + max_answer_length).min(context_length - 1);
                    for end in start..=last {
                        candidates.push((
                            start_probs[start] as f64 * end_probs[end] as f64,
                            (start, end),
                        ));
                    }
                }
                candidates.sort_by_key(|(score, _)| std::cmp::Reverse(OrderedFloat(*score)));

                let answers = candidates
                    .into_iter()
                    .take(top_k)
                    .map(|(score, (start, end))| {
                        build_answer(&qa_input.context, &example.offsets, start, end, score)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                all_answers.push(answers);
            }
        }
        Ok(all_answers)
    }
}

/// Maps an inclusive token span back to the character span it covers in the context.
fn build_answer(
    context: &str,
    offsets: &[Option<Offset>],
    start_token: usize,
    end_token: usize,
    score: f64,
) -> Result<Answer, MatchLstmError> {
    let offset = |position: usize| {
        offsets.get(position).copied().flatten().ok_or_else(|| {
            MatchLstmError::ValueError(format!("No character offset for context token {position}"))
        })
    };
    let start = offset(start_token)?.begin as usize;
    let end = offset(end_token)?.end as usize;
    let answer = context.chars().skip(start).take(end.saturating_sub(start)).collect();
    Ok(Answer {
        score,
        start,
        end,
        answer,
    })
}
