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

use crate::common::lstm::LstmDropoutConfig;
use crate::match_lstm::decoder::MatchLstmDecoder;
use crate::match_lstm::embeddings::WordEmbeddings;
use crate::match_lstm::encoder::MatchLstmEncoder;
use crate::{Config, MatchLstmError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::{nn, Device, Kind, Tensor};

/// Index reserved for padding in question and context ids. Masks are derived from it.
pub const PADDING_ID: i64 = 0;

/// Default maximum distance between the predicted start and end positions.
pub const DEFAULT_MAX_ANSWER_LENGTH: i64 = 15;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// # Match-LSTM model configuration
/// Defines the Match-LSTM architecture (vocabulary and embedding sizes, hidden size), the dropout
/// keep probabilities and the regularization scales.
pub struct MatchLstmConfig {
    pub word_vocab_size: i64,
    pub word_emb_size: i64,
    pub rnn_hidden_units: i64,
    pub train_word_embeddings: bool,
    pub input_emb_keep_prob: f64,
    pub input_dropout_keep_prob: f64,
    pub output_dropout_keep_prob: f64,
    pub state_dropout_keep_prob: f64,
    pub dropout_keep_prob: f64,
    pub l1_reg: f64,
    pub l2_reg: f64,
    pub random_seed: Option<i64>,
    pub max_answer_length: Option<i64>,
    pub batch_size: Option<i64>,
}

impl Config for MatchLstmConfig {}

impl Default for MatchLstmConfig {
    fn default() -> Self {
        MatchLstmConfig {
            word_vocab_size: 30000,
            word_emb_size: 300,
            rnn_hidden_units: 150,
            train_word_embeddings: false,
            input_emb_keep_prob: 0.9,
            input_dropout_keep_prob: 1.0,
            output_dropout_keep_prob: 0.8,
            state_dropout_keep_prob: 1.0,
            dropout_keep_prob: 0.8,
            l1_reg: 0.0,
            l2_reg: 0.0,
            random_seed: Some(42),
            max_answer_length: Some(DEFAULT_MAX_ANSWER_LENGTH),
            batch_size: Some(32),
        }
    }
}

impl MatchLstmConfig {
    /// Checks sizes, keep probabilities (in `(0, 1]`) and regularization scales (non-negative).
    pub fn validate(&self) -> Result<(), MatchLstmError> {
        for (name, value) in [
            ("word_vocab_size", self.word_vocab_size),
            ("word_emb_size", self.word_emb_size),
            ("rnn_hidden_units", self.rnn_hidden_units),
        ] {
            if value <= 0 {
                return Err(MatchLstmError::InvalidConfigurationError(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("input_emb_keep_prob", self.input_emb_keep_prob),
            ("input_dropout_keep_prob", self.input_dropout_keep_prob),
            ("output_dropout_keep_prob", self.output_dropout_keep_prob),
            ("state_dropout_keep_prob", self.state_dropout_keep_prob),
            ("dropout_keep_prob", self.dropout_keep_prob),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(MatchLstmError::InvalidConfigurationError(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if self.l1_reg < 0.0 || self.l2_reg < 0.0 {
            return Err(MatchLstmError::InvalidConfigurationError(format!(
                "regularization scales must be non-negative, got l1={} l2={}",
                self.l1_reg, self.l2_reg
            )));
        }
        if self.get_max_answer_length() < 0 {
            return Err(MatchLstmError::InvalidConfigurationError(
                "max_answer_length must be non-negative".into(),
            ));
        }
        Ok(())
    }

    pub fn get_max_answer_length(&self) -> i64 {
        self.max_answer_length.unwrap_or(DEFAULT_MAX_ANSWER_LENGTH)
    }

    pub(crate) fn lstm_dropout_config(&self) -> LstmDropoutConfig {
        LstmDropoutConfig {
            input_keep_prob: self.input_dropout_keep_prob,
            output_keep_prob: self.output_dropout_keep_prob,
            state_keep_prob: self.state_dropout_keep_prob,
        }
    }
}

/// # Numericalized question answering example
/// Ids are expected to be already mapped through the model vocabulary, without padding.
#[derive(Debug, Clone, PartialEq)]
pub struct QaFeature {
    pub qa_id: String,
    pub context_ids: Vec<i64>,
    pub question_ids: Vec<i64>,
    /// Inclusive (start, end) token positions of the answer in the context
    pub answer_span: Option<(i64, i64)>,
}

/// # Batch of question answering examples
/// - `context_ids`: (*batch size*, *context_length*), right-padded with `PADDING_ID`
/// - `question_ids`: (*batch size*, *question_length*), right-padded with `PADDING_ID`
/// - `labels`: optional (*batch size*, 2, *context_length*) start/end target distributions
pub struct QaBatch {
    pub context_ids: Tensor,
    pub question_ids: Tensor,
    pub labels: Option<Tensor>,
    pub qa_ids: Vec<String>,
}

impl QaBatch {
    /// Pads the features into a batch. One-hot labels are built if every feature has an answer span.
    /// Ids must not contain `PADDING_ID`, and labelled and unlabelled features cannot be mixed.
    pub fn from_features(features: &[QaFeature], device: Device) -> Result<QaBatch, MatchLstmError> {
        if features.is_empty() {
            return Err(MatchLstmError::ValueError(
                "Cannot build a batch from an empty list of features".into(),
            ));
        }
        for feature in features {
            if feature.context_ids.contains(&PADDING_ID) || feature.question_ids.contains(&PADDING_ID) {
                return Err(MatchLstmError::ValueError(format!(
                    "Example {} contains the padding id {PADDING_ID} in its context or question",
                    feature.qa_id
                )));
            }
        }
        let labelled = features
            .iter()
            .filter(|feature| feature.answer_span.is_some())
            .count();
        if labelled != 0 && labelled != features.len() {
            return Err(MatchLstmError::ValueError(format!(
                "Cannot mix labelled and unlabelled examples ({labelled} of {} have an answer span)",
                features.len()
            )));
        }
        let context_length = features
            .iter()
            .map(|feature| feature.context_ids.len())
            .max()
            .unwrap_or(0);
        let question_length = features
            .iter()
            .map(|feature| feature.question_ids.len())
            .max()
            .unwrap_or(0);

        let pad = |ids: &[i64], length: usize| {
            let mut padded = ids.to_vec();
            padded.resize(length, PADDING_ID);
            Tensor::from_slice(&padded)
        };
        let context_ids = features
            .iter()
            .map(|feature| pad(&feature.context_ids, context_length))
            .collect::<Vec<_>>();
        let question_ids = features
            .iter()
            .map(|feature| pad(&feature.question_ids, question_length))
            .collect::<Vec<_>>();

        let labels = if labelled == features.len() {
            let mut labels = vec![0f32; features.len() * 2 * context_length];
            for (index, feature) in features.iter().enumerate() {
                if let Some((start, end)) = feature.answer_span {
                    let length = feature.context_ids.len() as i64;
                    if start < 0 || end < start || end >= length {
                        return Err(MatchLstmError::ValueError(format!(
                            "Invalid answer span ({start}, {end}) for example {} with {length} context tokens",
                            feature.qa_id
                        )));
                    }
                    let offset = index * 2 * context_length;
                    labels[offset + start as usize] = 1.0;
                    labels[offset + context_length + end as usize] = 1.0;
                }
            }
            Some(
                Tensor::from_slice(&labels)
                    .view([features.len() as i64, 2, context_length as i64])
                    .to(device),
            )
        } else {
            None
        };

        Ok(QaBatch {
            context_ids: Tensor::stack(&context_ids, 0).to(device),
            question_ids: Tensor::stack(&question_ids, 0).to(device),
            labels,
            qa_ids: features.iter().map(|feature| feature.qa_id.clone()).collect(),
        })
    }

    /// Computes masks and lengths and trims every tensor to the longest sequence of the batch.
    pub fn prepare(&self) -> Result<PreparedBatch, MatchLstmError> {
        let inputs = prepare_inputs(&self.context_ids, &self.question_ids)?;
        let (start_labels, end_labels) = match &self.labels {
            Some(labels) => {
                let (start, end) = split_labels(labels, inputs.context_ids.size()[1])?;
                (Some(start), Some(end))
            }
            None => (None, None),
        };
        Ok(PreparedBatch {
            start_labels,
            end_labels,
            ..inputs
        })
    }

    pub fn batch_size(&self) -> i64 {
        self.context_ids.size()[0]
    }
}

/// Batch tensors trimmed to the longest context and question.
pub struct PreparedBatch {
    pub context_ids: Tensor,
    pub question_ids: Tensor,
    pub context_mask: Tensor,
    pub question_mask: Tensor,
    pub context_lengths: Tensor,
    pub question_lengths: Tensor,
    pub start_labels: Option<Tensor>,
    pub end_labels: Option<Tensor>,
}

impl PreparedBatch {
    /// Start and end target distributions, each of shape (*batch size*, *max context length*).
    pub fn labels(&self) -> Result<(&Tensor, &Tensor), MatchLstmError> {
        match (&self.start_labels, &self.end_labels) {
            (Some(start_labels), Some(end_labels)) => Ok((start_labels, end_labels)),
            _ => Err(MatchLstmError::ValueError(
                "Batch does not contain answer span labels".into(),
            )),
        }
    }
}

fn sequence_lengths(mask: &Tensor) -> Tensor {
    mask.sum_dim_intlist([1].as_slice(), false, Kind::Int64)
}

pub(crate) fn prepare_inputs(
    context_ids: &Tensor,
    question_ids: &Tensor,
) -> Result<PreparedBatch, MatchLstmError> {
    let (context_shape, question_shape) = (context_ids.size(), question_ids.size());
    if context_shape.len() != 2 || question_shape.len() != 2 {
        return Err(MatchLstmError::ValueError(format!(
            "Expected 2-dimensional id tensors, got {context_shape:?} and {question_shape:?}"
        )));
    }
    if context_shape[0] != question_shape[0] || context_shape[0] == 0 {
        return Err(MatchLstmError::ValueError(format!(
            "Context and question batch sizes must be equal and non-zero, got {} and {}",
            context_shape[0], question_shape[0]
        )));
    }

    let context_mask = context_ids.ne(PADDING_ID);
    let question_mask = question_ids.ne(PADDING_ID);
    let context_lengths = sequence_lengths(&context_mask);
    let question_lengths = sequence_lengths(&question_mask);
    if context_lengths.min().int64_value(&[]) == 0 || question_lengths.min().int64_value(&[]) == 0
    {
        return Err(MatchLstmError::ValueError(
            "Every example needs at least one context and one question token".into(),
        ));
    }
    let context_max_length = context_lengths.max().int64_value(&[]);
    let question_max_length = question_lengths.max().int64_value(&[]);

    Ok(PreparedBatch {
        context_ids: context_ids.narrow(1, 0, context_max_length),
        question_ids: question_ids.narrow(1, 0, question_max_length),
        context_mask: context_mask.narrow(1, 0, context_max_length),
        question_mask: question_mask.narrow(1, 0, question_max_length),
        context_lengths,
        question_lengths,
        start_labels: None,
        end_labels: None,
    })
}

/// Splits (*batch size*, 2, *length*) labels into start and end targets trimmed to `context_length`.
fn split_labels(labels: &Tensor, context_length: i64) -> Result<(Tensor, Tensor), MatchLstmError> {
    let shape = labels.size();
    if shape.len() != 3 || shape[1] != 2 || shape[2] < context_length {
        return Err(MatchLstmError::ValueError(format!(
            "Expected labels of shape (batch size, 2, >= {context_length}), got {shape:?}"
        )));
    }
    let start = labels.select(1, 0).narrow(1, 0, context_length);
    let end = labels.select(1, 1).narrow(1, 0, context_length);
    Ok((start.to_kind(Kind::Float), end.to_kind(Kind::Float)))
}

/// # Match-LSTM for question answering
/// Extractive question answering model (Wang & Jiang, 2016). Identifies the segment of a context
/// that answers a provided question.
/// It is made of the following blocks:
/// - `embeddings`: word embeddings with embedding dropout, shared by question and context
/// - `encoder`: LSTM preprocessing layer
/// - `decoder`: bidirectional match layer and answer pointer
pub struct MatchLstmForQuestionAnswering {
    embeddings: WordEmbeddings,
    encoder: MatchLstmEncoder,
    decoder: MatchLstmDecoder,
    l1_reg: f64,
    l2_reg: f64,
    max_answer_length: i64,
}

impl MatchLstmForQuestionAnswering {
    /// Build a new `MatchLstmForQuestionAnswering`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the model
    /// * `config` - `MatchLstmConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmForQuestionAnswering};
    /// use match_lstm::Config;
    /// use std::path::Path;
    /// use tch::{nn, Device};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config_path = Path::new("path/to/config.json");
    /// let p = nn::VarStore::new(Device::Cpu);
    /// let config = MatchLstmConfig::from_file(config_path)?;
    /// let model = MatchLstmForQuestionAnswering::new(&p.root() / "match_lstm", &config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(
        p: P,
        config: &MatchLstmConfig,
    ) -> Result<MatchLstmForQuestionAnswering, MatchLstmError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        config.validate()?;
        let p = p.borrow();

        let embeddings = WordEmbeddings::new(p / "embeddings", config);
        let encoder = MatchLstmEncoder::new(p / "encoder", config);
        let decoder = MatchLstmDecoder::new(p / "decoder", config);
        tracing::debug!(
            vocab_size = config.word_vocab_size,
            embedding_size = config.word_emb_size,
            hidden_size = config.rnn_hidden_units,
            "built Match-LSTM model"
        );

        Ok(MatchLstmForQuestionAnswering {
            embeddings,
            encoder,
            decoder,
            l1_reg: config.l1_reg,
            l2_reg: config.l2_reg,
            max_answer_length: config.get_max_answer_length(),
        })
    }

    /// Maximum distance between the start and end positions of a predicted answer.
    pub fn max_answer_length(&self) -> i64 {
        self.max_answer_length
    }

    /// Get a mutable reference to the word embeddings (e.g. to load pretrained vectors).
    pub fn get_embeddings_mut(&mut self) -> &mut WordEmbeddings {
        &mut self.embeddings
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `context_ids` - Context ids of shape (*batch size*, *context_length*), right-padded with `PADDING_ID`
    /// * `question_ids` - Question ids of shape (*batch size*, *question_length*), right-padded with `PADDING_ID`
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `MatchLstmOutput` containing:
    ///   - `start_logits` - `Tensor` of shape (*batch size*, *max context length*) containing the logits for start of the answer
    ///   - `end_logits` - `Tensor` of shape (*batch size*, *max context length*) containing the logits for end of the answer
    ///   - `start_probs` / `end_probs` - matching distributions, 0 at padded positions
    ///   - `context_mask` - boolean mask of shape (*batch size*, *max context length*)
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmForQuestionAnswering};
    /// # use tch::{nn, no_grad, Device, Kind, Tensor};
    /// # fn main() -> anyhow::Result<()> {
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = MatchLstmConfig::default();
    /// # let model = MatchLstmForQuestionAnswering::new(&vs.root(), &config)?;
    /// let (batch_size, context_length, question_length) = (16, 128, 24);
    /// let context_ids = Tensor::randint_low(1, 1000, &[batch_size, context_length], (Kind::Int64, device));
    /// let question_ids = Tensor::randint_low(1, 1000, &[batch_size, question_length], (Kind::Int64, device));
    ///
    /// let model_output = no_grad(|| model.forward_t(&context_ids, &question_ids, false))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn forward_t(
        &self,
        context_ids: &Tensor,
        question_ids: &Tensor,
        train: bool,
    ) -> Result<MatchLstmOutput, MatchLstmError> {
        let inputs = prepare_inputs(context_ids, question_ids)?;
        self.forward_prepared_t(&inputs, train)
    }

    /// Forward pass over a batch already trimmed and masked by `QaBatch::prepare`.
    pub fn forward_prepared_t(
        &self,
        inputs: &PreparedBatch,
        train: bool,
    ) -> Result<MatchLstmOutput, MatchLstmError> {
        let (question_embedding, context_embedding) =
            self.embeddings
                .forward_t(&inputs.question_ids, &inputs.context_ids, train);
        let (context, question) = self.encoder.encode(
            &context_embedding,
            &question_embedding,
            &inputs.context_mask,
            &inputs.question_mask,
            train,
        );
        let decoder_output = self.decoder.decode(
            &context,
            &question,
            &inputs.context_mask,
            &inputs.question_mask,
            train,
        )?;

        Ok(MatchLstmOutput {
            start_logits: decoder_output.start_logits,
            end_logits: decoder_output.end_logits,
            start_probs: decoder_output.start_probs,
            end_probs: decoder_output.end_probs,
            context_mask: inputs.context_mask.shallow_clone(),
            question_mask: inputs.question_mask.shallow_clone(),
        })
    }

    /// Loss of a forward pass
    ///
    /// # Arguments
    ///
    /// * `output` - `MatchLstmOutput` of the forward pass
    /// * `start_labels` - Start target distributions of shape (*batch size*, *max context length*)
    /// * `end_labels` - End target distributions of shape (*batch size*, *max context length*)
    /// * `var_store` - `VarStore` holding the model weights, used for the L1/L2 regularization
    /// * `train` - regularization is only added when set to true
    ///
    /// # Returns
    ///
    /// * `MatchLstmLoss` with the scalar `loss = mean(start_loss + end_loss) + regularization`
    pub fn loss_t(
        &self,
        output: &MatchLstmOutput,
        start_labels: &Tensor,
        end_labels: &Tensor,
        var_store: &nn::VarStore,
        train: bool,
    ) -> Result<MatchLstmLoss, MatchLstmError> {
        let expected = output.start_logits.size();
        if start_labels.size() != expected || end_labels.size() != expected {
            return Err(MatchLstmError::ValueError(format!(
                "Expected start and end labels of shape {expected:?}, got {:?} and {:?}",
                start_labels.size(),
                end_labels.size()
            )));
        }
        let start_loss = soft_cross_entropy(&output.start_logits, start_labels);
        let end_loss = soft_cross_entropy(&output.end_logits, end_labels);

        let regularization = if train {
            regularization_loss(var_store, self.l1_reg, self.l2_reg)
        } else {
            Tensor::scalar_tensor(0.0, (Kind::Float, output.start_logits.device()))
        };
        let loss = (&start_loss + &end_loss).mean(Kind::Float) + &regularization;

        Ok(MatchLstmLoss {
            loss,
            start_loss,
            end_loss,
            regularization,
        })
    }

    /// Decodes the most likely answer spans of a forward pass (see `decode_spans`).
    pub fn predict_spans(&self, output: &MatchLstmOutput) -> SpanPrediction {
        decode_spans(
            &output.start_logits,
            &output.end_logits,
            self.max_answer_length,
        )
    }
}

/// Per-example cross-entropy between `logits` and (possibly soft) target distributions.
fn soft_cross_entropy(logits: &Tensor, labels: &Tensor) -> Tensor {
    -(labels * logits.log_softmax(-1, Kind::Float)).sum_dim_intlist([-1].as_slice(), false, Kind::Float)
}

/// L1/L2 penalty over the trainable weight matrices of a `VarStore`
///
/// Every trainable variable of rank >= 2 contributes `l1 * sum(|w|) + l2 * sum(w^2) / 2`. Biases
/// and the word embeddings (variables under an `embeddings` path) are not penalized.
///
/// # Returns
///
/// * scalar `Tensor`, 0 if no variable qualifies or both scales are 0
pub fn regularization_loss(var_store: &nn::VarStore, l1_reg: f64, l2_reg: f64) -> Tensor {
    let mut penalty = Tensor::scalar_tensor(0.0, (Kind::Float, var_store.device()));
    if l1_reg == 0.0 && l2_reg == 0.0 {
        return penalty;
    }
    for (name, variable) in var_store.variables() {
        if !variable.requires_grad()
            || variable.dim() < 2
            || name.split('.').any(|part| part == "embeddings")
        {
            continue;
        }
        if l1_reg > 0.0 {
            penalty = penalty + variable.abs().sum(Kind::Float) * l1_reg;
        }
        if l2_reg > 0.0 {
            penalty = penalty + variable.square().sum(Kind::Float) * (l2_reg / 2.0);
        }
    }
    penalty
}

/// Most likely answer spans from start and end logits
///
/// The joint score of a span is `p_start(i) * p_end(j)`, restricted to `0 <= j - i <= max_answer_length`.
/// The start is the row of the best joint score, the end its column.
///
/// # Arguments
///
/// * `start_logits` - `Tensor` of shape (*batch size*, *context_length*)
/// * `end_logits` - `Tensor` of shape (*batch size*, *context_length*)
/// * `max_answer_length` - maximum distance between the start and end positions
///
/// # Returns
///
/// * `SpanPrediction` with start/end positions (Int64) and joint scores, each of shape (*batch size*)
pub fn decode_spans(start_logits: &Tensor, end_logits: &Tensor, max_answer_length: i64) -> SpanPrediction {
    let start_probs = start_logits.softmax(-1, Kind::Float);
    let end_probs = end_logits.softmax(-1, Kind::Float);
    let outer = start_probs
        .unsqueeze(2)
        .matmul(&end_probs.unsqueeze(1))
        .triu(0)
        .tril(max_answer_length);

    let (row_max, _) = outer.max_dim(2, false);
    let (column_max, _) = outer.max_dim(1, false);
    let start = row_max.argmax(1, false);
    let end = column_max.argmax(1, false);
    let (score, _) = row_max.max_dim(1, false);

    SpanPrediction { start, end, score }
}

/// Container for the Match-LSTM model output.
pub struct MatchLstmOutput {
    /// Logits for the start position, lowest finite value at padded positions
    pub start_logits: Tensor,
    /// Logits for the end position, lowest finite value at padded positions
    pub end_logits: Tensor,
    /// Start position distribution
    pub start_probs: Tensor,
    /// End position distribution
    pub end_probs: Tensor,
    /// Context mask of the (trimmed) batch
    pub context_mask: Tensor,
    /// Question mask of the (trimmed) batch
    pub question_mask: Tensor,
}

/// Container for the Match-LSTM loss terms.
pub struct MatchLstmLoss {
    /// Scalar training objective
    pub loss: Tensor,
    /// Per-example start cross-entropy
    pub start_loss: Tensor,
    /// Per-example end cross-entropy
    pub end_loss: Tensor,
    /// Scalar L1/L2 penalty (0 outside of training)
    pub regularization: Tensor,
}

/// Container for decoded answer spans.
pub struct SpanPrediction {
    /// Start token positions
    pub start: Tensor,
    /// End token positions (inclusive)
    pub end: Tensor,
    /// Joint probability of the selected span
    pub score: Tensor,
}
