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

use crate::common::dropout::Dropout;
use crate::common::lstm::DropoutLstm;
use crate::match_lstm::attention::AdditiveAttention;
use crate::match_lstm::MatchLstmConfig;
use crate::MatchLstmError;
use std::borrow::Borrow;
use tch::{nn, Tensor};

/// # Match layer
/// Reads the passage one position at a time, attending over the question with the current
/// passage encoding and the previous match state as query:
/// `h_r_i = LSTM([h_p_i ; H_q alpha_i], h_r_{i-1})`
pub struct MatchLayer {
    attention: AdditiveAttention,
    lstm: DropoutLstm,
}

impl MatchLayer {
    pub fn new<'p, P>(p: P, config: &MatchLstmConfig) -> MatchLayer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let hidden_size = config.rnn_hidden_units;
        let attention = AdditiveAttention::new(
            p / "attention",
            hidden_size,
            2 * hidden_size,
            hidden_size,
        );
        let lstm = DropoutLstm::new(
            p / "lstm",
            2 * hidden_size,
            hidden_size,
            &config.lstm_dropout_config(),
        );
        MatchLayer { attention, lstm }
    }

    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *context_length*, *hidden_size*), zero at padded context positions
    pub fn forward_t(
        &self,
        passage: &Tensor,
        question: &Tensor,
        passage_mask: &Tensor,
        question_mask: &Tensor,
        reverse: bool,
        train: bool,
    ) -> Result<Tensor, MatchLstmError> {
        let (batch_size, passage_length) = (passage.size()[0], passage.size()[1]);
        let projected_question = self.attention.project_memory(question);
        let mut state = self.lstm.zero_state(batch_size);
        let mut outputs = Vec::with_capacity(passage_length as usize);

        let positions: Vec<i64> = if reverse {
            (0..passage_length).rev().collect()
        } else {
            (0..passage_length).collect()
        };
        for position in positions {
            let passage_state = passage.select(1, position);
            let query = Tensor::cat(&[&passage_state, &state.h()], -1);
            let (_, alpha) = self
                .attention
                .forward(&projected_question, &query, question_mask)?;
            let attended_question = alpha.unsqueeze(1).bmm(question).squeeze_dim(1);
            let input = Tensor::cat(&[&passage_state, &attended_question], -1);
            let step_mask = passage_mask.select(1, position);
            let (output, new_state) = self.lstm.step(&input, &state, Some(&step_mask), train);
            outputs.push(output);
            state = new_state;
        }
        if reverse {
            outputs.reverse();
        }
        Ok(Tensor::stack(&outputs, 1))
    }
}

/// # Answer pointer (boundary model)
/// Two pointer steps over the match encoding: the first one yields the start distribution, the
/// second one (fed with the read-out of the first) the end distribution.
pub struct AnswerPointer {
    attention: AdditiveAttention,
    lstm: DropoutLstm,
}

impl AnswerPointer {
    pub fn new<'p, P>(p: P, config: &MatchLstmConfig) -> AnswerPointer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let hidden_size = config.rnn_hidden_units;
        let attention = AdditiveAttention::new(
            p / "attention",
            2 * hidden_size,
            hidden_size,
            hidden_size,
        );
        let lstm = DropoutLstm::new(
            p / "lstm",
            2 * hidden_size,
            hidden_size,
            &config.lstm_dropout_config(),
        );
        AnswerPointer { attention, lstm }
    }

    /// # Returns
    ///
    /// * `[(start_scores, start_probs), (end_scores, end_probs)]`, each of shape (*batch size*, *context_length*)
    pub fn forward_t(
        &self,
        match_encoding: &Tensor,
        context_mask: &Tensor,
        train: bool,
    ) -> Result<Vec<(Tensor, Tensor)>, MatchLstmError> {
        let batch_size = match_encoding.size()[0];
        let projected_encoding = self.attention.project_memory(match_encoding);
        let mut state = self.lstm.zero_state(batch_size);
        let mut boundaries = Vec::with_capacity(2);

        for _ in 0..2 {
            let (scores, beta) =
                self.attention
                    .forward(&projected_encoding, &state.h(), context_mask)?;
            let read_out = beta.unsqueeze(1).bmm(match_encoding).squeeze_dim(1);
            let (_, new_state) = self.lstm.step(&read_out, &state, None, train);
            state = new_state;
            boundaries.push((scores, beta));
        }
        Ok(boundaries)
    }
}

/// # Match-LSTM decoder
/// Bidirectional match layer followed by the answer pointer.
pub struct MatchLstmDecoder {
    forward_match: MatchLayer,
    backward_match: MatchLayer,
    dropout: Dropout,
    answer_pointer: AnswerPointer,
}

impl MatchLstmDecoder {
    /// Build a new `MatchLstmDecoder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the decoder
    /// * `config` - `MatchLstmConfig` object defining the hidden size and dropouts
    ///
    /// # Example
    ///
    /// ```no_run
    /// use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmDecoder};
    /// use tch::{nn, Device};
    ///
    /// let p = nn::VarStore::new(Device::Cpu);
    /// let config = MatchLstmConfig::default();
    /// let decoder = MatchLstmDecoder::new(&p.root() / "decoder", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &MatchLstmConfig) -> MatchLstmDecoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let forward_match = MatchLayer::new(p / "forward_match", config);
        let backward_match = MatchLayer::new(p / "backward_match", config);
        let dropout = Dropout::from_keep_prob(config.dropout_keep_prob);
        let answer_pointer = AnswerPointer::new(p / "answer_pointer", config);

        MatchLstmDecoder {
            forward_match,
            backward_match,
            dropout,
            answer_pointer,
        }
    }

    /// Decodes the encoded context and question into start and end distributions
    ///
    /// # Arguments
    ///
    /// * `context` - Context encoding of shape (*batch size*, *context_length*, *hidden_size*)
    /// * `question` - Question encoding of shape (*batch size*, *question_length*, *hidden_size*)
    /// * `context_mask` - Boolean mask of shape (*batch size*, *context_length*)
    /// * `question_mask` - Boolean mask of shape (*batch size*, *question_length*)
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `DecoderOutput` containing the masked start/end logits and probabilities
    pub fn decode(
        &self,
        context: &Tensor,
        question: &Tensor,
        context_mask: &Tensor,
        question_mask: &Tensor,
        train: bool,
    ) -> Result<DecoderOutput, MatchLstmError> {
        let forward = self.forward_match.forward_t(
            context,
            question,
            context_mask,
            question_mask,
            false,
            train,
        )?;
        let backward = self.backward_match.forward_t(
            context,
            question,
            context_mask,
            question_mask,
            true,
            train,
        )?;
        let match_encoding = Tensor::cat(&[forward, backward], -1).apply_t(&self.dropout, train);

        let mut boundaries = self
            .answer_pointer
            .forward_t(&match_encoding, context_mask, train)?
            .into_iter();
        let (start_logits, start_probs, end_logits, end_probs) =
            match (boundaries.next(), boundaries.next()) {
                (Some((start_logits, start_probs)), Some((end_logits, end_probs))) => {
                    (start_logits, start_probs, end_logits, end_probs)
                }
                _ => {
                    return Err(MatchLstmError::ValueError(
                        "Answer pointer did not produce start and end boundaries".into(),
                    ))
                }
            };

        Ok(DecoderOutput {
            start_logits,
            end_logits,
            start_probs,
            end_probs,
        })
    }
}

/// Container for the decoder output.
pub struct DecoderOutput {
    /// Masked logits for the answer start, shape (*batch size*, *context_length*)
    pub start_logits: Tensor,
    /// Masked logits for the answer end, shape (*batch size*, *context_length*)
    pub end_logits: Tensor,
    /// Start distribution, 0 at padded positions
    pub start_probs: Tensor,
    /// End distribution, 0 at padded positions
    pub end_probs: Tensor,
}
