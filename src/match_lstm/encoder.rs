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

use crate::common::lstm::DropoutLstm;
use crate::match_lstm::MatchLstmConfig;
use std::borrow::Borrow;
use tch::{nn, Tensor};

/// # Match-LSTM preprocessing layer
/// A single LSTM shared by the context and the question, so that both sequences are encoded
/// in the same space before matching.
pub struct MatchLstmEncoder {
    lstm: DropoutLstm,
}

impl MatchLstmEncoder {
    /// Build a new `MatchLstmEncoder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the encoder
    /// * `config` - `MatchLstmConfig` object defining the embedding size, hidden size and recurrent dropouts
    ///
    /// # Example
    ///
    /// ```no_run
    /// use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmEncoder};
    /// use tch::{nn, Device};
    ///
    /// let p = nn::VarStore::new(Device::Cpu);
    /// let config = MatchLstmConfig::default();
    /// let encoder = MatchLstmEncoder::new(&p.root() / "encoder", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &MatchLstmConfig) -> MatchLstmEncoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let lstm = DropoutLstm::new(
            p / "lstm",
            config.word_emb_size,
            config.rnn_hidden_units,
            &config.lstm_dropout_config(),
        );
        MatchLstmEncoder { lstm }
    }

    /// Encodes the context and question embeddings
    ///
    /// # Arguments
    ///
    /// * `context_embedding` - Context embeddings of shape (*batch size*, *context_length*, *embedding_size*)
    /// * `question_embedding` - Question embeddings of shape (*batch size*, *question_length*, *embedding_size*)
    /// * `context_mask` - Boolean mask of shape (*batch size*, *context_length*)
    /// * `question_mask` - Boolean mask of shape (*batch size*, *question_length*)
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `(context_encoding, question_encoding)` of shape (*batch size*, *length*, *hidden_size*)
    pub fn encode(
        &self,
        context_embedding: &Tensor,
        question_embedding: &Tensor,
        context_mask: &Tensor,
        question_mask: &Tensor,
        train: bool,
    ) -> (Tensor, Tensor) {
        let context = self
            .lstm
            .forward_t(context_embedding, context_mask, false, train);
        let question = self
            .lstm
            .forward_t(question_embedding, question_mask, false, train);
        (context, question)
    }
}
