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

use crate::common::dropout::EmbeddingDropout;
use crate::match_lstm::MatchLstmConfig;
use crate::MatchLstmError;
use std::borrow::Borrow;
use tch::nn::Init;
use tch::{nn, Tensor};

#[derive(Debug)]
/// # Word embeddings for the Match-LSTM model
/// Single embedding matrix shared by the question and the context, with embedding dropout.
/// The matrix is only registered as trainable if `train_word_embeddings` is set in the configuration.
pub struct WordEmbeddings {
    weight: Tensor,
    vocab_size: i64,
    embedding_size: i64,
    dropout: EmbeddingDropout,
}

impl WordEmbeddings {
    /// Build a new `WordEmbeddings`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the embeddings
    /// * `config` - `MatchLstmConfig` object defining the vocabulary and embedding sizes
    ///
    /// # Example
    ///
    /// ```no_run
    /// use match_lstm::match_lstm::{MatchLstmConfig, WordEmbeddings};
    /// use tch::{nn, Device};
    ///
    /// let p = nn::VarStore::new(Device::Cpu);
    /// let config = MatchLstmConfig::default();
    /// let embeddings = WordEmbeddings::new(&p.root() / "embeddings", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &MatchLstmConfig) -> WordEmbeddings
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let shape = [config.word_vocab_size, config.word_emb_size];
        let weight = if config.train_word_embeddings {
            p.var(
                "weight",
                &shape,
                Init::Randn {
                    mean: 0.0,
                    stdev: 0.1,
                },
            )
        } else {
            p.zeros_no_train("weight", &shape)
        };

        WordEmbeddings {
            weight,
            vocab_size: config.word_vocab_size,
            embedding_size: config.word_emb_size,
            dropout: EmbeddingDropout::new(config.input_emb_keep_prob),
        }
    }

    /// Overwrites the embedding matrix with pretrained vectors of shape (*vocab_size*, *embedding_size*)
    pub fn load_pretrained(&mut self, pretrained: &Tensor) -> Result<(), MatchLstmError> {
        let expected = vec![self.vocab_size, self.embedding_size];
        if pretrained.size() != expected {
            return Err(MatchLstmError::ValueError(format!(
                "Pretrained embeddings shape {:?} does not match the configured shape {:?}",
                pretrained.size(),
                expected
            )));
        }
        let source = pretrained.to_kind(self.weight.kind()).to(self.weight.device());
        tch::no_grad(|| self.weight.f_copy_(&source))?;
        Ok(())
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Embeds the question and context ids. A single row mask is drawn per call and shared by
    /// both lookups, so that a dropped word type disappears from the question and the context.
    ///
    /// # Returns
    ///
    /// * `(question_embedding, context_embedding)` of shape (*batch size*, *length*, *embedding_size*)
    pub fn forward_t(
        &self,
        question_ids: &Tensor,
        context_ids: &Tensor,
        train: bool,
    ) -> (Tensor, Tensor) {
        let row_mask = self
            .dropout
            .row_mask(self.vocab_size, self.weight.device(), train);
        let question_embedding = self
            .dropout
            .lookup(&self.weight, question_ids, row_mask.as_ref());
        let context_embedding = self
            .dropout
            .lookup(&self.weight, context_ids, row_mask.as_ref());
        (question_embedding, context_embedding)
    }
}
