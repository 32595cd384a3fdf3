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

use crate::common::kind::mask_scores;
use crate::MatchLstmError;
use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

/// # Additive attention
/// `scores = w^T tanh(W_m M + (W_q q + b_q)) + b`, computed for every memory position.
/// Used both by the match layer (memory: question encoding, query: passage state and previous
/// match state) and by the answer pointer (memory: match encoding, query: pointer state).
#[derive(Debug)]
pub struct AdditiveAttention {
    memory_projection: nn::Linear,
    query_projection: nn::Linear,
    score: nn::Linear,
}

impl AdditiveAttention {
    pub fn new<'p, P>(p: P, memory_size: i64, query_size: i64, hidden_size: i64) -> AdditiveAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let memory_projection = nn::linear(
            p / "memory_projection",
            memory_size,
            hidden_size,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let query_projection = nn::linear(
            p / "query_projection",
            query_size,
            hidden_size,
            Default::default(),
        );
        let score = nn::linear(p / "score", hidden_size, 1, Default::default());

        AdditiveAttention {
            memory_projection,
            query_projection,
            score,
        }
    }

    /// Projects the memory once, it does not depend on the query and is reused at every step.
    pub fn project_memory(&self, memory: &Tensor) -> Tensor {
        memory.apply(&self.memory_projection)
    }

    /// Attention step
    ///
    /// # Arguments
    ///
    /// * `projected_memory` - Output of `project_memory`, shape (*batch size*, *memory_length*, *hidden_size*)
    /// * `query` - Query of shape (*batch size*, *query_size*)
    /// * `memory_mask` - Boolean mask of shape (*batch size*, *memory_length*)
    ///
    /// # Returns
    ///
    /// * `scores` - Masked attention scores of shape (*batch size*, *memory_length*)
    /// * `weights` - Attention distribution of shape (*batch size*, *memory_length*), 0 at masked positions
    pub fn forward(
        &self,
        projected_memory: &Tensor,
        query: &Tensor,
        memory_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), MatchLstmError> {
        let projected_query = query.apply(&self.query_projection).unsqueeze(1);
        let scores = (projected_memory + projected_query)
            .tanh()
            .apply(&self.score)
            .squeeze_dim(-1);
        let scores = mask_scores(&scores, memory_mask)?;
        let weights = scores.softmax(-1, Kind::Float);
        Ok((scores, weights))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Device;

    #[test]
    fn attention_weights_are_a_distribution_over_unmasked_positions() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let attention = AdditiveAttention::new(vs.root(), 6, 4, 5);
        let memory = Tensor::randn(&[2, 3, 6], (Kind::Float, Device::Cpu));
        let query = Tensor::randn(&[2, 4], (Kind::Float, Device::Cpu));
        let mask = Tensor::from_slice(&[true, true, true, true, false, false]).view([2, 3]);

        let (scores, weights) = attention.forward(&attention.project_memory(&memory), &query, &mask)?;

        assert_eq!(scores.size(), vec![2, 3]);
        let totals = weights.sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        assert!(totals.allclose(&Tensor::ones(&[2], (Kind::Float, Device::Cpu)), 1e-5, 1e-6, false));
        assert_eq!(weights.double_value(&[1, 1]), 0.0);
        assert_eq!(weights.double_value(&[1, 2]), 0.0);
        assert!((weights.double_value(&[1, 0]) - 1.0).abs() < 1e-6);
        Ok(())
    }
}
