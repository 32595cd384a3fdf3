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

use tch::nn::ModuleT;
use tch::{Device, Tensor};

#[derive(Debug)]
pub struct Dropout {
    dropout_prob: f64,
}

impl Dropout {
    pub fn new(p: f64) -> Dropout {
        Dropout { dropout_prob: p }
    }

    /// Hyper-parameters are expressed as keep probabilities in the model configuration.
    pub fn from_keep_prob(keep_prob: f64) -> Dropout {
        Dropout::new(1.0 - keep_prob)
    }
}

impl ModuleT for Dropout {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        if self.dropout_prob > 0.0 {
            input.dropout(self.dropout_prob, train)
        } else {
            input.shallow_clone()
        }
    }
}

/// # Embedding dropout
/// Drops entire rows of an embedding matrix (i.e. every occurrence of a word type in the batch)
/// instead of individual activations. Kept rows are scaled by `1 / keep_prob`.
#[derive(Debug)]
pub struct EmbeddingDropout {
    keep_prob: f64,
}

impl EmbeddingDropout {
    pub fn new(keep_prob: f64) -> EmbeddingDropout {
        EmbeddingDropout { keep_prob }
    }

    /// Samples a `[vocab_size, 1]` row mask. Returns `None` at inference or when nothing is dropped.
    pub fn row_mask(&self, vocab_size: i64, device: Device, train: bool) -> Option<Tensor> {
        if !train || self.keep_prob >= 1.0 {
            return None;
        }
        let keep = Tensor::rand(&[vocab_size, 1], (tch::Kind::Float, device)).lt(self.keep_prob);
        Some(keep.to_kind(tch::Kind::Float) / self.keep_prob)
    }

    /// Looks up `ids` in `weights`, after applying the optional row mask.
    pub fn lookup(&self, weights: &Tensor, ids: &Tensor, mask: Option<&Tensor>) -> Tensor {
        match mask {
            Some(mask) => {
                let dropped = weights * mask.to_kind(weights.kind());
                Tensor::embedding(&dropped, ids, -1, false, false)
            }
            None => Tensor::embedding(weights, ids, -1, false, false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Kind;

    #[test]
    fn embedding_dropout_is_identity_at_inference() {
        let weights = Tensor::randn(&[10, 4], (Kind::Float, Device::Cpu));
        let ids = Tensor::from_slice(&[1i64, 3, 3, 7]).view([2, 2]);
        let dropout = EmbeddingDropout::new(0.5);

        let mask = dropout.row_mask(10, Device::Cpu, false);
        assert!(mask.is_none());

        let output = dropout.lookup(&weights, &ids, mask.as_ref());
        let expected = Tensor::embedding(&weights, &ids, -1, false, false);
        assert!(output.allclose(&expected, 1e-6, 1e-6, false));
    }

    #[test]
    fn embedding_dropout_masks_whole_rows() {
        let weights = Tensor::ones(&[50, 8], (Kind::Float, Device::Cpu));
        let ids = Tensor::arange(50, (Kind::Int64, Device::Cpu)).view([1, 50]);
        let dropout = EmbeddingDropout::new(0.5);

        let mask = dropout.row_mask(50, Device::Cpu, true);
        let output = dropout.lookup(&weights, &ids, mask.as_ref()).squeeze_dim(0);

        for row in 0..50 {
            let values = output.get(row);
            let min = values.min().double_value(&[]);
            let max = values.max().double_value(&[]);
            assert_eq!(min, max);
            assert!(min == 0.0 || (min - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn full_keep_probability_never_samples_a_mask() {
        let dropout = EmbeddingDropout::new(1.0);
        assert!(dropout.row_mask(10, Device::Cpu, true).is_none());
    }
}
