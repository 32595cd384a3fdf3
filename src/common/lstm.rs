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
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::{LSTMState, RNN};
use tch::{nn, Tensor};

/// # Dropout settings for a recurrent layer
/// Probabilities are expressed as keep probabilities (1.0 disables the corresponding dropout).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LstmDropoutConfig {
    /// Keep probability applied to the cell input at every step
    pub input_keep_prob: f64,
    /// Keep probability applied to the cell output at every step
    pub output_keep_prob: f64,
    /// Keep probability applied to the hidden state carried to the next step
    pub state_keep_prob: f64,
}

impl Default for LstmDropoutConfig {
    fn default() -> Self {
        LstmDropoutConfig {
            input_keep_prob: 1.0,
            output_keep_prob: 1.0,
            state_keep_prob: 1.0,
        }
    }
}

/// # LSTM with input, output and state dropout
/// Unrolled one step at a time so that callers can feed step-dependent inputs (e.g. attention
/// read-outs) and so that padded positions can be skipped:
/// - the state is carried unchanged through positions where the step mask is false
/// - the output at these positions is zero
/// - state dropout only applies to the hidden state `h`, the cell state `c` is left untouched
pub struct DropoutLstm {
    cell: nn::LSTM,
    input_dropout: Dropout,
    output_dropout: Dropout,
    state_dropout: Dropout,
}

impl DropoutLstm {
    pub fn new<'p, P>(
        p: P,
        input_size: i64,
        hidden_size: i64,
        dropout_config: &LstmDropoutConfig,
    ) -> DropoutLstm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let cell = nn::lstm(p / "cell", input_size, hidden_size, Default::default());

        DropoutLstm {
            cell,
            input_dropout: Dropout::from_keep_prob(dropout_config.input_keep_prob),
            output_dropout: Dropout::from_keep_prob(dropout_config.output_keep_prob),
            state_dropout: Dropout::from_keep_prob(dropout_config.state_keep_prob),
        }
    }

    pub fn zero_state(&self, batch_size: i64) -> LSTMState {
        self.cell.zero_state(batch_size)
    }

    /// Single recurrent step
    ///
    /// # Arguments
    ///
    /// * `input` - Input of shape (*batch size*, *input_size*)
    /// * `state` - Previous `LSTMState`
    /// * `step_mask` - Optional boolean mask of shape (*batch size*). Rows set to false keep their previous state and output zeros.
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `output` - `Tensor` of shape (*batch size*, *hidden_size*)
    /// * `state` - updated `LSTMState`
    pub fn step(
        &self,
        input: &Tensor,
        state: &LSTMState,
        step_mask: Option<&Tensor>,
        train: bool,
    ) -> (Tensor, LSTMState) {
        let input = input.apply_t(&self.input_dropout, train);
        let new_state = self.cell.step(&input, state);
        let raw_hidden = new_state.h();

        let mut output = raw_hidden.apply_t(&self.output_dropout, train);
        let mut hidden = raw_hidden.apply_t(&self.state_dropout, train);
        let mut cell = new_state.c();

        if let Some(step_mask) = step_mask {
            let step_mask = step_mask.unsqueeze(-1);
            hidden = hidden.where_self(&step_mask, &state.h());
            cell = cell.where_self(&step_mask, &state.c());
            let kind = output.kind();
            output = output * step_mask.to_kind(kind);
        }

        (output, LSTMState((hidden.unsqueeze(0), cell.unsqueeze(0))))
    }

    /// Runs the layer over a full (padded) sequence
    ///
    /// # Arguments
    ///
    /// * `inputs` - Input of shape (*batch size*, *sequence_length*, *input_size*)
    /// * `mask` - Boolean mask of shape (*batch size*, *sequence_length*), false for padding
    /// * `reverse` - Process the sequence from its last position to the first
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *sequence_length*, *hidden_size*), in the original position order
    pub fn forward_t(&self, inputs: &Tensor, mask: &Tensor, reverse: bool, train: bool) -> Tensor {
        let (batch_size, sequence_length) = (inputs.size()[0], inputs.size()[1]);
        let mut state = self.zero_state(batch_size);
        let mut outputs = Vec::with_capacity(sequence_length as usize);

        let positions: Vec<i64> = if reverse {
            (0..sequence_length).rev().collect()
        } else {
            (0..sequence_length).collect()
        };
        for position in positions {
            let step_mask = mask.select(1, position);
            let (output, new_state) =
                self.step(&inputs.select(1, position), &state, Some(&step_mask), train);
            outputs.push(output);
            state = new_state;
        }
        if reverse {
            outputs.reverse();
        }
        Tensor::stack(&outputs, 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    fn sequence_mask(lengths: &[i64], max_length: i64) -> Tensor {
        let lengths = Tensor::from_slice(lengths).unsqueeze(1);
        Tensor::arange(max_length, (Kind::Int64, Device::Cpu))
            .unsqueeze(0)
            .lt_tensor(&lengths)
    }

    #[test]
    fn padded_positions_output_zeros() {
        let vs = nn::VarStore::new(Device::Cpu);
        let lstm = DropoutLstm::new(vs.root(), 6, 5, &Default::default());
        let inputs = Tensor::randn(&[2, 4, 6], (Kind::Float, Device::Cpu));
        let mask = sequence_mask(&[4, 2], 4);

        for reverse in [false, true] {
            let output = lstm.forward_t(&inputs, &mask, reverse, false);
            assert_eq!(output.size(), vec![2, 4, 5]);
            let padded = output.get(1).narrow(0, 2, 2);
            assert_eq!(padded.abs().sum(Kind::Float).double_value(&[]), 0.0);
            let real = output.get(1).narrow(0, 0, 2);
            assert!(real.abs().sum(Kind::Float).double_value(&[]) > 0.0);
        }
    }

    #[test]
    fn state_dropout_only_applies_to_the_hidden_state() {
        let vs = nn::VarStore::new(Device::Cpu);
        let dropout_config = LstmDropoutConfig {
            state_keep_prob: 0.5,
            ..Default::default()
        };
        let lstm = DropoutLstm::new(vs.root(), 4, 64, &dropout_config);
        let input = Tensor::randn(&[3, 4], (Kind::Float, Device::Cpu));
        let state = lstm.zero_state(3);

        let reference = lstm.cell.step(&input, &state);
        let (output, new_state) = lstm.step(&input, &state, None, true);

        assert!(new_state.c().allclose(&reference.c(), 1e-6, 1e-7, false));
        assert!(output.allclose(&reference.h(), 1e-6, 1e-7, false));
        assert!(!new_state.h().allclose(&reference.h(), 1e-6, 1e-7, false));
        let kept = new_state.h().ne(0.0);
        let rescaled = (reference.h() * 2.0).masked_select(&kept);
        assert!(new_state.h().masked_select(&kept).allclose(&rescaled, 1e-5, 1e-6, false));
    }

    #[test]
    fn reverse_pass_ignores_trailing_padding() {
        let vs = nn::VarStore::new(Device::Cpu);
        let lstm = DropoutLstm::new(vs.root(), 3, 4, &Default::default());
        let short = Tensor::randn(&[1, 2, 3], (Kind::Float, Device::Cpu));
        let padded = Tensor::cat(
            &[&short, &Tensor::randn(&[1, 3, 3], (Kind::Float, Device::Cpu))],
            1,
        );

        let short_output = lstm.forward_t(&short, &sequence_mask(&[2], 2), true, false);
        let padded_output = lstm.forward_t(&padded, &sequence_mask(&[2], 5), true, false);

        assert!(short_output.allclose(&padded_output.narrow(1, 0, 2), 1e-5, 1e-6, false));
    }
}
