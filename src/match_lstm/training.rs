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

//! # Training utilities for the Match-LSTM model
//!
//! The trainer owns the `VarStore` holding the model weights and an Adam optimizer over its
//! trainable variables (frozen word embeddings are excluded).
//!
//! ```no_run
//! use match_lstm::match_lstm::{MatchLstmConfig, MatchLstmTrainer, QaBatch, QaFeature, TrainingConfig};
//! use tch::Device;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = MatchLstmConfig::default();
//! let mut trainer = MatchLstmTrainer::new(&config, TrainingConfig::default(), Device::cuda_if_available())?;
//! let features = vec![QaFeature {
//!     qa_id: "example".into(),
//!     context_ids: vec![12, 25, 7, 104],
//!     question_ids: vec![33, 25],
//!     answer_span: Some((1, 2)),
//! }];
//! let batch = QaBatch::from_features(&features, trainer.device())?;
//! let loss = trainer.train_step(&batch)?;
//! trainer.save("path/to/match_lstm.ot")?;
//! # Ok(())
//! # }
//! ```

use crate::match_lstm::{MatchLstmConfig, MatchLstmForQuestionAnswering, QaBatch};
use crate::MatchLstmError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Kind, Tensor};

/// # Optimization settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Adam learning rate
    pub learning_rate: f64,
    /// Optional clipping of the global gradient norm
    pub max_grad_norm: Option<f64>,
    /// Number of training steps between two loss log events (0 disables logging)
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            learning_rate: 1e-3,
            max_grad_norm: Some(5.0),
            log_every: 100,
        }
    }
}

/// Metrics of a batch evaluated in inference mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationMetrics {
    /// Cross-entropy loss, without regularization
    pub loss: f64,
    /// Share of examples with both boundaries predicted correctly
    pub exact_match: f64,
    /// Share of examples with a correct start position
    pub start_accuracy: f64,
    /// Share of examples with a correct end position
    pub end_accuracy: f64,
}

/// # Match-LSTM trainer
pub struct MatchLstmTrainer {
    var_store: nn::VarStore,
    model: MatchLstmForQuestionAnswering,
    optimizer: nn::Optimizer,
    config: TrainingConfig,
    step: usize,
}

impl MatchLstmTrainer {
    /// Builds a freshly initialized model and its optimizer. libtorch is seeded with the
    /// configuration `random_seed` (if any) before the weights are created.
    pub fn new(
        model_config: &MatchLstmConfig,
        config: TrainingConfig,
        device: Device,
    ) -> Result<MatchLstmTrainer, MatchLstmError> {
        if let Some(seed) = model_config.random_seed {
            tch::manual_seed(seed);
        }
        let var_store = nn::VarStore::new(device);
        let model = MatchLstmForQuestionAnswering::new(var_store.root() / "match_lstm", model_config)?;
        let optimizer = nn::Adam::default().build(&var_store, config.learning_rate)?;
        tracing::info!(
            trainable_variables = var_store.trainable_variables().len(),
            learning_rate = config.learning_rate,
            ?device,
            "initialized Match-LSTM trainer"
        );

        Ok(MatchLstmTrainer {
            var_store,
            model,
            optimizer,
            config,
            step: 0,
        })
    }

    /// Copies pretrained word vectors of shape (*vocab_size*, *embedding_size*) into the model.
    pub fn load_pretrained_embeddings(&mut self, embeddings: &Tensor) -> Result<(), MatchLstmError> {
        self.model.get_embeddings_mut().load_pretrained(embeddings)
    }

    pub fn model(&self) -> &MatchLstmForQuestionAnswering {
        &self.model
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    pub fn device(&self) -> Device {
        self.var_store.device()
    }

    /// Runs one optimization step on a labelled batch and returns the (regularized) loss.
    pub fn train_step(&mut self, batch: &QaBatch) -> Result<f64, MatchLstmError> {
        let prepared = batch.prepare()?;
        let (start_labels, end_labels) = prepared.labels()?;
        let output = self.model.forward_prepared_t(&prepared, true)?;
        let loss = self
            .model
            .loss_t(&output, start_labels, end_labels, &self.var_store, true)?;
        let loss_value = loss.loss.f_double_value(&[])?;
        if !loss_value.is_finite() {
            return Err(MatchLstmError::ValueError(format!(
                "Non-finite training loss at step {}",
                self.step
            )));
        }

        match self.config.max_grad_norm {
            Some(max_norm) => self.optimizer.backward_step_clip_norm(&loss.loss, max_norm),
            None => self.optimizer.backward_step(&loss.loss),
        }
        self.step += 1;

        if self.config.log_every > 0 && self.step % self.config.log_every == 0 {
            tracing::info!(
                step = self.step,
                batch_size = batch.batch_size(),
                loss = loss_value,
                regularization = loss.regularization.f_double_value(&[])?,
                "training step"
            );
        }
        Ok(loss_value)
    }

    /// Evaluates a labelled batch without dropout, regularization or gradient tracking.
    pub fn evaluate(&self, batch: &QaBatch) -> Result<EvaluationMetrics, MatchLstmError> {
        let prepared = batch.prepare()?;
        let (start_labels, end_labels) = prepared.labels()?;
        tch::no_grad(|| -> Result<EvaluationMetrics, MatchLstmError> {
            let output = self.model.forward_prepared_t(&prepared, false)?;
            let loss = self
                .model
                .loss_t(&output, start_labels, end_labels, &self.var_store, false)?;
            let spans = self.model.predict_spans(&output);

            let start_correct = spans.start.eq_tensor(&start_labels.argmax(1, false));
            let end_correct = spans.end.eq_tensor(&end_labels.argmax(1, false));
            let exact = start_correct.logical_and(&end_correct);

            let share = |correct: &Tensor| correct.to_kind(Kind::Float).mean(Kind::Float).f_double_value(&[]);
            let metrics = EvaluationMetrics {
                loss: loss.loss.f_double_value(&[])?,
                exact_match: share(&exact)?,
                start_accuracy: share(&start_correct)?,
                end_accuracy: share(&end_correct)?,
            };
            tracing::debug!(?metrics, batch_size = batch.batch_size(), "evaluated batch");
            Ok(metrics)
        })
    }

    /// Number of optimization steps performed so far.
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Saves the model weights (including the word embeddings).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MatchLstmError> {
        self.var_store.save(&path)?;
        tracing::info!(path = %path.as_ref().display(), step = self.step, "saved checkpoint");
        Ok(())
    }

    /// Restores model weights from a checkpoint written by `save`.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MatchLstmError> {
        self.var_store.load(&path)?;
        tracing::info!(path = %path.as_ref().display(), "loaded checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::match_lstm::QaFeature;

    fn tiny_config() -> MatchLstmConfig {
        MatchLstmConfig {
            word_vocab_size: 16,
            word_emb_size: 8,
            rnn_hidden_units: 8,
            train_word_embeddings: true,
            input_emb_keep_prob: 1.0,
            output_dropout_keep_prob: 1.0,
            dropout_keep_prob: 1.0,
            l2_reg: 1e-4,
            random_seed: Some(7),
            ..Default::default()
        }
    }

    fn batch(device: Device) -> QaBatch {
        let features = vec![
            QaFeature {
                qa_id: "a".into(),
                context_ids: vec![2, 3, 4, 5, 6, 7],
                question_ids: vec![8, 4],
                answer_span: Some((2, 3)),
            },
            QaFeature {
                qa_id: "b".into(),
                context_ids: vec![9, 10, 11, 12],
                question_ids: vec![13, 14, 11],
                answer_span: Some((1, 1)),
            },
        ];
        QaBatch::from_features(&features, device).unwrap()
    }

    #[test]
    fn training_reduces_loss_on_a_fixed_batch() -> anyhow::Result<()> {
        let config = TrainingConfig {
            learning_rate: 1e-2,
            log_every: 0,
            ..Default::default()
        };
        let mut trainer = MatchLstmTrainer::new(&tiny_config(), config, Device::Cpu)?;
        let batch = batch(trainer.device());

        let initial = trainer.evaluate(&batch)?.loss;
        for _ in 0..60 {
            trainer.train_step(&batch)?;
        }
        let metrics = trainer.evaluate(&batch)?;

        assert_eq!(trainer.steps(), 60);
        assert!(metrics.loss < initial);
        assert!(!trainer.var_store().trainable_variables().is_empty());
        assert!(metrics.exact_match >= 0.0 && metrics.exact_match <= 1.0);
        Ok(())
    }

    #[test]
    fn unlabelled_batches_cannot_be_trained_on() -> anyhow::Result<()> {
        let mut trainer = MatchLstmTrainer::new(&tiny_config(), Default::default(), Device::Cpu)?;
        let mut batch = batch(trainer.device());
        batch.labels = None;
        assert!(trainer.train_step(&batch).is_err());
        assert!(trainer.evaluate(&batch).is_err());
        Ok(())
    }

    #[test]
    fn checkpoint_round_trip_restores_predictions() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let checkpoint = directory.path().join("match_lstm.ot");
        let mut trainer = MatchLstmTrainer::new(&tiny_config(), Default::default(), Device::Cpu)?;
        let batch = batch(trainer.device());
        trainer.train_step(&batch)?;
        trainer.save(&checkpoint)?;
        let reference = trainer.evaluate(&batch)?;

        let mut restored = MatchLstmTrainer::new(
            &MatchLstmConfig {
                random_seed: Some(1234),
                ..tiny_config()
            },
            Default::default(),
            Device::Cpu,
        )?;
        restored.load(&checkpoint)?;
        let metrics = restored.evaluate(&batch)?;

        assert!((metrics.loss - reference.loss).abs() < 1e-5);
        let logits = |trainer: &MatchLstmTrainer| -> anyhow::Result<Tensor> {
            let output = tch::no_grad(|| {
                trainer
                    .model()
                    .forward_t(&batch.context_ids, &batch.question_ids, false)
            })?;
            Ok(output.start_logits)
        };
        assert!(logits(&trainer)?.allclose(&logits(&restored)?, 1e-5, 1e-6, false));
        Ok(())
    }
}
