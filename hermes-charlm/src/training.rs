use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::config::{ModelConfig, TrainingConfig};
use crate::data::{Dataset, Split};
use crate::error::Result;
use crate::generate::{SamplingConfig, TextGenerator};
use crate::model::{LanguageModel, Mode, count_parameters};

/// Mean loss over `eval_iters` random batches of each split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEstimate {
    pub step: usize,
    pub train: f32,
    pub val: f32,
}

/// Owns the model, its parameters, the optimizer and the single RNG every
/// stochastic step draws from.
///
/// Each optimizer step runs inside one `&mut self` call, so nothing else can
/// read or write parameters between the forward pass and the update.
pub struct Trainer {
    model: LanguageModel,
    var_map: VarMap,
    optimizer: AdamW,
    config: TrainingConfig,
    device: Device,
    rng: StdRng,
    global_step: usize,
}

impl Trainer {
    pub fn new(model_config: &ModelConfig, config: TrainingConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (model, var_map) = LanguageModel::init(model_config, &device, &mut rng)?;

        let params = ParamsAdamW {
            lr: config.learning_rate,
            ..Default::default()
        };
        let optimizer = AdamW::new(var_map.all_vars(), params)?;

        info!(
            "Initialized model with {} parameters ({:.2}M)",
            count_parameters(&var_map),
            count_parameters(&var_map) as f64 / 1e6
        );

        Ok(Self {
            model,
            var_map,
            optimizer,
            config,
            device,
            rng,
            global_step: 0,
        })
    }

    /// One optimizer step on a fresh training batch. Returns the batch loss.
    pub fn train_step(&mut self, dataset: &Dataset) -> Result<f32> {
        let block_size = self.model.config().block_size;
        let (input, target) = dataset.get_batch(
            Split::Train,
            self.config.batch_size,
            block_size,
            &mut self.rng,
            &self.device,
        )?;

        let loss = self
            .model
            .loss(&input, &target, &mut Mode::Train(&mut self.rng))?;
        self.optimizer.backward_step(&loss)?;
        self.global_step += 1;

        Ok(loss.to_scalar::<f32>()?)
    }

    /// Averages eval-mode loss over `eval_iters` batches of each split.
    pub fn estimate_loss(&mut self, dataset: &Dataset) -> Result<LossEstimate> {
        let train = self.mean_loss(dataset, Split::Train)?;
        let val = self.mean_loss(dataset, Split::Val)?;
        Ok(LossEstimate {
            step: self.global_step,
            train,
            val,
        })
    }

    fn mean_loss(&mut self, dataset: &Dataset, split: Split) -> Result<f32> {
        let block_size = self.model.config().block_size;
        let mut total = 0.0;
        for _ in 0..self.config.eval_iters {
            let (input, target) = dataset.get_batch(
                split,
                self.config.batch_size,
                block_size,
                &mut self.rng,
                &self.device,
            )?;
            let loss = self.model.loss(&input, &target, &mut Mode::Eval)?;
            total += loss.to_scalar::<f32>()?;
        }
        Ok(total / self.config.eval_iters as f32)
    }

    /// Runs `max_iters` optimizer steps, estimating losses every
    /// `eval_interval` steps and after the last one.
    pub fn train(&mut self, dataset: &Dataset) -> Result<Vec<LossEstimate>> {
        dataset.check_block_size(self.model.config().block_size)?;
        info!("Starting training for {} iterations", self.config.max_iters);

        let pb = ProgressBar::new(self.config.max_iters as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} loss: {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );

        let mut history = Vec::new();
        for iter in 0..self.config.max_iters {
            // The final step is always estimated, even off the interval.
            if iter % self.config.eval_interval == 0 || iter + 1 == self.config.max_iters {
                let estimate = self.estimate_loss(dataset)?;
                pb.suspend(|| {
                    info!(
                        "step={}: train loss = {:.4}, val loss = {:.4}",
                        iter, estimate.train, estimate.val
                    )
                });
                history.push(estimate);
            }

            let loss = self.train_step(dataset)?;
            pb.set_message(format!("{:.4}", loss));
            pb.inc(1);
        }
        pb.finish_with_message("done");

        Ok(history)
    }

    /// Samples a continuation of `prompt` with the trainer's RNG.
    pub fn sample(
        &mut self,
        prompt: &[u32],
        max_new_tokens: usize,
        sampling: SamplingConfig,
    ) -> Result<Vec<u32>> {
        TextGenerator::new(&self.model, &self.device)
            .with_sampling(sampling)
            .generate(prompt, max_new_tokens, &mut self.rng)
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn num_parameters(&self) -> usize {
        count_parameters(&self.var_map)
    }

    /// Loss of one explicit batch in eval mode.
    pub fn batch_loss(&self, input: &Tensor, target: &Tensor) -> Result<f32> {
        let loss = self.model.loss(input, target, &mut Mode::Eval)?;
        Ok(loss.to_scalar::<f32>()?)
    }
}
