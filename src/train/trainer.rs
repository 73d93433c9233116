//! Training loop with adaptive regularization
//!
//! The fit loop shuffles per epoch, trains per batch with optional
//! sample forgetting, evaluates every `save_steps` epochs, and engages
//! augmentation, forgetting, and backbone unfreezing once the epoch
//! counter passes the patience window.

use crate::augment::augment;
use crate::data::{Batch, Dataset};
use crate::error::{Error, Result};
use crate::io::{Checkpoint, CheckpointFormat, BEST_MODEL, HISTORY_FILE, LAST_MODEL};
use crate::model::{Model, ModelOutput};
use crate::optim::{clip_grad_norm, Optimizer, ReduceLrOnPlateau};
use crate::train::{
    FitConfig, History, HistoryEntry, LossAccumulator, LossRegime, ParameterEma,
};
use crate::autograd::backward;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

/// Snapshot of where a fit run currently stands
#[derive(Clone, Debug, Default)]
pub struct TrainingState {
    pub epoch: usize,
    pub best_val_loss: Option<f32>,
    pub best_epoch: Option<usize>,
    /// Adaptive mechanisms engaged after the patience window
    pub augmenting: bool,
    pub forgetting: bool,
    pub unfrozen: bool,
}

impl TrainingState {
    /// Strict improvement of the validation loss; losses are always
    /// minimized, a non-finite value never improves.
    fn improved(&self, val_loss: f32) -> bool {
        if !val_loss.is_finite() {
            return false;
        }
        match self.best_val_loss {
            None => true,
            Some(best) => val_loss < best,
        }
    }
}

/// Outcome of a fit run
#[derive(Debug)]
pub struct FitReport {
    pub epochs_run: usize,
    pub final_train_loss: f32,
    pub best_val_loss: Option<f32>,
    pub best_epoch: Option<usize>,
    pub history: History,
}

/// Orchestrates model, optimizer, and loss over a fit run
pub struct Trainer<M: Model> {
    model: M,
    optimizer: Box<dyn Optimizer>,
    config: FitConfig,
    regime: LossRegime,
}

impl<M: Model> Trainer<M> {
    pub fn new(model: M, optimizer: Box<dyn Optimizer>, config: FitConfig) -> Result<Self> {
        config.validate()?;
        let regime = LossRegime::resolve(config.loss, model.output_kind(), config.lambda)?;
        Ok(Self {
            model,
            optimizer,
            config,
            regime,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    /// Run the full training loop
    ///
    /// Evaluation, history recording, and checkpointing happen every
    /// `save_steps` epochs and on the final one. The test split, when
    /// given, is only ever evaluated, never trained on.
    pub fn fit(
        &mut self,
        train: &Dataset,
        val: &Dataset,
        test: Option<&Dataset>,
    ) -> Result<FitReport> {
        if train.is_empty() {
            return Err(Error::Config("training set is empty".into()));
        }
        if val.is_empty() {
            return Err(Error::Config("validation set is empty".into()));
        }
        if matches!(self.regime, LossRegime::MultiOutput { .. }) && train.n_targets() < 2 {
            return Err(Error::Config(
                "auxiliary loss needs a second label column".into(),
            ));
        }

        if let Some(dir) = &self.config.model_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut state = TrainingState::default();
        let mut history = History::default();

        let mut plateau = self.config.reduce_lr.then(|| {
            ReduceLrOnPlateau::new(
                (self.config.patience / 4).max(1),
                0.5,
                self.config.direction,
            )
            .with_linear_reduction(self.config.reduce_lin)
        });

        let mut ema = self
            .config
            .ema
            .then(|| ParameterEma::new(self.model.parameters(), self.config.ema_decay));

        if self.config.finetuning {
            self.model.set_backbone_trainable(false)?;
            info!("backbone frozen, training heads only");
        }

        info!(
            epochs = self.config.num_epochs,
            batch_size = self.config.batch_size,
            params = self.model.num_parameters(),
            "starting fit"
        );

        let mut final_train_loss = 0.0;

        for epoch in 0..self.config.num_epochs {
            state.epoch = epoch;
            self.engage_adaptive(&mut state)?;

            let shuffled = train.shuffled(&mut rng);
            let epoch_data = if state.augmenting {
                let (x, y, _) = augment(
                    shuffled.inputs(),
                    shuffled.labels(),
                    &self.config.augment,
                    &mut rng,
                );
                Dataset::from_parts(x, y)?
            } else {
                shuffled
            };

            let mut epoch_loss = LossAccumulator::default();
            for batch in epoch_data.batches(self.config.batch_size) {
                let (loss, kept) = self.train_batch(&batch, state.forgetting, ema.as_mut())?;
                epoch_loss.add_scalar(loss, kept);
            }
            final_train_loss = epoch_loss.mean();

            debug!(
                epoch,
                train_loss = final_train_loss as f64,
                lr = self.lr() as f64,
                "epoch done"
            );

            let eval_now =
                (epoch + 1) % self.config.save_steps == 0 || epoch + 1 == self.config.num_epochs;

            if eval_now {
                let saved = ema.as_ref().map(|e| e.swap_in(self.model.parameters_mut()));

                let (val_loss, val_metric) = self.evaluate(val)?;
                let (test_loss, test_metric) = match test {
                    Some(test) => {
                        let (l, m) = self.evaluate(test)?;
                        (Some(l), Some(m))
                    }
                    None => (None, None),
                };

                info!(
                    epoch,
                    train_loss = final_train_loss as f64,
                    val_loss = val_loss as f64,
                    val_metric = val_metric as f64,
                    "evaluation"
                );

                history.push(
                    HistoryEntry {
                        epoch,
                        lr: self.lr(),
                        train_loss: final_train_loss,
                        val_loss,
                        val_metric,
                        test_loss,
                        test_metric,
                        anomaly: false,
                    }
                    .with_anomaly_flag(),
                );

                // The checkpoint follows the validation loss; the metric
                // only drives the plateau controller below.
                if state.improved(val_loss) {
                    state.best_val_loss = Some(val_loss);
                    state.best_epoch = Some(epoch);
                    // Checkpoint the weights that were just evaluated.
                    self.save_checkpoint(BEST_MODEL)?;
                    info!(epoch, val_loss = val_loss as f64, "new best model");
                }

                if let Some(saved) = saved {
                    if let Some(e) = &ema {
                        e.swap_out(self.model.parameters_mut(), saved);
                    }
                }

                if let Some(plateau) = &mut plateau {
                    if let Some(new_lr) = plateau.on_epoch_end(val_metric, self.lr()) {
                        self.optimizer.set_lr(new_lr);
                    }
                }
            }
        }

        self.save_checkpoint(LAST_MODEL)?;
        if let Some(dir) = &self.config.model_dir {
            history.save(dir.join(HISTORY_FILE))?;
        }

        info!(
            best_epoch = state.best_epoch.map(|e| e as u64),
            best_val_loss = state.best_val_loss.map(|m| m as f64),
            "fit finished"
        );

        Ok(FitReport {
            epochs_run: self.config.num_epochs,
            final_train_loss,
            best_val_loss: state.best_val_loss,
            best_epoch: state.best_epoch,
            history,
        })
    }

    /// Flip on augmentation, forgetting, and unfreezing once the epoch
    /// counter reaches the patience threshold
    fn engage_adaptive(&mut self, state: &mut TrainingState) -> Result<()> {
        if state.epoch < self.config.patience {
            return Ok(());
        }

        if !state.augmenting && self.config.augment.any() {
            state.augmenting = true;
            info!(epoch = state.epoch, "enabling data augmentation");
        }
        if !state.forgetting && self.config.forget > 0 {
            state.forgetting = true;
            info!(
                epoch = state.epoch,
                forget = self.config.forget,
                "enabling sample forgetting"
            );
        }
        if !state.unfrozen && self.config.finetuning {
            self.model.set_backbone_trainable(true)?;
            state.unfrozen = true;
            info!(epoch = state.epoch, "unfreezing backbone");
        }
        Ok(())
    }

    /// One optimization step; returns the mean loss over kept samples
    /// and how many were kept
    fn train_batch(
        &mut self,
        batch: &Batch,
        forgetting: bool,
        ema: Option<&mut ParameterEma>,
    ) -> Result<(f32, usize)> {
        self.optimizer.zero_grad(self.model.parameters_mut());

        let input = batch.input(self.config.multibranch);
        let output = self.model.forward(&input, true)?;
        let primary = batch.y.column(0).to_owned();

        // Forgetting only applies to full batches; the trailing partial
        // batch trains on everything it has.
        let n_forget = if forgetting && batch.len() == self.config.batch_size {
            self.config.forget.min(batch.len() - 1)
        } else {
            0
        };

        let (loss, kept) = match (&self.regime, output) {
            (LossRegime::Single(loss_fn), ModelOutput::Single { mut pred }) => {
                let per = loss_fn.per_sample(pred.data(), &primary);
                let mask = forget_mask(&per, n_forget);
                let kept = mask.iter().filter(|&&k| k).count();

                let seed = masked_seed(&loss_fn.grad(pred.data(), &primary), &mask, kept);
                backward(&mut pred, Some(seed));
                (masked_mean(&per, &mask, kept), kept)
            }
            (
                LossRegime::MultiOutput { loss: loss_fn, lambda },
                ModelOutput::MultiOutput { mut pred, mut aux },
            ) => {
                let aux_target = batch.y.column(1).to_owned();
                let per_primary = loss_fn.per_sample(pred.data(), &primary);
                let per_aux = loss_fn.per_sample(aux.data(), &aux_target);
                let per = &per_primary + &(&per_aux * *lambda);

                let mask = forget_mask(&per, n_forget);
                let kept = mask.iter().filter(|&&k| k).count();

                let seed = masked_seed(&loss_fn.grad(pred.data(), &primary), &mask, kept);
                backward(&mut pred, Some(seed));
                let aux_seed = masked_seed(
                    &(loss_fn.grad(aux.data(), &aux_target) * *lambda),
                    &mask,
                    kept,
                );
                backward(&mut aux, Some(aux_seed));
                (masked_mean(&per, &mask, kept), kept)
            }
            (
                LossRegime::Heteroscedastic(loss_fn),
                ModelOutput::Heteroscedastic { mut mean, mut sigma },
            ) => {
                let per = loss_fn.per_sample(mean.data(), sigma.data(), &primary);
                let mask = forget_mask(&per, n_forget);
                let kept = mask.iter().filter(|&&k| k).count();

                let (d_mean, d_sigma) = loss_fn.grads(mean.data(), sigma.data(), &primary);
                backward(&mut mean, Some(masked_seed(&d_mean, &mask, kept)));
                backward(&mut sigma, Some(masked_seed(&d_sigma, &mask, kept)));
                (masked_mean(&per, &mask, kept), kept)
            }
            _ => {
                return Err(Error::Config(
                    "loss regime does not match model output".into(),
                ))
            }
        };

        if let Some(max_norm) = self.config.max_grad_norm {
            clip_grad_norm(self.model.parameters(), max_norm);
        }
        self.optimizer.step(self.model.parameters_mut());

        if let Some(ema) = ema {
            ema.update(self.model.parameters());
        }

        Ok((loss, kept))
    }

    /// Mean loss and metric over a held-out split, no parameter updates
    fn evaluate(&self, dataset: &Dataset) -> Result<(f32, f32)> {
        let mut metric = self.config.metric.build();
        let mut loss_acc = LossAccumulator::default();

        for batch in dataset.batches(self.config.batch_size) {
            let input = batch.input(self.config.multibranch);
            let output = self.model.forward(&input, false)?;
            let primary = batch.y.column(0).to_owned();

            match (&self.regime, output) {
                (LossRegime::Single(loss_fn), ModelOutput::Single { pred }) => {
                    loss_acc.add(&loss_fn.per_sample(pred.data(), &primary));
                    metric.update(pred.data(), &primary);
                }
                (
                    LossRegime::MultiOutput { loss: loss_fn, lambda },
                    ModelOutput::MultiOutput { pred, aux },
                ) => {
                    let aux_target = batch.y.column(1).to_owned();
                    let per = &loss_fn.per_sample(pred.data(), &primary)
                        + &(&loss_fn.per_sample(aux.data(), &aux_target) * *lambda);
                    loss_acc.add(&per);
                    metric.update(pred.data(), &primary);
                }
                (
                    LossRegime::Heteroscedastic(loss_fn),
                    ModelOutput::Heteroscedastic { mean, sigma },
                ) => {
                    loss_acc.add(&loss_fn.per_sample(mean.data(), sigma.data(), &primary));
                    metric.update(mean.data(), &primary);
                }
                _ => {
                    return Err(Error::Config(
                        "loss regime does not match model output".into(),
                    ))
                }
            }
        }

        Ok((loss_acc.mean(), metric.result()))
    }

    fn save_checkpoint(&self, stem: &str) -> Result<()> {
        let Some(dir) = &self.config.model_dir else {
            return Ok(());
        };
        let names = self.model.parameter_names();
        let checkpoint = Checkpoint::from_parameters(&names, self.model.parameters())?;
        let format = CheckpointFormat::SafeTensors;
        checkpoint.save(dir.join(format!("{stem}.{}", format.extension())), format)
    }
}

/// Keep-mask over a batch: the `n_forget` highest-loss samples are dropped
///
/// Non-finite losses sort ahead of everything, so exploding samples are
/// forgotten first.
fn forget_mask(losses: &Array1<f32>, n_forget: usize) -> Vec<bool> {
    let n = losses.len();
    let mut mask = vec![true; n];
    if n_forget == 0 || n == 0 {
        return mask;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| losses[b].total_cmp(&losses[a]));
    for &idx in order.iter().take(n_forget.min(n - 1)) {
        mask[idx] = false;
    }
    mask
}

/// Per-sample gradient seed, zeroed for dropped samples and averaged
/// over the kept ones
fn masked_seed(grads: &Array1<f32>, mask: &[bool], kept: usize) -> Array1<f32> {
    let scale = if kept > 0 { 1.0 / kept as f32 } else { 0.0 };
    Array1::from_shape_fn(grads.len(), |i| {
        if mask[i] {
            grads[i] * scale
        } else {
            0.0
        }
    })
}

fn masked_mean(values: &Array1<f32>, mask: &[bool], kept: usize) -> f32 {
    if kept == 0 {
        return 0.0;
    }
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, &keep)| keep)
        .map(|(&v, _)| v)
        .sum::<f32>()
        / kept as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forget_mask_drops_highest_losses() {
        let losses = Array1::from(vec![0.1, 5.0, 0.2, 3.0]);
        let mask = forget_mask(&losses, 2);
        assert_eq!(mask, vec![true, false, true, false]);
    }

    #[test]
    fn test_forget_mask_never_drops_everything() {
        let losses = Array1::from(vec![1.0, 2.0, 3.0]);
        let mask = forget_mask(&losses, 10);
        assert_eq!(mask.iter().filter(|&&k| k).count(), 1);
        // The smallest loss is the survivor.
        assert!(mask[0]);
    }

    #[test]
    fn test_forget_mask_drops_nan_first() {
        let losses = Array1::from(vec![0.5, f32::NAN, 0.3]);
        let mask = forget_mask(&losses, 1);
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn test_forget_mask_zero_is_identity() {
        let losses = Array1::from(vec![1.0, 2.0]);
        assert_eq!(forget_mask(&losses, 0), vec![true, true]);
    }

    #[test]
    fn test_masked_seed_scales_by_kept() {
        let grads = Array1::from(vec![2.0, 4.0, 6.0]);
        let mask = vec![true, false, true];
        let seed = masked_seed(&grads, &mask, 2);

        assert_relative_eq!(seed[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(seed[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(seed[2], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_masked_mean() {
        let values = Array1::from(vec![1.0, 100.0, 3.0]);
        let mask = vec![true, false, true];
        assert_relative_eq!(masked_mean(&values, &mask, 2), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_best_checkpoint_tie_keeps_earliest() {
        let mut state = TrainingState::default();
        for (epoch, val_loss) in [0.9f32, 0.5, 0.7, 0.5].into_iter().enumerate() {
            if state.improved(val_loss) {
                state.best_val_loss = Some(val_loss);
                state.best_epoch = Some(epoch);
            }
        }
        assert_eq!(state.best_epoch, Some(1));
    }

    #[test]
    fn test_training_state_improvement_is_strict() {
        let mut state = TrainingState::default();
        assert!(state.improved(1.0));
        state.best_val_loss = Some(1.0);

        assert!(!state.improved(1.0));
        assert!(state.improved(0.9));
        assert!(!state.improved(f32::NAN));
    }
}
