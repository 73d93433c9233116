//! End-to-end fit runs over synthetic time series

use cultivar::augment::AugmentOptions;
use cultivar::autograd::{matmul, Tensor};
use cultivar::data::{Dataset, ModelInput};
use cultivar::io::{Checkpoint, CheckpointFormat};
use cultivar::model::{MlpRegressor, Model, ModelOutput, OutputKind, ParamGroup};
use cultivar::optim::{Adam, SGD};
use cultivar::train::{FitConfig, LossKind, MetricKind, Trainer};
use ndarray::{Array, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const TIME_STEPS: usize = 6;
const CHANNELS: usize = 2;

/// Labels are a smooth function of the inputs, learnable by a small MLP
fn synthetic_dataset(n: usize, seed: u64, n_targets: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Array3<f32> =
        Array::from_shape_fn((n, TIME_STEPS, CHANNELS), |_| rng.gen_range(0.0..1.0));

    let y = Array2::from_shape_fn((n, n_targets), |(i, t)| {
        let mean: f32 =
            x.slice(ndarray::s![i, .., ..]).iter().sum::<f32>() / (TIME_STEPS * CHANNELS) as f32;
        if t == 0 {
            mean
        } else {
            1.0 - mean
        }
    });

    Dataset::new(x, y).unwrap()
}

fn mlp(kind: OutputKind, seed: u64) -> MlpRegressor {
    let mut rng = StdRng::seed_from_u64(seed);
    MlpRegressor::new(TIME_STEPS, CHANNELS, 16, kind, &mut rng).unwrap()
}

#[test]
fn fit_reduces_validation_loss_and_writes_artifacts() {
    let train = synthetic_dataset(64, 1, 1);
    let val = synthetic_dataset(32, 2, 1);
    let test = synthetic_dataset(32, 3, 1);
    let dir = tempdir().unwrap();

    let config = FitConfig::new()
        .with_batch_size(16)
        .with_num_epochs(30)
        .with_save_steps(1)
        .with_loss(LossKind::Mse)
        .with_metric(MetricKind::Mse)
        .with_seed(0)
        .with_model_dir(dir.path());

    let model = mlp(OutputKind::Single, 10);
    let mut trainer = Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();
    let report = trainer.fit(&train, &val, Some(&test)).unwrap();

    assert_eq!(report.epochs_run, 30);
    assert!(report.final_train_loss.is_finite());

    let entries = report.history.entries();
    assert_eq!(entries.len(), 30);
    assert!(
        entries.last().unwrap().val_loss < entries.first().unwrap().val_loss,
        "validation loss did not go down"
    );
    assert!(entries.iter().all(|e| e.test_loss.is_some()));
    assert!(entries.iter().all(|e| !e.anomaly));

    assert!(dir.path().join("best_model.safetensors").exists());
    assert!(dir.path().join("last_model.safetensors").exists());
    assert!(dir.path().join("history.json").exists());

    // Best checkpoint loads back into a fresh model of the same shape.
    let ckpt = Checkpoint::load(
        dir.path().join("best_model.safetensors"),
        CheckpointFormat::SafeTensors,
    )
    .unwrap();
    let mut fresh = mlp(OutputKind::Single, 99);
    ckpt.apply(fresh.parameters_mut()).unwrap();
}

#[test]
fn fit_without_model_dir_writes_nothing() {
    let train = synthetic_dataset(32, 4, 1);
    let val = synthetic_dataset(16, 5, 1);

    let config = FitConfig::new()
        .with_batch_size(8)
        .with_num_epochs(3)
        .with_save_steps(1);

    let model = mlp(OutputKind::Single, 11);
    let mut trainer = Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();
    let report = trainer.fit(&train, &val, None).unwrap();

    assert_eq!(report.history.entries().len(), 3);
    assert!(report.history.entries().iter().all(|e| e.test_loss.is_none()));
}

#[test]
fn fit_with_adaptive_mechanisms_runs() {
    let train = synthetic_dataset(48, 6, 1);
    let val = synthetic_dataset(16, 7, 1);

    // Patience 0 engages augmentation, forgetting, and unfreezing from
    // the first epoch.
    let config = FitConfig::new()
        .with_batch_size(16)
        .with_num_epochs(5)
        .with_save_steps(2)
        .with_patience(0)
        .with_forget(3)
        .with_finetuning(true)
        .with_ema(true)
        .with_reduce_lr(true)
        .with_max_grad_norm(5.0)
        .with_augment(AugmentOptions {
            shift_step: 2,
            feat_noise: 0.1,
            sdev_label: 0.05,
            fillgaps: 0,
        });

    let model = mlp(OutputKind::Single, 12);
    let mut trainer = Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();
    let report = trainer.fit(&train, &val, None).unwrap();

    assert!(report.final_train_loss.is_finite());
    assert!(report.best_val_loss.is_some());
}

#[test]
fn fit_multi_output_with_auxiliary_target() {
    let train = synthetic_dataset(48, 8, 2);
    let val = synthetic_dataset(16, 9, 2);

    let config = FitConfig::new()
        .with_batch_size(16)
        .with_num_epochs(10)
        .with_save_steps(5)
        .with_lambda(0.5)
        .with_multibranch(true);

    let model = mlp(OutputKind::MultiOutput, 13);
    let mut trainer = Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();
    let report = trainer.fit(&train, &val, None).unwrap();

    assert!(report.final_train_loss.is_finite());
    assert_eq!(report.history.entries().len(), 2);
}

#[test]
fn fit_multi_output_requires_second_label_column() {
    let train = synthetic_dataset(32, 10, 1);
    let val = synthetic_dataset(16, 11, 1);

    let config = FitConfig::new().with_batch_size(8).with_num_epochs(2);
    let model = mlp(OutputKind::MultiOutput, 14);
    let mut trainer = Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();

    assert!(trainer.fit(&train, &val, None).is_err());
}

#[test]
fn fit_heteroscedastic_gaussian() {
    let train = synthetic_dataset(48, 12, 1);
    let val = synthetic_dataset(16, 13, 1);

    let config = FitConfig::new()
        .with_batch_size(16)
        .with_num_epochs(10)
        .with_save_steps(5)
        .with_loss(LossKind::GaussianNll)
        .with_metric(MetricKind::Mae);

    let model = mlp(OutputKind::Heteroscedastic, 15);
    let mut trainer =
        Trainer::new(model, Box::new(Adam::default_params(0.005)), config).unwrap();
    let report = trainer.fit(&train, &val, None).unwrap();

    assert!(report.final_train_loss.is_finite());
    assert!(report.best_val_loss.unwrap().is_finite());
}

/// Predicts one learned scalar for every sample, whatever the input
struct ScalarModel {
    params: Vec<Tensor>,
}

impl ScalarModel {
    fn new(init: f32) -> Self {
        Self {
            params: vec![Tensor::from_vec(vec![init], true)],
        }
    }
}

impl Model for ScalarModel {
    fn forward(&self, input: &ModelInput, _training: bool) -> cultivar::Result<ModelOutput> {
        let batch = match input {
            ModelInput::Single(x) => x.shape()[0],
            ModelInput::Branched(branches) => branches.first().map(|b| b.shape()[0]).unwrap_or(0),
        };
        let ones = Tensor::from_vec(vec![1.0; batch], false);
        Ok(ModelOutput::Single {
            pred: matmul(&ones, &self.params[0], batch, 1, 1),
        })
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Single
    }

    fn parameters(&self) -> &[Tensor] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Tensor] {
        &mut self.params
    }

    fn parameter_groups(&self) -> Vec<ParamGroup> {
        vec![ParamGroup {
            name: "head".to_string(),
            indices: 0..1,
        }]
    }
}

#[test]
fn best_checkpoint_follows_validation_loss_not_metric() {
    // Training toward target 0 walks the scalar down every epoch. With
    // validation targets {0.8, 0.0} the MSE val loss bottoms out mid-run
    // (optimum at 0.4), while MAPE keeps falling to the very last epoch
    // because its near-zero target dominates. The best checkpoint must
    // track the loss minimum, not the metric minimum.
    let train = Dataset::new(Array3::zeros((8, 1, 1)), Array2::zeros((8, 1))).unwrap();
    let val = Dataset::new(
        Array3::zeros((2, 1, 1)),
        Array2::from_shape_vec((2, 1), vec![0.8, 0.0]).unwrap(),
    )
    .unwrap();

    let config = FitConfig::new()
        .with_batch_size(8)
        .with_num_epochs(20)
        .with_save_steps(1)
        .with_loss(LossKind::Mse)
        .with_metric(MetricKind::Mape);

    let model = ScalarModel::new(1.0);
    let mut trainer = Trainer::new(model, Box::new(SGD::new(0.05, 0.0)), config).unwrap();
    let report = trainer.fit(&train, &val, None).unwrap();

    let entries = report.history.entries();
    let argmin = |key: fn(&cultivar::train::HistoryEntry) -> f32| {
        entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| key(a).total_cmp(&key(b)))
            .map(|(i, _)| i)
            .unwrap()
    };
    let loss_argmin = argmin(|e| e.val_loss);
    let metric_argmin = argmin(|e| e.val_metric);

    // The run genuinely separates the two candidates.
    assert_ne!(loss_argmin, metric_argmin);
    assert_eq!(report.best_epoch, Some(loss_argmin));
    assert_eq!(
        report.best_val_loss.unwrap().to_bits(),
        entries[loss_argmin].val_loss.to_bits()
    );
}

#[test]
fn trainer_rejects_loss_output_mismatch() {
    let config = FitConfig::new().with_loss(LossKind::GaussianNll);
    let model = mlp(OutputKind::Single, 16);
    assert!(Trainer::new(model, Box::new(Adam::default_params(0.01)), config).is_err());
}

#[test]
fn fit_is_deterministic_for_a_fixed_seed() {
    let train = synthetic_dataset(32, 17, 1);
    let val = synthetic_dataset(16, 18, 1);

    let run = |seed: u64| {
        let config = FitConfig::new()
            .with_batch_size(8)
            .with_num_epochs(5)
            .with_save_steps(1)
            .with_seed(seed);
        let model = mlp(OutputKind::Single, 20);
        let mut trainer =
            Trainer::new(model, Box::new(Adam::default_params(0.01)), config).unwrap();
        trainer.fit(&train, &val, None).unwrap().final_train_loss
    };

    assert_eq!(run(3).to_bits(), run(3).to_bits());
    assert_ne!(run(3).to_bits(), run(4).to_bits());
}
