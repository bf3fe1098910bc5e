use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    lr_scheduler::{step::StepLrSchedulerConfig, LrScheduler},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::{
    checkpoint::{load_checkpoint, save_checkpoint, CheckpointMeta},
    data::{AugmentationConfig, CifarDataset, CifarItem, ClassificationBatch, ClassificationBatcher},
    error::{Result, VggError},
    model::{Vgg, VggConfig},
};

const CONFIG_FILE: &str = "config.json";
const CHECKPOINT_FILE: &str = "checkpoint";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: VggConfig,
    pub optimizer: SgdConfig,
    #[config(default = 200)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0.1)]
    pub learning_rate: f64,
    /// Number of epochs between two learning rate decays.
    #[config(default = 100)]
    pub lr_step_epochs: usize,
    #[config(default = 0.1)]
    pub lr_gamma: f64,
    /// Evaluate on at most this many batches per epoch; all of them when unset.
    pub num_eval_batches: Option<usize>,
    #[config(default = true)]
    pub augmentation: bool,
}

impl TrainingConfig {
    /// SGD with momentum 0.9 and an L2 penalty of 5e-4.
    pub fn sgd() -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new().with_momentum(0.9).with_dampening(0.0),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(5e-4)))
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.num_epochs == 0 {
            return Err(VggError::Config("num_epochs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(VggError::Config("batch_size must be positive".to_string()));
        }
        if self.num_eval_batches == Some(0) {
            return Err(VggError::Config(
                "num_eval_batches must be positive when set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Epoch and validation accuracy of the best checkpoint persisted by [fit].
#[derive(new, Debug, Clone, Copy, PartialEq)]
pub struct BestCheckpoint {
    pub epoch: usize,
    pub val_accuracy: f64,
}

/// Learning rate and metrics of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid: EvalReport,
}

/// Outcome of [fit]: every epoch in order and the persisted best checkpoint.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochSummary>,
    pub best: BestCheckpoint,
}

type TrainLoader<B> = Arc<dyn DataLoader<B, ClassificationBatch<B>>>;
type ValidLoader<B> = Arc<
    dyn DataLoader<
        <B as AutodiffBackend>::InnerBackend,
        ClassificationBatch<<B as AutodiffBackend>::InnerBackend>,
    >,
>;

/// Loss and accuracy over the evaluated batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub items: usize,
    pub correct: usize,
    pub loss: f64,
    pub accuracy: f64,
}

impl<B: Backend> Vgg<B> {
    /// Forward pass returning the mean cross-entropy loss and the logits.
    pub fn forward_loss(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets);

        (loss, output)
    }
}

fn num_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    output
        .argmax(1)
        .squeeze::<1>(1)
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// Runs the model over at most `num_batches` batches of `dataloader`.
pub fn evaluate<B: Backend>(
    model: &Vgg<B>,
    dataloader: &dyn DataLoader<B, ClassificationBatch<B>>,
    num_batches: Option<usize>,
) -> EvalReport {
    let mut items = 0;
    let mut correct = 0;
    let mut loss_sum = 0.0;

    for batch in dataloader.iter().take(num_batches.unwrap_or(usize::MAX)) {
        let batch_size = batch.targets.dims()[0];
        let (loss, output) = model.forward_loss(batch.images, batch.targets.clone());

        loss_sum += loss.into_scalar().elem::<f64>() * batch_size as f64;
        correct += num_correct(output, batch.targets);
        items += batch_size;
    }

    let (loss, accuracy) = match items {
        0 => (0.0, 0.0),
        n => (loss_sum / n as f64, correct as f64 / n as f64),
    };

    EvalReport {
        items,
        correct,
        loss,
        accuracy,
    }
}

/// Trains `model` for `config.num_epochs` epochs and keeps the best checkpoint at `checkpoint_path`.
///
/// The checkpoint is rewritten every time the validation accuracy strictly improves.
pub fn fit<B: AutodiffBackend>(
    mut model: Vgg<B>,
    config: &TrainingConfig,
    dataloader_train: TrainLoader<B>,
    dataloader_valid: ValidLoader<B>,
    checkpoint_path: &Path,
) -> Result<(Vgg<B>, TrainingSummary)> {
    config.validate()?;

    let mut optim = config.optimizer.init::<B, Vgg<B>>();
    let mut scheduler = StepLrSchedulerConfig::new(config.learning_rate, config.lr_step_epochs)
        .with_gamma(config.lr_gamma)
        .init()
        .map_err(VggError::Config)?;
    let mut best: Option<BestCheckpoint> = None;
    let mut epochs = Vec::with_capacity(config.num_epochs);

    for epoch in 1..config.num_epochs + 1 {
        let lr = scheduler.step();
        let mut train_items = 0;
        let mut train_correct = 0;
        let mut train_loss = 0.0;

        for batch in dataloader_train.iter() {
            let batch_size = batch.targets.dims()[0];
            let (loss, output) = model.forward_loss(batch.images, batch.targets.clone());

            train_loss += loss.clone().into_scalar().elem::<f64>() * batch_size as f64;
            train_correct += num_correct(output, batch.targets);
            train_items += batch_size;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);
        }

        let valid_model = model.valid();
        let report = evaluate(
            &valid_model,
            dataloader_valid.as_ref(),
            config.num_eval_batches,
        );

        let train_items = train_items.max(1) as f64;
        let summary = EpochSummary {
            epoch,
            learning_rate: lr,
            train_loss: train_loss / train_items,
            train_accuracy: train_correct as f64 / train_items,
            valid: report,
        };
        log::info!(
            "Epoch {}/{} lr {:.5} | train loss {:.4} acc {:.2}% | valid loss {:.4} acc {:.2}%",
            epoch,
            config.num_epochs,
            lr,
            summary.train_loss,
            100.0 * summary.train_accuracy,
            report.loss,
            100.0 * report.accuracy,
        );
        epochs.push(summary);

        if best.is_none_or(|best| report.accuracy > best.val_accuracy) {
            save_checkpoint(
                &valid_model,
                &config.model,
                CheckpointMeta::new(epoch, report.accuracy),
                checkpoint_path,
            )?;
            best = Some(BestCheckpoint::new(epoch, report.accuracy));
        }
    }

    let best = best.ok_or_else(|| VggError::Config("no epoch was run".to_string()))?;
    log::info!(
        "Best validation accuracy {:.2}% at epoch {}",
        100.0 * best.val_accuracy,
        best.epoch
    );

    Ok((model, TrainingSummary { epochs, best }))
}

/// Train and validation loaders producing batches on `device`.
///
/// The train loader shuffles and, when enabled, augments with generators seeded from `config.seed`.
pub fn build_dataloaders<B, DT, DV>(
    config: &TrainingConfig,
    device: &B::Device,
    dataset_train: DT,
    dataset_valid: DV,
) -> (TrainLoader<B>, ValidLoader<B>)
where
    B: AutodiffBackend,
    DT: Dataset<CifarItem> + 'static,
    DV: Dataset<CifarItem> + 'static,
{
    let mut batcher_train = ClassificationBatcher::<B>::new(device.clone());
    if config.augmentation {
        batcher_train = batcher_train.with_augmentation(AugmentationConfig::new(), config.seed);
    }
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::new(device.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(dataset_valid);

    (dataloader_train, dataloader_valid)
}

pub fn checkpoint_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(CHECKPOINT_FILE)
}

/// Trains on CIFAR-10 using the test split for validation, as the reference setup does.
pub fn run_training<B: AutodiffBackend>(
    artifact_dir: &Path,
    data_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> Result<BestCheckpoint> {
    config.validate()?;
    std::fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let (dataloader_train, dataloader_valid) = build_dataloaders::<B, _, _>(
        &config,
        &device,
        CifarDataset::train(data_dir)?,
        CifarDataset::test(data_dir)?,
    );

    let model = config.model.init::<B>(&device)?;

    let now = Instant::now();
    let (_, summary) = fit(
        model,
        &config,
        dataloader_train,
        dataloader_valid,
        &checkpoint_path(artifact_dir),
    )?;
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    Ok(summary.best)
}

/// Restores the best checkpoint from `artifact_dir` and evaluates it on the CIFAR-10 test split.
pub fn run_evaluation<B: Backend>(
    artifact_dir: &Path,
    data_dir: &Path,
    device: B::Device,
) -> Result<(CheckpointMeta, EvalReport)> {
    let config = TrainingConfig::load(artifact_dir.join(CONFIG_FILE))
        .map_err(|err| VggError::Config(err.to_string()))?;
    let (model, meta) = load_checkpoint::<B>(&config.model, &checkpoint_path(artifact_dir), &device)?;

    let dataloader_test = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(CifarDataset::test(data_dir)?);

    let report = evaluate(&model, dataloader_test.as_ref(), None);
    log::info!(
        "Checkpoint of epoch {} evaluated: loss {:.4} accuracy {:.2}% over {} images",
        meta.epoch,
        report.loss,
        100.0 * report.accuracy,
        report.items
    );

    Ok((meta, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn default_config_matches_reference_schedule() {
        let config = TrainingConfig::new(
            VggConfig::from_preset("16-layer").unwrap(),
            TrainingConfig::sgd(),
        );

        assert_eq!(config.num_epochs, 200);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.lr_step_epochs, 100);
        assert_eq!(config.num_eval_batches, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_survives_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = TrainingConfig::new(
            VggConfig::from_preset("19-layer").unwrap().with_num_classes(5),
            TrainingConfig::sgd(),
        )
        .with_num_eval_batches(Some(3))
        .with_augmentation(false);

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.model.stage_config, vec![2, 2, 4, 4, 4]);
        assert_eq!(loaded.model.num_classes, 5);
        assert_eq!(loaded.num_eval_batches, Some(3));
        assert!(!loaded.augmentation);
    }

    #[test]
    fn zero_epochs_is_rejected() {
        let config = TrainingConfig::new(VggConfig::new(vec![1; 5]), TrainingConfig::sgd())
            .with_num_epochs(0);

        assert!(matches!(config.validate(), Err(VggError::Config(_))));
    }

    #[test]
    fn learning_rate_decays_per_epoch_step() {
        let mut scheduler = StepLrSchedulerConfig::new(0.1, 2)
            .with_gamma(0.1)
            .init()
            .unwrap();

        let lrs: Vec<_> = (0..5).map(|_| scheduler.step()).collect();
        let expected = [0.1, 0.1, 0.01, 0.01, 0.001];
        for (lr, expected) in lrs.iter().zip(expected) {
            assert!((lr - expected).abs() < 1e-12, "{lr} != {expected}");
        }
    }

    #[test]
    fn correct_predictions_are_counted() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 2], &device);

        assert_eq!(num_correct(output, targets), 2);
    }
}
