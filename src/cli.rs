use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{model::VggConfig, training::TrainingConfig, Result};

#[derive(Parser, Debug)]
#[command(version, about = "Train or evaluate a VGG classifier on CIFAR-10")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trains a new model and keeps the best checkpoint in the artifact directory.
    Train(TrainArgs),
    /// Evaluates the checkpoint stored in the artifact directory on the test split.
    Evaluate {
        #[arg(long, default_value = "artifacts/cifar10-vgg16")]
        artifact_dir: PathBuf,
        #[arg(long, default_value = "datasets")]
        data_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value = "artifacts/cifar10-vgg16")]
    pub artifact_dir: PathBuf,
    #[arg(long, default_value = "datasets")]
    pub data_dir: PathBuf,
    /// Stage preset: "16-layer" or "19-layer".
    #[arg(long, default_value = "16-layer")]
    pub preset: String,
    #[arg(long, default_value_t = 200)]
    pub num_epochs: usize,
    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(long, default_value_t = 0.1)]
    pub lr: f64,
    #[arg(long, default_value_t = 100)]
    pub lr_step_epochs: usize,
    /// Evaluate on this many batches per epoch instead of the whole test split.
    #[arg(long)]
    pub num_eval_batches: Option<usize>,
    #[arg(long)]
    pub no_augmentation: bool,
}

impl TrainArgs {
    /// Builds the training configuration described by the arguments.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let config = TrainingConfig::new(VggConfig::from_preset(&self.preset)?, TrainingConfig::sgd())
            .with_num_epochs(self.num_epochs)
            .with_batch_size(self.batch_size)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
            .with_learning_rate(self.lr)
            .with_lr_step_epochs(self.lr_step_epochs)
            .with_num_eval_batches(self.num_eval_batches)
            .with_augmentation(!self.no_augmentation);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VggError;

    fn train_args(cli: Cli) -> TrainArgs {
        match cli.command {
            Commands::Train(args) => args,
            command => panic!("expected a train command, got {command:?}"),
        }
    }

    #[test]
    fn train_arguments_build_config() {
        let cli = Cli::parse_from([
            "vgg",
            "train",
            "--preset",
            "19-layer",
            "--num-epochs",
            "3",
            "--num-eval-batches",
            "2",
            "--no-augmentation",
        ]);

        let config = train_args(cli).training_config().unwrap();

        assert_eq!(config.model.stage_config, vec![2, 2, 4, 4, 4]);
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.num_eval_batches, Some(2));
        assert!(!config.augmentation);
    }

    #[test]
    fn unknown_preset_fails() {
        let cli = Cli::parse_from(["vgg", "train", "--preset", "13-layer"]);

        assert!(matches!(
            train_args(cli).training_config(),
            Err(VggError::UnknownPreset { .. })
        ));
    }

    #[test]
    fn evaluate_uses_default_directories() {
        let cli = Cli::parse_from(["vgg", "evaluate"]);

        let Commands::Evaluate {
            artifact_dir,
            data_dir,
        } = cli.command
        else {
            panic!("expected an evaluate command");
        };
        assert_eq!(artifact_dir, PathBuf::from("artifacts/cifar10-vgg16"));
        assert_eq!(data_dir, PathBuf::from("datasets"));
    }
}
