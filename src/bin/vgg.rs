use clap::Parser;
use tracing_subscriber::EnvFilter;
use vgg::{
    cli::{Cli, Commands},
    training, Result,
};

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod backend {
    pub use burn::backend::ndarray::{NdArray as Inner, NdArrayDevice as Device};

    pub fn device() -> Device {
        Device::Cpu
    }
}

#[cfg(all(
    feature = "tch-gpu",
    not(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
    ))
))]
mod backend {
    pub use burn::backend::libtorch::{LibTorch as Inner, LibTorchDevice as Device};

    #[cfg(not(target_os = "macos"))]
    pub fn device() -> Device {
        Device::Cuda(0)
    }

    #[cfg(target_os = "macos")]
    pub fn device() -> Device {
        Device::Mps
    }
}

#[cfg(all(
    feature = "tch-cpu",
    not(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
        feature = "tch-gpu",
    ))
))]
mod backend {
    pub use burn::backend::libtorch::{LibTorch as Inner, LibTorchDevice as Device};

    pub fn device() -> Device {
        Device::Cpu
    }
}

#[cfg(all(
    feature = "wgpu",
    not(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
        feature = "tch-gpu",
        feature = "tch-cpu",
    ))
))]
mod backend {
    pub use burn::backend::wgpu::{Wgpu as Inner, WgpuDevice as Device};

    pub fn device() -> Device {
        Device::default()
    }
}

type Backend = backend::Inner;
type AutodiffBackend = burn::backend::Autodiff<Backend>;

fn run(cli: Cli) -> Result<()> {
    let device = backend::device();

    match cli.command {
        Commands::Train(args) => {
            let config = args.training_config()?;
            let best = training::run_training::<AutodiffBackend>(
                &args.artifact_dir,
                &args.data_dir,
                config,
                device,
            )?;
            println!(
                "Best checkpoint: epoch {} with validation accuracy {:.2}%",
                best.epoch,
                100.0 * best.val_accuracy
            );
        }
        Commands::Evaluate {
            artifact_dir,
            data_dir,
        } => {
            let (meta, report) =
                training::run_evaluation::<Backend>(&artifact_dir, &data_dir, device)?;
            println!(
                "Checkpoint of epoch {}: test accuracy {:.2}% ({}/{})",
                meta.epoch,
                100.0 * report.accuracy,
                report.correct,
                report.items
            );
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
