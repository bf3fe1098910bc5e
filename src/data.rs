use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{
            transform::{Mapper, MapperDataset},
            vision::{Annotation, ImageDatasetItem, ImageFolderDataset, PixelDepth},
            Dataset,
        },
        network::downloader,
    },
    prelude::*,
};
use flate2::read::GzDecoder;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::error::{Result, VggError};

const URL: &str = "https://s3.amazonaws.com/fast-ai-sample/cifar10.tgz";

pub const IMAGE_SIZE: usize = 32;
pub const IMAGE_CHANNELS: usize = 3;

// CIFAR-10 mean and std values
const MEAN: [f32; 3] = [0.4914, 0.48216, 0.44653];
const STD: [f32; 3] = [0.24703, 0.24349, 0.26159];

/// A CIFAR-10 image stored as `[height, width, channel]` bytes with its class index.
#[derive(new, Clone, Debug, Serialize, Deserialize)]
pub struct CifarItem {
    pub image: Vec<u8>,
    pub label: usize,
}

struct ToCifarItem;

impl Mapper<ImageDatasetItem, CifarItem> for ToCifarItem {
    fn map(&self, item: &ImageDatasetItem) -> CifarItem {
        let image = item
            .image
            .iter()
            .map(|pixel| match pixel {
                PixelDepth::U8(value) => *value,
                PixelDepth::U16(value) => (*value >> 8) as u8,
                PixelDepth::F32(value) => (value.clamp(0.0, 1.0) * 255.0) as u8,
            })
            .collect();

        let label = match &item.annotation {
            Annotation::Label(label) => *label,
            _ => unreachable!("classification folders only yield class labels"),
        };

        CifarItem::new(image, label)
    }
}

type MappedDataset = MapperDataset<ImageFolderDataset, ToCifarItem, ImageDatasetItem>;

/// The CIFAR-10 train or test split, read from the extracted image folders.
pub struct CifarDataset {
    dataset: MappedDataset,
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl CifarDataset {
    /// Training split (50 000 images), downloaded into `root` on first use.
    pub fn train<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::new(root.as_ref(), "train")
    }

    /// Test split (10 000 images), downloaded into `root` on first use.
    pub fn test<P: AsRef<Path>>(root: P) -> Result<Self> {
        Self::new(root.as_ref(), "test")
    }

    fn new(root: &Path, split: &str) -> Result<Self> {
        let split_dir = Self::download(root)?.join(split);
        let folders = ImageFolderDataset::new_classification(&split_dir)
            .map_err(|err| VggError::Dataset(format!("{}: {err}", split_dir.display())))?;

        log::info!("Loaded CIFAR-10 {split} split from {}", split_dir.display());

        Ok(Self {
            dataset: MapperDataset::new(folders, ToCifarItem),
        })
    }

    /// Downloads and extracts the archive unless it is already present.
    fn download(root: &Path) -> Result<PathBuf> {
        let cifar_dir = root.join("cifar10");
        let labels_file = cifar_dir.join("labels.txt");

        if !labels_file.exists() {
            std::fs::create_dir_all(root)?;
            log::info!("Downloading CIFAR-10 into {}", root.display());

            let bytes = downloader::download_file_as_bytes(URL, "cifar10.tgz");
            let gz_buffer = GzDecoder::new(&bytes[..]);
            let mut archive = Archive::new(gz_buffer);
            archive.unpack(root)?;
        }

        Ok(cifar_dir)
    }
}

/// Random crop from a zero-padded image followed by a random horizontal flip.
#[derive(Config, Debug)]
pub struct AugmentationConfig {
    #[config(default = 4)]
    pub padding: usize,
    #[config(default = 0.5)]
    pub flip_probability: f64,
}

impl AugmentationConfig {
    /// Applies the augmentation to a square `[size, size, channels]` image.
    pub fn apply<R: Rng>(&self, image: &[u8], size: usize, channels: usize, rng: &mut R) -> Vec<u8> {
        let pad = self.padding as isize;
        let offset_y = rng.random_range(0..=2 * self.padding) as isize - pad;
        let offset_x = rng.random_range(0..=2 * self.padding) as isize - pad;
        let flip = rng.random_bool(self.flip_probability);

        let mut output = vec![0u8; size * size * channels];
        for y in 0..size {
            let src_y = y as isize + offset_y;
            if src_y < 0 || src_y >= size as isize {
                continue;
            }
            for x in 0..size {
                let dst_x = if flip { size - 1 - x } else { x };
                let src_x = x as isize + offset_x;
                if src_x < 0 || src_x >= size as isize {
                    continue;
                }
                let src = (src_y as usize * size + src_x as usize) * channels;
                let dst = (y * size + dst_x) * channels;
                output[dst..dst + channels].copy_from_slice(&image[src..src + channels]);
            }
        }

        output
    }
}

/// Per-channel normalization with the CIFAR-10 statistics.
#[derive(Clone)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: &B::Device) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
        Self { mean, std }
    }

    /// `(input - mean) / std`, with input in `[0, 1]`.
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }

    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            mean: self.mean.clone().to_device(device),
            std: self.std.clone().to_device(device),
        }
    }
}

#[derive(Clone)]
struct SeededAugmentation {
    config: AugmentationConfig,
    seed: u64,
    // Shared by the worker clones so every batch draws from its own stream.
    batches: Arc<AtomicU64>,
}

impl SeededAugmentation {
    fn next_rng(&self) -> StdRng {
        let batch = self.batches.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(self.seed.wrapping_add(batch))
    }
}

#[derive(Clone)]
pub struct ClassificationBatcher<B: Backend> {
    normalizer: Normalizer<B>,
    augmentation: Option<SeededAugmentation>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            normalizer: Normalizer::<B>::new(&device),
            augmentation: None,
        }
    }

    /// Augments every batch with a generator seeded from `seed` and the batch count.
    pub fn with_augmentation(mut self, augmentation: AugmentationConfig, seed: u64) -> Self {
        self.augmentation = Some(SeededAugmentation {
            config: augmentation,
            seed,
            batches: Arc::new(AtomicU64::new(0)),
        });
        self
    }
}

impl<B: Backend> Batcher<B, CifarItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<CifarItem>, device: &B::Device) -> ClassificationBatch<B> {
        let mut rng = self.augmentation.as_ref().map(SeededAugmentation::next_rng);

        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets, [items.len()]).convert::<B::IntElem>(),
            device,
        );

        let images = items
            .into_iter()
            .map(|item| match (&self.augmentation, rng.as_mut()) {
                (Some(augmentation), Some(rng)) => {
                    augmentation
                        .config
                        .apply(&item.image, IMAGE_SIZE, IMAGE_CHANNELS, rng)
                }
                _ => item.image,
            })
            .map(|pixels| {
                TensorData::new(pixels, Shape::new([IMAGE_SIZE, IMAGE_SIZE, IMAGE_CHANNELS]))
            })
            .map(|data| {
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device)
                    // permute(2, 0, 1)
                    .swap_dims(2, 1) // [H, C, W]
                    .swap_dims(1, 0) // [C, H, W]
            })
            .map(|tensor| tensor / 255) // normalize between [0, 1]
            .collect();

        let images = Tensor::stack(images, 0);
        let images = self.normalizer.to_device(device).normalize(images);

        ClassificationBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::{backend::ndarray::NdArrayDevice, tensor::ElementConversion};

    fn gradient_image(size: usize, channels: usize) -> Vec<u8> {
        (0..size * size * channels).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn augmentation_keeps_image_size() {
        let image = gradient_image(IMAGE_SIZE, IMAGE_CHANNELS);
        let mut rng = StdRng::seed_from_u64(7);

        let output =
            AugmentationConfig::new().apply(&image, IMAGE_SIZE, IMAGE_CHANNELS, &mut rng);

        assert_eq!(output.len(), image.len());
    }

    #[test]
    fn no_padding_no_flip_is_identity() {
        let image = gradient_image(4, 3);
        let mut rng = StdRng::seed_from_u64(7);

        let output = AugmentationConfig::new()
            .with_padding(0)
            .with_flip_probability(0.0)
            .apply(&image, 4, 3, &mut rng);

        assert_eq!(output, image);
    }

    #[test]
    fn always_flip_mirrors_rows() {
        let image: Vec<u8> = (0..4).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let output = AugmentationConfig::new()
            .with_padding(0)
            .with_flip_probability(1.0)
            .apply(&image, 2, 1, &mut rng);

        assert_eq!(output, vec![1, 0, 3, 2]);
    }

    #[test]
    fn batcher_produces_normalized_chw_batch() {
        let device = NdArrayDevice::Cpu;
        let batcher = ClassificationBatcher::<TestBackend>::new(device.clone());
        let items = vec![
            CifarItem::new(vec![0; IMAGE_SIZE * IMAGE_SIZE * IMAGE_CHANNELS], 3),
            CifarItem::new(vec![255; IMAGE_SIZE * IMAGE_SIZE * IMAGE_CHANNELS], 7),
        ];

        let batch = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
        assert_eq!(batch.targets.to_data().to_vec::<i64>().unwrap(), vec![3, 7]);

        let first_pixel = batch
            .images
            .slice([0..1, 0..1, 0..1, 0..1])
            .into_scalar()
            .elem::<f32>();
        let expected = -MEAN[0] / STD[0];
        assert!((first_pixel - expected).abs() < 1e-4);
    }

    #[test]
    fn augmentation_is_reproducible_for_a_seed() {
        let device = NdArrayDevice::Cpu;
        let items: Vec<_> = (0..4)
            .map(|label| CifarItem::new(gradient_image(IMAGE_SIZE, IMAGE_CHANNELS), label))
            .collect();
        let batcher = || {
            ClassificationBatcher::<TestBackend>::new(device.clone())
                .with_augmentation(AugmentationConfig::new(), 42)
        };
        let (first, second) = (batcher(), batcher());

        for _ in 0..3 {
            let expected = first.batch(items.clone(), &device).images.into_data();
            let actual = second.batch(items.clone(), &device).images.into_data();
            expected.assert_eq(&actual, true);
        }
    }
}
