//! VGG-style convolutional image classifier built with Burn.
//!
//! - [model]: the network builder, stage presets and shape inference.
//! - [checkpoint]: persistence of trained weights.
//! - [data]: CIFAR-10 loading, augmentation and batching.
//! - [training]: the training and evaluation driver.

#[macro_use]
extern crate derive_new;

pub mod checkpoint;
pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod training;

pub use error::{Result, VggError};

#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;
