mod classifier;
mod stage;
mod vgg;

pub mod preset;

pub use classifier::*;
pub use stage::*;
pub use vgg::*;

/// Qualified parameter names with their tensor shapes.
pub type ParamLayout = Vec<(String, Vec<usize>)>;
