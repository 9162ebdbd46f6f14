//! Burn models for video action recognition.
//!
//! - `C3d`: 3D-convolutional clip classifier (five conv stages, two dense layers, class head).
//! - `EmbeddingView`: borrows a trained `C3d` and exposes one of its dense layers as an
//!   embedding function for retrieval.
//!
//! Models are pure Burn Modules; dataset handling and training loops live in the
//! `video_dataset` and `training` crates.

pub mod c3d;
pub mod embedding;
pub mod pool;

pub use c3d::{C3d, C3dConfig, C3dLayer, ModelError};
pub use embedding::EmbeddingView;

pub mod prelude {
    pub use super::{C3d, C3dConfig, C3dLayer, EmbeddingView, ModelError};
}
