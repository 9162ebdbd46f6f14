use crate::c3d::{C3d, C3dLayer};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// A trained `C3d` truncated at one of its dense layers.
///
/// Borrows the model: parameters are shared, nothing is copied.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingView<'a, B: Backend> {
    model: &'a C3d<B>,
    layer: C3dLayer,
}

impl<'a, B: Backend> EmbeddingView<'a, B> {
    pub fn new(model: &'a C3d<B>, layer: C3dLayer) -> Self {
        Self { model, layer }
    }

    pub fn layer(&self) -> C3dLayer {
        self.layer
    }

    /// Embeddings `[batch, dim]` for clips `[batch, channels, frames, height, width]`.
    pub fn forward(&self, clips: Tensor<B, 5>) -> Tensor<B, 2> {
        self.model.forward_layer(clips, self.layer)
    }
}
