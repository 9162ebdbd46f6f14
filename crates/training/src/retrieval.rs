//! Retrieval by cosine similarity between clip embeddings.
//!
//! Every training clip is embedded with one dense layer of a trained model and used
//! as a query against all clips (itself included). Items whose similarity is strictly
//! above the threshold are retrieved; a query's accuracy is the fraction of retrieved
//! items sharing its label. Queries that retrieve nothing are reported separately and
//! left out of the mean.

use crate::config::PipelineConfig;
use crate::error::{TrainError, TrainResult};
use crate::train::{load_c3d, model_config_for, model_config_for_checkpoint, tensor_values};
use crate::TrainBackend;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::{C3d, C3dLayer, EmbeddingView};
use serde::Serialize;
use std::path::Path;
use video_dataset::{clips_to_tensor, snapshot, Clip};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Indices of every item above the threshold, in index order.
    Retrieved(Vec<usize>),
    NoRetrieval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalReport {
    /// Mean per-query accuracy over queries that retrieved something.
    pub mean_accuracy: Option<f32>,
    pub queries: usize,
    pub retrieved: usize,
    pub skipped: usize,
    pub threshold: f32,
}

/// Pairwise cosine similarity of the rows of `[n, dim]` embeddings, as `[n, n]`.
///
/// Zero rows are similar to nothing, themselves included.
pub fn cosine_similarity_matrix<B: Backend>(embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
    let norms = embeddings.clone().powf_scalar(2.0).sum_dim(1).sqrt();
    let zero = norms.clone().equal_elem(0.0);
    let unit = embeddings / norms.mask_fill(zero, 1.0);
    unit.clone().matmul(unit.transpose())
}

/// Similarity matrix rows on the host.
pub fn similarity_rows<B: Backend>(similarity: Tensor<B, 2>) -> TrainResult<Vec<Vec<f32>>> {
    let [_, n] = similarity.dims();
    let values = tensor_values(similarity)?;
    Ok(values.chunks(n.max(1)).map(<[f32]>::to_vec).collect())
}

pub fn retrieve(similarities: &[f32], threshold: f32) -> RetrievalOutcome {
    let hits: Vec<usize> = similarities
        .iter()
        .enumerate()
        .filter(|(_, s)| **s > threshold)
        .map(|(j, _)| j)
        .collect();
    if hits.is_empty() {
        RetrievalOutcome::NoRetrieval
    } else {
        RetrievalOutcome::Retrieved(hits)
    }
}

/// Fraction of `retrieved` items labelled `query_label`.
pub fn query_accuracy(query_label: u32, retrieved: &[usize], labels: &[u32]) -> f32 {
    if retrieved.is_empty() {
        return 0.0;
    }
    let matching = retrieved
        .iter()
        .filter(|j| labels[**j] == query_label)
        .count();
    matching as f32 / retrieved.len() as f32
}

/// Score every row of `similarity` as a query against `labels`.
pub fn score_retrieval(
    similarity: &[Vec<f32>],
    labels: &[u32],
    threshold: f32,
) -> TrainResult<RetrievalReport> {
    let n = labels.len();
    if similarity.len() != n || similarity.iter().any(|row| row.len() != n) {
        return Err(TrainError::Other(format!(
            "similarity matrix does not match {n} labels"
        )));
    }
    let mut sum = 0.0f64;
    let mut retrieved = 0usize;
    for (i, row) in similarity.iter().enumerate() {
        match retrieve(row, threshold) {
            RetrievalOutcome::Retrieved(hits) => {
                sum += query_accuracy(labels[i], &hits, labels) as f64;
                retrieved += 1;
            }
            RetrievalOutcome::NoRetrieval => {
                tracing::debug!(query = i, "no item above threshold");
            }
        }
    }
    Ok(RetrievalReport {
        mean_accuracy: (retrieved > 0).then(|| (sum / retrieved as f64) as f32),
        queries: n,
        retrieved,
        skipped: n - retrieved,
        threshold,
    })
}

/// Embed `clips` in batches of `batch_size` into one `[clips, dim]` tensor.
pub fn embed_clips<B: Backend>(
    view: &EmbeddingView<'_, B>,
    clips: &[Clip],
    batch_size: usize,
    device: &B::Device,
) -> TrainResult<Tensor<B, 2>> {
    if clips.is_empty() {
        return Err(TrainError::Other("no clips to embed".to_string()));
    }
    let mut batches = Vec::with_capacity(clips.len().div_ceil(batch_size.max(1)));
    for chunk in clips.chunks(batch_size.max(1)) {
        let refs: Vec<&Clip> = chunk.iter().collect();
        batches.push(view.forward(clips_to_tensor::<B>(&refs, device)?));
    }
    Ok(Tensor::cat(batches, 0))
}

/// Embed `clips` with `layer` of `model` and score retrieval among them.
pub fn evaluate_retrieval<B: Backend>(
    model: &C3d<B>,
    layer: C3dLayer,
    clips: &[Clip],
    labels: &[u32],
    threshold: f32,
    batch_size: usize,
    device: &B::Device,
) -> TrainResult<RetrievalReport> {
    let view = EmbeddingView::new(model, layer);
    let embeddings = embed_clips(&view, clips, batch_size, device)?;
    let similarity = similarity_rows(cosine_similarity_matrix(embeddings))?;
    score_retrieval(&similarity, labels, threshold)
}

/// Load `checkpoint` and evaluate retrieval over the training partition of `snapshot_path`.
pub fn run_eval(
    cfg: &PipelineConfig,
    checkpoint: &Path,
    snapshot_path: &Path,
) -> TrainResult<RetrievalReport> {
    cfg.validate()?;
    let data = snapshot::load(snapshot_path)?;
    let model_config = model_config_for_checkpoint(checkpoint, model_config_for(cfg, &data)?)?;
    let device = <TrainBackend as Backend>::Device::default();
    let model = load_c3d::<TrainBackend>(checkpoint, &model_config, &device)?;
    tracing::info!(
        checkpoint = %checkpoint.display(),
        snapshot = %snapshot_path.display(),
        layer = %cfg.retrieval.layer,
        clips = data.x_train.len(),
        "evaluating retrieval"
    );
    let report = evaluate_retrieval(
        &model,
        cfg.retrieval.layer,
        &data.x_train,
        &data.y_train,
        cfg.retrieval.threshold,
        cfg.retrieval.batch_size,
        &device,
    )?;
    if report.skipped > 0 {
        tracing::warn!(
            skipped = report.skipped,
            queries = report.queries,
            "queries with no retrieval excluded from the mean"
        );
    }
    Ok(report)
}
