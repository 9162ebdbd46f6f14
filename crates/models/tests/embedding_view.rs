use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use models::{C3d, C3dConfig, C3dLayer, EmbeddingView};

type B = NdArray<f32>;

fn tiny_config() -> C3dConfig {
    C3dConfig {
        frames: 4,
        height: 8,
        width: 8,
        channels: 3,
        num_classes: 2,
        stage_widths: [2, 2, 2, 2, 2],
        fc_hidden: 6,
        dropout: 0.0,
    }
}

#[test]
fn view_matches_model_layer_output() {
    let cfg = tiny_config();
    let device = Default::default();
    let model = C3d::<B>::new(&cfg, &device);
    let values: Vec<f32> = (0..3 * 4 * 8 * 8).map(|v| (v % 7) as f32 / 7.0).collect();
    let clips = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 3, 4, 8, 8]), &device);

    let view = EmbeddingView::new(&model, C3dLayer::Fc7);
    assert_eq!(view.layer(), C3dLayer::Fc7);
    let from_view = view.forward(clips.clone()).into_data().to_vec::<f32>().unwrap();
    let direct = model
        .forward_layer(clips, C3dLayer::Fc7)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(from_view.len(), C3dLayer::Fc7.output_dim(&cfg));
    assert_eq!(from_view, direct);
    // Post-ReLU output.
    assert!(from_view.iter().all(|v| *v >= 0.0));
}
