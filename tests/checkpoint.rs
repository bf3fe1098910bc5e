use burn::{
    backend::NdArray,
    tensor::{Distribution, Tensor},
};
use vgg::{
    checkpoint::{load_checkpoint, save_checkpoint, CheckpointMeta},
    model::VggConfig,
    VggError,
};

type TestBackend = NdArray<f32>;

#[test]
fn reloaded_checkpoint_reproduces_outputs() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best");
    let config = VggConfig::from_default_config("16-layer", [3, 32, 32], 10).unwrap();
    let model = config.init::<TestBackend>(&device).unwrap();
    let input = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);

    let expected = model.forward(input.clone());
    save_checkpoint(&model, &config, CheckpointMeta::new(12, 0.75), &path).unwrap();
    let (reloaded, meta) = load_checkpoint::<TestBackend>(&config, &path, &device).unwrap();

    assert!(dir.path().join("best.mpk").exists());
    assert_eq!(meta, CheckpointMeta::new(12, 0.75));
    reloaded
        .forward(input)
        .to_data()
        .assert_eq(&expected.to_data(), true);
}

#[test]
fn other_preset_is_a_topology_mismatch() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best");
    let config = VggConfig::from_preset("16-layer").unwrap();
    let model = config.init::<TestBackend>(&device).unwrap();
    save_checkpoint(&model, &config, CheckpointMeta::new(1, 0.1), &path).unwrap();

    let other = VggConfig::from_preset("19-layer").unwrap();
    let err = load_checkpoint::<TestBackend>(&other, &path, &device).unwrap_err();

    assert!(matches!(err, VggError::TopologyMismatch { name, .. } if name == "stage_config"));
}

#[test]
fn other_class_count_is_a_topology_mismatch() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best");
    let config = VggConfig::new(vec![1; 5]);
    let model = config.init::<TestBackend>(&device).unwrap();
    save_checkpoint(&model, &config, CheckpointMeta::new(1, 0.1), &path).unwrap();

    let other = VggConfig::new(vec![1; 5]).with_num_classes(5);
    let err = load_checkpoint::<TestBackend>(&other, &path, &device).unwrap_err();

    match err {
        VggError::TopologyMismatch {
            name,
            expected,
            found,
        } => {
            assert_eq!(name, "classifier.fc3.weight");
            assert_eq!(expected, "[512, 5]");
            assert_eq!(found, "classifier.fc3.weight [512, 10]");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn missing_checkpoint_is_a_recorder_error() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let config = VggConfig::new(vec![1; 5]);

    let err = load_checkpoint::<TestBackend>(&config, &dir.path().join("absent"), &device)
        .unwrap_err();

    assert!(matches!(err, VggError::Recorder(_)));
}
