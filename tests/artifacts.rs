use std::path::PathBuf;

use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use coffee_unet::{ArtifactDir, UNetConfig, UNetError};

type TestBackend = NdArray;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("coffee-unet-{name}-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir
}

#[test]
fn snapshots_reload_into_a_fresh_model() {
    let device = Default::default();
    let artifacts = ArtifactDir::create(scratch_dir("reload")).unwrap();
    let config = UNetConfig::new([16, 16])
        .with_num_layers(2)
        .with_base_filters(4);
    let model = config.init::<TestBackend>(&device).unwrap();

    artifacts.save_config(&config).unwrap();
    artifacts.save_epoch(model.clone(), 0).unwrap();
    artifacts.save_epoch(model.clone(), 3).unwrap();

    assert_eq!(artifacts.epochs().unwrap(), vec![0, 3]);
    assert_eq!(artifacts.latest_epoch().unwrap(), Some(3));

    let restored = artifacts.load_epoch::<TestBackend>(3, &device).unwrap();
    let images = Tensor::<TestBackend, 4>::random([1, 1, 16, 16], Distribution::Default, &device);

    let expected = model.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
    let actual = restored.forward(images).into_data().to_vec::<f32>().unwrap();
    assert_eq!(expected, actual);

    let stored = artifacts.load_config().unwrap();
    assert_eq!(stored.num_layers, 2);
    assert_eq!(stored.base_filters, 4);

    std::fs::remove_dir_all(artifacts.root()).ok();
}

#[test]
fn missing_snapshot_is_a_record_error() {
    let device = Default::default();
    let artifacts = ArtifactDir::create(scratch_dir("missing")).unwrap();
    artifacts
        .save_config(&UNetConfig::new([8, 8]).with_num_layers(1).with_base_filters(2))
        .unwrap();

    let result = artifacts.load_epoch::<TestBackend>(7, &device);

    assert!(matches!(result, Err(UNetError::Record(_))));
    assert_eq!(artifacts.latest_epoch().unwrap(), None);

    std::fs::remove_dir_all(artifacts.root()).ok();
}
