use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use crate::error::{UNetError, UNetResult};
use crate::model::{UNet, UNetConfig};

const CONFIG_FILE: &str = "model.json";
const EPOCH_PREFIX: &str = "epoch-";

type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Training artifacts: the architecture as `model.json` plus one weight snapshot per epoch.
///
/// Snapshots only load into a model built from the same configuration, which is why the
/// configuration is stored next to them.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn create(root: impl Into<PathBuf>) -> UNetResult<Self> {
        let dir = Self::open(root);
        fs::create_dir_all(&dir.root)?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path handed to the recorder, which appends its own extension.
    pub fn epoch_path(&self, epoch: usize) -> PathBuf {
        self.root.join(format!("{EPOCH_PREFIX}{epoch:04}"))
    }

    pub fn save_config(&self, config: &UNetConfig) -> UNetResult<()> {
        let path = self.config_path();
        config.save(&path)?;
        tracing::info!("Saved model config to {}", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> UNetResult<UNetConfig> {
        UNetConfig::load(self.config_path()).map_err(|err| UNetError::Config(err.to_string()))
    }

    pub fn save_epoch<B: Backend>(&self, model: UNet<B>, epoch: usize) -> UNetResult<()> {
        let path = self.epoch_path(epoch);
        model.save_file(path.clone(), &WeightsRecorder::new())?;
        tracing::info!("Saved epoch {epoch} weights to {}", path.display());
        Ok(())
    }

    /// Rebuilds the model from `model.json` and loads the weights of `epoch` into it.
    pub fn load_epoch<B: Backend>(&self, epoch: usize, device: &B::Device) -> UNetResult<UNet<B>> {
        let model = self.load_config()?.init(device)?;
        let model = model.load_file(self.epoch_path(epoch), &WeightsRecorder::new(), device)?;
        tracing::debug!("Loaded epoch {epoch} weights from {}", self.root.display());
        Ok(model)
    }

    /// Epochs with a stored snapshot, ascending.
    pub fn epochs(&self) -> UNetResult<Vec<usize>> {
        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let epoch = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix(EPOCH_PREFIX))
                .and_then(|digits| digits.parse::<usize>().ok());

            if let Some(epoch) = epoch {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    pub fn latest_epoch(&self) -> UNetResult<Option<usize>> {
        Ok(self.epochs()?.last().copied())
    }
}
