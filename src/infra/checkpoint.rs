// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model snapshots using Burn's NamedMpkFileRecorder
// at full precision, so the constant embedding tables come back
// bit-for-bit.
//
// What lives in the train directory:
//   1. translate.ckpt-<step> records — all model parameters
//   2. checkpoint.json               — index of snapshots and the
//                                      latest one, with the global
//                                      step and learning rate of each
//   3. train_config.json             — model architecture config
//
// Why save the config separately?
//   Decoding has to rebuild the exact architecture (hidden units,
//   layers, vocabulary sizes, buckets) before the weights can be
//   loaded into it.
//
// A missing checkpoint.json is not an error: it means nothing has
// been trained yet and the caller starts from fresh parameters.
//
// File naming convention:
//   train/
//     translate.ckpt-250.mpk
//     translate.ckpt-500.mpk
//     checkpoint.json
//     train_config.json

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;

/// Base name of every snapshot; the global step is appended.
pub const SNAPSHOT_PREFIX: &str = "translate.ckpt";

const INDEX_FILE: &str = "checkpoint.json";
const CONFIG_FILE: &str = "train_config.json";

type SnapshotRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// One saved snapshot and the counters that go with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub name:          String,
    pub global_step:   u64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    latest:    Option<String>,
    snapshots: Vec<SnapshotMeta>,
}

/// Manages saving and loading of model snapshots.
/// All files are stored in the train directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create train directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_name(global_step: u64) -> String {
        format!("{SNAPSHOT_PREFIX}-{global_step}")
    }

    // The recorder replaces the last extension, so keep one on the
    // stem or the step suffix would be eaten.
    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.mpk"))
    }

    /// Save the parameters of `model` as snapshot `translate.ckpt-<step>`
    /// and make it the latest one.
    pub fn save_model<B: Backend, M: Module<B>>(
        &self,
        model:         &M,
        global_step:   u64,
        learning_rate: f64,
    ) -> Result<SnapshotMeta> {
        let name = Self::snapshot_name(global_step);
        let path = self.record_path(&name);

        SnapshotRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let meta = SnapshotMeta { name: name.clone(), global_step, learning_rate };
        let mut index = self.read_index()?;
        index.snapshots.retain(|s| s.name != name);
        index.snapshots.push(meta.clone());
        index.latest = Some(name);
        self.write_index(&index)?;

        tracing::debug!("Saved checkpoint '{}' at step {}", meta.name, global_step);
        Ok(meta)
    }

    /// Latest snapshot, or None when nothing was saved yet
    pub fn latest(&self) -> Result<Option<SnapshotMeta>> {
        let index = self.read_index()?;
        Ok(index
            .latest
            .as_deref()
            .and_then(|name| index.snapshots.iter().find(|s| s.name == name))
            .cloned())
    }

    /// Snapshot with the given name, if it was ever saved here
    pub fn find(&self, name: &str) -> Result<Option<SnapshotMeta>> {
        Ok(self.read_index()?.snapshots.into_iter().find(|s| s.name == name))
    }

    /// Load the snapshot's parameters into `model`.
    /// The model must have the architecture the snapshot was saved with.
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        meta:   &SnapshotMeta,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.record_path(&meta.name);
        let record = SnapshotRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;
        Ok(model.load_record(record))
    }

    /// Save the training configuration to JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the configuration a model in this directory was trained with.
    pub fn load_config(&self) -> Result<Option<TrainConfig>> {
        let path = self.dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        let cfg = serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))?;
        Ok(Some(cfg))
    }

    fn read_index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed '{}'", path.display()))
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let path = self.dir.join(INDEX_FILE);
        fs::write(&path, serde_json::to_string_pretty(index)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type B = NdArray;

    #[test]
    fn test_no_checkpoint_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        assert_eq!(manager.latest().unwrap(), None);
        assert_eq!(manager.find("translate.ckpt-250").unwrap(), None);
        assert!(manager.load_config().unwrap().is_none());
    }

    #[test]
    fn test_snapshots_are_indexed_by_step() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let model: Linear<B> = LinearConfig::new(3, 2).init(&device);

        manager.save_model::<B, _>(&model, 250, 0.001).unwrap();
        manager.save_model::<B, _>(&model, 500, 0.00099).unwrap();

        let latest = manager.latest().unwrap().unwrap();
        assert_eq!(latest.name, "translate.ckpt-500");
        assert_eq!(latest.global_step, 500);
        assert!((latest.learning_rate - 0.00099).abs() < 1e-12);

        let first = manager.find("translate.ckpt-250").unwrap().unwrap();
        assert_eq!(first.global_step, 250);

        let fresh: Linear<B> = LinearConfig::new(3, 2).init(&device);
        let loaded = manager.load_model(fresh, &first, &device).unwrap();
        assert_eq!(loaded.weight.dims(), [3, 2]);
    }

    #[test]
    fn test_snapshot_keeps_full_precision() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        // 1.0001 and 0.1234567 are not representable in f16
        let values = vec![1.0001f32, 0.1234567, -3.3333333, 2.0e-6, 7.77777, 1.0e4];
        let mut model: Linear<B> = LinearConfig::new(3, 2).init(&device);
        model.weight = burn::module::Param::from_tensor(Tensor::from_data(
            TensorData::new(values.clone(), [3, 2]),
            &device,
        ));
        let meta = manager.save_model::<B, _>(&model, 250, 0.001).unwrap();
        assert!(dir.path().join("translate.ckpt-250.mpk").exists());

        let fresh: Linear<B> = LinearConfig::new(3, 2).init(&device);
        let loaded = manager.load_model(fresh, &meta, &device).unwrap();
        let restored = loaded.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(restored, values);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut cfg = TrainConfig::default();
        cfg.hidden_units = 64;
        manager.save_config(&cfg).unwrap();
        assert_eq!(manager.load_config().unwrap().unwrap().hidden_units, 64);
    }
}
