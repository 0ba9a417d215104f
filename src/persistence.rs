use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::info;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use serde::{Deserialize, Serialize};

use crate::{
    config::CompileConfig,
    error::{PipelineError, Result},
};

/// Structural description artifact, relative to the store directory.
pub const TOPOLOGY_FILE: &str = "model.json";
/// Weight blob artifact, relative to the store directory.
pub const WEIGHTS_FILE: &str = "weights.safetensors";

/// Name and shape of one parameter tensor, as recorded in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

/// Serializable structural description of a model.
///
/// Captures structure only; the optimizer and loss are re-established from a
/// `CompileConfig` after every load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub kind: String,
    pub classes: usize,
    pub image_shape: (usize, usize),
    pub tensors: Vec<TensorSpec>,
}

/// One named parameter tensor with its flat f32 payload.
#[derive(Debug, Clone)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Models that can round-trip through the two-artifact store.
pub trait Persistable: Sized {
    /// Structural description of this model.
    fn topology(&self) -> Topology;

    /// Snapshot of the parameter tensors named by the topology.
    fn tensors(&self) -> Vec<NamedTensor>;

    /// Rebuilds a model from its parts, applying `compile` last.
    ///
    /// # Errors
    /// Returns an error if the parts are inconsistent with each other or
    /// with this model kind.
    fn from_parts(
        topology: &Topology,
        tensors: Vec<NamedTensor>,
        compile: CompileConfig,
    ) -> Result<Self>;
}

/// Serializes and deserializes models as two independent artifacts at fixed,
/// well-known locations: a human-readable topology and a binary weight blob.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn topology_path(&self) -> PathBuf {
        self.dir.join(TOPOLOGY_FILE)
    }

    #[inline]
    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    /// Writes both artifacts.
    ///
    /// If the weight write fails the topology file is removed again, so a
    /// failed dump never leaves a half-valid artifact pair behind.
    ///
    /// # Errors
    /// Returns `PipelineError::ArtifactWrite` if either artifact cannot be
    /// written.
    pub fn dump<M: Persistable>(&self, model: &M) -> Result<()> {
        info!("dumping model artifacts: dir={}", self.dir.display());

        fs::create_dir_all(&self.dir)
            .map_err(|e| artifact_write(self.dir.clone(), e))?;

        let topology = model.topology();
        let json = serde_json::to_string_pretty(&topology)
            .map_err(|e| artifact_write(self.topology_path(), io::Error::other(e)))?;
        fs::write(self.topology_path(), json)
            .map_err(|e| artifact_write(self.topology_path(), e))?;

        if let Err(e) = self.write_weights(model) {
            let _ = fs::remove_file(self.topology_path());
            return Err(e);
        }
        Ok(())
    }

    /// Reads both artifacts and rebuilds the model, validating every weight
    /// tensor against the topology before handing the parts over.
    ///
    /// # Errors
    /// - `PipelineError::ArtifactRead` if either artifact is missing or
    ///   undecodable.
    /// - `PipelineError::ShapeMismatch` if a persisted tensor disagrees with
    ///   the structural description; weights are never truncated or padded.
    pub fn load<M: Persistable>(&self, compile: CompileConfig) -> Result<M> {
        info!("loading model artifacts: dir={}", self.dir.display());

        let topology = self.read_topology()?;

        let weights_path = self.weights_path();
        let bytes = fs::read(&weights_path)
            .map_err(|e| artifact_read(&weights_path, format!("{e}")))?;
        let archive = SafeTensors::deserialize(&bytes)
            .map_err(|e| artifact_read(&weights_path, format!("{e}")))?;

        let mut tensors = Vec::with_capacity(topology.tensors.len());
        for spec in &topology.tensors {
            let view = archive.tensor(&spec.name).map_err(|e| {
                artifact_read(&weights_path, format!("tensor {}: {e}", spec.name))
            })?;
            if view.dtype() != Dtype::F32 {
                return Err(artifact_read(
                    &weights_path,
                    format!("tensor {}: expected f32, got {:?}", spec.name, view.dtype()),
                ));
            }
            if view.shape() != spec.shape.as_slice() {
                return Err(PipelineError::ShapeMismatch {
                    what: "weights",
                    got: view.shape().iter().product(),
                    expected: spec.shape.iter().product(),
                });
            }
            tensors.push(NamedTensor {
                name: spec.name.clone(),
                shape: spec.shape.clone(),
                data: bytemuck::pod_collect_to_vec(view.data()),
            });
        }

        M::from_parts(&topology, tensors, compile)
    }

    fn read_topology(&self) -> Result<Topology> {
        let path = self.topology_path();
        let json =
            fs::read_to_string(&path).map_err(|e| artifact_read(&path, format!("{e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| artifact_read(&path, format!("invalid topology: {e}")))
    }

    fn write_weights<M: Persistable>(&self, model: &M) -> Result<()> {
        let tensors = model.tensors();
        let path = self.weights_path();

        let mut views = Vec::with_capacity(tensors.len());
        for t in &tensors {
            let view = TensorView::new(Dtype::F32, t.shape.clone(), bytemuck::cast_slice(&t.data))
                .map_err(|e| artifact_write(path.clone(), io::Error::other(e)))?;
            views.push((t.name.clone(), view));
        }

        safetensors::serialize_to_file(views, &None, &path)
            .map_err(|e| artifact_write(path.clone(), io::Error::other(e)))
    }
}

fn artifact_write(path: PathBuf, source: io::Error) -> PipelineError {
    PipelineError::ArtifactWrite { path, source }
}

fn artifact_read(path: &Path, reason: String) -> PipelineError {
    PipelineError::ArtifactRead {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_round_trips_through_json() {
        let topology = Topology {
            kind: "pixel_softmax".to_string(),
            classes: 3,
            image_shape: (512, 512),
            tensors: vec![TensorSpec {
                name: "params".to_string(),
                shape: vec![3, 2],
            }],
        };

        let json = serde_json::to_string(&topology).unwrap();
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(topology, back);
    }
}
