// ============================================================
// Layer 6 — Constant Embedding Tables
// ============================================================
// Source-side embeddings are produced outside this program and
// only read here. On disk a table is a JSON array of rows, one row
// of floats per token id:
//
//   [[0.12, -0.40, ...],   ← id 0
//    [0.05,  0.33, ...],   ← id 1
//    ...]
//
// The whole table is loaded once when the model is built.

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use rand::Rng;
use std::{fs::File, io::BufReader, path::Path};

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantEmbedding {
    pub rows:   usize,
    pub dim:    usize,
    /// Row-major, `rows * dim` values
    pub values: Vec<f32>,
}

impl ConstantEmbedding {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open embedding table '{}'", path.display()))?;
        let rows: Vec<Vec<f32>> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Malformed embedding table '{}'", path.display()))?;
        let table = Self::from_rows(rows)
            .with_context(|| format!("Invalid embedding table '{}'", path.display()))?;
        tracing::info!(
            "Loaded constant embedding '{}' ({} x {})",
            path.display(), table.rows, table.dim,
        );
        Ok(table)
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if dim == 0 {
            bail!("embedding table is empty");
        }
        if let Some((id, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            bail!("row {id} has {} values, expected {dim}", row.len());
        }
        Ok(Self { rows: rows.len(), dim, values: rows.concat() })
    }

    /// Uniform values in [-0.1, 0.1); used when no table is supplied
    pub fn random<R: Rng + ?Sized>(rows: usize, dim: usize, rng: &mut R) -> Self {
        let values = (0..rows * dim).map(|_| rng.gen_range(-0.1f32..0.1)).collect();
        Self { rows, dim, values }
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(self.values.clone(), [self.rows, self.dim]), device)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_load_json_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.json");
        std::fs::write(&path, "[[0.5, 1.0], [1.5, 2.0], [2.5, 3.0]]").unwrap();

        let table = ConstantEmbedding::load(&path).unwrap();
        assert_eq!((table.rows, table.dim), (3, 2));
        assert_eq!(table.values, vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);

        let tensor = table.to_tensor::<burn::backend::NdArray>(&Default::default());
        assert_eq!(tensor.dims(), [3, 2]);
    }

    #[test]
    fn test_ragged_and_empty_tables_rejected() {
        assert!(ConstantEmbedding::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(ConstantEmbedding::from_rows(Vec::new()).is_err());
    }

    #[test]
    fn test_random_table_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let table = ConstantEmbedding::random(4, 3, &mut rng);
        assert_eq!(table.values.len(), 12);
        assert!(table.values.iter().all(|v| (-0.1..0.1).contains(v)));
    }
}
