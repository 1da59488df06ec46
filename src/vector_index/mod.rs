//! Dense vector store answering top-k inner-product queries (§4.3).

use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Capability set for the dense index. Both the in-memory brute-force
/// variant and an optional approximate backend implement this (§9: trait
/// object, not inheritance).
pub trait VectorIndex: Send + Sync {
    /// Rejects any vector whose length != the configured dimension.
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;
    /// Returns at most `size()` results, sorted strictly descending by score.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>>;
    fn remove(&self, ids: &[String]) -> Result<()>;
    fn save(&self, path: &Path) -> Result<()>;
    fn load(&self, path: &Path) -> Result<()>;
    fn size(&self) -> usize;
    fn backend_tag(&self) -> &'static str;
    fn close(&self) -> Result<()>;
}

struct State {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    id_to_index: HashMap<String, usize>,
}

/// Linear-scan in-memory index, O(n*d) per query. The default variant (§4.3).
pub struct BruteForceIndex {
    dimension: usize,
    state: RwLock<State>,
}

impl BruteForceIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(State {
                ids: Vec::new(),
                vectors: Vec::new(),
                id_to_index: HashMap::new(),
            }),
        }
    }

    fn inner_product(a: &[f32], b: &[f32]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
    }
}

impl VectorIndex for BruteForceIndex {
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::invalid("ids and vectors length mismatch"));
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(Error::invalid(format!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    self.dimension
                )));
            }
        }

        let mut state = self.state.write();
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            if let Some(&existing) = state.id_to_index.get(id) {
                state.vectors[existing] = vector.clone();
            } else {
                let index = state.ids.len();
                state.ids.push(id.clone());
                state.vectors.push(vector.clone());
                state.id_to_index.insert(id.clone(), index);
            }
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
        if query.len() != self.dimension {
            return Err(Error::invalid(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let state = self.state.read();
        let mut scored: Vec<(String, f64)> = state
            .ids
            .iter()
            .zip(state.vectors.iter())
            .map(|(id, vector)| (id.clone(), Self::inner_product(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.min(scored.len()));
        Ok(scored)
    }

    fn remove(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.write();
        let to_remove: std::collections::HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
        let mut new_ids = Vec::with_capacity(state.ids.len());
        let mut new_vectors = Vec::with_capacity(state.vectors.len());
        for (id, vector) in state.ids.drain(..).zip(state.vectors.drain(..)) {
            if !to_remove.contains(id.as_str()) {
                new_ids.push(id);
                new_vectors.push(vector);
            }
        }
        state.id_to_index = new_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        state.ids = new_ids;
        state.vectors = new_vectors;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let state = self.state.read();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_u32::<LittleEndian>(self.dimension as u32)?;
        writer.write_u32::<LittleEndian>(state.ids.len() as u32)?;
        for (id, vector) in state.ids.iter().zip(state.vectors.iter()) {
            let id_bytes = id.as_bytes();
            writer.write_u32::<LittleEndian>(id_bytes.len() as u32)?;
            writer.write_all(id_bytes)?;
            for value in vector {
                writer.write_f32::<LittleEndian>(*value)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(file);
        let dimension = reader.read_u32::<LittleEndian>()? as usize;
        if dimension != self.dimension {
            return Err(Error::invalid(format!(
                "saved dimension {dimension} does not match index dimension {}",
                self.dimension
            )));
        }
        let count = reader.read_u32::<LittleEndian>()? as usize;

        let mut ids = Vec::with_capacity(count);
        let mut vectors = Vec::with_capacity(count);
        for _ in 0..count {
            let id_len = reader.read_u32::<LittleEndian>()? as usize;
            let mut id_bytes = vec![0u8; id_len];
            reader.read_exact(&mut id_bytes)?;
            let id = String::from_utf8(id_bytes)
                .map_err(|e| Error::backend(format!("corrupt vector index id: {e}")))?;

            let mut vector = vec![0f32; dimension];
            for slot in vector.iter_mut() {
                *slot = reader.read_f32::<LittleEndian>()?;
            }
            ids.push(id.clone());
            vectors.push(vector);
        }

        let id_to_index = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let mut state = self.state.write();
        state.ids = ids;
        state.vectors = vectors;
        state.id_to_index = id_to_index;
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.read().ids.len()
    }

    fn backend_tag(&self) -> &'static str {
        "brute_force"
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Which backend the factory should build. `Approximate` is a compile-time
/// opt-in this core crate does not vendor an ANN dependency for (see
/// DESIGN.md); the factory still exposes the tag and fails unknown names
/// explicitly, satisfying the factory contract.
pub enum VectorBackend {
    BruteForce,
    Approximate,
}

pub fn create_vector_index(backend: &str, dimension: usize) -> Result<Box<dyn VectorIndex>> {
    match backend {
        "brute_force" | "" => Ok(Box::new(BruteForceIndex::new(dimension))),
        "approximate" => Err(Error::backend(
            "approximate vector backend is not vendored in this build",
        )),
        other => Err(Error::backend(format!("unknown vector backend: {other}"))),
    }
}

impl From<VectorBackend> for &'static str {
    fn from(backend: VectorBackend) -> Self {
        match backend {
            VectorBackend::BruteForce => "brute_force",
            VectorBackend::Approximate => "approximate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_dimension_on_add() {
        let index = BruteForceIndex::new(3);
        let err = index
            .add(&["a".to_string()], &[vec![1.0, 2.0]])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn search_returns_at_most_size_results() {
        let index = BruteForceIndex::new(2);
        index
            .add(
                &["a".to_string(), "b".to_string()],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .unwrap();
        let results = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_sorted_strictly_descending() {
        let index = BruteForceIndex::new(2);
        index
            .add(
                &["a".to_string(), "b".to_string(), "c".to_string()],
                &[vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]],
            )
            .unwrap();
        let results = index.search(&[1.0, 0.0], 3).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn remove_drops_ids_from_future_searches() {
        let index = BruteForceIndex::new(2);
        index
            .add(&["a".to_string(), "b".to_string()], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        index.remove(&["a".to_string()]).unwrap();
        let results = index.search(&[1.0, 0.0], 10).unwrap();
        assert!(!results.iter().any(|(id, _)| id == "a"));
    }

    #[test]
    fn save_and_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        let index = BruteForceIndex::new(2);
        index
            .add(&["a".to_string(), "b".to_string()], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        index.save(&path).unwrap();

        let reloaded = BruteForceIndex::new(2);
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.size(), 2);
        let results = reloaded.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn load_refuses_mismatched_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        BruteForceIndex::new(2).save(&path).unwrap();

        let reloaded = BruteForceIndex::new(3);
        assert!(reloaded.load(&path).is_err());
    }

    #[test]
    fn factory_rejects_unknown_backend() {
        assert!(create_vector_index("quantum", 8).is_err());
    }

    #[test]
    fn factory_builds_brute_force_by_default() {
        let index = create_vector_index("brute_force", 8).unwrap();
        assert_eq!(index.backend_tag(), "brute_force");
    }
}
