use dt_tensor::{Result, Tensor, TensorError};
use std::fmt;

/// A token-embedding table: a `[vocab, dim]` weight matrix whose rows are
/// looked up by token id.
///
/// Lookups return borrowed row views of the weight tensor, so no data is
/// copied and the vectors stay valid for the lifetime of the table.
#[derive(Debug)]
pub struct Embedding {
    weights: Tensor,
}

impl Embedding {
    /// Wraps an existing `[vocab, dim]` weight tensor.
    pub fn new(weights: Tensor) -> Result<Self> {
        if weights.shape().ndim() != 2 {
            return Err(TensorError::RankMismatch {
                expected: 2,
                got: weights.shape().ndim(),
            });
        }
        Ok(Embedding { weights })
    }

    /// Returns the embedding vector for `id` as a 1-D row view.
    pub fn lookup(&self, id: usize) -> Result<Tensor> {
        self.weights.row(id)
    }

    /// Number of entries in the table.
    pub fn vocab_size(&self) -> usize {
        self.weights.shape().dim(0)
    }

    /// Width of each embedding vector.
    pub fn dim(&self) -> usize {
        self.weights.shape().dim(1)
    }

    /// The underlying weight tensor.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }
}

impl fmt::Display for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Embedding(")?;
        for id in 0..self.vocab_size() {
            match self.weights.row(id) {
                Ok(row) => writeln!(f, "{}", row)?,
                Err(e) => writeln!(f, "<row {}: {}>", id, e)?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dt_tensor::{DType, HostAllocator};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table() -> Embedding {
        let weights = Tensor::from_f32(
            &HostAllocator::new(),
            DType::F32,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &[3, 2],
        )
        .unwrap();
        Embedding::new(weights).unwrap()
    }

    #[test]
    fn test_lookup_returns_row_view() {
        let emb = table();
        assert_eq!(emb.vocab_size(), 3);
        assert_eq!(emb.dim(), 2);

        let v = emb.lookup(1).unwrap();
        assert_eq!(v.shape().dims(), &[2]);
        assert!(!v.owns_buffer());
        assert_eq!(v.at(&[0]).unwrap(), 3.0);
        assert_eq!(v.at(&[1]).unwrap(), 4.0);
    }

    #[test]
    fn test_lookup_out_of_vocab() {
        let emb = table();
        assert!(emb.lookup(3).is_err());
    }

    #[test]
    fn test_new_rejects_non_matrix() {
        let weights = Tensor::new(&HostAllocator::new(), DType::F32, &[4]).unwrap();
        assert!(matches!(
            Embedding::new(weights),
            Err(TensorError::RankMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_random_table_rows_within_bound() {
        let mut rng = StdRng::seed_from_u64(11);
        let weights =
            Tensor::random(&HostAllocator::new(), &mut rng, DType::F32, &[5, 4]).unwrap();
        let emb = Embedding::new(weights).unwrap();
        let bound = 1.0 / (4f32).sqrt();
        let v = emb.lookup(2).unwrap();
        for i in 0..4 {
            assert!(v.at(&[i]).unwrap().abs() <= bound + 1e-6);
        }
    }

    #[test]
    fn test_display_lists_rows() {
        let emb = table();
        let s = emb.to_string();
        assert!(s.starts_with("Embedding("));
        assert!(s.contains("values=[1,2]"));
        assert!(s.contains("values=[5,6]"));
    }
}
