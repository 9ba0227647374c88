use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Offline feature-hashing embedder. Documents and queries go through the
/// same path, so both land in one space and distances between them are
/// meaningful. Output vectors are unit length (or all zeros for text
/// without words).
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        for word in words(text) {
            let (bucket, sign) = self.bucket_for(&word);
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, word: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        word.hash(&mut hasher);
        let hash = hasher.finish();
        let bucket = (hash as usize) % self.dimensions();
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn vectors_have_fixed_dimensions_and_unit_norm() {
        let embedder = HashEmbedder::new(HashEmbedderConfig { dimensions: 32, seed: 7 });
        let v = embedder.embed_text("The hamlet has 1,555 residents.");
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.embed_text("").len(), 32);
    }

    #[test]
    fn punctuation_and_case_do_not_change_embedding() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_eq!(
            embedder.embed_text("Community Demographics"),
            embedder.embed_text("community, demographics!")
        );
    }

    #[test]
    fn shared_words_bring_vectors_closer() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let doc = embedder.embed_text("hamlet residents population census");
        let near = embedder.embed_text("hamlet residents population");
        let far = embedder.embed_text("budget spreadsheet invoice");
        assert!(squared_distance(&doc, &near) < squared_distance(&doc, &far));
    }
}
