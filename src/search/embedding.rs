//! Embedding providers
//!
//! The engine treats embedding generation as an external collaborator: text
//! in, fixed-length vector (or a failure) out. Two providers ship:
//!
//! - [`HtpEmbedder`]: Harmonic Token Projection, a deterministic,
//!   training-free embedding computed locally
//!   (<https://arxiv.org/html/2511.20665>)
//! - [`OpenAiEmbedder`](super::openai::OpenAiEmbedder): the OpenAI
//!   embeddings endpoint

use anyhow::{bail, Result};
use std::f64::consts::PI;

use super::openai::OpenAiEmbedder;
use crate::core::config::EmbeddingConfig;

/// Anything that can turn text into a fixed-dimension vector.
pub trait EmbeddingProvider {
    /// Model identifier reported in stats and logs.
    fn model_name(&self) -> &str;
    /// Dimension of every vector returned by [`embed`](Self::embed).
    fn dims(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn dims(&self) -> usize {
        (**self).dims()
    }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

/// Build the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider + Send>> {
    match config.provider.as_str() {
        "htp" => Ok(Box::new(HtpEmbedder::new())),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {} (expected htp or openai)", other),
    }
}

/// Embedding dimension of the HTP model (2 * number of coprime moduli)
pub const HTP_DIMS: usize = 384;

const NUM_MODULI: usize = HTP_DIMS / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// First NUM_MODULI primes, pairwise coprime by construction
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// Local Harmonic Token Projection embedder.
///
/// Identifiers such as `parse_config` are split into sub-words so that code
/// names and prose queries share tokens.
pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    /// Mean of the token projections, L2-normalized.
    ///
    /// Text without any token embeds to the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);

        if tokens.is_empty() {
            return vec![0.0; HTP_DIMS];
        }

        let mut sum = vec![0.0f64; HTP_DIMS];
        for token in &tokens {
            for (i, val) in self.embed_token(token).iter().enumerate() {
                sum[i] += val;
            }
        }
        for val in &mut sum {
            *val /= tokens.len() as f64;
        }

        let norm: f64 = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        }
    }

    /// E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)] with r_i = N mod m_i
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut embedding = Vec::with_capacity(HTP_DIMS);
        for &m in &self.moduli {
            let theta = 2.0 * PI * ((n % m) as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }
        embedding
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HtpEmbedder {
    fn model_name(&self) -> &str {
        "htp"
    }

    fn dims(&self) -> usize {
        HTP_DIMS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

/// N = Σ u_j * B^(L-j) where B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Lowercased words; snake_case and camelCase identifiers are split.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '_')) {
        for part in word.split('_') {
            let mut current = String::new();
            let mut prev_lower = false;
            for c in part.chars() {
                if c.is_uppercase() && prev_lower && !current.is_empty() {
                    tokens.push(current.to_lowercase());
                    current.clear();
                }
                prev_lower = c.is_lowercase() || c.is_ascii_digit();
                current.push(c);
            }
            if !current.is_empty() {
                tokens.push(current.to_lowercase());
            }
        }
    }
    tokens
}

/// Cosine similarity accumulated in f64 and clamped to [-1, 1].
///
/// Zero-norm or differently sized inputs have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot / (norm_a * norm_b).sqrt()).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// `1 - cosine_similarity`, the metric the store orders by.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_htp_basic() {
        let model = HtpEmbedder::new();

        let emb1 = model.embed("hello world").unwrap();
        let emb2 = model.embed("hello world").unwrap();
        let emb3 = model.embed("goodbye moon").unwrap();

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), HTP_DIMS);
        assert_eq!(model.dims(), HTP_DIMS);
    }

    #[test]
    fn test_htp_normalized() {
        let model = HtpEmbedder::new();
        let emb = model.embed("def load_table_config(path)").unwrap();
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let emb = HtpEmbedder::new().embed("  ...  ").unwrap();
        assert!(emb.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_tokenize_identifiers() {
        assert_eq!(tokenize("load_table_config"), vec!["load", "table", "config"]);
        assert_eq!(tokenize("ConfigurableTableSearch"), vec!["configurable", "table", "search"]);
        assert_eq!(tokenize("search(query, limit=5)"), vec!["search", "query", "limit", "5"]);
    }

    #[test]
    fn test_shared_tokens_score_higher() {
        let model = HtpEmbedder::new();
        let query = model.embed("load table config").unwrap();
        let related = model.embed("def load_table_config(config_path)").unwrap();
        let unrelated = model.embed("render html chart").unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-12);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-12);

        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_self_similarity_is_exact() {
        let v = vec![0.3, -1.7, 2.2, 0.01, 9.5];
        assert_eq!(cosine_similarity(&v, &v), 1.0);
        assert_eq!(cosine_distance(&v, &v), 0.0);
    }

    #[test]
    fn test_create_provider() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "htp");
        assert_eq!(provider.dims(), HTP_DIMS);

        let bad = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&bad).is_err());
    }
}
