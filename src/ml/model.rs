// ============================================================
// Layer 5: Query/Code Siamese Encoder
// ============================================================
// One transformer encoder shared by queries and code. Code
// inputs additionally receive a language embedding, added to
// every position, so a single set of weights serves all
// languages.
//
//   tokens [B, S] ─► token emb + position emb (+ language emb)
//                 ─► N × EncoderBlock (padding masked out)
//                 ─► LayerNorm
//                 ─► masked mean over real positions
//                 ─► Linear ─► embedding [B, E]
//
// Training objective: for a batch of B pairs the score matrix
// is query·codeᵀ [B, B]. Row i should peak at column i, so the
// per-sample loss is -log_softmax(scores)[i, i], weighted by
// the pair's similarity label.

use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_softmax},
};

use crate::data::batcher::SiameseBatch;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally; do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct QueryCodeSiameseConfig {
    pub vocab_size:    usize,
    pub n_langs:       usize,
    pub max_seq_len:   usize,
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    pub dropout:       f64,
    pub embedding_dim: usize,
}

impl QueryCodeSiameseConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QueryCodeSiamese<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let lang_embedding     = EmbeddingConfig::new(self.n_langs.max(1), self.d_model).init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let projection = LinearConfig::new(self.d_model, self.embedding_dim).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        QueryCodeSiamese {
            token_embedding, position_embedding, lang_embedding, layers,
            final_norm, projection, dropout,
            max_seq_len: self.max_seq_len,
            d_model:     self.d_model,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true at padding positions.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone()).mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct QueryCodeSiamese<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub lang_embedding:     Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub projection:         Linear<B>,
    pub dropout:            Dropout,
    pub max_seq_len:        usize,
    pub d_model:            usize,
}

/// Result of one forward pass over a batch of pairs.
pub struct SiameseOutput<B: Backend> {
    /// Mean of `per_sample`, shape [1]
    pub loss:       Tensor<B, 1>,
    pub per_sample: Tensor<B, 1>,
    /// query·codeᵀ, shape [batch, batch]
    pub scores:     Tensor<B, 2>,
}

impl<B: Backend> QueryCodeSiamese<B> {
    /// tokens, mask: [batch, seq_len] → [batch, embedding_dim]
    pub fn encode_query(&self, tokens: Tensor<B, 2, Int>, mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.encode(tokens, mask, None)
    }

    /// Like `encode_query`, with the language id of each row mixed in.
    pub fn encode_code(
        &self,
        languages: Tensor<B, 1, Int>,
        tokens:    Tensor<B, 2, Int>,
        mask:      Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        self.encode(tokens, mask, Some(languages))
    }

    fn encode(
        &self,
        tokens:    Tensor<B, 2, Int>,
        mask:      Tensor<B, 2, Int>,
        languages: Option<Tensor<B, 1, Int>>,
    ) -> Tensor<B, 2> {
        let [batch_size, seq_len] = tokens.dims();
        let device = tokens.device();
        let d_model = self.d_model;

        let tok_emb = self.token_embedding.forward(tokens);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let mut x = tok_emb + self.position_embedding.forward(positions);

        if let Some(languages) = languages {
            let lang_emb = self
                .lang_embedding
                .forward(languages.reshape([batch_size, 1]))
                .expand([batch_size, seq_len, d_model]);
            x = x + lang_emb;
        }

        let mut x = self.dropout.forward(x);
        let pad_mask = mask.clone().equal_elem(0);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]

        // Masked mean: padding contributes nothing, empty rows divide by 1.
        let weights = mask.float().reshape([batch_size, seq_len, 1]);
        let counts = weights.clone().sum_dim(1).clamp_min(1.0).expand([batch_size, 1, d_model]);
        let summed = (x * weights.expand([batch_size, seq_len, d_model])).sum_dim(1);
        let pooled = (summed / counts).reshape([batch_size, d_model]);

        self.projection.forward(pooled)
    }

    pub fn forward(&self, batch: SiameseBatch<B>) -> SiameseOutput<B> {
        let query = self.encode_query(batch.query_tokens, batch.query_mask);
        let code  = self.encode_code(batch.languages, batch.code_tokens, batch.code_mask);
        let scores = query.matmul(code.transpose());
        let (loss, per_sample) = siamese_loss(scores.clone(), batch.similarity);
        SiameseOutput { loss, per_sample, scores }
    }
}

/// Softmax cross-entropy with the diagonal as target, weighted per row.
///
/// Returns (mean loss [1], per-sample loss [batch]).
pub fn siamese_loss<B: Backend>(scores: Tensor<B, 2>, similarity: Tensor<B, 1>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch_size, _] = scores.dims();
    let device = scores.device();
    let targets = Tensor::<B, 1, Int>::arange(0..batch_size as i64, &device).reshape([batch_size, 1]);
    let log_probs = log_softmax(scores, 1);
    let diagonal = log_probs.gather(1, targets).reshape([batch_size]);
    let per_sample = diagonal.neg() * similarity;
    (per_sample.clone().mean(), per_sample)
}

/// Mean reciprocal rank of the diagonal entry in each row of a
/// row-major `n × n` score matrix. Ties count against the true pair.
pub fn mean_reciprocal_rank(scores: &[f32], n: usize) -> f64 {
    if n == 0 || scores.len() < n * n {
        return 0.0;
    }
    let total: f64 = (0..n)
        .map(|i| {
            let row = &scores[i * n..(i + 1) * n];
            let target = row[i];
            let rank = 1 + row
                .iter()
                .enumerate()
                .filter(|&(j, &s)| j != i && s >= target)
                .count();
            1.0 / rank as f64
        })
        .sum();
    total / n as f64
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn config() -> QueryCodeSiameseConfig {
        QueryCodeSiameseConfig::new(32, 3, 8, 16, 2, 1, 32, 0.0, 12)
    }

    #[test]
    fn test_embedding_shapes() {
        let device = Default::default();
        let model: QueryCodeSiamese<TestBackend> = config().init(&device);
        let tokens = Tensor::<TestBackend, 1, Int>::from_ints([4, 5, 6, 0, 7, 8, 0, 0], &device).reshape([2, 4]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 1, 0, 1, 1, 0, 0], &device).reshape([2, 4]);
        let langs = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device);

        assert_eq!(model.encode_query(tokens.clone(), mask.clone()).dims(), [2, 12]);
        assert_eq!(model.encode_code(langs, tokens, mask).dims(), [2, 12]);
    }

    #[test]
    fn test_padding_does_not_change_embedding() {
        let device = Default::default();
        let model: QueryCodeSiamese<TestBackend> = config().init(&device);
        let short = model.encode_query(
            Tensor::<TestBackend, 1, Int>::from_ints([4, 5, 0, 0], &device).reshape([1, 4]),
            Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 0, 0], &device).reshape([1, 4]),
        );
        let other_pad = model.encode_query(
            Tensor::<TestBackend, 1, Int>::from_ints([4, 5, 9, 9], &device).reshape([1, 4]),
            Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 0, 0], &device).reshape([1, 4]),
        );
        let a = short.into_data().to_vec::<f32>().unwrap();
        let b = other_pad.into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }

    #[test]
    fn test_loss_prefers_diagonal() {
        let device = Default::default();
        let sim = Tensor::<TestBackend, 1>::from_floats([1.0, 1.0], &device);
        let good = Tensor::<TestBackend, 1>::from_floats([5.0, 0.0, 0.0, 5.0], &device).reshape([2, 2]);
        let bad = Tensor::<TestBackend, 1>::from_floats([0.0, 5.0, 5.0, 0.0], &device).reshape([2, 2]);
        let (good_loss, per_sample) = siamese_loss(good, sim.clone());
        let (bad_loss, _) = siamese_loss(bad, sim);
        assert_eq!(per_sample.dims(), [2]);
        assert!(good_loss.into_scalar() < bad_loss.into_scalar());
    }

    #[test]
    fn test_zero_similarity_zeroes_loss() {
        let device = Default::default();
        let scores = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], &device).reshape([2, 2]);
        let sim = Tensor::<TestBackend, 1>::from_floats([0.0, 0.0], &device);
        let (loss, _) = siamese_loss(scores, sim);
        assert_eq!(loss.into_scalar(), 0.0);
    }

    #[test]
    fn test_mean_reciprocal_rank() {
        // row 0: diagonal best → 1; row 1: diagonal second → 1/2
        let scores = [0.9, 0.1, 0.8, 0.3];
        assert!((mean_reciprocal_rank(&scores, 2) - 0.75).abs() < 1e-9);
        assert_eq!(mean_reciprocal_rank(&[], 0), 0.0);
    }
}
