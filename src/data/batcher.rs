// ============================================================
// Layer 4: Siamese Batcher
// ============================================================
// Implements burn's Batcher trait to stack SiameseSamples
// into device tensors.
//
//   Input:  N samples, queries padded to Q, code padded to C
//   Output: SiameseBatch with
//             languages     [N]      Int
//             similarity    [N]      Float
//             query_tokens  [N, Q]   Int   query_mask [N, Q]
//             code_tokens   [N, C]   Int   code_mask  [N, C]
//
// Every sample of a split is padded to the same length when
// it is encoded, so batching is a flatten + reshape.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::SiameseSample;
use crate::tokenizer::EncodedBatch;

#[derive(Debug, Clone)]
pub struct SiameseBatch<B: Backend> {
    pub languages:    Tensor<B, 1, Int>,
    pub similarity:   Tensor<B, 1>,
    pub query_tokens: Tensor<B, 2, Int>,
    /// 1 = real token, 0 = padding
    pub query_mask:   Tensor<B, 2, Int>,
    pub code_tokens:  Tensor<B, 2, Int>,
    pub code_mask:    Tensor<B, 2, Int>,
}

impl<B: Backend> SiameseBatch<B> {
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            languages:    self.languages.to_device(device),
            similarity:   self.similarity.to_device(device),
            query_tokens: self.query_tokens.to_device(device),
            query_mask:   self.query_mask.to_device(device),
            code_tokens:  self.code_tokens.to_device(device),
            code_mask:    self.code_mask.to_device(device),
        }
    }

    pub fn len(&self) -> usize {
        self.languages.dims()[0]
    }
}

#[derive(Clone, Debug)]
pub struct SiameseBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> SiameseBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Stack equal-length id rows into a `[rows, len]` Int tensor.
pub fn ids_tensor<B: Backend>(rows: &[Vec<u32>], device: &B::Device) -> Tensor<B, 2, Int> {
    let n = rows.len();
    let len = rows.first().map_or(0, Vec::len);
    let flat: Vec<i32> = rows.iter().flat_map(|r| r.iter().map(|&x| x as i32)).collect();
    Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([n, len])
}

/// Token and mask tensors for an encoded batch.
pub fn encoded_tensors<B: Backend>(
    batch: &EncodedBatch,
    device: &B::Device,
) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
    (ids_tensor(&batch.ids, device), ids_tensor(&batch.masks, device))
}

impl<B: Backend> Batcher<SiameseSample, SiameseBatch<B>> for SiameseBatcher<B> {
    fn batch(&self, items: Vec<SiameseSample>) -> SiameseBatch<B> {
        let languages: Vec<i32> = items.iter().map(|s| s.language as i32).collect();
        let similarity: Vec<f32> = items.iter().map(|s| s.similarity).collect();

        let query_ids: Vec<Vec<u32>> = items.iter().map(|s| s.query_ids.clone()).collect();
        let query_mask: Vec<Vec<u32>> = items.iter().map(|s| s.query_mask.clone()).collect();
        let code_ids: Vec<Vec<u32>> = items.iter().map(|s| s.code_ids.clone()).collect();
        let code_mask: Vec<Vec<u32>> = items.iter().map(|s| s.code_mask.clone()).collect();

        SiameseBatch {
            languages:    Tensor::<B, 1, Int>::from_ints(languages.as_slice(), &self.device),
            similarity:   Tensor::<B, 1>::from_floats(similarity.as_slice(), &self.device),
            query_tokens: ids_tensor(&query_ids, &self.device),
            query_mask:   ids_tensor(&query_mask, &self.device),
            code_tokens:  ids_tensor(&code_ids, &self.device),
            code_mask:    ids_tensor(&code_mask, &self.device),
        }
    }
}
