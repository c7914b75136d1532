//! Layer-0 user and item embeddings.
//!
//! Input embeddings are pretrained and fed into every forward pass; they are
//! not model parameters and are never updated by the optimizer. A store is
//! persisted as safetensors with two tensors, `user` and `item`.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::collections::HashMap;
use std::path::Path;

const USER_KEY: &str = "user";
const ITEM_KEY: &str = "item";

/// Dense `(users, latdim)` and `(items, latdim)` input embeddings.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    users: Tensor,
    items: Tensor,
}

impl EmbeddingStore {
    pub fn new(users: Tensor, items: Tensor) -> Result<Self> {
        let (_, du) = users.dims2()?;
        let (_, di) = items.dims2()?;
        if du != di {
            return Err(Error::DimensionMismatch {
                context: "embedding width",
                expected: du,
                got: di,
            });
        }
        Ok(Self {
            users: users.to_dtype(DType::F32)?,
            items: items.to_dtype(DType::F32)?,
        })
    }

    /// Xavier-uniform embeddings from a seeded generator.
    pub fn random(
        user_count: usize,
        item_count: usize,
        latdim: usize,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let mut fill = |rows: usize| -> Result<Tensor> {
            let bound = (6.0 / (rows + latdim).max(1) as f32).sqrt();
            let data: Vec<f32> = (0..rows * latdim)
                .map(|_| rng.gen_range(-bound..=bound))
                .collect();
            Ok(Tensor::from_vec(data, (rows, latdim), device)?)
        };
        let users = fill(user_count)?;
        let items = fill(item_count)?;
        Ok(Self { users, items })
    }

    /// Load from a safetensors file holding `user` and `item`.
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, device)?;
        let mut take = |key: &str| {
            tensors.remove(key).ok_or_else(|| {
                Error::InvalidConfig(format!("{} has no `{key}` tensor", path.display()))
            })
        };
        let users = take(USER_KEY)?;
        let items = take(ITEM_KEY)?;
        Self::new(users, items)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors = HashMap::from([
            (USER_KEY.to_string(), self.users.clone()),
            (ITEM_KEY.to_string(), self.items.clone()),
        ]);
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.dims()[0]
    }

    pub fn item_count(&self) -> usize {
        self.items.dims()[0]
    }

    pub fn latdim(&self) -> usize {
        self.users.dims()[1]
    }

    pub fn device(&self) -> &Device {
        self.users.device()
    }

    /// Rows for the given global user ids, in order.
    pub fn gather_users(&self, ids: &[usize]) -> Result<Tensor> {
        gather(&self.users, ids, "user embeddings")
    }

    /// Rows for the given global item ids, in order.
    pub fn gather_items(&self, ids: &[usize]) -> Result<Tensor> {
        gather(&self.items, ids, "item embeddings")
    }
}

fn gather(table: &Tensor, ids: &[usize], context: &'static str) -> Result<Tensor> {
    let rows = table.dims()[0];
    if let Some(&bad) = ids.iter().find(|&&i| i >= rows) {
        return Err(mbrec_core::Error::IndexOutOfBounds {
            index: bad,
            bound: rows,
            context,
        }
        .into());
    }
    let index = crate::model::ids_tensor(ids, table.device())?;
    Ok(table.index_select(&index, 0)?)
}
