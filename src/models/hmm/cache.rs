use std::sync::{Arc, RwLock};

use fnv::FnvHashMap;

use crate::distortion::DistortProbTable;
use crate::models::hmm::state::StateFamily;
use crate::models::hmm::trellis::WaTrellis;

/// Cache of trellises keyed by English sentence length, shared by every
/// sentence of the same length within one iteration.
///
/// Transition weights bake in the distortion parameters, so the cache must
/// be cleared exactly once per parameter swap; a stale entry would silently
/// keep using out-of-date weights. Lengths above the cutoff are built but
/// not retained, bounding memory on very long sentences.
#[derive(Debug)]
pub struct TrellisCache {
    max_cached_length: usize,
    cache: RwLock<FnvHashMap<usize, Arc<WaTrellis>>>,
}

impl TrellisCache {
    pub fn new(max_cached_length: usize) -> Self {
        Self {
            max_cached_length,
            cache: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn get_or_create(
        &self,
        family: StateFamily,
        i_len: usize,
        null_prob: f64,
        distort: &DistortProbTable,
    ) -> Arc<WaTrellis> {
        if let Some(trellis) = self.cache.read().unwrap().get(&i_len) {
            return Arc::clone(trellis);
        }
        let trellis = Arc::new(WaTrellis::new(family, i_len, null_prob, distort));
        if i_len <= self.max_cached_length {
            self.cache
                .write()
                .unwrap()
                .insert(i_len, Arc::clone(&trellis));
        }
        trellis
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.write().unwrap().clear();
    }
}
