use std::sync::Arc;

use hashbrown::HashSet;
use tokio::sync::RwLock;

use crate::wire::Value;

/// Every value this node has ever seen. Values are only ever added.
///
/// Can be cloned to obtain another handle to the same set.
#[derive(Clone, Default)]
pub struct KnownValues {
    values: Arc<RwLock<HashSet<Value>>>,
}

impl KnownValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, value: Value) -> bool {
        self.values.read().await.contains(&value)
    }

    /// Inserts `value`, returning whether it was absent. Of any number of
    /// concurrent `add`s of the same value exactly one returns `true`.
    pub async fn add(&self, value: Value) -> bool {
        self.values.write().await.insert(value)
    }

    /// Inserts every value under one write lock and returns the ones that were
    /// new, in input order.
    pub async fn add_all(&self, values: &[Value]) -> Vec<Value> {
        let mut known = self.values.write().await;
        values
            .iter()
            .copied()
            .filter(|value| known.insert(*value))
            .collect()
    }

    /// Copies the current contents out.
    pub async fn snapshot(&self) -> Vec<Value> {
        self.values.read().await.iter().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}
