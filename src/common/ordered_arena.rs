use std::collections::HashMap;
use std::hash::Hash;

/// Stable-id storage that remembers insertion order.
///
/// Removal reports the slot the value occupied, so that undoing a deletion
/// puts the value back exactly where it was.
#[derive(Clone, Debug)]
pub struct OrderedArena<K, V> {
    order: Vec<K>,
    values: HashMap<K, V>,
}

impl<K, V> Default for OrderedArena<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, V> OrderedArena<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.values.get_mut(key)
    }

    pub fn position(&self, key: &K) -> Option<usize> {
        self.order.iter().position(|k| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.order.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.order
            .iter()
            .flat_map(|k| self.values.get(k).map(|v| (*k, v)))
    }

    pub fn push(&mut self, key: K, value: V) {
        if self.values.insert(key, value).is_none() {
            self.order.push(key);
        }
    }

    /// Inserts at `index`, clamped to the current length.
    pub fn insert_at(&mut self, index: usize, key: K, value: V) {
        if self.values.insert(key, value).is_none() {
            let index = index.min(self.order.len());
            self.order.insert(index, key);
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<(usize, V)> {
        let value = self.values.remove(key)?;
        let index = self.position(key)?;
        self.order.remove(index);
        Some((index, value))
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.values.clear();
    }
}
