use std::{collections::HashMap, hash::Hash};

use generational_arena::{Arena, Index};

#[derive(Debug)]
pub(crate) struct Node<K> {
  key: K,
  weight: u64,
  next: Option<Index>,
  prev: Option<Index>,
}

/// A weighted LRU list. Nodes live in an arena and are linked by index.
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index, ahash::RandomState>,
  // Head is the most-recently-used item.
  head: Option<Index>,
  // Tail is the least-recently-used item.
  tail: Option<Index>,
  total_weight: u64,
}

impl<K: Eq + Hash + Clone> Default for LruList<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub(crate) fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::default(),
      head: None,
      tail: None,
      total_weight: 0,
    }
  }

  // Unlinks a node from the list without freeing it.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  // Links an arena node in as the new head.
  fn link_front(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old) = old_head {
      self.nodes[old].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  pub(crate) fn total_weight(&self) -> u64 {
    self.total_weight
  }

  /// Inserts `key` at the head, or moves it there and updates its weight if it
  /// is already present.
  pub(crate) fn push_front(&mut self, key: K, weight: u64) {
    if let Some(&index) = self.lookup.get(&key) {
      let old = std::mem::replace(&mut self.nodes[index].weight, weight);
      self.total_weight = self.total_weight.saturating_sub(old).saturating_add(weight);
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
      return;
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      weight,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.total_weight = self.total_weight.saturating_add(weight);
    self.link_front(index);
  }

  /// Moves `key` to the head. Returns `false` if it is not in the list.
  pub(crate) fn touch(&mut self, key: &K) -> bool {
    match self.lookup.get(key) {
      Some(&index) => {
        if self.head != Some(index) {
          self.unlink(index);
          self.link_front(index);
        }
        true
      }
      None => false,
    }
  }

  /// The least-recently-used key, without removing it.
  pub(crate) fn peek_back(&self) -> Option<&K> {
    self.tail.map(|index| &self.nodes[index].key)
  }

  pub(crate) fn pop_back(&mut self) -> Option<(K, u64)> {
    let tail = self.tail?;
    self.unlink(tail);
    let node = self.nodes.remove(tail)?;
    self.lookup.remove(&node.key);
    self.total_weight = self.total_weight.saturating_sub(node.weight);
    Some((node.key, node.weight))
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<u64> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    let node = self.nodes.remove(index)?;
    self.total_weight = self.total_weight.saturating_sub(node.weight);
    Some(node.weight)
  }

  pub(crate) fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
    self.total_weight = 0;
  }

  #[cfg(test)]
  pub(crate) fn weight_of(&self, key: &K) -> Option<u64> {
    self.lookup.get(key).map(|&index| self.nodes[index].weight)
  }

  // Keys from head to tail.
  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn new_list_is_empty() {
    let list = LruList::<i32>::new();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.total_weight(), 0);
    assert!(!list.contains(&123));
    assert_eq!(list.peek_back(), None);
  }

  #[test]
  fn push_front_orders_newest_first() {
    let mut list = LruList::new();
    list.push_front(10, 5);
    list.push_front(20, 2);
    assert_eq!(list.total_weight(), 7);
    assert_eq!(list.keys_as_vec(), vec![20, 10]);
    assert_eq!(list.peek_back(), Some(&10));
  }

  #[test]
  fn push_front_existing_item_moves_and_reweighs() {
    let mut list = LruList::new();
    list.push_front(1, 10);
    list.push_front(2, 20);
    list.push_front(3, 1);

    list.push_front(1, 5);
    assert_eq!(list.total_weight(), 26);
    assert_eq!(list.weight_of(&1), Some(5));
    assert_eq!(list.len(), 3);
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
  }

  #[test]
  fn touch_moves_to_front_without_reweighing() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 1);
    list.push_front(3, 1);
    assert!(list.touch(&1));
    assert!(!list.touch(&99));
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
    assert_eq!(list.total_weight(), 3);
  }

  #[test]
  fn pop_back_returns_lru_until_empty() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 2);
    list.push_front(3, 3);

    assert_eq!(list.pop_back(), Some((1, 1)));
    assert_eq!(list.total_weight(), 5);
    assert!(!list.contains(&1));
    assert_eq!(list.keys_as_vec(), vec![3, 2]);

    assert_eq!(list.pop_back(), Some((2, 2)));
    assert_eq!(list.pop_back(), Some((3, 3)));
    assert_eq!(list.pop_back(), None);
    assert_eq!(list.total_weight(), 0);
  }

  #[test]
  fn remove_from_middle_and_missing() {
    let mut list = LruList::new();
    list.push_front(1, 1);
    list.push_front(2, 2);
    list.push_front(3, 3);

    assert_eq!(list.remove(&2), Some(2));
    assert_eq!(list.remove(&99), None);
    assert_eq!(list.total_weight(), 4);
    assert_eq!(list.keys_as_vec(), vec![3, 1]);
  }

  #[test]
  fn clear_resets_list() {
    let mut list = LruList::new();
    list.push_front(1, 10);
    list.push_front(2, 20);
    list.clear();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.total_weight(), 0);
    assert!(!list.contains(&1));

    // Still usable after clearing.
    list.push_front(4, 4);
    assert_eq!(list.keys_as_vec(), vec![4]);
  }
}
