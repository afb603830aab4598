//! Key comparison utilities.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::types::InternalKey;

/// Trait for comparing user keys.
///
/// The name is persisted in the MANIFEST; a database must always be reopened
/// with a comparator of the same name.
pub trait Comparator: Send + Sync {
    /// Compare two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Get the name of this comparator.
    fn name(&self) -> &str;

    /// Find the shortest separator between two keys.
    ///
    /// Returns a key `sep` such that `start <= sep < limit`.
    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8>;

    /// Find the shortest successor for a key.
    ///
    /// Returns a key `succ` such that `key <= succ`.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8>;
}

/// Default bytewise comparator (lexicographic ordering).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl BytewiseComparator {
    /// Create a new bytewise comparator.
    pub fn new() -> Self {
        Self
    }
}

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let min_len = start.len().min(limit.len());
        let diff_index = start
            .iter()
            .zip(limit)
            .take_while(|(a, b)| a == b)
            .count();

        if diff_index >= min_len {
            // One key is a prefix of the other.
            return start.to_vec();
        }

        let diff_byte = start[diff_index];
        if diff_byte < 0xFF && diff_byte + 1 < limit[diff_index] {
            let mut result = start[..=diff_index].to_vec();
            result[diff_index] += 1;
            return result;
        }

        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        match key.iter().position(|&b| b != 0xFF) {
            Some(i) => {
                let mut result = key[..=i].to_vec();
                result[i] += 1;
                result
            }
            // All bytes are 0xFF.
            None => key.to_vec(),
        }
    }
}

/// Bytewise ordering reversed. Useful for descending key spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseBytewiseComparator;

impl Comparator for ReverseBytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    fn name(&self) -> &str {
        "manifestdb.ReverseBytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], _limit: &[u8]) -> Vec<u8> {
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        key.to_vec()
    }
}

/// Orders internal keys.
///
/// Internal keys are compared by:
/// 1. User key, ascending by the user comparator
/// 2. Sequence number, descending (newer first)
/// 3. Value type, descending
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    /// Wrap a user comparator.
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        Self { user_comparator }
    }

    /// Get the user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }

    /// Compare two internal keys.
    pub fn compare(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.user_comparator
            .compare(a.user_key(), b.user_key())
            .then_with(|| a.cmp_trailer(b))
    }

    /// Compare the user portions of two keys.
    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user_comparator.compare(a, b)
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user_comparator", &self.user_comparator.name())
            .finish()
    }
}
