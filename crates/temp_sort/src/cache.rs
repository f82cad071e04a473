//! Point lookups over a sorted [`Temp`] with a chunk-level LRU cache.

use crate::{Temp, TempEntry, TempSortError};
use cling_core::marshal::MarshalReader;
use std::collections::{HashMap, VecDeque};

/// Chunk-level cache for keyed lookups in a sorted sequence.
///
/// The extraction function must yield keys in the same order the
/// sequence is sorted by; the cache locates the chunk whose first key
/// covers a lookup, materialises that chunk into a map, and evicts
/// whole chunks LRU-first once more than `max_chunks_in_cache` are
/// resident.
pub struct TempCache<'a, T, F>
where
    T: TempEntry + Clone,
    F: Fn(&T) -> Vec<u8>,
{
    temp: &'a Temp<T>,
    key_fn: F,
    first_keys: Vec<Vec<u8>>,
    resident: HashMap<usize, HashMap<Vec<u8>, T>>,
    lru: VecDeque<usize>,
    max_chunks_in_cache: usize,
    misses: u64,
}

impl<'a, T, F> TempCache<'a, T, F>
where
    T: TempEntry + Clone,
    F: Fn(&T) -> Vec<u8>,
{
    /// Build a cache over `temp`. Reads the first entry of every
    /// chunk once to learn the chunk key ranges.
    pub fn new(
        temp: &'a Temp<T>,
        key_fn: F,
        max_chunks_in_cache: usize,
    ) -> Result<Self, TempSortError> {
        let mut first_keys = Vec::with_capacity(temp.chunk_count());
        for index in 0..temp.chunk_count() {
            let plaintext = temp.read_chunk_raw(index)?;
            let mut r = MarshalReader::new(&plaintext);
            let first = T::unmarshal(&mut r)?;
            first_keys.push(key_fn(&first));
        }
        Ok(Self {
            temp,
            key_fn,
            first_keys,
            resident: HashMap::new(),
            lru: VecDeque::new(),
            max_chunks_in_cache: max_chunks_in_cache.max(1),
            misses: 0,
        })
    }

    /// Look up the entry with exactly this key, if present.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<T>, TempSortError> {
        // The covering chunk is the last one whose first key is <= key.
        let after = self.first_keys.partition_point(|first| first.as_slice() <= key);
        if after == 0 {
            return Ok(None);
        }
        let index = after - 1;
        if !self.resident.contains_key(&index) {
            self.materialise(index)?;
        }
        self.touch(index);
        Ok(self.resident[&index].get(key).cloned())
    }

    /// How many chunk materialisations lookups have forced.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn materialise(&mut self, index: usize) -> Result<(), TempSortError> {
        self.misses += 1;
        let plaintext = self.temp.read_chunk_raw(index)?;
        let mut entries = HashMap::new();
        let mut r = MarshalReader::new(&plaintext);
        while r.remaining() > 0 {
            let entry = T::unmarshal(&mut r)?;
            entries.insert((self.key_fn)(&entry), entry);
        }
        self.resident.insert(index, entries);
        while self.resident.len() > self.max_chunks_in_cache {
            if let Some(evicted) = self.lru.pop_front() {
                self.resident.remove(&evicted);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn touch(&mut self, index: usize) {
        if let Some(pos) = self.lru.iter().position(|&i| i == index) {
            self.lru.remove(pos);
        }
        self.lru.push_back(index);
    }
}
