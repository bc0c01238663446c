// Uncompressed dedup data array: every stored entry is a full
// `line_size`-byte line, deduplicated by content hash but never
// BDI-compressed. Simpler than `data_bdi.rs` since every entry is the same
// size, so there is no segment allocator — only a flat free list plus
// counter-minimizing random sampling when the set is full, the same
// free-list-first-then-`k`-way-random-sample discipline as
// `ApproximateDedupDataArray::preinsert`.

use rand::Rng;

use crate::tag::TagId;

#[derive(Debug, Clone)]
pub struct DataEntry {
	pub bytes: Vec<u8>,
	/// Number of tag entries referencing this data entry.
	pub counter: u32,
	pub hash: u64,
	/// Head of the doubly-linked list (threaded through the tag array) of
	/// every tag currently pointing at this entry.
	pub head: Option<TagId>,
}

pub struct DataArray {
	line_size: usize,
	entries: Vec<Vec<Option<DataEntry>>>,
	free: Vec<Vec<usize>>,
	sample_trials: usize,
}

impl DataArray {
	pub fn new(num_sets: usize, assoc: usize, line_size: usize, sample_trials: usize) -> Self {
		DataArray {
			line_size,
			entries: (0..num_sets).map(|_| (0..assoc).map(|_| None).collect()).collect(),
			free: (0..num_sets).map(|_| (0..assoc).rev().collect()).collect(),
			sample_trials,
		}
	}

	pub fn entry(&self, set: usize, way: usize) -> Option<&DataEntry> {
		self.entries[set][way].as_ref()
	}

	pub fn is_same(&self, set: usize, way: usize, data: &[u8]) -> bool {
		self.entries[set][way].as_ref().map(|e| e.bytes.as_slice() == data).unwrap_or(false)
	}

	/// Chooses a way for a new entry: a free way if one exists, otherwise
	/// the smallest-counter entry among `sample_trials` randomly sampled
	/// ways. Does not mutate anything — the caller commits the choice via
	/// `postinsert` once it has decided what to do with the prior occupant.
	pub fn preinsert(&mut self, set: usize, rng: &mut impl Rng) -> usize {
		if let Some(way) = self.free[set].pop() {
			return way;
		}
		let assoc = self.entries[set].len();
		let mut best_way = rng.gen_range(0..assoc);
		let mut best_counter = self.entries[set][best_way].as_ref().map(|e| e.counter).unwrap_or(0);
		for _ in 1..self.sample_trials {
			let candidate = rng.gen_range(0..assoc);
			let counter = self.entries[set][candidate].as_ref().map(|e| e.counter).unwrap_or(0);
			if counter <= best_counter {
				best_way = candidate;
				best_counter = counter;
			}
		}
		best_way
	}

	pub fn postinsert(&mut self, set: usize, way: usize, data: &[u8], hash: u64) {
		debug_assert_eq!(data.len(), self.line_size);
		self.entries[set][way] = Some(DataEntry { bytes: data.to_vec(), counter: 1, hash, head: None });
	}

	pub fn head_mut(&mut self, set: usize, way: usize) -> &mut Option<TagId> {
		&mut self.entries[set][way].as_mut().expect("head_mut on an empty way").head
	}

	pub fn incr_ref(&mut self, set: usize, way: usize) {
		if let Some(entry) = self.entries[set][way].as_mut() {
			entry.counter += 1;
		}
	}

	/// Decrements the refcount, returning the evicted entry once it drops
	/// to zero and the way is returned to the free list.
	pub fn decr_ref(&mut self, set: usize, way: usize) -> Option<DataEntry> {
		let freed = match self.entries[set][way].as_mut() {
			Some(entry) => {
				entry.counter -= 1;
				entry.counter == 0
			}
			None => false,
		};
		if freed {
			self.free[set].push(way);
			self.entries[set][way].take()
		} else {
			None
		}
	}

	pub fn valid_lines(&self) -> u64 {
		self.entries.iter().flatten().filter(|e| e.is_some()).count() as u64
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn preinsert_prefers_a_free_way() {
		let mut arr = DataArray::new(1, 4, 8, 4);
		let mut rng = StdRng::seed_from_u64(1);
		let way = arr.preinsert(0, &mut rng);
		assert!(way < 4);
	}

	#[test]
	fn decr_ref_evicts_at_zero_refcount() {
		let mut arr = DataArray::new(1, 2, 8, 4);
		let mut rng = StdRng::seed_from_u64(2);
		let way = arr.preinsert(0, &mut rng);
		arr.postinsert(0, way, &[0u8; 8], 42);
		arr.incr_ref(0, way);
		assert!(arr.decr_ref(0, way).is_none());
		let freed = arr.decr_ref(0, way);
		assert!(freed.is_some());
		assert_eq!(arr.valid_lines(), 0);
	}
}
