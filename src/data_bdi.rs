// Segmented, BDI-aware data array. Unlike the plain dedup data array
// (`data.rs`), entries here occupy a variable number of fixed-size
// segments depending on how well they compressed, so the backing store
// per set is a small segregated allocator: free runs are bucketed by
// length (1..=8 segments), and an allocation that can't be satisfied from
// a bucket falls back to a sampling-based cascading eviction, accumulating
// freed segments from each victim until there's enough room. Modeled on
// `ApproximateDedupBDIDataArray::preinsert`/`postinsert`'s bucketed
// free-list-then-cascading-evict scheme.

use rand::Rng;

use crate::bdi::Encoding;
use crate::tag::TagId;

const NUM_BUCKETS: usize = 8;

fn bucket_of(len: u32) -> usize {
	(len.clamp(1, NUM_BUCKETS as u32) as usize) - 1
}

#[derive(Debug, Clone)]
pub struct DataSetEntry {
	pub start: usize,
	pub len: u32,
	pub encoding: Encoding,
	/// Number of tag entries referencing this data entry (dedup refcount).
	pub counter: u32,
	pub hash: u64,
	/// Head of the doubly-linked list (threaded through the tag array) of
	/// every tag currently pointing at this entry.
	pub head: Option<TagId>,
}

/// One set's worth of segmented, compressed data storage. `total_segments`
/// is fixed at construction (`data_assoc * 8`, i.e. worst case every entry
/// would need a full uncompressed line); compression is what lets more
/// than `data_assoc` *logical* entries coexist.
pub struct DataSet {
	total_segments: u32,
	free_segments: u32,
	/// Entry descriptor slots; `None` is an empty slot available for reuse.
	/// Capacity bounds how many distinct entries (not segments) a set can
	/// hold regardless of how much segment space is free.
	entries: Vec<Option<DataSetEntry>>,
	free_entry_slots: Vec<usize>,
	/// Free segment runs bucketed by length; `free_buckets[n - 1]` holds
	/// the start offsets of all free runs of exactly `n` segments.
	free_buckets: [Vec<usize>; NUM_BUCKETS],
}

impl DataSet {
	pub fn new(max_entries: usize, segments_per_line: u32) -> Self {
		let total_segments = max_entries as u32 * segments_per_line;
		let mut free_buckets: [Vec<usize>; NUM_BUCKETS] = Default::default();
		if total_segments > 0 {
			let mut start = 0usize;
			let mut remaining = total_segments;
			while remaining > 0 {
				let run = remaining.min(NUM_BUCKETS as u32);
				free_buckets[bucket_of(run)].push(start);
				start += run as usize;
				remaining -= run;
			}
		}
		DataSet {
			total_segments,
			free_segments: total_segments,
			entries: (0..max_entries).map(|_| None).collect(),
			free_entry_slots: (0..max_entries).rev().collect(),
			free_buckets,
		}
	}

	pub fn valid_segments(&self) -> u32 {
		self.total_segments - self.free_segments
	}

	pub fn entry(&self, way: usize) -> Option<&DataSetEntry> {
		self.entries[way].as_ref()
	}

	/// Claims a run of at least `needed` segments from the smallest bucket
	/// that can satisfy it, splitting off and re-bucketing any leftover.
	fn claim_segments(&mut self, needed: u32) -> Option<usize> {
		for len in needed as usize..=NUM_BUCKETS {
			if let Some(start) = self.free_buckets[len - 1].pop() {
				let leftover = len as u32 - needed;
				if leftover > 0 {
					self.free_buckets[bucket_of(leftover)].push(start + needed as usize);
				}
				self.free_segments -= needed;
				return Some(start);
			}
		}
		None
	}

	fn release_segments(&mut self, start: usize, len: u32) {
		self.free_buckets[bucket_of(len)].push(start);
		self.free_segments += len;
	}

	fn free_entry_way(&mut self, way: usize) -> Option<DataSetEntry> {
		let entry = self.entries[way].take()?;
		self.release_segments(entry.start, entry.len);
		self.free_entry_slots.push(way);
		Some(entry)
	}

	/// Finds a way to place a new entry needing `needed` segments, evicting
	/// as few existing entries as possible. Tries a free slot first; if
	/// segment space is fragmented, samples up to `random_loop_trial` live
	/// entries at random and evicts them one at a time, accumulating freed
	/// segments (a `keptFromEvictions` accumulator) until there's enough
	/// room or trials run out. Returns `None` only if `needed` exceeds the
	/// set's total capacity outright.
	pub fn preinsert(&mut self, needed: u32, random_loop_trial: usize, rng: &mut impl Rng) -> Option<PreinsertOutcome> {
		if needed > self.total_segments {
			return None;
		}
		// The fast path needs both a free entry slot (the `assoc` logical
		// ways are a fixed-size table, independent of segment occupancy)
		// and enough free segments; claiming only the latter would leak
		// the claimed run when there's no slot to put it in. If entries are
		// fragmented into many small, live ways with segments to spare,
		// that still requires evicting one to reclaim a way, so fall
		// through to the cascading path below rather than taking this one.
		if !self.free_entry_slots.is_empty() {
			if let Some(start) = self.claim_segments(needed) {
				let way = self.free_entry_slots.pop().expect("checked non-empty above");
				return Some(PreinsertOutcome { way, start, evicted: Vec::new() });
			}
		}

		let mut sampled = Vec::new();
		let mut kept_from_evictions = 0u32;
		let live_ways: Vec<usize> = (0..self.entries.len()).filter(|&w| self.entries[w].is_some()).collect();
		if live_ways.is_empty() {
			return None;
		}

		for _ in 0..random_loop_trial {
			if kept_from_evictions >= needed {
				break;
			}
			let candidates: Vec<usize> = live_ways.iter().copied().filter(|w| !sampled.contains(w)).collect();
			if candidates.is_empty() {
				break;
			}
			let way = candidates[rng.gen_range(0..candidates.len())];
			let entry = self.entries[way].as_ref().unwrap();
			kept_from_evictions += entry.len;
			sampled.push(way);
		}

		if kept_from_evictions < needed {
			// Undo: put sampled entries back rather than leaving them half-evicted.
			return None;
		}

		// Capture each evicted entry's LL head before freeing it — the
		// cache layer needs it to invalidate every tag that referenced the
		// entry, not just the one currently being installed.
		let mut evicted = Vec::with_capacity(sampled.len());
		for way in sampled {
			let head = self.free_entry_way(way).map(|e| e.head).unwrap_or(None);
			evicted.push((way, head));
		}
		let start = self.claim_segments(needed).expect("freed enough segments for this allocation");
		let way = self.free_entry_slots.pop()?;
		Some(PreinsertOutcome { way, start, evicted })
	}

	pub fn postinsert(&mut self, way: usize, start: usize, len: u32, encoding: Encoding, hash: u64) {
		self.entries[way] = Some(DataSetEntry { start, len, encoding, counter: 1, hash, head: None });
	}

	pub fn head_mut(&mut self, way: usize) -> &mut Option<TagId> {
		&mut self.entries[way].as_mut().expect("head_mut on an empty way").head
	}

	pub fn incr_ref(&mut self, way: usize) {
		if let Some(entry) = self.entries[way].as_mut() {
			entry.counter += 1;
		}
	}

	/// Decrements the refcount, freeing the entry's segments back to the
	/// set when it drops to zero. Returns `true` iff the entry was freed.
	pub fn decr_ref(&mut self, way: usize) -> bool {
		let should_free = match self.entries[way].as_mut() {
			Some(entry) => {
				entry.counter -= 1;
				entry.counter == 0
			}
			None => false,
		};
		if should_free {
			self.free_entry_way(way);
		}
		should_free
	}
}

/// Result of a successful `preinsert`: where to place the new entry, and
/// which existing ways (if any) had to be evicted to make room, paired with
/// the LL head each one had at the moment of eviction.
#[derive(Debug)]
pub struct PreinsertOutcome {
	pub way: usize,
	pub start: usize,
	pub evicted: Vec<(usize, Option<TagId>)>,
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn allocates_from_fresh_set_without_eviction() {
		let mut set = DataSet::new(4, 8);
		let mut rng = StdRng::seed_from_u64(1);
		let outcome = set.preinsert(2, 4, &mut rng).expect("room in a fresh set");
		assert!(outcome.evicted.is_empty());
		set.postinsert(outcome.way, outcome.start, 2, Encoding::Base8Delta1, 0xabc);
		assert_eq!(set.valid_segments(), 2);
	}

	#[test]
	fn decr_ref_frees_segments_back_to_the_set() {
		let mut set = DataSet::new(1, 8);
		let mut rng = StdRng::seed_from_u64(2);
		let outcome = set.preinsert(8, 4, &mut rng).unwrap();
		set.postinsert(outcome.way, outcome.start, 8, Encoding::None, 1);
		assert_eq!(set.valid_segments(), 8);
		assert!(set.decr_ref(outcome.way));
		assert_eq!(set.valid_segments(), 0);
	}

	#[test]
	fn cascading_eviction_frees_enough_room_for_a_large_entry() {
		let mut set = DataSet::new(2, 8);
		let mut rng = StdRng::seed_from_u64(3);
		// Fill both of the set's two entry slots with small entries. A
		// full 8-segment run is still free (the set's other half was
		// never touched), but with no free *entry slot* left the fast
		// path must not take it — eviction is required regardless of how
		// much segment space happens to be free.
		let a = set.preinsert(4, 4, &mut rng).unwrap();
		set.postinsert(a.way, a.start, 4, Encoding::Base2Delta1, 1);
		let b = set.preinsert(4, 4, &mut rng).unwrap();
		set.postinsert(b.way, b.start, 4, Encoding::Base2Delta1, 2);

		let outcome = set.preinsert(8, 10, &mut rng).expect("cascading eviction frees both entries");
		assert_eq!(outcome.evicted.len(), 2);
	}

	#[test]
	fn free_segments_alone_do_not_satisfy_preinsert_without_a_free_entry_slot() {
		// Same shape as above but checked from the other direction: once
		// every entry slot is occupied, even a request that the free
		// segments could satisfy outright must still evict something to
		// reclaim a slot, never return the stale claimed-but-unplaced
		// state the old fast path could leak into.
		let mut set = DataSet::new(2, 8);
		let mut rng = StdRng::seed_from_u64(4);
		let a = set.preinsert(4, 4, &mut rng).unwrap();
		set.postinsert(a.way, a.start, 4, Encoding::Base2Delta1, 1);
		let b = set.preinsert(4, 4, &mut rng).unwrap();
		set.postinsert(b.way, b.start, 4, Encoding::Base2Delta1, 2);
		assert_eq!(set.valid_segments(), 8);

		let outcome = set.preinsert(4, 10, &mut rng).expect("a free 4-segment run exists, but only via eviction");
		assert_eq!(outcome.evicted.len(), 1);
	}
}
