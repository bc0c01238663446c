// Per-cache counters. Process-wide latency aggregation (a
// `RunningStats`/`CycleBreakdownStat`-style histogram) is out of scope —
// these counters are the ones the array types themselves already have to
// track to uphold their own invariants, exposed as a snapshot the way a
// key-value store exposes `filled`/`last_removed` for external inspection.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
	/// Number of tag entries with `valid == true`. Computed live by
	/// `Cache::stats` from the tag array, not accumulated incrementally —
	/// evictions would otherwise have to remember to decrement it.
	pub valid_lines: u64,
	/// Number of data segments currently allocated (sum across all sets'
	/// free lists' complements). Computed live, same reasoning as
	/// `valid_lines`.
	pub valid_segments: u64,
	/// Tag hits, across all access types.
	pub hits: u64,
	/// Tag misses.
	pub misses: u64,
	/// Times a dedup lookup found and reused an existing data entry
	/// instead of allocating a new one.
	pub dedup_hits: u64,
	/// Times eviction required walking a multi-referrer linked list
	/// (decrement-refcount-and-move-head path) rather than a plain evict.
	pub shared_evictions: u64,
}

impl CacheStats {
	pub fn record_hit(&mut self) {
		self.hits += 1;
	}

	pub fn record_miss(&mut self) {
		self.misses += 1;
	}

	pub fn record_dedup_hit(&mut self) {
		self.dedup_hits += 1;
	}

	pub fn record_shared_eviction(&mut self) {
		self.shared_evictions += 1;
	}

	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn hit_rate_on_empty_stats_is_zero() {
		assert_eq!(CacheStats::default().hit_rate(), 0.0);
	}

	#[test]
	fn hit_rate_computed_over_hits_and_misses() {
		let mut stats = CacheStats::default();
		stats.record_hit();
		stats.record_hit();
		stats.record_miss();
		assert!((stats.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
	}
}
