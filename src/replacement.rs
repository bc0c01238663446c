// ReplacementPolicy: an external collaborator contract. The cache arrays
// never choose a victim themselves — they hand the policy a candidate set
// and a "did I just touch this way" signal, the way a key-value store's
// column/table code defers compaction decisions to a stats snapshot
// rather than deciding inline. Two concrete implementations are supplied
// so the crate is runnable standalone; the trait itself is the real
// contract, not these bodies.

use rand::Rng;

/// `update` is called on every access that `AccessType::updates_replacement`
/// returns true for; `rank_candidates` is called during eviction with the
/// way indices the cache has already filtered down to (e.g. excluding
/// locked/pending ways), and must return one of them.
pub trait ReplacementPolicy: Send {
	fn update(&mut self, set: usize, way: usize);

	/// Chooses a victim among `candidates` (way indices within `set`).
	/// `candidates` is never empty — the caller has already checked.
	fn rank_candidates(&mut self, set: usize, candidates: &[usize]) -> usize;

	/// Called when a way becomes invalid, so stale recency state doesn't
	/// linger and bias a future `rank_candidates` call.
	fn invalidate(&mut self, set: usize, way: usize);
}

/// True LRU, one recency counter per (set, way). `update` stamps the
/// current logical clock; `rank_candidates` picks the smallest stamp.
pub struct LruPolicy {
	assoc: usize,
	clock: u64,
	stamps: Vec<u64>,
}

impl LruPolicy {
	pub fn new(num_sets: usize, assoc: usize) -> Self {
		LruPolicy { assoc, clock: 0, stamps: vec![0; num_sets * assoc] }
	}

	fn index(&self, set: usize, way: usize) -> usize {
		set * self.assoc + way
	}
}

impl ReplacementPolicy for LruPolicy {
	fn update(&mut self, set: usize, way: usize) {
		self.clock += 1;
		let idx = self.index(set, way);
		self.stamps[idx] = self.clock;
	}

	fn rank_candidates(&mut self, set: usize, candidates: &[usize]) -> usize {
		*candidates
			.iter()
			.min_by_key(|&&way| self.stamps[self.index(set, way)])
			.expect("rank_candidates called with no candidates")
	}

	fn invalidate(&mut self, set: usize, way: usize) {
		let idx = self.index(set, way);
		self.stamps[idx] = 0;
	}
}

/// Uniform-random victim selection among the offered candidates, in the
/// shape of a `RandReplPolicy`. Useful as a cheap baseline and in tests
/// where LRU's tie-breaking would otherwise couple test order to
/// assertions.
pub struct RandomPolicy<R: Rng> {
	rng: R,
}

impl<R: Rng> RandomPolicy<R> {
	pub fn new(rng: R) -> Self {
		RandomPolicy { rng }
	}
}

impl<R: Rng + Send> ReplacementPolicy for RandomPolicy<R> {
	fn update(&mut self, _set: usize, _way: usize) {}

	fn rank_candidates(&mut self, _set: usize, candidates: &[usize]) -> usize {
		let idx = self.rng.gen_range(0..candidates.len());
		candidates[idx]
	}

	fn invalidate(&mut self, _set: usize, _way: usize) {}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn lru_evicts_least_recently_touched() {
		let mut policy = LruPolicy::new(1, 4);
		policy.update(0, 0);
		policy.update(0, 1);
		policy.update(0, 2);
		// way 3 was never touched, way 0 touched longest ago among the rest.
		assert_eq!(policy.rank_candidates(0, &[0, 1, 2, 3]), 3);
	}

	#[test]
	fn invalidate_resets_recency() {
		let mut policy = LruPolicy::new(1, 2);
		policy.update(0, 0);
		policy.update(0, 1);
		policy.invalidate(0, 1);
		assert_eq!(policy.rank_candidates(0, &[0, 1]), 1);
	}
}
