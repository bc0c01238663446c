// Content-hash index. An H3-family hash reduces a cache line (or, for
// UniDoppelganger, a map fingerprint) to a `hash_size`-bit key; `HashArray`
// buckets `HashEntry` records by that key so a dedup lookup can enumerate
// candidate tag-array slots without a linear scan. Modeled on
// `ApproximateDedupHashArray::hash`'s per-8-byte-chunk XOR and the
// `HashFamily`/`H3HashFamily` collaborator it delegates to.

use rand::Rng;

/// One random H3-family hash function: a multiplier per input bit, XORed
/// together wherever the corresponding input bit is set, then masked to
/// `output_bits`. Cheap, collision-rate-good-enough for an index hint.
pub struct H3Hash {
	multipliers: [u64; 64],
	output_bits: u32,
}

impl H3Hash {
	pub fn new(output_bits: u32, rng: &mut impl Rng) -> Self {
		debug_assert!(output_bits > 0 && output_bits <= 64);
		let mut multipliers = [0u64; 64];
		for m in multipliers.iter_mut() {
			*m = rng.gen();
		}
		H3Hash { multipliers, output_bits }
	}

	pub fn hash_u64(&self, input: u64) -> u64 {
		let mut acc = 0u64;
		let mut bits = input;
		let mut i = 0;
		while bits != 0 {
			if bits & 1 == 1 {
				acc ^= self.multipliers[i];
			}
			bits >>= 1;
			i += 1;
		}
		if self.output_bits >= 64 {
			acc
		} else {
			acc & ((1u64 << self.output_bits) - 1)
		}
	}

	/// Hashes a full cache line by splitting it into 8-byte chunks, hashing
	/// each independently, and XORing the results, which keeps the hash
	/// sensitive to content anywhere in the line without re-keying per
	/// line size.
	pub fn hash_line(&self, data: &[u8]) -> u64 {
		debug_assert!(data.len() % 8 == 0, "line size must be a multiple of 8 bytes");
		data.chunks_exact(8).fold(0u64, |acc, chunk| {
			let word = u64::from_le_bytes(chunk.try_into().unwrap());
			acc ^ self.hash_u64(word)
		})
	}
}

/// One bucketed index entry: the hash key it was filed under, plus the
/// tag-array coordinates it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
	pub key: u64,
	pub set: usize,
	pub way: usize,
}

/// Bucketed index from hash key to candidate tag-array slots. Used both
/// for content-hash dedup lookups and, in UniDoppelganger, as the
/// map-fingerprint index.
pub struct HashArray {
	buckets: Vec<Vec<HashEntry>>,
	mask: u64,
}

impl HashArray {
	pub fn new(hash_bits: u32) -> Self {
		debug_assert!(hash_bits > 0 && hash_bits <= 32);
		let num_buckets = 1usize << hash_bits;
		HashArray { buckets: vec![Vec::new(); num_buckets], mask: (num_buckets as u64) - 1 }
	}

	fn bucket_index(&self, key: u64) -> usize {
		(key & self.mask) as usize
	}

	pub fn lookup(&self, key: u64) -> impl Iterator<Item = &HashEntry> {
		self.buckets[self.bucket_index(key)].iter().filter(move |e| e.key == key)
	}

	pub fn insert(&mut self, key: u64, set: usize, way: usize) {
		let idx = self.bucket_index(key);
		self.buckets[idx].push(HashEntry { key, set, way });
	}

	/// Removes the first matching entry, returning whether one was found.
	/// A (key, set, way) triple is unique, so the first match is the only
	/// match.
	pub fn remove(&mut self, key: u64, set: usize, way: usize) -> bool {
		let idx = self.bucket_index(key);
		let bucket = &mut self.buckets[idx];
		if let Some(pos) = bucket.iter().position(|e| e.key == key && e.set == set && e.way == way) {
			bucket.swap_remove(pos);
			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn same_input_same_hash() {
		let mut rng = StdRng::seed_from_u64(1);
		let h = H3Hash::new(16, &mut rng);
		assert_eq!(h.hash_u64(0xdead_beef), h.hash_u64(0xdead_beef));
	}

	#[test]
	fn hash_array_roundtrip() {
		let mut index = HashArray::new(4);
		index.insert(7, 2, 3);
		let found: Vec<_> = index.lookup(7).collect();
		assert_eq!(found.len(), 1);
		assert_eq!((found[0].set, found[0].way), (2, 3));
		assert!(index.remove(7, 2, 3));
		assert_eq!(index.lookup(7).count(), 0);
	}
}
