// DedupBDI: content-hash dedup (as in `approximate_dedup.rs`) layered on
// top of BDI-segmented storage (as in `exact_bdi.rs`). A line's hash keys
// into the shared `hash_index`; a hit against a live entry joins its LL
// without touching the segmented allocator at all, while a miss against it
// or a fresh line goes through the usual compress-then-preinsert path.
// Modeled on `ApproximateDedupBDICache::access`'s ordering: the hash
// lookup precedes compression (the hash is taken over the possibly-masked
// raw bytes, before BDI encodes them), and a cascading eviction
// invalidates every tag referencing each freed segment run, not just the
// one being installed.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bdi;
use crate::cache::{addr_to_set_tag, pick_victim, set_tag_to_addr, Cache};
use crate::config::CacheConfig;
use crate::coherence::CoherenceController;
use crate::data_bdi::DataSet;
use crate::events::{connect, EventKind, EventRecorder, TimingRecord};
use crate::hash::{H3Hash, HashArray};
use crate::region::{ApproximateRegionTable, DataType};
use crate::replacement::ReplacementPolicy;
use crate::request::{MemReq, MESIState};
use crate::stats::CacheStats;
use crate::tag::{self, TagArray, TagId};

pub struct DedupBdi {
	config: CacheConfig,
	tags: TagArray,
	data: Vec<DataSet>,
	hash_index: HashArray,
	hasher: H3Hash,
	policy: Box<dyn ReplacementPolicy>,
	cc: Box<dyn CoherenceController>,
	regions: ApproximateRegionTable,
	rng: StdRng,
	stats: CacheStats,
}

impl DedupBdi {
	pub fn new(
		config: CacheConfig,
		policy: Box<dyn ReplacementPolicy>,
		cc: Box<dyn CoherenceController>,
		regions: ApproximateRegionTable,
		seed: u64,
	) -> Self {
		let tags = TagArray::new(config.num_sets, config.tag_assoc);
		let data = (0..config.num_sets).map(|_| DataSet::new(config.data_assoc, config.segments_per_line())).collect();
		let mut rng = StdRng::seed_from_u64(seed);
		let hasher = H3Hash::new(config.hash_size, &mut rng);
		DedupBdi { config, tags, data, hash_index: HashArray::new(config.hash_size), hasher, policy, cc, regions, rng, stats: CacheStats::default() }
	}

	/// Applies the approximation pre-pass when the line falls in an
	/// annotated region, then hashes the (possibly masked) bytes and
	/// compresses them. The mask is applied once; both the hash and the
	/// compressor see the same bytes.
	fn hash_and_compress(&self, line_addr: u64, bytes: &mut [u8]) -> (u64, bdi::Encoding) {
		let byte_addr = line_addr * self.config.line_size as u64;
		if let Some(region) = self.regions.resolve(byte_addr, self.config.line_size) {
			let cut_size = match region.data_type {
				DataType::F32 => Some(self.config.float_cut_size),
				DataType::F64 => Some(self.config.double_cut_size),
				_ => None,
			};
			if let Some(cut_size) = cut_size {
				bdi::approximate_mask(bytes, region.data_type.element_size(), cut_size);
			}
		}
		(self.hasher.hash_line(bytes), bdi::compress(bytes))
	}

	fn release_data(&mut self, set: usize, way: usize) {
		let data_set = self.tags.get(set, way).data_set;
		let data_way = self.tags.get(set, way).data_way;
		let id = TagId { set, way };
		if let Some(entry) = self.data[data_set].entry(data_way) {
			let was_shared = entry.counter > 1;
			let mut head_opt = *self.data[data_set].head_mut(data_way);
			if head_opt.is_some() {
				tag::unlink(&mut self.tags, &mut head_opt, id);
				*self.data[data_set].head_mut(data_way) = head_opt;
			}
			self.data[data_set].decr_ref(data_way);
			if was_shared {
				self.stats.record_shared_eviction();
			}
		}
	}

	fn evict_tag(&mut self, set: usize, way: usize) {
		if self.tags.get(set, way).valid {
			self.release_data(set, way);
			self.tags.invalidate(set, way);
			self.policy.invalidate(set, way);
		}
	}

	/// Installs `bytes` (already hashed, and compressed to `encoding`) as a
	/// fresh, uniquely-owned data entry for tag `(set, way)`, cascading an
	/// eviction of every tag referencing whichever existing entries had to
	/// be freed to make room.
	fn allocate_fresh(&mut self, set: usize, way: usize, encoding: bdi::Encoding, hash: u64) {
		let needed = encoding.segments();
		let outcome = self.data[set]
			.preinsert(needed, self.config.random_loop_trial, &mut self.rng)
			.expect("segmented data set exhausted: data_assoc too small for workload");
		if !outcome.evicted.is_empty() {
			log::debug!(target: "dedup-bdi-cache", "dedup-bdi cascading eviction in set={}: {} entries freed for {} needed segments", set, outcome.evicted.len(), needed);
		}
		for &(_, head) in &outcome.evicted {
			let mut cursor = head;
			while let Some(victim) = cursor {
				let next = self.tags.next(victim);
				self.tags.invalidate(victim.set, victim.way);
				self.policy.invalidate(victim.set, victim.way);
				cursor = next;
			}
		}
		// Stale hash entries pointing at the freed ways are tolerated, same
		// as in `approximate_dedup.rs`: a later lookup finds the slot empty
		// and takes it over rather than trusting the dead pointer.
		self.data[set].postinsert(outcome.way, outcome.start, needed, encoding, hash);
		*self.data[set].head_mut(outcome.way) = Some(TagId { set, way });
		self.hash_index.insert(hash, set, outcome.way);
		self.tags.change_in_place(set, way, set, outcome.way);
	}

	/// Hash-hit/stale-pointer/no-match classification identical in shape to
	/// `approximate_dedup.rs`'s, adapted to a segmented backing store: case
	/// A joins the LL without touching the allocator at all.
	fn classify_and_install(&mut self, set: usize, way: usize, encoding: bdi::Encoding, hash: u64) {
		let candidate = self.hash_index.lookup(hash).next().copied();
		match candidate {
			Some(entry) if self.data[entry.set].entry(entry.way).is_some() => {
				log::trace!(target: "dedup-bdi-cache", "dedup-bdi hash hit joins LL at set={} way={}", entry.set, entry.way);
				self.stats.record_dedup_hit();
				let id = TagId { set, way };
				let head = self.data[entry.set].head_mut(entry.way);
				tag::link_front(&mut self.tags, head, id);
				self.tags.change_in_place(set, way, entry.set, entry.way);
				self.data[entry.set].incr_ref(entry.way);
			}
			_ => {
				self.allocate_fresh(set, way, encoding, hash);
			}
		}
	}
}

impl Cache for DedupBdi {
	fn access(&mut self, req: &mut MemReq, recorder: &mut EventRecorder) -> TimingRecord {
		let (set, tag) = addr_to_set_tag(req.line_addr, self.config.num_sets);
		log::trace!(target: "dedup-bdi-cache", "dedup-bdi access addr=0x{:x} set={} type={}", req.line_addr, set, req.access_type.name());

		if self.cc.start_access(req) {
			log::trace!(target: "dedup-bdi-cache", "dedup-bdi benign race skip addr=0x{:x}", req.line_addr);
			let event = recorder.alloc(EventKind::Delay, req.cycle);
			return TimingRecord { event, req_cycle: req.cycle, resp_cycle: req.cycle };
		}

		if let Some(way) = self.tags.lookup(set, tag) {
			let old_state = self.tags.get(set, way).state;
			let new_state = self.cc.process_access(req, old_state, true);
			self.tags.set_state(set, way, new_state);
			if req.access_type.updates_replacement() {
				self.policy.update(set, way);
			}
			let mut wrote_new_data = false;
			if req.access_type.is_write() {
				if let Some(mut bytes) = req.data.clone() {
					let (hash, encoding) = self.hash_and_compress(req.line_addr, &mut bytes);
					let data_set = self.tags.get(set, way).data_set;
					let data_way = self.tags.get(set, way).data_way;
					let unchanged = self.data[data_set].entry(data_way).map(|e| e.hash == hash).unwrap_or(false);
					if !unchanged {
						self.release_data(set, way);
						self.classify_and_install(set, way, encoding, hash);
						wrote_new_data = true;
					}
				}
			}
			self.stats.record_hit();
			let hit_event = recorder.alloc(EventKind::Hit, req.cycle);
			let mut resp_cycle = req.cycle + 2 * self.config.acc_lat;
			if wrote_new_data && old_state == MESIState::M {
				let wb_event = recorder.alloc(EventKind::HitWriteback, req.cycle);
				recorder.add_child(hit_event, wb_event, self.config.acc_lat);
				resp_cycle += self.config.acc_lat;
			}
			self.cc.end_access(req);
			return TimingRecord { event: hit_event, req_cycle: req.cycle, resp_cycle };
		}

		self.stats.record_miss();
		if !self.cc.should_allocate(req) {
			let miss_start = recorder.alloc(EventKind::MissStart, req.cycle);
			let miss_resp = recorder.alloc(EventKind::MissResponse, req.cycle);
			recorder.add_child(miss_start, miss_resp, self.config.acc_lat);
			let resp_cycle = req.cycle + 2 * self.config.acc_lat;
			let record = TimingRecord { event: miss_start, req_cycle: req.cycle, resp_cycle };
			connect(recorder, Some(&record), miss_resp, 0);
			self.cc.end_access(req);
			return TimingRecord { event: miss_resp, req_cycle: req.cycle, resp_cycle };
		}

		let victim_way = if self.tags.need_eviction(set) {
			pick_victim(&self.tags, set, &mut *self.policy)
		} else {
			self.tags.first_invalid_way(set).expect("set has room when need_eviction is false")
		};
		let mut eviction_done_cycle = req.cycle;
		let mut victim_was_dirty = false;
		if self.tags.get(set, victim_way).valid {
			let victim = self.tags.get(set, victim_way);
			let victim_state = victim.state;
			let wb_addr = set_tag_to_addr(set, victim.tag, self.config.num_sets);
			victim_was_dirty = victim_state == MESIState::M;
			eviction_done_cycle = self.cc.process_eviction(req, wb_addr, victim_state, req.cycle);
		}
		self.evict_tag(set, victim_way);

		let mut bytes = req.data.clone().unwrap_or_else(|| vec![0u8; self.config.line_size as usize]);
		let (hash, encoding) = self.hash_and_compress(req.line_addr, &mut bytes);
		self.tags.install(set, victim_way, tag, MESIState::I, set, 0, 0);
		self.classify_and_install(set, victim_way, encoding, hash);
		let state = self.cc.process_access(req, MESIState::I, false);
		self.tags.set_state(set, victim_way, state);
		self.policy.update(set, victim_way);

		let eviction_extra = eviction_done_cycle.saturating_sub(req.cycle);
		let miss_delay = self.config.acc_lat + eviction_extra;
		let miss_resp_cycle = req.cycle + self.config.acc_lat + miss_delay;
		let miss_start = recorder.alloc(EventKind::MissStart, req.cycle);
		let miss_resp = recorder.alloc(EventKind::MissResponse, req.cycle);
		recorder.add_child(miss_start, miss_resp, miss_delay);
		let record = TimingRecord { event: miss_start, req_cycle: req.cycle, resp_cycle: miss_resp_cycle };
		connect(recorder, Some(&record), miss_resp, 0);
		if victim_was_dirty {
			let wb_event = recorder.alloc(EventKind::MissWriteback, req.cycle);
			recorder.add_child(miss_resp, wb_event, 0);
		}
		self.cc.end_access(req);
		TimingRecord { event: miss_resp, req_cycle: req.cycle, resp_cycle: miss_resp_cycle }
	}

	fn stats(&self) -> CacheStats {
		CacheStats {
			valid_lines: self.tags.valid_count(),
			valid_segments: self.data.iter().map(|set| set.valid_segments() as u64).sum(),
			..self.stats
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::coherence::NullCc;
	use crate::replacement::LruPolicy;
	use crate::request::AccessType;

	fn make_cache(num_sets: usize, assoc: usize) -> DedupBdi {
		env_logger::try_init().ok();
		let config = CacheConfig { num_sets, tag_assoc: assoc, data_assoc: assoc, ..CacheConfig::default() };
		DedupBdi::new(config, Box::new(LruPolicy::new(num_sets, assoc)), Box::new(NullCc::default()), ApproximateRegionTable::new(), 13)
	}

	#[test]
	fn identical_content_dedups_across_addresses() {
		let mut cache = make_cache(1, 4);
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x1000, AccessType::GETS, 0).with_data(vec![0u8; 64]);
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x2000, AccessType::GETS, 0).with_data(vec![0u8; 64]);
		cache.access(&mut req2, &mut recorder);

		assert_eq!(cache.stats().misses, 2);
		assert_eq!(cache.stats().dedup_hits, 1);
	}

	#[test]
	fn compressible_lines_share_few_segments() {
		let mut cache = make_cache(4, 4);
		let mut recorder = EventRecorder::new();
		for line in 0..4u64 {
			let mut req = MemReq::new(line, line, AccessType::GETS, 0).with_data(vec![0u8; 64]);
			cache.access(&mut req, &mut recorder);
		}
		assert_eq!(cache.stats().misses, 4);
	}
}
