// ApproximateDedup: content-addressed dedup with no BDI compression. Every
// tag points at a full-size data line; tags whose incoming bytes match an
// existing line (after the approximation pre-pass, for lines in an
// annotated region) share it through the linked list rooted at that line's
// `head`. The three-way classification (exact hash hit / stale pointer /
// no match) mirrors `ApproximateDedupCache::access`'s shape, with the
// writeback-chain bookkeeping simplified to the Hit/MissStart/MissResponse
// granularity `exact_bdi.rs` already settled on.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bdi;
use crate::cache::{addr_to_set_tag, pick_victim, set_tag_to_addr, Cache};
use crate::config::CacheConfig;
use crate::coherence::CoherenceController;
use crate::data::DataArray;
use crate::events::{connect, EventKind, EventRecorder, TimingRecord};
use crate::hash::{H3Hash, HashArray};
use crate::region::{ApproximateRegionTable, DataType};
use crate::replacement::ReplacementPolicy;
use crate::request::{MemReq, MESIState};
use crate::stats::CacheStats;
use crate::tag::{self, TagArray, TagId};

pub struct ApproximateDedup {
	config: CacheConfig,
	tags: TagArray,
	data: DataArray,
	hash_index: HashArray,
	hasher: H3Hash,
	policy: Box<dyn ReplacementPolicy>,
	cc: Box<dyn CoherenceController>,
	regions: ApproximateRegionTable,
	rng: StdRng,
	stats: CacheStats,
}

impl ApproximateDedup {
	pub fn new(
		config: CacheConfig,
		policy: Box<dyn ReplacementPolicy>,
		cc: Box<dyn CoherenceController>,
		regions: ApproximateRegionTable,
		seed: u64,
	) -> Self {
		let tags = TagArray::new(config.num_sets, config.tag_assoc);
		let data = DataArray::new(config.num_sets, config.data_assoc, config.line_size as usize, config.sample_trials);
		let mut rng = StdRng::seed_from_u64(seed);
		let hasher = H3Hash::new(config.hash_size, &mut rng);
		ApproximateDedup {
			config,
			tags,
			data,
			hash_index: HashArray::new(config.hash_size),
			hasher,
			policy,
			cc,
			regions,
			rng,
			stats: CacheStats::default(),
		}
	}

	/// Applies the approximation pre-pass when the line falls in an
	/// annotated float/double region, then hashes the (possibly masked)
	/// bytes. Integer-annotated and unannotated lines hash as-is.
	fn hash_incoming(&self, line_addr: u64, bytes: &mut [u8]) -> u64 {
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
		self.hasher.hash_line(bytes)
	}

	/// Releases the tag `(set, way)`'s hold on its current data entry: if it
	/// was the sole referrer the data entry dies (and its hash entry goes
	/// stale, tolerated — a later lookup finds the slot empty); otherwise
	/// the data entry's refcount drops by one and, if `way` was the LL
	/// head, the new head is spliced in first.
	fn release_data(&mut self, set: usize, way: usize) {
		let data_set = self.tags.get(set, way).data_set;
		let data_way = self.tags.get(set, way).data_way;
		let id = TagId { set, way };
		if let Some(entry) = self.data.entry(data_set, data_way) {
			let was_shared = entry.counter > 1;
			let mut head_opt = *self.data.head_mut(data_set, data_way);
			if head_opt.is_some() {
				tag::unlink(&mut self.tags, &mut head_opt, id);
				*self.data.head_mut(data_set, data_way) = head_opt;
			}
			self.data.decr_ref(data_set, data_way);
			if was_shared {
				self.stats.record_shared_eviction();
			}
		}
	}

	/// Evicts a victim tag that occupied `(set, way)` before re-use: patches
	/// the LL and frees or decrements the data entry it pointed at.
	fn evict_tag(&mut self, set: usize, way: usize) {
		if self.tags.get(set, way).valid {
			self.release_data(set, way);
			self.tags.invalidate(set, way);
			self.policy.invalidate(set, way);
		}
	}

	/// Installs `bytes` as a fresh, uniquely-owned data entry for tag
	/// `(set, way)`, evicting a random-sampled victim data line first if the
	/// data array has no free slot. Every tag referencing the victim's LL
	/// (other than the one currently being installed, which has already
	/// been detached) is invalidated in the tag array too.
	fn allocate_fresh(&mut self, set: usize, way: usize, bytes: &[u8], hash: u64) {
		let data_way = self.data.preinsert(set, &mut self.rng);
		if let Some(old_head) = self.data.entry(set, data_way).and_then(|e| e.head) {
			log::debug!(target: "dedup-bdi-cache", "approximate-dedup cascading eviction of data way set={} way={}", set, data_way);
			let mut cursor = Some(old_head);
			while let Some(victim) = cursor {
				let next = self.tags.next(victim);
				if victim != (TagId { set, way }) {
					self.tags.invalidate(victim.set, victim.way);
					self.policy.invalidate(victim.set, victim.way);
				}
				cursor = next;
			}
		}
		self.data.postinsert(set, data_way, bytes, hash);
		*self.data.head_mut(set, data_way) = Some(TagId { set, way });
		self.hash_index.insert(hash, set, data_way);
		self.tags.change_in_place(set, way, set, data_way);
	}
}

impl Cache for ApproximateDedup {
	fn access(&mut self, req: &mut MemReq, recorder: &mut EventRecorder) -> TimingRecord {
		let (set, tag) = addr_to_set_tag(req.line_addr, self.config.num_sets);
		log::trace!(target: "dedup-bdi-cache", "approximate-dedup access addr=0x{:x} set={} type={}", req.line_addr, set, req.access_type.name());

		if self.cc.start_access(req) {
			log::trace!(target: "dedup-bdi-cache", "approximate-dedup benign race skip addr=0x{:x}", req.line_addr);
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
					let data_way = self.tags.get(set, way).data_way;
					if !self.data.is_same(set, data_way, &bytes) {
						let hash = self.hash_incoming(req.line_addr, &mut bytes);
						self.release_data(set, way);
						self.classify_and_install(set, way, &bytes, hash);
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
		let hash = self.hash_incoming(req.line_addr, &mut bytes);
		self.tags.install(set, victim_way, tag, MESIState::I, set, 0, 0);
		self.classify_and_install(set, victim_way, &bytes, hash);
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
		let valid_lines = self.data.valid_lines();
		CacheStats {
			valid_lines: self.tags.valid_count(),
			// No BDI segmentation in this variant: every live data entry
			// occupies exactly `segments_per_line` segments.
			valid_segments: valid_lines * self.config.segments_per_line() as u64,
			..self.stats
		}
	}
}

impl ApproximateDedup {
	/// The shared A/B/C classification: a hash hit whose target is still
	/// live and byte-identical joins the LL (A); a hash hit whose target
	/// has died is taken over in place (B); anything else allocates a
	/// fresh, uniquely-owned data entry, cascading an eviction if needed
	/// (C). `(set, way)` is the tag being installed/updated; it must
	/// already hold no reference to a data entry (the caller releases the
	/// old one first via `evict_tag`/the hit-write path above).
	fn classify_and_install(&mut self, set: usize, way: usize, bytes: &[u8], hash: u64) {
		let candidate = self.hash_index.lookup(hash).next().copied();
		match candidate {
			Some(entry) if self.data.entry(entry.set, entry.way).is_none() => {
				// Stale pointer: the slot is free, take it over directly
				// rather than sampling a fresh victim.
				log::debug!(target: "dedup-bdi-cache", "approximate-dedup stale hash pointer taken over at set={} way={}", entry.set, entry.way);
				self.data.postinsert(entry.set, entry.way, bytes, hash);
				*self.data.head_mut(entry.set, entry.way) = Some(TagId { set, way });
				self.tags.change_in_place(set, way, entry.set, entry.way);
				self.hash_index.insert(hash, entry.set, entry.way);
			}
			Some(entry) if self.data.is_same(entry.set, entry.way, bytes) => {
				self.stats.record_dedup_hit();
				let id = TagId { set, way };
				let head = self.data.head_mut(entry.set, entry.way);
				tag::link_front(&mut self.tags, head, id);
				self.tags.change_in_place(set, way, entry.set, entry.way);
				self.data.incr_ref(entry.set, entry.way);
			}
			_ => {
				self.allocate_fresh(set, way, bytes, hash);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::coherence::NullCc;
	use crate::replacement::LruPolicy;
	use crate::request::AccessType;

	fn make_cache(num_sets: usize, assoc: usize) -> ApproximateDedup {
		env_logger::try_init().ok();
		let config = CacheConfig { num_sets, tag_assoc: assoc, data_assoc: assoc, ..CacheConfig::default() };
		ApproximateDedup::new(config, Box::new(LruPolicy::new(num_sets, assoc)), Box::new(NullCc::default()), ApproximateRegionTable::new(), 11)
	}

	#[test]
	fn identical_content_at_two_addresses_dedups() {
		let mut cache = make_cache(1, 4);
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x1000, AccessType::GETS, 0).with_data(vec![0xabu8; 64]);
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x2000, AccessType::GETS, 0).with_data(vec![0xabu8; 64]);
		cache.access(&mut req2, &mut recorder);

		assert_eq!(cache.stats().misses, 2);
		assert_eq!(cache.stats().dedup_hits, 1);
		assert_eq!(cache.data.valid_lines(), 1);
	}

	#[test]
	fn distinct_content_gets_distinct_data_entries() {
		let mut cache = make_cache(1, 4);
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x1000, AccessType::GETS, 0).with_data(vec![0x11u8; 64]);
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x2000, AccessType::GETS, 0).with_data(vec![0x22u8; 64]);
		cache.access(&mut req2, &mut recorder);

		assert_eq!(cache.data.valid_lines(), 2);
	}

	#[test]
	fn write_with_new_content_decrements_old_dedup_counter() {
		let mut cache = make_cache(1, 4);
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x1000, AccessType::GETS, 0).with_data(vec![0xabu8; 64]);
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x2000, AccessType::GETS, 0).with_data(vec![0xabu8; 64]);
		cache.access(&mut req2, &mut recorder);
		assert_eq!(cache.data.valid_lines(), 1);

		let mut req3 = MemReq::new(2, 0x2000, AccessType::PUTX, 0).with_data(vec![0xffu8; 64]);
		cache.access(&mut req3, &mut recorder);
		assert_eq!(cache.data.valid_lines(), 2);
	}
}
