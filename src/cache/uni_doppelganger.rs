// UniDoppelganger: map-fingerprint dedup for lines falling in an annotated
// approximate region, with no content hash and no BDI compression. Lines
// outside any annotated region ("exact" lines) never participate in
// dedup at all: they get a privately-owned data entry keyed by a random
// map value purely to pick a bucket to contend for, carrying no real
// content, matching `unidoppelganger_cache.cpp`'s `approximate` branch
// (`PIN_SafeCopy` only runs when `approximate`, and the exact path seeds
// `dataArray->preinsert` with `rand() % 2^(mapSize-1)` rather than a
// calculated map).
//
// Reuses the same arena (`TagArray`/`DataArray`) and free-list/sampling
// preinsert discipline as `approximate_dedup.rs`; only the dedup key
// changes from a content hash to a map fingerprint, and the "case A"
// match criterion drops the byte-equality check since map equality *is*
// the approximate-similarity test by design.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::cache::{addr_to_set_tag, pick_victim, set_tag_to_addr, Cache};
use crate::config::CacheConfig;
use crate::coherence::CoherenceController;
use crate::data::DataArray;
use crate::events::{connect, EventKind, EventRecorder, TimingRecord};
use crate::hash::HashArray;
use crate::map;
use crate::region::ApproximateRegionTable;
use crate::replacement::ReplacementPolicy;
use crate::request::{MemReq, MESIState};
use crate::stats::CacheStats;
use crate::tag::{self, TagArray, TagId};

pub struct UniDoppelganger {
	config: CacheConfig,
	tags: TagArray,
	data: DataArray,
	map_index: HashArray,
	policy: Box<dyn ReplacementPolicy>,
	cc: Box<dyn CoherenceController>,
	regions: ApproximateRegionTable,
	rng: StdRng,
	stats: CacheStats,
}

impl UniDoppelganger {
	pub fn new(
		config: CacheConfig,
		policy: Box<dyn ReplacementPolicy>,
		cc: Box<dyn CoherenceController>,
		regions: ApproximateRegionTable,
		seed: u64,
	) -> Self {
		let tags = TagArray::new(config.num_sets, config.tag_assoc);
		let data = DataArray::new(config.num_sets, config.data_assoc, config.line_size as usize, config.sample_trials);
		let map_bits = config.map_size + config.map_size / 2;
		UniDoppelganger {
			config,
			tags,
			data,
			map_index: HashArray::new(map_bits.max(1).min(32)),
			policy,
			cc,
			regions,
			rng: StdRng::seed_from_u64(seed),
			stats: CacheStats::default(),
		}
	}

	/// A random map key used for exact (non-approximate) lines, purely to
	/// select a contention bucket in the shared data array — never looked
	/// up against existing entries, in the shape of `rand() %
	/// 2^(mapSize-1)`.
	fn random_map(&mut self) -> u32 {
		let span = 1u32 << (self.config.map_size.saturating_sub(1)).max(1);
		self.rng.gen_range(0..span)
	}

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

	fn evict_tag(&mut self, set: usize, way: usize) {
		if self.tags.get(set, way).valid {
			self.release_data(set, way);
			self.tags.invalidate(set, way);
			self.policy.invalidate(set, way);
		}
	}

	/// Installs `bytes` as a fresh, uniquely-owned data entry keyed by
	/// `map_key`, cascading-evicting whatever LL already occupies the
	/// sampled data way.
	fn allocate_fresh(&mut self, set: usize, way: usize, bytes: &[u8], map_key: u32) {
		let data_way = self.data.preinsert(set, &mut self.rng);
		if let Some(old_head) = self.data.entry(set, data_way).and_then(|e| e.head) {
			log::debug!(target: "dedup-bdi-cache", "uni-doppelganger cascading eviction of data way set={} way={}", set, data_way);
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
		self.data.postinsert(set, data_way, bytes, map_key as u64);
		*self.data.head_mut(set, data_way) = Some(TagId { set, way });
		self.map_index.insert(map_key as u64, set, data_way);
		self.tags.change_in_place(set, way, set, data_way);
	}

	/// The approximate-region dedup path: a map match against a still-live
	/// entry is accepted as similar without a byte compare (that's the
	/// point of the approximation); a match against a now-dead slot is taken
	/// over; anything else allocates fresh.
	fn classify_and_install(&mut self, set: usize, way: usize, bytes: &[u8], map_key: u32) {
		let candidate = self.map_index.lookup(map_key as u64).next().copied();
		match candidate {
			Some(entry) if self.data.entry(entry.set, entry.way).is_none() => {
				log::debug!(target: "dedup-bdi-cache", "uni-doppelganger stale map pointer taken over at set={} way={}", entry.set, entry.way);
				self.data.postinsert(entry.set, entry.way, bytes, map_key as u64);
				*self.data.head_mut(entry.set, entry.way) = Some(TagId { set, way });
				self.tags.change_in_place(set, way, entry.set, entry.way);
				self.map_index.insert(map_key as u64, entry.set, entry.way);
			}
			Some(entry) => {
				self.stats.record_dedup_hit();
				let id = TagId { set, way };
				let head = self.data.head_mut(entry.set, entry.way);
				tag::link_front(&mut self.tags, head, id);
				self.tags.change_in_place(set, way, entry.set, entry.way);
				self.data.incr_ref(entry.set, entry.way);
			}
			None => {
				self.allocate_fresh(set, way, bytes, map_key);
			}
		}
	}

	/// Resolves whether `line_addr` falls in an annotated region and, if so,
	/// returns its map fingerprint alongside the region for envelope checks.
	fn resolve_map(&self, line_addr: u64, bytes: &[u8]) -> Option<u32> {
		let byte_addr = line_addr * self.config.line_size as u64;
		let region = self.regions.resolve(byte_addr, self.config.line_size)?;
		Some(map::calculate_map(bytes, region.data_type, self.config.map_size, region.min_value, region.max_value))
	}
}

impl Cache for UniDoppelganger {
	fn access(&mut self, req: &mut MemReq, recorder: &mut EventRecorder) -> TimingRecord {
		let (set, tag) = addr_to_set_tag(req.line_addr, self.config.num_sets);
		log::trace!(target: "dedup-bdi-cache", "uni-doppelganger access addr=0x{:x} set={} type={}", req.line_addr, set, req.access_type.name());

		if self.cc.start_access(req) {
			log::trace!(target: "dedup-bdi-cache", "uni-doppelganger benign race skip addr=0x{:x}", req.line_addr);
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
				if let Some(bytes) = req.data.clone() {
					if let Some(map_key) = self.resolve_map(req.line_addr, &bytes) {
						let data_set = self.tags.get(set, way).data_set;
						let data_way = self.tags.get(set, way).data_way;
						let unchanged = self.data.entry(data_set, data_way).map(|e| e.hash == map_key as u64).unwrap_or(false);
						if !unchanged {
							self.release_data(set, way);
							self.classify_and_install(set, way, &bytes, map_key);
							wrote_new_data = true;
						}
					}
					// Exact writes never re-key: the data entry carries no
					// real content to compare against, so there is nothing
					// to do beyond the coherence-state update above.
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

		let bytes = req.data.clone().unwrap_or_else(|| vec![0u8; self.config.line_size as usize]);
		self.tags.install(set, victim_way, tag, MESIState::I, set, 0, 0);
		match self.resolve_map(req.line_addr, &bytes) {
			Some(map_key) => self.classify_and_install(set, victim_way, &bytes, map_key),
			None => {
				let map_key = self.random_map();
				let placeholder = vec![0u8; self.config.line_size as usize];
				self.allocate_fresh(set, victim_way, &placeholder, map_key);
			}
		}
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
			valid_segments: valid_lines * self.config.segments_per_line() as u64,
			..self.stats
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::coherence::NullCc;
	use crate::region::{ApproximateRegion, DataType, DataValue};
	use crate::replacement::LruPolicy;
	use crate::request::AccessType;

	fn make_cache(num_sets: usize, assoc: usize, regions: ApproximateRegionTable) -> UniDoppelganger {
		env_logger::try_init().ok();
		let config = CacheConfig { num_sets, tag_assoc: assoc, data_assoc: assoc, ..CacheConfig::default() };
		UniDoppelganger::new(config, Box::new(LruPolicy::new(num_sets, assoc)), Box::new(NullCc::default()), regions, 5)
	}

	fn float_region() -> ApproximateRegionTable {
		let mut regions = ApproximateRegionTable::new();
		regions.insert(ApproximateRegion {
			low_addr: 0,
			high_addr: 0x10_000,
			data_type: DataType::F32,
			min_value: DataValue::F32(0.0),
			max_value: DataValue::F32(1000.0),
		});
		regions
	}

	fn line_of(value: f32) -> Vec<u8> {
		let mut data = Vec::new();
		for _ in 0..16 {
			data.extend_from_slice(&value.to_le_bytes());
		}
		data
	}

	#[test]
	fn similar_values_in_region_dedup_by_map() {
		let mut cache = make_cache(1, 4, float_region());
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x0, AccessType::GETS, 0).with_data(line_of(10.0));
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x40, AccessType::GETS, 0).with_data(line_of(10.0));
		cache.access(&mut req2, &mut recorder);

		assert_eq!(cache.stats().misses, 2);
		assert_eq!(cache.stats().dedup_hits, 1);
	}

	#[test]
	fn exact_lines_never_dedup() {
		let mut cache = make_cache(1, 4, ApproximateRegionTable::new());
		let mut recorder = EventRecorder::new();
		let mut req1 = MemReq::new(0, 0x0, AccessType::GETS, 0).with_data(vec![0xab; 64]);
		cache.access(&mut req1, &mut recorder);
		let mut req2 = MemReq::new(1, 0x40, AccessType::GETS, 0).with_data(vec![0xab; 64]);
		cache.access(&mut req2, &mut recorder);

		assert_eq!(cache.stats().dedup_hits, 0);
	}
}
