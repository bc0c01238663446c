// ExactBDI: BDI compression with no content or map deduplication. Every
// tag has exactly one data entry; a miss compresses the incoming line,
// frees the victim's old entry (if any), and allocates room in the set's
// segmented data store, possibly cascading-evicting a neighbor entry when
// compression has fragmented the set. Modeled on a plain BDI array with no
// hash array and no refcounting — eviction just frees the one entry.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bdi;
use crate::cache::{addr_to_set_tag, pick_victim, set_tag_to_addr, Cache};
use crate::config::CacheConfig;
use crate::coherence::CoherenceController;
use crate::data_bdi::DataSet;
use crate::events::{connect, EventKind, EventRecorder, TimingRecord};
use crate::region::{ApproximateRegionTable, DataType};
use crate::replacement::ReplacementPolicy;
use crate::request::{MemReq, MESIState};
use crate::stats::CacheStats;
use crate::tag::TagArray;

pub struct ExactBdi {
	config: CacheConfig,
	tags: TagArray,
	data: Vec<DataSet>,
	policy: Box<dyn ReplacementPolicy>,
	cc: Box<dyn CoherenceController>,
	regions: ApproximateRegionTable,
	rng: StdRng,
	stats: CacheStats,
}

impl ExactBdi {
	pub fn new(
		config: CacheConfig,
		policy: Box<dyn ReplacementPolicy>,
		cc: Box<dyn CoherenceController>,
		regions: ApproximateRegionTable,
		seed: u64,
	) -> Self {
		let tags = TagArray::new(config.num_sets, config.tag_assoc);
		let data = (0..config.num_sets).map(|_| DataSet::new(config.data_assoc, config.segments_per_line())).collect();
		ExactBdi { config, tags, data, policy, cc, regions, rng: StdRng::seed_from_u64(seed), stats: CacheStats::default() }
	}

	/// Masks low bits only for `f32`/`f64`-annotated regions before
	/// compressing; integer-annotated and unannotated lines compress as-is.
	fn compress_line(&self, line_addr: u64, bytes: &mut [u8]) -> bdi::Encoding {
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
		bdi::compress(bytes)
	}
}

impl Cache for ExactBdi {
	fn access(&mut self, req: &mut MemReq, recorder: &mut EventRecorder) -> TimingRecord {
		let (set, tag) = addr_to_set_tag(req.line_addr, self.config.num_sets);
		log::trace!(target: "dedup-bdi-cache", "exact-bdi access addr=0x{:x} set={} type={}", req.line_addr, set, req.access_type.name());

		if self.cc.start_access(req) {
			log::trace!(target: "dedup-bdi-cache", "exact-bdi benign race skip addr=0x{:x}", req.line_addr);
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
					let encoding = self.compress_line(req.line_addr, &mut bytes);
					let needed = encoding.segments();
					let old_data_way = self.tags.get(set, way).data_way;
					self.data[set].decr_ref(old_data_way);
					if let Some(outcome) = self.data[set].preinsert(needed, self.config.random_loop_trial, &mut self.rng) {
						for &(_, head) in &outcome.evicted {
							if let Some(owner) = head {
								self.tags.invalidate(owner.set, owner.way);
								self.policy.invalidate(owner.set, owner.way);
							}
						}
						self.data[set].postinsert(outcome.way, outcome.start, needed, encoding, 0);
						*self.data[set].head_mut(outcome.way) = Some(crate::tag::TagId { set, way });
						self.tags.change_in_place(set, way, set, outcome.way);
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
			log::debug!(target: "dedup-bdi-cache", "exact-bdi evicting tag set={} way={} for addr=0x{:x}", set, victim_way, req.line_addr);
			let victim = self.tags.get(set, victim_way);
			let victim_state = victim.state;
			let wb_addr = set_tag_to_addr(set, victim.tag, self.config.num_sets);
			victim_was_dirty = victim_state == MESIState::M;
			eviction_done_cycle = self.cc.process_eviction(req, wb_addr, victim_state, req.cycle);
			let old_data_way = self.tags.get(set, victim_way).data_way;
			self.data[set].decr_ref(old_data_way);
			self.tags.invalidate(set, victim_way);
			self.policy.invalidate(set, victim_way);
		}

		let mut bytes = req.data.clone().unwrap_or_else(|| vec![0u8; self.config.line_size as usize]);
		let encoding = self.compress_line(req.line_addr, &mut bytes);
		let needed = encoding.segments();
		let outcome = self.data[set]
			.preinsert(needed, self.config.random_loop_trial, &mut self.rng)
			.expect("segmented data set exhausted: data_assoc too small for workload");
		if !outcome.evicted.is_empty() {
			log::debug!(target: "dedup-bdi-cache", "exact-bdi cascading eviction in set={}: {} entries freed for {} needed segments", set, outcome.evicted.len(), needed);
		}
		for &(_, head) in &outcome.evicted {
			if let Some(owner) = head {
				self.tags.invalidate(owner.set, owner.way);
				self.policy.invalidate(owner.set, owner.way);
			}
		}
		self.data[set].postinsert(outcome.way, outcome.start, needed, encoding, 0);
		*self.data[set].head_mut(outcome.way) = Some(crate::tag::TagId { set, way: victim_way });

		let state = self.cc.process_access(req, MESIState::I, false);
		self.tags.install(set, victim_way, tag, state, set, outcome.way, 0);
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

	fn make_cache(num_sets: usize, assoc: usize) -> ExactBdi {
		env_logger::try_init().ok();
		let config = CacheConfig { num_sets, tag_assoc: assoc, data_assoc: assoc, ..CacheConfig::default() };
		ExactBdi::new(config, Box::new(LruPolicy::new(num_sets, assoc)), Box::new(NullCc::default()), ApproximateRegionTable::new(), 7)
	}

	#[test]
	fn repeated_access_is_a_hit() {
		let mut cache = make_cache(4, 4);
		let mut recorder = EventRecorder::new();
		let mut req = MemReq::new(0, 0x40, AccessType::GETS, 0).with_data(vec![0u8; 64]);
		cache.access(&mut req, &mut recorder);
		let mut req2 = MemReq::new(1, 0x40, AccessType::GETS, 0);
		cache.access(&mut req2, &mut recorder);
		assert_eq!(cache.stats().hits, 1);
		assert_eq!(cache.stats().misses, 1);
	}

	#[test]
	fn eviction_frees_the_victims_segments() {
		let mut cache = make_cache(1, 2);
		let mut recorder = EventRecorder::new();
		for line in 0..3u64 {
			let mut req = MemReq::new(line, line, AccessType::GETS, 0).with_data(vec![0xffu8; 64]);
			cache.access(&mut req, &mut recorder);
		}
		assert_eq!(cache.stats().misses, 3);
	}
}
