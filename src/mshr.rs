// MSHR admission and per-bank serialization. Each bank owns a fixed-size
// MSHR pool and a lock; a high-priority (demand) access always contends
// for a free slot, while a low-priority (e.g. prefetch or writeback)
// access only succeeds if the bank's high-priority slot went unused on the
// *previous* cycle, so demand traffic is never starved by background
// work. Modeled on `highPrioAccess`/`tryLowPrioAccess`'s one-cycle-lag
// admission rule.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::request::{Cycle, MemReq};

/// One bank's admission state. `advance_cycle` is called implicitly by
/// every access; the one-cycle lag in `high_prio_used_last_cycle` is the
/// whole of the low-priority admission rule.
struct MshrPool {
	capacity: usize,
	in_use: usize,
	high_prio_used_this_cycle: bool,
	high_prio_used_last_cycle: bool,
	last_cycle: Cycle,
}

impl MshrPool {
	fn new(capacity: usize) -> Self {
		MshrPool { capacity, in_use: 0, high_prio_used_this_cycle: false, high_prio_used_last_cycle: false, last_cycle: 0 }
	}

	fn advance_cycle(&mut self, cycle: Cycle) {
		if cycle != self.last_cycle {
			self.high_prio_used_last_cycle = self.high_prio_used_this_cycle;
			self.high_prio_used_this_cycle = false;
			self.last_cycle = cycle;
		}
	}

	fn high_prio_access(&mut self, cycle: Cycle) -> bool {
		self.advance_cycle(cycle);
		if self.in_use >= self.capacity {
			return false;
		}
		self.in_use += 1;
		self.high_prio_used_this_cycle = true;
		true
	}

	fn try_low_prio_access(&mut self, cycle: Cycle) -> bool {
		self.advance_cycle(cycle);
		if self.high_prio_used_last_cycle || self.in_use >= self.capacity {
			return false;
		}
		self.in_use += 1;
		true
	}

	fn release(&mut self) {
		debug_assert!(self.in_use > 0, "MSHR release with none in use");
		self.in_use -= 1;
	}
}

/// A bank-partitioned MSHR pool with a pending-request queue per bank for
/// accesses that lost admission and must retry. Per-bank locking (rather
/// than one pool-wide lock) follows a `parking_lot::Mutex`-per-shard
/// idiom, so banks contend independently instead of serializing through
/// a single lock.
pub struct MshrBanks {
	banks: Vec<Mutex<MshrPool>>,
	pending: Vec<Mutex<VecDeque<MemReq>>>,
}

impl MshrBanks {
	pub fn new(num_banks: usize, mshrs_per_bank: usize) -> Self {
		let banks = (0..num_banks).map(|_| Mutex::new(MshrPool::new(mshrs_per_bank))).collect();
		let pending = (0..num_banks).map(|_| Mutex::new(VecDeque::new())).collect();
		MshrBanks { banks, pending }
	}

	pub fn num_banks(&self) -> usize {
		self.banks.len()
	}

	pub fn high_prio_access(&self, bank: usize, cycle: Cycle) -> bool {
		self.banks[bank].lock().high_prio_access(cycle)
	}

	pub fn try_low_prio_access(&self, bank: usize, cycle: Cycle) -> bool {
		self.banks[bank].lock().try_low_prio_access(cycle)
	}

	pub fn release(&self, bank: usize) {
		self.banks[bank].lock().release();
	}

	/// Parks a request that lost MSHR admission so it can be retried on a
	/// later cycle, rather than dropped.
	pub fn defer(&self, bank: usize, req: MemReq) {
		log::debug!(target: "dedup-bdi-cache", "bank {} MSHRs exhausted, parking addr=0x{:x}", bank, req.line_addr);
		self.pending[bank].lock().push_back(req);
	}

	pub fn take_pending(&self, bank: usize) -> Option<MemReq> {
		self.pending[bank].lock().pop_front()
	}

	pub fn pending_len(&self, bank: usize) -> usize {
		self.pending[bank].lock().len()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::request::AccessType;

	#[test]
	fn high_prio_exhausts_capacity() {
		let banks = MshrBanks::new(1, 2);
		assert!(banks.high_prio_access(0, 10));
		assert!(banks.high_prio_access(0, 10));
		assert!(!banks.high_prio_access(0, 10));
		banks.release(0);
		assert!(banks.high_prio_access(0, 10));
	}

	#[test]
	fn low_prio_blocked_by_prior_cycle_high_prio_use() {
		let banks = MshrBanks::new(1, 4);
		assert!(banks.high_prio_access(0, 1));
		// Same cycle: low prio is unaffected by same-cycle high prio use.
		assert!(banks.try_low_prio_access(0, 1));
		// Next cycle: high prio was used on cycle 1, so low prio is blocked.
		assert!(!banks.try_low_prio_access(0, 2));
		// Cycle 3: no high-prio use happened on cycle 2, so low prio succeeds.
		assert!(banks.try_low_prio_access(0, 3));
	}

	#[test]
	fn pending_queue_is_fifo() {
		let banks = MshrBanks::new(1, 1);
		banks.defer(0, MemReq::new(0, 0x100, AccessType::GETS, 0));
		banks.defer(0, MemReq::new(0, 0x200, AccessType::GETS, 0));
		assert_eq!(banks.take_pending(0).unwrap().line_addr, 0x100);
		assert_eq!(banks.take_pending(0).unwrap().line_addr, 0x200);
		assert!(banks.take_pending(0).is_none());
	}
}
