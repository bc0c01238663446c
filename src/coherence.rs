// CoherenceController: an external collaborator contract. The cache core
// never decides MESI state transitions itself — it hands the incoming
// request to this collaborator and acts on the state it gets back. Full
// multi-level coherence is out of scope here, so this crate only needs
// the trait plus a pass-through double for tests.

use crate::request::{AccessType, Address, Cycle, MESIState, MemReq};

/// `start_access` runs before the tag/data lookup and may rewrite the
/// request's `access_type` (e.g. folding a `GETX` that hits in `S` state
/// into an upgrade); `process_access` runs after the lookup with the
/// resulting line state and returns the state to record.
pub trait CoherenceController: Send {
	/// Returns `true` when this access is a benign race (§7) that must be
	/// skipped outright: the caller leaves every array untouched and
	/// returns `req.cycle` with no state change.
	fn start_access(&mut self, req: &mut MemReq) -> bool;

	/// Whether a miss should actually install a line (a pure invalidation
	/// or a writeback-only request may pass through without allocating).
	fn should_allocate(&self, req: &MemReq) -> bool;

	fn process_access(&mut self, req: &MemReq, line_state: MESIState, is_hit: bool) -> MESIState;

	/// Cost of evicting `victim_state`'s line at `wb_addr`, which cannot
	/// start before `start_cycle`; returns the cycle the eviction (and any
	/// writeback it implies) completes. Called once per evicted tag,
	/// before the vacated slot is reused.
	fn process_eviction(&mut self, req: &MemReq, wb_addr: Address, victim_state: MESIState, start_cycle: Cycle) -> Cycle;

	/// Runs after the access's response cycle has been computed, mirroring
	/// `start_access`'s bracket. No return value: by this point the access
	/// is committed and nothing can still turn it into a skip.
	fn end_access(&mut self, req: &MemReq);
}

/// A pass-through double: never rewrites the request, and grants the
/// state implied by the access type with no sharer tracking. Good enough
/// for exercising the array/dedup/BDI logic in isolation, the way the
/// spec's Non-goals intend — a real multi-level protocol is out of scope.
#[derive(Debug, Default)]
pub struct NullCc;

impl CoherenceController for NullCc {
	fn start_access(&mut self, _req: &mut MemReq) -> bool {
		false
	}

	fn should_allocate(&self, _req: &MemReq) -> bool {
		true
	}

	fn process_access(&mut self, req: &MemReq, line_state: MESIState, is_hit: bool) -> MESIState {
		if !is_hit {
			return if req.access_type.is_write() { MESIState::M } else { MESIState::E };
		}
		match (req.access_type, line_state) {
			(AccessType::GETX, _) => MESIState::M,
			(AccessType::GETS, MESIState::I) => MESIState::S,
			(AccessType::GETS, state) => state,
			(AccessType::PUTS, state) => state,
			(AccessType::PUTX, _) => MESIState::M,
		}
	}

	/// No real protocol behind this double, so an eviction adds no extra
	/// latency beyond what the cache core already charges for the tag/data
	/// touches around it.
	fn process_eviction(&mut self, _req: &MemReq, _wb_addr: Address, _victim_state: MESIState, start_cycle: Cycle) -> Cycle {
		start_cycle
	}

	fn end_access(&mut self, _req: &MemReq) {}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn null_cc_grants_exclusive_on_write_miss() {
		let mut cc = NullCc::default();
		let req = MemReq::new(0, 0x1000, AccessType::GETX, 0);
		assert_eq!(cc.process_access(&req, MESIState::I, false), MESIState::M);
	}

	#[test]
	fn null_cc_grants_shared_on_read_miss() {
		let mut cc = NullCc::default();
		let req = MemReq::new(0, 0x1000, AccessType::GETS, 0);
		assert_eq!(cc.process_access(&req, MESIState::I, false), MESIState::E);
	}

	#[test]
	fn null_cc_never_skips_and_adds_no_eviction_latency() {
		let mut cc = NullCc::default();
		let mut req = MemReq::new(0, 0x1000, AccessType::GETS, 0);
		assert!(!cc.start_access(&mut req));
		assert!(cc.should_allocate(&req));
		assert_eq!(cc.process_eviction(&req, 0x2000, MESIState::M, 104), 104);
	}
}
