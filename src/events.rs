// Event-graph construction. A cache access doesn't compute a single
// latency number — it emits one or more `Event`s into an arena, wired
// together with `min_start_cycle` edges, and hands the caller a
// `TimingRecord` so a higher cache level can stitch its own events onto
// this one's. Modeled on `TimingCache::access` and its
// `HitEvent`/`MissStartEvent`/`MissResponseEvent`/`MissWritebackEvent`/
// `HitWritebackEvent` types.
//
// Events reference each other by arena index, never by pointer or closure
// — `connect` below is a free function, not a captured lambda, so the
// wiring is inspectable and doesn't borrow the recorder twice.
//
// `HitWriteback`/`MissWriteback` fire when a hit-write or a miss's
// dirty-eviction respectively forces old content out to a writeback;
// `Delay` covers the benign coherence-race skip (§7) and other
// fixed-cycle waits with no array work behind them.

use crate::request::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
	Hit,
	MissStart,
	MissResponse,
	MissWriteback,
	HitWriteback,
	Delay,
}

/// One node in the wait-graph. `min_start_cycle` is the earliest cycle the
/// timing simulator may schedule this event at, given everything it
/// depends on; `children` are edges to events that cannot start before
/// this one does, each carrying the extra delay imposed on that edge
/// (e.g. a miss response can't start until its miss start event plus the
/// fixed miss latency).
#[derive(Debug, Clone)]
pub struct Event {
	pub kind: EventKind,
	pub min_start_cycle: Cycle,
	pub children: Vec<(usize, Cycle)>,
}

/// Returned from an access to let the caller (a higher cache level, or the
/// top-level driver) stitch further events onto the ones this access
/// produced, without reaching into the recorder's internals.
#[derive(Debug, Clone, Copy)]
pub struct TimingRecord {
	pub event: usize,
	pub req_cycle: Cycle,
	pub resp_cycle: Cycle,
}

/// Arena owner of all events produced during a simulation run. Indices
/// into `events` are stable for the arena's lifetime — nothing is ever
/// removed.
#[derive(Debug, Default)]
pub struct EventRecorder {
	events: Vec<Event>,
}

impl EventRecorder {
	pub fn new() -> Self {
		EventRecorder { events: Vec::new() }
	}

	pub fn alloc(&mut self, kind: EventKind, min_start_cycle: Cycle) -> usize {
		let idx = self.events.len();
		self.events.push(Event { kind, min_start_cycle, children: Vec::new() });
		idx
	}

	pub fn add_child(&mut self, parent: usize, child: usize, delay: Cycle) {
		self.events[parent].children.push((child, delay));
	}

	pub fn get(&self, idx: usize) -> &Event {
		&self.events[idx]
	}

	pub fn len(&self) -> usize {
		self.events.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty()
	}
}

/// Wires `child` as a dependent of `prior`'s event when `prior` is present,
/// otherwise leaves `child` as a graph root. A free function rather than a
/// captured lambda: every call site passes the recorder and both ends
/// explicitly rather than capturing them.
pub fn connect(recorder: &mut EventRecorder, prior: Option<&TimingRecord>, child: usize, delay: Cycle) {
	if let Some(record) = prior {
		recorder.add_child(record.event, child, delay);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn connect_wires_child_only_when_prior_present() {
		let mut rec = EventRecorder::new();
		let a = rec.alloc(EventKind::MissStart, 0);
		let b = rec.alloc(EventKind::MissResponse, 0);
		let record = TimingRecord { event: a, req_cycle: 0, resp_cycle: 10 };

		connect(&mut rec, Some(&record), b, 5);
		assert_eq!(rec.get(a).children, vec![(b, 5)]);

		let c = rec.alloc(EventKind::Hit, 0);
		connect(&mut rec, None, c, 5);
		assert!(rec.get(a).children.iter().all(|&(child, _)| child != c));
	}
}
