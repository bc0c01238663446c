// Shared tag array, used by all four cache variants. Holds per-way
// validity/tag/coherence state, the (set, way) of the data entry this line
// currently points at, and — for the dedup variants — the doubly-linked-
// list pointers that thread every tag referencing the same data entry
// together. The list is arena-index based (`TagId`, not a pointer), and
// insertion is always at the head (LIFO), the same chain-splicing
// discipline as `evictAssociatedData`'s postinsert bookkeeping.

use crate::request::MESIState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagId {
	pub set: usize,
	pub way: usize,
}

#[derive(Debug, Clone)]
pub struct TagEntry {
	pub valid: bool,
	pub tag: u64,
	pub state: MESIState,
	/// Coordinates of the data entry this tag currently points at. For the
	/// dedup variants many tags can share one data entry.
	pub data_set: usize,
	pub data_way: usize,
	/// Doppelganger map fingerprint; zero and unused outside
	/// UniDoppelganger/DedupBDI.
	pub map: u32,
	prev: Option<TagId>,
	next: Option<TagId>,
}

impl TagEntry {
	fn empty() -> Self {
		TagEntry { valid: false, tag: 0, state: MESIState::I, data_set: 0, data_way: 0, map: 0, prev: None, next: None }
	}
}

pub struct TagArray {
	assoc: usize,
	sets: Vec<Vec<TagEntry>>,
}

impl TagArray {
	pub fn new(num_sets: usize, assoc: usize) -> Self {
		TagArray { assoc, sets: (0..num_sets).map(|_| (0..assoc).map(|_| TagEntry::empty()).collect()).collect() }
	}

	pub fn assoc(&self) -> usize {
		self.assoc
	}

	pub fn num_sets(&self) -> usize {
		self.sets.len()
	}

	pub fn get(&self, set: usize, way: usize) -> &TagEntry {
		&self.sets[set][way]
	}

	/// Linear scan within the set for a matching, valid tag — set
	/// associativity in these simulator cores is small enough (8-16 ways)
	/// that this beats maintaining a secondary index.
	pub fn lookup(&self, set: usize, tag: u64) -> Option<usize> {
		self.sets[set].iter().position(|e| e.valid && e.tag == tag)
	}

	pub fn need_eviction(&self, set: usize) -> bool {
		self.sets[set].iter().all(|e| e.valid)
	}

	/// The number of valid tag entries across every set.
	pub fn valid_count(&self) -> u64 {
		self.sets.iter().flatten().filter(|e| e.valid).count() as u64
	}

	pub fn first_invalid_way(&self, set: usize) -> Option<usize> {
		self.sets[set].iter().position(|e| !e.valid)
	}

	pub fn install(&mut self, set: usize, way: usize, tag: u64, state: MESIState, data_set: usize, data_way: usize, map: u32) {
		let entry = &mut self.sets[set][way];
		entry.valid = true;
		entry.tag = tag;
		entry.state = state;
		entry.data_set = data_set;
		entry.data_way = data_way;
		entry.map = map;
	}

	/// Repoints an already-installed tag at a different data entry without
	/// touching its coherence state — used when a dedup lookup finds that
	/// the line's new content matches an existing data entry exactly.
	pub fn change_in_place(&mut self, set: usize, way: usize, data_set: usize, data_way: usize) {
		let entry = &mut self.sets[set][way];
		entry.data_set = data_set;
		entry.data_way = data_way;
	}

	pub fn set_state(&mut self, set: usize, way: usize, state: MESIState) {
		self.sets[set][way].state = state;
	}

	pub fn invalidate(&mut self, set: usize, way: usize) {
		self.sets[set][way] = TagEntry::empty();
	}

	fn links(&self, id: TagId) -> (Option<TagId>, Option<TagId>) {
		let e = &self.sets[id.set][id.way];
		(e.prev, e.next)
	}

	/// Next node after `id` in whatever LL it currently threads through.
	/// Used by cache variants walking a doomed data entry's whole referrer
	/// list (e.g. cascading a data-set eviction) rather than splicing a
	/// single node out.
	pub fn next(&self, id: TagId) -> Option<TagId> {
		self.sets[id.set][id.way].next
	}

	fn set_prev(&mut self, id: TagId, prev: Option<TagId>) {
		self.sets[id.set][id.way].prev = prev;
	}

	fn set_next(&mut self, id: TagId, next: Option<TagId>) {
		self.sets[id.set][id.way].next = next;
	}
}

/// Inserts `id` at the head of the list rooted at `*head`, LIFO, per spec
/// §4.1's dedup linked-list invariant. A free function rather than a
/// method so `head` (owned by whatever data entry this list belongs to)
/// and `tags` can be borrowed independently of each other.
pub fn link_front(tags: &mut TagArray, head: &mut Option<TagId>, id: TagId) {
	tags.set_prev(id, None);
	tags.set_next(id, *head);
	if let Some(old_head) = *head {
		tags.set_prev(old_head, Some(id));
	}
	*head = Some(id);
}

/// Removes `id` from the list rooted at `*head`, patching neighbors.
pub fn unlink(tags: &mut TagArray, head: &mut Option<TagId>, id: TagId) {
	let (prev, next) = tags.links(id);
	match prev {
		Some(p) => tags.set_next(p, next),
		None => *head = next,
	}
	if let Some(n) = next {
		tags.set_prev(n, prev);
	}
	tags.set_prev(id, None);
	tags.set_next(id, None);
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn lookup_finds_installed_tag() {
		let mut tags = TagArray::new(4, 4);
		tags.install(0, 2, 0xabc, MESIState::S, 0, 2, 0);
		assert_eq!(tags.lookup(0, 0xabc), Some(2));
		assert_eq!(tags.lookup(0, 0xdef), None);
	}

	#[test]
	fn need_eviction_true_only_when_set_is_full() {
		let mut tags = TagArray::new(1, 2);
		assert!(!tags.need_eviction(0));
		tags.install(0, 0, 1, MESIState::S, 0, 0, 0);
		assert!(!tags.need_eviction(0));
		tags.install(0, 1, 2, MESIState::S, 0, 1, 0);
		assert!(tags.need_eviction(0));
	}

	#[test]
	fn linked_list_head_insertion_is_lifo() {
		let mut tags = TagArray::new(1, 3);
		tags.install(0, 0, 1, MESIState::S, 0, 0, 0);
		tags.install(0, 1, 2, MESIState::S, 0, 0, 0);
		tags.install(0, 2, 3, MESIState::S, 0, 0, 0);

		let mut head = None;
		link_front(&mut tags, &mut head, TagId { set: 0, way: 0 });
		link_front(&mut tags, &mut head, TagId { set: 0, way: 1 });
		link_front(&mut tags, &mut head, TagId { set: 0, way: 2 });
		assert_eq!(head, Some(TagId { set: 0, way: 2 }));

		unlink(&mut tags, &mut head, TagId { set: 0, way: 1 });
		// way 1 removed from the middle: head is unaffected, and the list
		// threads way 2 -> way 0 after the middle entry is spliced out.
		assert_eq!(head, Some(TagId { set: 0, way: 2 }));
		let (_, next_of_head) = tags.links(TagId { set: 0, way: 2 });
		assert_eq!(next_of_head, Some(TagId { set: 0, way: 0 }));
	}
}
