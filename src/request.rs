// The request record that flows through a cache access, and the small
// enums attached to it. Named and shaped after a memory hierarchy's
// `AccessType`, `InvType` and `MESIState` tables.

pub type Cycle = u64;
pub type Address = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
	GETS,
	GETX,
	PUTS,
	PUTX,
}

impl AccessType {
	pub fn name(self) -> &'static str {
		match self {
			AccessType::GETS => "GETS",
			AccessType::GETX => "GETX",
			AccessType::PUTS => "PUTS",
			AccessType::PUTX => "PUTX",
		}
	}

	/// Reads that should refresh the replacement policy's recency state.
	/// Both GETS and GETX do; PUTS/PUTX writebacks from a higher level do
	/// not re-rank the line they're depositing.
	pub fn updates_replacement(self) -> bool {
		matches!(self, AccessType::GETS | AccessType::GETX)
	}

	pub fn is_write(self) -> bool {
		matches!(self, AccessType::GETX | AccessType::PUTX)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
	INV,
	INVX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MESIState {
	I,
	S,
	E,
	M,
}

/// A single in-flight memory request. The coherence controller (an
/// external collaborator) may rewrite `access_type` and `state` during
/// `start_access`/`process_access`.
#[derive(Debug, Clone)]
pub struct MemReq {
	pub cycle: Cycle,
	pub line_addr: Address,
	pub access_type: AccessType,
	pub src_id: u32,
	pub state: MESIState,
	/// Raw bytes of the incoming/outgoing line, when known by the access
	/// procedure (always 0..line_size bytes). `None` for pure coherence
	/// traffic (e.g. invalidations) that carries no payload.
	pub data: Option<Vec<u8>>,
}

impl MemReq {
	pub fn new(cycle: Cycle, line_addr: Address, access_type: AccessType, src_id: u32) -> Self {
		MemReq { cycle, line_addr, access_type, src_id, state: MESIState::I, data: None }
	}

	pub fn with_data(mut self, data: Vec<u8>) -> Self {
		self.data = Some(data);
		self
	}
}
