// Hex formatting helpers for log lines (line addresses, content hashes,
// map fingerprints). Grounded in the teacher's `display::hex` used throughout
// `table.rs` for logging partial keys.

pub fn hex(data: &[u8]) -> String {
	hex::encode(data)
}

pub struct Addr(pub u64);

impl std::fmt::Display for Addr {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "0x{:x}", self.0)
	}
}
