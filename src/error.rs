// Error taxonomy for the cache core.
//
// Per spec: invariant violations and impossible compression classifications
// are fatal (`panic!`/`debug_assert!`), not `Result`s — there is nothing a
// caller could do to recover from a corrupted tag/data linked list mid
// access. The one genuinely fallible surface is configuration validation,
// which happens once at cache construction, well away from any hot path.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	/// A `CacheConfig` field combination the arrays cannot be built from
	/// (non-power-of-two set counts, assoc not dividing line counts, etc).
	InvalidConfiguration(String),
	/// Reserved for cross-checks a caller can recover from by retrying with
	/// different input, as opposed to the fatal invariant violations that
	/// panic. Not constructed by this crate today, kept because it is the
	/// shape a corruption-style error takes at this seam.
	Corruption(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InvalidConfiguration(msg) => write!(f, "invalid configuration: {}", msg),
			Error::Corruption(msg) => write!(f, "corruption: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
