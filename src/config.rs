// Cache configuration, plus the one genuinely fallible surface in this
// crate: validating that a config is internally consistent before any
// array is built from it. Follows an `Options`/`ColumnOptions`
// validate-at-construction style rather than deferring bad input to a
// panic deep inside a lookup.

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CacheConfig {
	/// Number of tag-array sets.
	pub num_sets: usize,
	/// Tag-array ways per set.
	pub tag_assoc: usize,
	/// Data-array ways (capacity) per set; may differ from `tag_assoc` in
	/// the dedup variants, where many tags can point at one data entry.
	pub data_assoc: usize,
	/// Line size in bytes; must be a multiple of 8 (segment granularity).
	pub line_size: u32,
	/// Bits in a content-hash or map-hint key.
	pub hash_size: u32,
	/// Bits given to the Doppelganger average component; the range
	/// component gets half this.
	pub map_size: u32,
	/// Bits masked off by the approximation pre-pass before BDI
	/// compression, for `f32` elements in an annotated approximate region
	/// (spec §6's `float_cut_size`). Not applied to integer data — per
	/// spec §4.5, the approximation pass precedes compression "for data
	/// annotated float/double" only.
	pub float_cut_size: u32,
	/// As `float_cut_size`, for `f64` elements (spec §6's `double_cut_size`).
	pub double_cut_size: u32,
	/// Tag- and data-array access latency in cycles (spec §4.7's `accLat`);
	/// charged once per array touched by an access.
	pub acc_lat: u64,
	/// Invalidation latency in cycles (spec §6's `invLat`), handed to the
	/// coherence controller for eviction timing; the cache core itself only
	/// threads it through, never interprets it.
	pub inv_lat: u64,
	/// MSHRs per bank (spec §5).
	pub mshrs_per_bank: usize,
	/// Number of independently-locked banks (spec §5).
	pub num_banks: usize,
	/// Trials attempted when sampling victims for dedup/BDI-dedup
	/// preinsert (spec §4.2/§4.3's `k`).
	pub sample_trials: usize,
	/// Trials attempted when simulating a cascading free-space eviction
	/// in the segmented BDI data array (the original's
	/// `random_loop_trial`).
	pub random_loop_trial: usize,
}

impl CacheConfig {
	pub fn validate(&self) -> Result<()> {
		if !self.num_sets.is_power_of_two() {
			return Err(Error::InvalidConfiguration(format!("num_sets ({}) must be a power of two", self.num_sets)));
		}
		if self.tag_assoc == 0 {
			return Err(Error::InvalidConfiguration("tag_assoc must be nonzero".into()));
		}
		if self.data_assoc == 0 {
			return Err(Error::InvalidConfiguration("data_assoc must be nonzero".into()));
		}
		if self.line_size == 0 || self.line_size % 8 != 0 {
			return Err(Error::InvalidConfiguration(format!("line_size ({}) must be a nonzero multiple of 8", self.line_size)));
		}
		if self.hash_size == 0 || self.hash_size > 32 {
			return Err(Error::InvalidConfiguration(format!("hash_size ({}) must be in 1..=32", self.hash_size)));
		}
		if self.map_size == 0 || self.map_size > 21 {
			return Err(Error::InvalidConfiguration(format!(
				"map_size ({}) must be in 1..=21 so avg+range fit a u32",
				self.map_size
			)));
		}
		if self.float_cut_size > 32 {
			return Err(Error::InvalidConfiguration(format!("float_cut_size ({}) cannot exceed an f32's 32 bits", self.float_cut_size)));
		}
		if self.double_cut_size > 64 {
			return Err(Error::InvalidConfiguration(format!("double_cut_size ({}) cannot exceed an f64's 64 bits", self.double_cut_size)));
		}
		if self.acc_lat == 0 {
			return Err(Error::InvalidConfiguration("acc_lat must be nonzero".into()));
		}
		if self.mshrs_per_bank == 0 {
			return Err(Error::InvalidConfiguration("mshrs_per_bank must be nonzero".into()));
		}
		if self.num_banks == 0 {
			return Err(Error::InvalidConfiguration("num_banks must be nonzero".into()));
		}
		if self.sample_trials == 0 {
			return Err(Error::InvalidConfiguration("sample_trials must be nonzero".into()));
		}
		if self.random_loop_trial == 0 {
			return Err(Error::InvalidConfiguration("random_loop_trial must be nonzero".into()));
		}
		Ok(())
	}

	/// Number of `line_size / 8`-byte segments a data set's backing buffer
	/// is divided into.
	pub fn segments_per_line(&self) -> u32 {
		self.line_size / 8
	}
}

impl Default for CacheConfig {
	fn default() -> Self {
		CacheConfig {
			num_sets: 1024,
			tag_assoc: 16,
			data_assoc: 16,
			line_size: 64,
			hash_size: 16,
			map_size: 16,
			float_cut_size: 0,
			double_cut_size: 0,
			acc_lat: 4,
			inv_lat: 4,
			mshrs_per_bank: 16,
			num_banks: 4,
			sample_trials: 4,
			random_loop_trial: 10,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn default_config_is_valid() {
		assert!(CacheConfig::default().validate().is_ok());
	}

	#[test]
	fn rejects_non_power_of_two_sets() {
		let cfg = CacheConfig { num_sets: 1000, ..CacheConfig::default() };
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn rejects_line_size_not_multiple_of_eight() {
		let cfg = CacheConfig { line_size: 63, ..CacheConfig::default() };
		assert!(cfg.validate().is_err());
	}
}
