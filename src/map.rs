// Doppelganger map fingerprint: a cheap summary of a line's numeric
// content — truncated average and truncated range, bit-packed into a
// single `u32` — used as an approximate equality hint ahead of a full
// byte compare. Modeled on `uniDoppelgangerDataArray::calculateMap`'s
// averaging-and-truncation scheme.

use crate::region::{DataType, DataValue};

/// Sign-correct truncation to the low `n` bits, via a left/right shift
/// pair rather than a plain mask.
fn low_bits(x: i64, n: u32) -> u32 {
	if n == 0 {
		return 0;
	}
	debug_assert!(n <= 32);
	let shift = 64 - n;
	(((x << shift) as u64) >> shift) as u32
}

fn decode_elements(data: &[u8], data_type: DataType) -> Vec<f64> {
	let size = data_type.element_size();
	data.chunks_exact(size)
		.map(|chunk| {
			let mut buf = [0u8; 8];
			buf[..size].copy_from_slice(chunk);
			match data_type {
				DataType::U8 => buf[0] as f64,
				DataType::I8 => (buf[0] as i8) as f64,
				DataType::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
				DataType::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
				DataType::U32 => u32::from_le_bytes(buf[..4].try_into().unwrap()) as f64,
				DataType::I32 => i32::from_le_bytes(buf[..4].try_into().unwrap()) as f64,
				DataType::U64 => u64::from_le_bytes(buf) as f64,
				DataType::I64 => i64::from_le_bytes(buf) as f64,
				DataType::F32 => f32::from_le_bytes(buf[..4].try_into().unwrap()) as f64,
				DataType::F64 => f64::from_le_bytes(buf),
			}
		})
		.collect()
}

/// Computes the packed map fingerprint for a line of `data_type` elements,
/// given the annotated envelope `[min, max]` for the region it belongs to.
/// `map_size` is the bit width given to the average component; the range
/// component gets `map_size / 2` bits, shifted above it.
///
/// Integer data must fall within `[min, max]`; a value outside the annotated
/// envelope is a fatal invariant violation and panics, matching
/// `uniDoppelgangerDataArray::calculateMap`'s `panic()` calls on overflow.
/// Float data is not checked (a rogue NaN/inf still produces *some* map
/// value rather than aborting the simulation).
pub fn calculate_map(data: &[u8], data_type: DataType, map_size: u32, min: DataValue, max: DataValue) -> u32 {
	let values = decode_elements(data, data_type);
	if values.is_empty() {
		return 0;
	}

	let sum: f64 = values.iter().sum();
	let avg = sum / values.len() as f64;
	let data_min = values.iter().cloned().fold(f64::INFINITY, f64::min);
	let data_max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
	let range = data_max - data_min;

	let (min_f, max_f) = (min.as_f64(), max.as_f64());
	if !data_type.is_float() {
		if data_max > max_f {
			panic!("map value {} exceeds the annotated region's max ({})", data_max, max_f);
		}
		if data_min < min_f {
			panic!("map value {} is below the annotated region's min ({})", data_min, min_f);
		}
	}

	// Once map_size exceeds the element's own bit width there's nothing
	// to gain from step-scaling, so the raw avg/range is used directly;
	// otherwise both are rescaled into a `map_size`-bit span via the
	// envelope-derived step.
	let element_bits = (data_type.element_size() * 8) as u32;
	let (avg_scaled, range_scaled) = if map_size > element_bits {
		(avg, range)
	} else {
		let step = (max_f - min_f) / 2f64.powi((map_size as i32) - 1);
		if step == 0.0 {
			(0.0, 0.0)
		} else {
			(avg / step, range / step)
		}
	};

	let avg_map = low_bits(avg_scaled.round() as i64, map_size);
	let range_map = low_bits(range_scaled.round() as i64, map_size / 2);

	avg_map | (range_map << map_size)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn constant_line_has_zero_range() {
		let mut data = Vec::new();
		for _ in 0..16 {
			data.extend_from_slice(&10.0f32.to_le_bytes());
		}
		let map = calculate_map(&data, DataType::F32, 16, DataValue::F32(0.0), DataValue::F32(2000.0));
		// range component occupies bits [16, 24); all zero for a constant line.
		assert_eq!((map >> 16) & 0xff, 0);
	}

	#[test]
	fn differing_averages_yield_differing_maps() {
		let mut low = Vec::new();
		let mut high = Vec::new();
		for _ in 0..16 {
			low.extend_from_slice(&1.0f32.to_le_bytes());
			high.extend_from_slice(&1000.0f32.to_le_bytes());
		}
		let (min, max) = (DataValue::F32(0.0), DataValue::F32(2000.0));
		assert_ne!(calculate_map(&low, DataType::F32, 16, min, max), calculate_map(&high, DataType::F32, 16, min, max));
	}

	#[test]
	#[should_panic(expected = "exceeds the annotated region's max")]
	fn integer_value_outside_envelope_panics() {
		let data: Vec<u8> = vec![200u8; 8];
		calculate_map(&data, DataType::U8, 4, DataValue::U8(0), DataValue::U8(100));
	}

	#[test]
	fn integer_within_envelope_is_step_scaled() {
		let data: Vec<u8> = vec![128u8; 8];
		let map = calculate_map(&data, DataType::U8, 4, DataValue::U8(0), DataValue::U8(255));
		assert!(map != 0);
	}
}
