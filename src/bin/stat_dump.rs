// Admin-feature-gated driver: runs a scripted access trace through one of
// the four cache organizations and prints its counters. Structured as a
// separate `admin` binary (structopt + env_logger, operational
// introspection over the library crate) scaled down to what an in-memory
// simulator core needs — there is no on-disk state to administer here,
// only a trace to replay.

use std::fs;
use std::path::PathBuf;

use structopt::StructOpt;

use dedup_bdi_cache::coherence::NullCc;
use dedup_bdi_cache::region::ApproximateRegionTable;
use dedup_bdi_cache::replacement::LruPolicy;
use dedup_bdi_cache::{build_cache, AccessType, CacheConfig, MemReq, Variant};

#[derive(StructOpt)]
#[structopt(name = "stat-dump", about = "Replay a trace through a cache variant and print its stats")]
struct Opt {
	/// Which cache organization to build.
	#[structopt(long, default_value = "dedup-bdi", possible_values = &["exact-bdi", "approximate-dedup", "uni-doppelganger", "dedup-bdi"])]
	variant: String,

	/// Trace file: one access per line, `<GETS|GETX|PUTS|PUTX> <hex addr>`.
	/// Omit to replay a small built-in synthetic trace.
	#[structopt(long, parse(from_os_str))]
	trace: Option<PathBuf>,

	/// Number of tag-array sets (must be a power of two).
	#[structopt(long, default_value = "64")]
	num_sets: usize,

	/// Tag-array and data-array associativity.
	#[structopt(long, default_value = "8")]
	assoc: usize,

	/// RNG seed driving the variant's random-sampling victim selection.
	#[structopt(long, default_value = "1")]
	seed: u64,
}

fn parse_variant(name: &str) -> Variant {
	match name {
		"exact-bdi" => Variant::ExactBdi,
		"approximate-dedup" => Variant::ApproximateDedup,
		"uni-doppelganger" => Variant::UniDoppelganger,
		"dedup-bdi" => Variant::DedupBdi,
		other => panic!("unknown variant {}", other),
	}
}

fn parse_trace_line(line: &str) -> Option<(AccessType, u64)> {
	let line = line.trim();
	if line.is_empty() || line.starts_with('#') {
		return None;
	}
	let mut parts = line.split_whitespace();
	let access_type = match parts.next()? {
		"GETS" => AccessType::GETS,
		"GETX" => AccessType::GETX,
		"PUTS" => AccessType::PUTS,
		"PUTX" => AccessType::PUTX,
		other => panic!("unknown access type {}", other),
	};
	let addr_str = parts.next()?.trim_start_matches("0x");
	let addr = u64::from_str_radix(addr_str, 16).expect("trace address must be hex");
	Some((access_type, addr))
}

fn builtin_trace() -> Vec<(AccessType, u64)> {
	vec![
		(AccessType::GETS, 0x1000),
		(AccessType::GETS, 0x2000),
		(AccessType::GETS, 0x1000),
		(AccessType::PUTX, 0x2000),
		(AccessType::GETS, 0x3000),
		(AccessType::GETS, 0x4000),
	]
}

fn main() {
	env_logger::init();
	let opt = Opt::from_args();

	let config = CacheConfig { num_sets: opt.num_sets, tag_assoc: opt.assoc, data_assoc: opt.assoc, ..CacheConfig::default() };
	config.validate().expect("invalid cache configuration");

	let variant = parse_variant(&opt.variant);
	let mut cache = build_cache(
		variant,
		config,
		Box::new(LruPolicy::new(opt.num_sets, opt.assoc)),
		Box::new(NullCc::default()),
		ApproximateRegionTable::new(),
		opt.seed,
	);

	let accesses: Vec<(AccessType, u64)> = match &opt.trace {
		Some(path) => fs::read_to_string(path).expect("failed to read trace file").lines().filter_map(parse_trace_line).collect(),
		None => builtin_trace(),
	};

	let mut recorder = dedup_bdi_cache::EventRecorder::new();
	for (cycle, (access_type, addr)) in accesses.into_iter().enumerate() {
		let data = if access_type.is_write() { Some(vec![0xabu8; 64]) } else { None };
		let mut req = MemReq::new(cycle as u64, addr, access_type, 0);
		if let Some(bytes) = data {
			req = req.with_data(bytes);
		}
		let record = cache.access(&mut req, &mut recorder);
		log::info!(target: "dedup-bdi-cache", "access {} addr=0x{:x} -> resp_cycle={}", access_type.name(), addr, record.resp_cycle);
	}

	let stats = cache.stats();
	println!("variant:        {}", variant.name());
	println!("valid_lines:    {}", stats.valid_lines);
	println!("valid_segments: {}", stats.valid_segments);
	println!("hits:           {}", stats.hits);
	println!("misses:         {}", stats.misses);
	println!("dedup_hits:     {}", stats.dedup_hits);
	println!("shared_evicts:  {}", stats.shared_evictions);
	println!("hit_rate:       {:.4}", stats.hit_rate());
}
