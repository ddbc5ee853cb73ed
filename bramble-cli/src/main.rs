//! Benchmark driver for the bramble matching protocols: runs one of three
//! workloads end to end and writes a JSON timing report per repetition.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use bramble_psm::{
	bench_homo_psi, bfv_parameters, random_data_set, read_compounds_from_file, Aggregation,
	BenchData, Matching, ProgressObserver, PsiMode, PsiParams, QueryType, DEFAULT_RANGE_LIM,
};

#[derive(Parser)]
#[command(name = "bramble", version, about = "Private collection matching benchmarks")]
struct Cli {
	#[command(subcommand)]
	mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
	/// Small-domain Tversky matching over chemical compound fingerprints.
	Chemical {
		#[command(flatten)]
		common: CommonArgs,

		/// Size of the compound fingerprint. Must be a power of 2.
		#[arg(long = "sd-domain-size", default_value_t = 256)]
		sd_domain_size: usize,

		/// Fingerprint dataset path; random compounds when omitted.
		#[arg(long = "chemdb-path")]
		chemdb_path: Option<PathBuf>,
	},
	/// Large-domain fuzzy matching over keyword documents.
	Document {
		#[command(flatten)]
		common: CommonArgs,

		/// Maximum number of keywords in a query. Must be a power of 2.
		#[arg(long = "max-q", default_value_t = 8)]
		max_query_size: usize,

		/// Maximum number of keywords in a document. Must be a power of 2.
		#[arg(long = "max-doc", default_value_t = 128)]
		max_doc_size: usize,

		/// Hash functions per keyword; determines the false-positive rate.
		/// Must be a power of 2.
		#[arg(long = "hash-per-kw", default_value_t = 2)]
		hash_per_kw: usize,
	},
	/// Small-domain cardinality baseline without a matching layer.
	SdComparison {
		#[command(flatten)]
		common: CommonArgs,

		/// Size of the element domain. Must be a power of 2.
		#[arg(long = "sd-domain-size", default_value_t = 256)]
		sd_domain_size: usize,
	},
}

#[derive(Args)]
struct CommonArgs {
	/// Number of server sets.
	#[arg(long = "ns", default_value_t = 1024)]
	ns: usize,

	/// BFV polynomial degree, log2.
	#[arg(long, default_value_t = 15)]
	logn: usize,

	/// Aggregation of the collection-wide response: 'naive', 'x-ms', 'ca-ms'.
	#[arg(long, default_value = "x-ms")]
	agg: String,

	/// Number of times to repeat the experiment.
	#[arg(short = 'r', long = "rep", default_value_t = 1)]
	repetitions: usize,

	/// Show a progress bar while the server walks its collection.
	#[arg(long)]
	bar: bool,

	/// Verbose logging.
	#[arg(short = 'v', long)]
	verbose: bool,

	/// JSON report output path.
	#[arg(short = 'o', long = "out", default_value = "bench.json")]
	out: PathBuf,
}

impl Mode {
	fn common(&self) -> &CommonArgs {
		match self {
			Mode::Chemical { common, .. }
			| Mode::Document { common, .. }
			| Mode::SdComparison { common, .. } => common,
		}
	}
}

fn require_power_of_two(value: usize, flag: &str) -> anyhow::Result<()> {
	if !value.is_power_of_two() {
		bail!("{flag} must be a power of 2, got {value}");
	}
	Ok(())
}

fn install_tracing(verbose: bool) {
	let level = if verbose {
		tracing::Level::TRACE
	} else {
		tracing::Level::ERROR
	};
	tracing_subscriber::fmt().with_max_level(level).init();
}

fn progress_observer(enabled: bool) -> Option<ProgressObserver> {
	if !enabled {
		return None;
	}
	let bar = ProgressBar::new(0);
	bar.set_style(
		ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
			.expect("static progress template"),
	);
	bar.set_message("intersection progress");
	Some(Box::new(move |processed, total| {
		bar.set_length(total as u64);
		bar.set_position(processed as u64);
	}))
}

fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let common = cli.mode.common();
	install_tracing(common.verbose);

	let aggregation: Aggregation = common
		.agg
		.parse()
		.with_context(|| format!("unknown aggregation type '{}'", common.agg))?;

	let params = bfv_parameters(common.logn)?;
	let mut pp = PsiParams::new(params, DEFAULT_RANGE_LIM)?;

	let query_type = match &cli.mode {
		Mode::Chemical { sd_domain_size, .. } => {
			require_power_of_two(*sd_domain_size, "sd-domain-size")?;
			if *sd_domain_size > 256 {
				pp.sd_bit_vec_len = *sd_domain_size;
			}
			QueryType::new(true, PsiMode::Cardinality, Matching::Tversky, aggregation)
		}
		Mode::Document {
			max_query_size,
			max_doc_size,
			hash_per_kw,
			..
		} => {
			require_power_of_two(*max_query_size, "max-q")?;
			require_power_of_two(*max_doc_size, "max-doc")?;
			require_power_of_two(*hash_per_kw, "hash-per-kw")?;
			if *max_doc_size < 16 {
				bail!("max-doc must be at least 16, got {max_doc_size}");
			}

			pp.max_client_elem_per_ctx = max_query_size * hash_per_kw;
			let rep_num = pp.n() / pp.max_client_elem_per_ctx / max_doc_size;
			if rep_num == 0 {
				bail!("document layout does not fit the ring: lower max-q, max-doc, or hash-per-kw");
			}
			pp.cl_rep_num = rep_num;
			QueryType::new(false, PsiMode::Psi, Matching::Fpsm, aggregation)
		}
		Mode::SdComparison { sd_domain_size, .. } => {
			require_power_of_two(*sd_domain_size, "sd-domain-size")?;
			if *sd_domain_size > 256 {
				pp.sd_bit_vec_len = *sd_domain_size;
			}
			QueryType::new(
				true,
				PsiMode::Cardinality,
				Matching::None,
				Aggregation::None,
			)
		}
	};
	pp.update()?;
	info!("parameters: {}", pp.describe());

	let mut reports: Vec<BenchData> = Vec::with_capacity(common.repetitions);
	for rep in 0..common.repetitions {
		let sets = match &cli.mode {
			Mode::Chemical {
				sd_domain_size,
				chemdb_path,
				..
			} => match chemdb_path {
				Some(path) => {
					println!("using chemicals loaded from {}", path.display());
					read_compounds_from_file(path, common.ns + 1)?
				}
				None => random_data_set(common.ns + 1, 3, 64, *sd_domain_size as u64)?,
			},
			Mode::Document { max_doc_size, .. } => {
				let mut sets = random_data_set(common.ns + 1, 8, max_doc_size - 2, 10_000)?;
				// The first set acts as the query and must stay small.
				sets[0].truncate(8);
				sets
			}
			Mode::SdComparison { sd_domain_size, .. } => random_data_set(
				common.ns + 1,
				3,
				sd_domain_size / 2,
				*sd_domain_size as u64,
			)?,
		};

		println!(
			"running repetition {}/{} with {} server sets",
			rep + 1,
			common.repetitions,
			common.ns
		);
		let report = bench_homo_psi(&pp, &sets, query_type, progress_observer(common.bar))?;
		reports.push(report);
	}

	let json = serde_json::to_string_pretty(&reports)?;
	fs::write(&common.out, json)
		.with_context(|| format!("writing report to {}", common.out.display()))?;
	println!("report written to {}", common.out.display());

	Ok(())
}
