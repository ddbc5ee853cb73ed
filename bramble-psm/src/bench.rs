//! End-to-end pipeline timing for the benchmark driver.

use std::time::Instant;

use sealy::ToBytes;
use serde::Serialize;

use crate::client::Client;
use crate::error::Result;
use crate::params::PsiParams;
use crate::query::QueryType;
use crate::server::{ProgressObserver, Server};

/// One benchmark repetition: sizes in bytes, durations in seconds. The
/// field names are the report schema, kept stable for downstream tooling.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BenchData {
	/// Number of server sets evaluated.
	pub set_num: usize,
	/// Serialized response size.
	pub resp_size: usize,
	/// Serialized query size.
	pub query_size: usize,
	/// Server construction and key exchange.
	pub pre_process: f64,
	/// Query encoding and encryption.
	pub query: f64,
	/// Server-side homomorphic evaluation.
	pub response: f64,
	/// Client-side decryption and decoding.
	pub evaluation: f64,
	/// Query serialization.
	pub query_marshal: f64,
	/// Response serialization.
	pub resp_marshal: f64,
	/// Client key generation.
	pub key_gen: f64,
	/// Query through response marshalling, end to end.
	pub latency: f64,
}

/// Runs the full protocol once: `sets[0]` is the client set, the rest are
/// the server collection. Prints a human-readable summary and returns the
/// timings.
pub fn bench_homo_psi(
	pp: &PsiParams,
	sets: &[Vec<u64>],
	query_type: QueryType,
	progress: Option<ProgressObserver>,
) -> Result<BenchData> {
	let client_set = &sets[0];
	let server_sets = sets[1..].to_vec();

	let start = Instant::now();
	let client = Client::new(pp)?;
	let key_gen = start.elapsed();

	let t0 = Instant::now();
	let mut server = Server::new(pp, server_sets)?;
	if let Some(observer) = progress {
		server.set_progress(observer);
	}
	let key = client.key();
	let pre_process = t0.elapsed();

	let pipeline_start = Instant::now();
	let query = client.query(client_set, query_type)?;
	let query_time = pipeline_start.elapsed();

	let t1 = Instant::now();
	let resp = server.respond(&query, key)?;
	let response_time = t1.elapsed();

	let t2 = Instant::now();
	let ans = client.eval_response(client_set, &query, &resp)?;
	let evaluation_time = t2.elapsed();

	let t3 = Instant::now();
	let query_bytes = query.as_bytes()?;
	let query_marshal = t3.elapsed();
	let t4 = Instant::now();
	let resp_bytes = resp.as_bytes()?;
	let resp_marshal = t4.elapsed();
	let latency = pipeline_start.elapsed();

	let pk_size = key.public.as_bytes()?.len();
	let rlk_size = key.evaluation.relin.as_bytes()?.len();
	let rtk_size = key.evaluation.galois.as_bytes()?.len();

	const MB: usize = 1024 * 1024;
	println!("\n***************************************************");
	println!("* Computation");
	println!("* #server sets:               {}", resp.server_set_num());
	println!("* Query:                      {query_time:?}");
	println!("* Response:                   {response_time:?}");
	println!("* Evaluation:                 {evaluation_time:?}");
	println!("* Query marshal:              {query_marshal:?}");
	println!("* Resp marshal:               {resp_marshal:?}");
	println!(
		"* Client total  =>  {:?}",
		query_time + evaluation_time + query_marshal
	);
	println!("* Server total  =>  {:?}", response_time + resp_marshal);
	println!("***************************************************");
	println!("* Communication");
	println!("* Query size:                 {} KB", query_bytes.len() / 1024);
	println!("* Response size:              {} KB", resp_bytes.len() / 1024);
	println!("***************************************************");
	println!("* Key generation");
	println!("* Time:                       {key_gen:?}");
	println!("* Public key size:            {} KB", pk_size / 1024);
	println!("* Relin key size:             {} MB", rlk_size / MB);
	println!("* Rotate key size:            {} MB", rtk_size / MB);
	println!("***************************************************");
	println!("Answer: {ans:?}");

	Ok(BenchData {
		set_num: resp.server_set_num(),
		resp_size: resp_bytes.len(),
		query_size: query_bytes.len(),
		pre_process: pre_process.as_secs_f64(),
		query: query_time.as_secs_f64(),
		response: response_time.as_secs_f64(),
		evaluation: evaluation_time.as_secs_f64(),
		query_marshal: query_marshal.as_secs_f64(),
		resp_marshal: resp_marshal.as_secs_f64(),
		key_gen: key_gen.as_secs_f64(),
		latency: latency.as_secs_f64(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn report_schema_is_stable() {
		let data = BenchData {
			set_num: 4,
			resp_size: 1,
			query_size: 2,
			pre_process: 0.0,
			query: 0.0,
			response: 0.0,
			evaluation: 0.0,
			query_marshal: 0.0,
			resp_marshal: 0.0,
			key_gen: 0.0,
			latency: 0.5,
		};
		let json = serde_json::to_value(&data).unwrap();
		assert_eq!(json["SetNum"], 4);
		assert_eq!(json["RespSize"], 1);
		assert_eq!(json["Latency"], 0.5);
	}
}
