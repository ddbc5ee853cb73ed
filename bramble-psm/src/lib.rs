//! Private collection matching over the BFV homomorphic scheme.
//!
//! A client encrypts its set into a single SIMD-packed ciphertext; a server
//! evaluates one of several matching protocols over its whole collection of
//! sets and answers with a short list of ciphertexts. Neither party reveals
//! its contents: the server sees only ciphertexts, the client learns only
//! what the chosen [`QueryType`] discloses (intersections, cardinalities,
//! Tversky similarity verdicts, fuzzy subset matches, or a single
//! collection-wide aggregate). A homomorphic well-formedness check is
//! blended into every response, so malformed queries decrypt to noise.
//!
//! # Example
//!
//! ```rust
//! use bramble_psm::{
//!     bfv_parameters, Aggregation, Client, Matching, PsiMode, PsiParams, QueryType, Server,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let pp = PsiParams::new(bfv_parameters(13)?, 128)?;
//!
//!     let client = Client::new(&pp)?;
//!     let mut server = Server::new(&pp, vec![vec![1, 2, 3], vec![7, 8]])?;
//!
//!     let query_type = QueryType::new(
//!         true,
//!         PsiMode::Cardinality,
//!         Matching::Tversky,
//!         Aggregation::None,
//!     );
//!     let query = client.query(&[1, 2, 3], query_type)?;
//!     let response = server.respond(&query, client.key())?;
//!     let matches = client.eval_response(&[1, 2, 3], &query, &response)?;
//!
//!     assert_eq!(matches[0], 1); // {1,2,3} is similar enough to itself
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod bench;
mod client;
mod encoding;
mod error;
mod message;
mod params;
mod plain;
mod query;
mod server;
mod simd;

pub use bench::{bench_homo_psi, BenchData};
pub use client::Client;
pub use encoding::{
	convert_to_signed, encode_set_as_bit_vector, encode_sets_as_bit_vector, fit_len,
	gen_random_vector, interpolate_from_roots,
};
pub use error::{Error, Result};
pub use message::{ClientKey, EvaluationKey, PsiQuery, PsiResponse};
pub use params::{bfv_parameters, PsiParams, DEFAULT_RANGE_LIM};
pub use plain::{
	intersection, plain_tversky, plain_tversky_array, random_data_set, random_set,
	read_compounds_from_file,
};
pub use query::{Aggregation, Matching, PsiMode, QueryType};
pub use server::{
	polynomial_malicious_check, sd_malicious_check, ProgressObserver, Server, MAX_TVERSKY_SCORE,
};
pub use simd::SimdEvaluator;
