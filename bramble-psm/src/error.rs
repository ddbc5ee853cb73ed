use thiserror::Error;

/// Errors surfaced by the matching protocols.
///
/// Constraint violations are reported to the caller of `query`, `respond`,
/// or `eval_response`; a malicious query is never an error, it simply
/// decrypts to uniformly corrupted slots.
#[derive(Debug, Error)]
pub enum Error {
	/// No BFV preset exists for the requested polynomial degree.
	#[error("no BFV preset for log-degree {0}")]
	UnsupportedDegree(usize),

	/// The packing layout does not divide the slot count into powers of two.
	#[error("layout sizes must be powers of two dividing the slot count")]
	InvalidLayout,

	/// A small-domain element does not fit in the bit-vector domain.
	#[error("small domain query inputs must fit in the domain")]
	DomainOverflow,

	/// The client set exceeds the query layout capacity.
	#[error("too many client elements in query")]
	QueryTooLarge,

	/// A server set exceeds the supported polynomial expansion degree.
	#[error("too many elements in one of the server sets")]
	ServerSetTooLarge,

	/// Cardinality queries are only realized over the small domain.
	#[error("cardinality queries are not supported in the large domain")]
	LargeDomainCardinality,

	/// The query type combination is not realized by any protocol layer.
	#[error("unsupported query type combination")]
	UnsupportedQuery,

	/// Too many response ciphertexts for single-ciphertext aggregation.
	#[error("too many server sets for single-ciphertext aggregation")]
	AggregationOverflow,

	/// `pow` was asked for the zeroth power.
	#[error("cannot raise a ciphertext to the power zero")]
	ZeroExponent,

	/// A range check asked for more constants than the parameter bundle
	/// precomputed.
	#[error("range check needs {requested} constants but only {available} are cached")]
	RangeLimitExceeded {
		/// Number of constants the range check needs.
		requested: usize,
		/// Number of constants held by the parameter bundle.
		available: usize,
	},

	/// The requested circuit needs more multiplicative depth than the
	/// batching parameters leave available.
	#[error("a zero test requires depth incompatible with batching")]
	DepthExhausted,

	/// A random set cannot hold that many distinct elements below the bound.
	#[error("cannot create a set of {size} distinct elements below {max}")]
	SetTooDense {
		/// Requested number of distinct elements.
		size: usize,
		/// Exclusive upper bound on element values.
		max: u64,
	},

	/// Serialized key, query, or response data did not frame correctly.
	#[error("malformed wire data")]
	Malformed,

	/// Dataset file access failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),

	/// An error bubbled up from the BFV engine.
	#[error(transparent)]
	Seal(#[from] sealy::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
