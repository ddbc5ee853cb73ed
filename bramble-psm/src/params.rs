//! The parameter bundle: BFV presets plus the slot packing layout shared by
//! client and server.

use sealy::{
	BFVEncoder, BFVEncryptionParametersBuilder, CoefficientModulusFactory, Context, DegreeType,
	EncryptionParameters, Plaintext, SecurityLevel,
};

use crate::error::{Error, Result};

/// Default size of the precomputed broadcast-constant cache. Large enough
/// for every range check the realized protocols perform.
pub const DEFAULT_RANGE_LIM: usize = 128;

/// Builds the BFV encryption parameters for a supported ring degree.
///
/// The plaintext moduli are fixed primes congruent to 1 modulo 2N, so CRT
/// batching stays available at every degree; the coefficient modulus chain is
/// the 128-bit-security default for the degree.
pub fn bfv_parameters(logn: usize) -> Result<EncryptionParameters> {
	let (degree, t) = match logn {
		12 => (DegreeType::D4096, 40_961),
		13 => (DegreeType::D8192, 4_079_617),
		14 => (DegreeType::D16384, 163_841),
		15 => (DegreeType::D32768, 786_433),
		_ => return Err(Error::UnsupportedDegree(logn)),
	};

	let modulus_chain = CoefficientModulusFactory::bfv(degree, SecurityLevel::TC128)?;
	let params = BFVEncryptionParametersBuilder::new()
		.set_poly_modulus_degree(degree)
		.set_coefficient_modulus(modulus_chain)
		.set_plain_modulus_u64(t)
		.build()?;

	Ok(params)
}

/// Packing layout and precomputed plaintext material for one protocol
/// session. Construct once and share read-only between [`crate::Client`]
/// and [`crate::Server`].
///
/// The slot space of N integers mod T is viewed as two rows of N/2 columns.
/// Large-domain queries carry `cl_rep_num` replicas of up to
/// `max_client_elem_per_ctx` elements, each expanded into a geometric
/// progression of length `client_poly_expansion`; small-domain queries carry
/// replicated bit-vectors of length `sd_bit_vec_len`.
///
/// The three public fields may be adjusted after construction; call
/// [`PsiParams::update`] afterwards to recompute the derived factors. The
/// bundle is immutable once queries are being served.
pub struct PsiParams {
	ctx: Context,
	n: usize,
	t: u64,

	/// Maximum number of client elements per query ciphertext (power of two).
	pub max_client_elem_per_ctx: usize,
	/// Number of query replicas packed into one ciphertext (power of two).
	pub cl_rep_num: usize,
	client_poly_expansion: usize,

	/// Bit-vector length of the small domain (power of two).
	pub sd_bit_vec_len: usize,
	sd_sets_per_ctx: usize,

	one_ptx: Plaintext,
	zero_ptx: Plaintext,
	range_ptxs: Vec<Plaintext>,
}

impl PsiParams {
	/// Creates the bundle from BFV parameters, precomputing the plaintext
	/// constants `0..range_lim` broadcast across all slots.
	pub fn new(params: EncryptionParameters, range_lim: usize) -> Result<Self> {
		let n = params.get_poly_modulus_degree() as usize;
		let t = params.get_plain_modulus().value();
		let ctx = Context::new(&params, false, SecurityLevel::TC128)?;

		let encoder = BFVEncoder::new(&ctx)?;
		let zero_ptx = encoder.encode_u64(&vec![0u64; n])?;
		let one_ptx = encoder.encode_u64(&vec![1u64; n])?;
		let mut range_ptxs = Vec::with_capacity(range_lim);
		for k in 0..range_lim as u64 {
			range_ptxs.push(encoder.encode_u64(&vec![k; n])?);
		}

		let mut pp = Self {
			ctx,
			n,
			t,
			max_client_elem_per_ctx: 16,
			cl_rep_num: 1,
			client_poly_expansion: 0,
			sd_bit_vec_len: 256,
			sd_sets_per_ctx: 0,
			one_ptx,
			zero_ptx,
			range_ptxs,
		};
		pp.update()?;
		Ok(pp)
	}

	/// Recomputes the derived layout factors. Must be called after mutating
	/// any of the public layout fields.
	pub fn update(&mut self) -> Result<()> {
		if !self.max_client_elem_per_ctx.is_power_of_two()
			|| !self.cl_rep_num.is_power_of_two()
			|| !self.sd_bit_vec_len.is_power_of_two()
		{
			return Err(Error::InvalidLayout);
		}
		if self.max_client_elem_per_ctx * self.cl_rep_num > self.n || self.sd_bit_vec_len > self.n
		{
			return Err(Error::InvalidLayout);
		}

		self.client_poly_expansion = self.n / self.max_client_elem_per_ctx / self.cl_rep_num;
		self.sd_sets_per_ctx = self.n / self.sd_bit_vec_len;
		Ok(())
	}

	/// The SEAL context shared by every engine object of this session.
	pub fn context(&self) -> &Context {
		&self.ctx
	}

	/// Ring degree, i.e. the slot count.
	pub fn n(&self) -> usize {
		self.n
	}

	/// Number of columns in one slot row.
	pub fn row_n(&self) -> usize {
		self.n / 2
	}

	/// Plaintext modulus.
	pub fn t(&self) -> u64 {
		self.t
	}

	/// Maximum server set size + 1: the polynomial expansion degree granted
	/// to each client element.
	pub fn client_poly_expansion(&self) -> usize {
		self.client_poly_expansion
	}

	/// Number of small-domain sets packed per ciphertext.
	pub fn sd_sets_per_ctx(&self) -> usize {
		self.sd_sets_per_ctx
	}

	/// All-ones plaintext.
	pub fn one_ptx(&self) -> &Plaintext {
		&self.one_ptx
	}

	/// All-zeros plaintext.
	pub fn zero_ptx(&self) -> &Plaintext {
		&self.zero_ptx
	}

	/// The scalar `k` broadcast to every slot. `k` must be below
	/// [`PsiParams::range_lim`].
	pub fn range_ptx(&self, k: usize) -> &Plaintext {
		&self.range_ptxs[k]
	}

	/// Number of cached broadcast constants.
	pub fn range_lim(&self) -> usize {
		self.range_ptxs.len()
	}

	/// Human-readable layout summary for logs.
	pub fn describe(&self) -> String {
		format!(
			"N={} T={} | query replicas per ciphertext: {} | small domain bit-vector: {} | \
			 max client elements: {}, max server size: {}",
			self.n,
			self.t,
			self.cl_rep_num,
			self.sd_bit_vec_len,
			self.max_client_elem_per_ctx,
			self.client_poly_expansion,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout_invariants_hold() {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		assert_eq!(pp.n(), 4096);
		assert_eq!(pp.t(), 40_961);
		assert_eq!(
			pp.max_client_elem_per_ctx * pp.cl_rep_num * pp.client_poly_expansion(),
			pp.n()
		);
		assert_eq!(pp.sd_bit_vec_len * pp.sd_sets_per_ctx(), pp.n());
	}

	#[test]
	fn update_recomputes_derived_factors() {
		let mut pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		pp.max_client_elem_per_ctx = 8;
		pp.cl_rep_num = 4;
		pp.update().unwrap();
		assert_eq!(pp.client_poly_expansion(), 4096 / 8 / 4);

		pp.cl_rep_num = 3;
		assert!(pp.update().is_err());
	}

	#[test]
	fn rejects_unknown_degree() {
		assert!(matches!(
			bfv_parameters(16),
			Err(Error::UnsupportedDegree(16))
		));
	}
}
