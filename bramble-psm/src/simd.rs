//! SIMD slot arithmetic over the 2×(N/2) batched plaintext matrix.
//!
//! The BFV engine exposes cyclic column rotation by arbitrary steps
//! (`rotate_rows` in SEAL naming) and a row swap (`rotate_columns`). Every
//! reduction here is built from those two permutations plus slot-wise
//! add/multiply, keeping ciphertext counts and multiplicative depth small.

use rand::Rng;
use sealy::{BFVEncoder, BFVEvaluator, Ciphertext, Evaluator, GaloisKey, RelinearizationKey};

use crate::encoding::{fit_len, gen_random_ptx};
use crate::error::{Error, Result};
use crate::message::EvaluationKey;
use crate::params::PsiParams;

/// Slot-level arithmetic bound to one client's evaluation keys.
///
/// Holds the engine evaluator, an encoder for mask material, and borrows of
/// the relinearization and Galois keys so the reduction helpers read like
/// the circuits they implement.
pub struct SimdEvaluator<'k> {
	pp: &'k PsiParams,
	pub(crate) eval: BFVEvaluator,
	pub(crate) encoder: BFVEncoder,
	relin: &'k RelinearizationKey,
	galois: &'k GaloisKey,
}

impl<'k> SimdEvaluator<'k> {
	/// Builds an evaluator for the session parameters and a client's keys.
	pub fn new(pp: &'k PsiParams, key: &'k EvaluationKey) -> Result<Self> {
		Ok(Self {
			pp,
			eval: BFVEvaluator::new(pp.context())?,
			encoder: BFVEncoder::new(pp.context())?,
			relin: &key.relin,
			galois: &key.galois,
		})
	}

	/// Cyclic rotation of both slot rows, `steps` columns to the left.
	pub(crate) fn rotate(&self, ctx: &Ciphertext, steps: i32) -> Result<Ciphertext> {
		Ok(self.eval.rotate_rows(ctx, steps, self.galois)?)
	}

	/// Swaps the two slot rows.
	pub(crate) fn swap_rows(&self, ctx: &Ciphertext) -> Result<Ciphertext> {
		Ok(self.eval.rotate_columns(ctx, self.galois)?)
	}

	/// Ciphertext multiplication followed by relinearization.
	pub(crate) fn mul_relin(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let mut out = self.eval.multiply(a, b)?;
		self.eval.relinearize_inplace(&mut out, self.relin)?;
		Ok(out)
	}

	/// In-place sum reduction over windows of `n` consecutive slots
	/// (`n` a power of two): afterwards every slot holds the sum of the `n`
	/// slots of its window.
	pub fn sum_simd(&self, ctx: &mut Ciphertext, n: usize) -> Result<()> {
		let mut shift = 1;
		while shift < n {
			let tmp = self.rotate(ctx, shift as i32)?;
			self.eval.add_inplace(ctx, &tmp)?;
			shift *= 2;
		}
		Ok(())
	}

	/// Product reduction over windows of `n` consecutive slots.
	pub fn prod_simd(&self, ctx: &Ciphertext, n: usize) -> Result<Ciphertext> {
		let mut out = ctx.clone();
		let mut shift = 1;
		while shift < n {
			let tmp = self.rotate(&out, shift as i32)?;
			out = self.mul_relin(&out, &tmp)?;
			shift *= 2;
		}
		Ok(out)
	}

	/// Generalized rotate-and-combine reduction: iterates the shifts
	/// `start, 2·start, …` up to but excluding `finish`, combining with
	/// multiplication or addition; `combine_rows` applies a final row swap
	/// and combine.
	pub fn simd_operation(
		&self,
		ctx: &Ciphertext,
		start: usize,
		finish: usize,
		combine_rows: bool,
		is_mul: bool,
	) -> Result<Ciphertext> {
		let mut out = ctx.clone();
		let mut shift = start;
		while shift < finish {
			let tmp = self.rotate(&out, shift as i32)?;
			out = if is_mul {
				self.mul_relin(&out, &tmp)?
			} else {
				self.eval.add(&out, &tmp)?
			};
			shift *= 2;
		}
		if combine_rows {
			let tmp = self.swap_rows(&out)?;
			out = if is_mul {
				self.mul_relin(&out, &tmp)?
			} else {
				self.eval.add(&out, &tmp)?
			};
		}
		Ok(out)
	}

	/// Reduces a list of ciphertexts to one by a depth-optimal pairwise
	/// tree. Consumes the list.
	pub fn array_operation(&self, mut ctxs: Vec<Ciphertext>, is_mul: bool) -> Result<Ciphertext> {
		if ctxs.len() == 1 {
			return Ok(ctxs.remove(0));
		}
		if is_mul {
			Ok(self.eval.multiply_many(&ctxs, self.relin)?)
		} else {
			Ok(self.eval.add_many(&ctxs)?)
		}
	}

	/// Per-slot selection: `c1` where `sel` is 1, `c0` where it is 0.
	/// Positions beyond `sel.len()` keep `c0`.
	pub fn select_simd(
		&self,
		c0: &Ciphertext,
		c1: &Ciphertext,
		sel: &[u64],
	) -> Result<Ciphertext> {
		let n = self.pp.n();
		let mut nsel = vec![1u64; n];
		for (i, s) in sel.iter().enumerate() {
			nsel[i] = 1u64.wrapping_sub(*s);
		}

		let sel_ptx = self.encoder.encode_u64(sel)?;
		let nsel_ptx = self.encoder.encode_u64(&nsel)?;

		let s0 = self.eval.multiply_plain(c0, &nsel_ptx)?;
		let s1 = self.eval.multiply_plain(c1, &sel_ptx)?;
		Ok(self.eval.add(&s0, &s1)?)
	}

	/// Keeps only the slots whose index is a multiple of `n` (a power of
	/// two); everything else becomes zero.
	pub fn filter_simd(&self, ctx: &Ciphertext, n: usize) -> Result<Ciphertext> {
		let mut mask = vec![0u64; self.pp.n()];
		for slot in mask.iter_mut().step_by(n) {
			*slot = 1;
		}
		let mask_ptx = self.encoder.encode_u64(&mask)?;
		Ok(self.eval.multiply_plain(ctx, &mask_ptx)?)
	}

	/// Rotation by an arbitrary amount, negative allowed, using only the
	/// power-of-two rotations the key material guarantees.
	pub fn extended_rotate(&self, ctx: &Ciphertext, rot: i64) -> Result<Ciphertext> {
		let mut rot = rot;
		if rot < 0 {
			rot += self.pp.row_n() as i64;
		}

		let mut out = ctx.clone();
		let mut k: i64 = 1;
		while rot > 0 {
			if rot % 2 == 1 {
				out = self.rotate(&out, k as i32)?;
			}
			rot /= 2;
			k *= 2;
		}
		Ok(out)
	}

	/// Computes `∏_{k=0}^{n-1} (ctx − k)` per slot: zero exactly when the
	/// slot value lies in `[0, n)`.
	pub fn is_in_range(&self, ctx: &Ciphertext, n: usize) -> Result<Ciphertext> {
		if n > self.pp.range_lim() {
			return Err(Error::RangeLimitExceeded {
				requested: n,
				available: self.pp.range_lim(),
			});
		}

		let mut diffs = Vec::with_capacity(n);
		for k in 0..n {
			diffs.push(self.eval.sub_plain(ctx, self.pp.range_ptx(k))?);
		}
		self.array_operation(diffs, true)
	}

	/// Slot-wise `x^n` by square-and-multiply. `n = 0` is rejected.
	pub fn pow(&self, x: &Ciphertext, n: u64) -> Result<Ciphertext> {
		if n == 0 {
			return Err(Error::ZeroExponent);
		}
		if n == 1 {
			return Ok(x.clone());
		}

		let square = self.mul_relin(x, x)?;
		if n % 2 == 0 {
			self.pow(&square, n / 2)
		} else {
			let rest = self.pow(&square, (n - 1) / 2)?;
			self.mul_relin(x, &rest)
		}
	}

	/// A slot-wise zero test would need T−1 multiplicative depth, which no
	/// batching-friendly parameter set provides.
	pub fn is_zero(&self, _x: &Ciphertext) -> Result<Ciphertext> {
		Err(Error::DepthExhausted)
	}

	/// Packs ciphertexts whose interesting data sits at slot indices
	/// divisible by `fan_in`: within each group of up to `fan_in` inputs the
	/// i-th is rotated by i and the group is summed. Consumes the inputs and
	/// returns `⌈len/fan_in⌉` ciphertexts.
	pub fn batch_simd_ctxs(
		&self,
		ctxs: Vec<Ciphertext>,
		fan_in: usize,
	) -> Result<Vec<Ciphertext>> {
		let mut out = Vec::with_capacity(fit_len(ctxs.len(), fan_in));
		for chunk in ctxs.chunks(fan_in) {
			let mut group = Vec::with_capacity(chunk.len());
			for (i, ctx) in chunk.iter().enumerate() {
				let filtered = self.filter_simd(ctx, fan_in)?;
				group.push(self.extended_rotate(&filtered, i as i64)?);
			}
			out.push(self.array_operation(group, false)?);
		}
		Ok(out)
	}

	/// Computes `Σ rot(ctxs[i], i)` as a tree: at depth d the right child is
	/// rotated by 2^d before the add. Consumes the inputs.
	pub fn linear_batch(&self, mut ctxs: Vec<Ciphertext>) -> Result<Ciphertext> {
		let mut n = ctxs.len();
		let mut rot = 1usize;
		while n > 1 {
			let mut i = 0;
			while 2 * i + 1 < n {
				let rotated = self.rotate(&ctxs[2 * i + 1], rot as i32)?;
				ctxs[i] = self.eval.add(&ctxs[2 * i], &rotated)?;
				i += 1;
			}
			if n % 2 == 1 {
				ctxs[n / 2] = ctxs[n - 1].clone();
			}
			n = (n + 1) / 2;
			rot *= 2;
		}
		Ok(ctxs.remove(0))
	}

	/// Multiplicative blinding: zero slots stay zero, every other slot is
	/// replaced by a uniformly random non-zero multiple.
	pub fn randomize_mult(&self, ctx: &Ciphertext) -> Result<Ciphertext> {
		let r_ptx = gen_random_ptx(&self.encoder, self.pp.n(), self.pp.t(), false)?;
		Ok(self.eval.multiply_plain(ctx, &r_ptx)?)
	}

	/// A plaintext with one fresh non-zero scalar at each given slot and
	/// zeros elsewhere.
	pub(crate) fn sparse_random_ptx(&self, slots: &[usize]) -> Result<sealy::Plaintext> {
		let mut rng = rand::thread_rng();
		let mut raw = vec![0u64; self.pp.n()];
		for &slot in slots {
			raw[slot] = rng.gen_range(1..self.pp.t());
		}
		Ok(self.encoder.encode_u64(&raw)?)
	}
}

#[cfg(test)]
mod tests {
	use sealy::{Decryptor, Encryptor, KeyGenerator, SymmetricEncryptor};

	use super::*;
	use crate::encoding::rotate_plain_vec;
	use crate::params::bfv_parameters;

	struct Fixture {
		pp: PsiParams,
		key: EvaluationKey,
		encryptor: SymmetricEncryptor,
		decryptor: Decryptor,
		encoder: BFVEncoder,
	}

	fn fixture() -> Fixture {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 16).unwrap();
		let keygen = KeyGenerator::new(pp.context()).unwrap();
		let sk = keygen.secret_key();
		let key = EvaluationKey {
			relin: keygen.create_relinearization_keys().unwrap(),
			galois: keygen.create_galois_keys().unwrap(),
		};
		let encryptor = Encryptor::with_secret_key(pp.context(), &sk).unwrap();
		let decryptor = Decryptor::new(pp.context(), &sk).unwrap();
		let encoder = BFVEncoder::new(pp.context()).unwrap();
		Fixture {
			pp,
			key,
			encryptor,
			decryptor,
			encoder,
		}
	}

	impl Fixture {
		fn encrypt(&self, data: &[u64]) -> Ciphertext {
			let ptx = self.encoder.encode_u64(data).unwrap();
			self.encryptor.encrypt_symmetric(&ptx).unwrap()
		}

		fn decrypt(&self, ctx: &Ciphertext) -> Vec<u64> {
			let ptx = self.decryptor.decrypt(ctx).unwrap();
			self.encoder.decode_u64(&ptx).unwrap()
		}
	}

	#[test]
	fn sum_windows() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let data: Vec<u64> = (0..f.pp.n() as u64).map(|i| i % 11).collect();
		let mut ctx = f.encrypt(&data);
		simd.sum_simd(&mut ctx, 4).unwrap();
		let out = f.decrypt(&ctx);

		for base in [0usize, 4, 256, f.pp.row_n()] {
			let expect: u64 = (0..4).map(|k| data[base + k]).sum();
			assert_eq!(out[base], expect, "window at {base}");
		}
	}

	#[test]
	fn prod_windows_propagate_zero() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let mut data = vec![2u64; f.pp.n()];
		data[5] = 0;
		let ctx = f.encrypt(&data);
		let out = f.decrypt(&simd.prod_simd(&ctx, 4).unwrap());

		assert_eq!(out[0], 16);
		assert_eq!(out[4], 0, "window containing the zero slot");
		assert_eq!(out[8], 16);
	}

	#[test]
	fn simd_operation_combines_rows() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();
		let row_n = f.pp.row_n();

		let mut data = vec![1u64; f.pp.n()];
		data[row_n..].fill(2);
		let ctx = f.encrypt(&data);
		let out = f.decrypt(&simd.simd_operation(&ctx, 1, row_n, true, false).unwrap());

		let total = (row_n as u64 * 3) % f.pp.t();
		assert!(out.iter().all(|&v| v == total));
	}

	#[test]
	fn extended_rotate_matches_reference() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let data: Vec<u64> = (0..f.pp.n() as u64).map(|i| i * 7 % 101 + 1).collect();
		let ctx = f.encrypt(&data);

		for rot in [1i64, 5, 117, -3] {
			let out = f.decrypt(&simd.extended_rotate(&ctx, rot).unwrap());
			assert_eq!(out, rotate_plain_vec(&data, rot), "rot {rot}");
		}
	}

	#[test]
	fn filter_keeps_aligned_slots() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let data = vec![3u64; f.pp.n()];
		let ctx = f.encrypt(&data);
		let out = f.decrypt(&simd.filter_simd(&ctx, 8).unwrap());

		for (i, &v) in out.iter().enumerate() {
			assert_eq!(v, if i % 8 == 0 { 3 } else { 0 });
		}
	}

	#[test]
	fn select_keeps_c0_beyond_mask() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let c0 = f.encrypt(&vec![10u64; f.pp.n()]);
		let c1 = f.encrypt(&vec![20u64; f.pp.n()]);
		let out = f.decrypt(&simd.select_simd(&c0, &c1, &[1, 0, 1]).unwrap());

		assert_eq!(&out[..4], &[20, 10, 20, 10]);
		assert_eq!(out[100], 10);
	}

	#[test]
	fn pow_cubes_slots() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let data: Vec<u64> = (0..f.pp.n() as u64).map(|i| i % 9).collect();
		let ctx = f.encrypt(&data);
		let out = f.decrypt(&simd.pow(&ctx, 3).unwrap());

		for i in 0..16 {
			assert_eq!(out[i], data[i].pow(3) % f.pp.t());
		}
		assert!(matches!(simd.pow(&ctx, 0), Err(Error::ZeroExponent)));
	}

	#[test]
	fn range_check_flags_members() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let mut data = vec![0u64; f.pp.n()];
		data[..6].copy_from_slice(&[0, 1, 3, 4, 5, f.pp.t() - 2]);
		let ctx = f.encrypt(&data);
		let out = f.decrypt(&simd.is_in_range(&ctx, 4).unwrap());

		assert_eq!(out[0], 0);
		assert_eq!(out[1], 0);
		assert_eq!(out[2], 0);
		assert_ne!(out[3], 0);
		assert_ne!(out[4], 0);
		assert_ne!(out[5], 0);

		assert!(matches!(
			simd.is_in_range(&ctx, 17),
			Err(Error::RangeLimitExceeded { .. })
		));
	}

	#[test]
	fn batched_packing_inverts_through_rearrange() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();
		let fan_in = 1024;
		let windows = f.pp.n() / fan_in;

		let mut ctxs = Vec::new();
		for k in 0..3u64 {
			let mut data = vec![0u64; f.pp.n()];
			for j in 0..windows as u64 {
				data[j as usize * fan_in] = 100 * (k + 1) + j;
			}
			ctxs.push(f.encrypt(&data));
		}

		let packed = simd.batch_simd_ctxs(ctxs, fan_in).unwrap();
		assert_eq!(packed.len(), 1);

		let decoded = f.decrypt(&packed[0]);
		let out =
			crate::encoding::rearrange_decrypted_batched_cipher(&f.pp, &decoded, fan_in);
		for k in 0..3 {
			for j in 0..windows {
				assert_eq!(
					out[k * windows + j],
					100 * (k as u64 + 1) + j as u64,
					"ciphertext {k}, window {j}"
				);
			}
		}
	}

	#[test]
	fn linear_batch_inverts_through_rearrange() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();

		let mut ctxs = Vec::new();
		for k in 0..3u64 {
			let mut data = vec![0u64; f.pp.n()];
			data[0] = 41 + k;
			ctxs.push(f.encrypt(&data));
		}

		let packed = simd.linear_batch(ctxs).unwrap();
		let decoded = f.decrypt(&packed);
		let out = crate::encoding::rearrange_fpsi_resp(&f.pp, &decoded);

		assert_eq!(&out[..3], &[41, 42, 43]);
	}

	#[test]
	fn is_zero_stays_unimplemented() {
		let f = fixture();
		let simd = SimdEvaluator::new(&f.pp, &f.key).unwrap();
		let ctx = f.encrypt(&vec![0u64; f.pp.n()]);
		assert!(matches!(simd.is_zero(&ctx), Err(Error::DepthExhausted)));
	}
}
