//! Slot-vector encodings shared by the client and server engines, and the
//! index arithmetic that inverts the server's response packing.

use rand::Rng;
use sealy::{BFVEncoder, Plaintext};

use crate::error::{Error, Result};
use crate::params::PsiParams;

/// Writes `set` into `dest` as a bit-vector: `dest[v] = 1` for every
/// element, everything else zeroed. Fails when an element falls outside the
/// destination window.
pub fn encode_set_as_bit_vector(set: &[u64], dest: &mut [u64]) -> Result<()> {
	dest.fill(0);
	for &v in set {
		match dest.get_mut(v as usize) {
			Some(slot) => *slot = 1,
			None => return Err(Error::DomainOverflow),
		}
	}
	Ok(())
}

/// Packs several sets into `dest`, one `bit_len` window each:
/// `dest[i * bit_len + v] = 1` for element `v` of set `i`.
pub fn encode_sets_as_bit_vector(sets: &[Vec<u64>], bit_len: usize, dest: &mut [u64]) -> Result<()> {
	dest.fill(0);
	for (i, set) in sets.iter().enumerate() {
		for &v in set {
			if v as usize >= bit_len {
				return Err(Error::DomainOverflow);
			}
			dest[i * bit_len + v as usize] = 1;
		}
	}
	Ok(())
}

/// Coefficients of the monic polynomial over Z_T whose roots are exactly
/// `roots`. The polynomial evaluates to zero (mod T) at every set element.
pub fn interpolate_from_roots(t: u64, roots: &[u64]) -> Vec<u64> {
	let ti = t as i64;

	let mut a = vec![0i64; roots.len() + 1];
	a[0] = 1;

	for (k, &root) in roots.iter().enumerate() {
		let r = root as i64;
		for i in (1..=k + 1).rev() {
			a[i] = (a[i - 1] - a[i] * r) % ti;
		}
		a[0] = (-a[0] * r) % ti;
	}

	a.into_iter().map(|c| ((c % ti + ti) % ti) as u64).collect()
}

/// Multiplies every coefficient by one fresh random non-zero scalar mod T.
pub(crate) fn mult_plain_poly_with_rand(t: u64, poly: &[u64]) -> Vec<u64> {
	let r = rand::thread_rng().gen_range(1..t) as u128;
	poly.iter()
		.map(|&c| ((c as u128 * r) % t as u128) as u64)
		.collect()
}

/// Uniform slot vector below `max`.
///
/// Blinding material; `thread_rng` is not a CSPRNG, swap the source before
/// production use.
pub fn gen_random_vector(size: usize, max: u64, allow_zero: bool) -> Vec<u64> {
	let mut rng = rand::thread_rng();
	(0..size)
		.map(|_| {
			if allow_zero {
				rng.gen_range(0..max)
			} else {
				rng.gen_range(1..max)
			}
		})
		.collect()
}

/// Encodes a fresh random slot vector below the plaintext modulus.
pub(crate) fn gen_random_ptx(
	encoder: &BFVEncoder,
	n: usize,
	t: u64,
	allow_zero: bool,
) -> Result<Plaintext> {
	let data = gen_random_vector(n, t, allow_zero);
	Ok(encoder.encode_u64(&data)?)
}

/// Inverts the interleaved packing of `batch_simd_ctxs`: input position
/// `j * batch_size - i` feeds output position `i * sets_per_ctx + j`, with
/// an extra half-ring offset where the rotation wrapped across the row
/// boundary.
pub(crate) fn rearrange_decrypted_batched_cipher(
	pp: &PsiParams,
	elems: &[u64],
	batch_size: usize,
) -> Vec<u64> {
	let n = pp.n();
	let sets_per_ctx = n / batch_size;

	let mut out = vec![0u64; elems.len()];
	let mut now = 0;
	for i in 0..batch_size {
		for j in 0..sets_per_ctx {
			let mut pos = (j * batch_size) as i64 - i as i64;
			if j % (sets_per_ctx / 2) == 0 && i > 0 {
				pos += (n / 2) as i64;
			}
			out[now] = elems[pos as usize];
			now += 1;
		}
	}
	out
}

/// Inverts the `linear_batch` packing of FPSM responses, mirrored across
/// both slot rows.
pub(crate) fn rearrange_fpsi_resp(pp: &PsiParams, resp: &[u64]) -> Vec<u64> {
	let n = pp.n();
	let row_n = n / 2;
	let batch_size = row_n / pp.cl_rep_num;
	let sets_per_row = row_n / batch_size;

	let mut out = vec![0u64; n];
	for i in 0..batch_size {
		for j in 0..sets_per_row {
			let src = (row_n + j * batch_size - i) % row_n;
			out[i * sets_per_row + j] = resp[src];
			out[i * sets_per_row + j + row_n] = resp[src + row_n];
		}
	}
	out
}

/// A plaintext mask that reads 1 at every packed position holding set index
/// `>= l`. Empty padding sets have FPSM output zero, which would decode as
/// a match; adding this mask makes them decode as non-matches.
pub(crate) fn create_fpsi_mask(pp: &PsiParams, l: usize) -> Vec<u64> {
	let n = pp.n();
	let row_n = n / 2;
	let batch_size = row_n / pp.cl_rep_num;
	let sets_per_row = row_n / batch_size;

	let mut out = vec![0u64; n];
	for i in 0..batch_size {
		for j in 0..sets_per_row {
			let src = (row_n + j * batch_size - i) % row_n;
			if i * sets_per_row + j >= l {
				out[src] = 1;
			}
			if i * sets_per_row + j + row_n >= l {
				out[src + row_n] = 1;
			}
		}
	}
	out
}

/// Maps mod-T representatives back to signed integers: values above T/2 are
/// negative.
pub fn convert_to_signed(t: u64, elems: &[u64]) -> Vec<i64> {
	elems
		.iter()
		.map(|&v| {
			if v > t / 2 {
				v as i64 - t as i64
			} else {
				v as i64
			}
		})
		.collect()
}

/// Per-slot zero test on decrypted data: 1 where the value is zero.
pub(crate) fn is_uint_zero(elems: &[u64]) -> Vec<u64> {
	elems.iter().map(|&v| u64::from(v == 0)).collect()
}

/// How many batches of `m` slots are needed to fit `x` elements.
pub fn fit_len(x: usize, m: usize) -> usize {
	(x + m - 1) / m
}

/// Reference rotation of a plain slot vector: both rows rotate left by
/// `rot`, independently.
#[cfg(test)]
pub(crate) fn rotate_plain_vec(elems: &[u64], rot: i64) -> Vec<u64> {
	let row_n = elems.len() / 2;
	let rot = rot.rem_euclid(row_n as i64) as usize;

	let mut out = vec![0u64; elems.len()];
	for i in 0..row_n {
		out[i] = elems[(i + rot) % row_n];
		out[row_n + i] = elems[row_n + (i + rot) % row_n];
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn eval_poly(t: u64, coeffs: &[u64], x: u64) -> u64 {
		let t = t as u128;
		let mut acc: u128 = 0;
		for &c in coeffs.iter().rev() {
			acc = (acc * x as u128 + c as u128) % t;
		}
		acc as u64
	}

	#[test]
	fn bit_vector_encoding() {
		let mut dest = vec![9u64; 8];
		encode_set_as_bit_vector(&[1, 3, 7], &mut dest).unwrap();
		assert_eq!(dest, vec![0, 1, 0, 1, 0, 0, 0, 1]);

		assert!(matches!(
			encode_set_as_bit_vector(&[8], &mut dest),
			Err(Error::DomainOverflow)
		));
	}

	#[test]
	fn packed_bit_vector_encoding() {
		let sets = vec![vec![0, 2], vec![1]];
		let mut dest = vec![0u64; 8];
		encode_sets_as_bit_vector(&sets, 4, &mut dest).unwrap();
		assert_eq!(dest, vec![1, 0, 1, 0, 0, 1, 0, 0]);

		assert!(encode_sets_as_bit_vector(&[vec![4]], 4, &mut dest).is_err());
	}

	#[test]
	fn interpolation_vanishes_on_roots() {
		let t = 163_841;
		let roots = [3u64, 17, 163_840, 99_999];
		let coeffs = interpolate_from_roots(t, &roots);
		assert_eq!(coeffs.len(), roots.len() + 1);
		assert_eq!(coeffs[roots.len()], 1, "polynomial must be monic");

		for &r in &roots {
			assert_eq!(eval_poly(t, &coeffs, r), 0);
		}
		assert_ne!(eval_poly(t, &coeffs, 5), 0);
	}

	#[test]
	fn randomized_poly_keeps_roots() {
		let t = 40_961;
		let coeffs = interpolate_from_roots(t, &[7, 11]);
		let blinded = mult_plain_poly_with_rand(t, &coeffs);
		assert_eq!(eval_poly(t, &blinded, 7), 0);
		assert_eq!(eval_poly(t, &blinded, 11), 0);
		assert_ne!(eval_poly(t, &blinded, 12), 0);
	}

	#[test]
	fn signed_interpretation() {
		let t = 163_841;
		assert_eq!(convert_to_signed(t, &[6, 163_835, 0]), vec![6, -6, 0]);
	}

	#[test]
	fn fit_len_rounds_up() {
		assert_eq!(fit_len(0, 64), 0);
		assert_eq!(fit_len(64, 64), 1);
		assert_eq!(fit_len(65, 64), 2);
	}

	#[test]
	fn random_vector_respects_bounds() {
		let v = gen_random_vector(512, 97, false);
		assert!(v.iter().all(|&x| x >= 1 && x < 97));
		let w = gen_random_vector(512, 2, true);
		assert!(w.iter().all(|&x| x < 2));
	}
}
