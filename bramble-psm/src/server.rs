//! The responding party: single-set protocols, matching circuits, many-set
//! aggregation, and the malicious-client checks.

use rand::seq::SliceRandom;
use sealy::{BFVEncoder, Ciphertext, Evaluator};
use tracing::{debug, info};

use crate::encoding::{
	create_fpsi_mask, encode_sets_as_bit_vector, fit_len, gen_random_ptx, gen_random_vector,
	interpolate_from_roots, mult_plain_poly_with_rand,
};
use crate::error::{Error, Result};
use crate::message::{ClientKey, PsiQuery, PsiResponse};
use crate::params::PsiParams;
use crate::query::{Aggregation, Matching, PsiMode};
use crate::simd::SimdEvaluator;

/// Largest non-negative Tversky score the binary conversion classifies.
/// Scores are bounded by the smaller set's cardinality, so this covers the
/// reference datasets; raising it costs multiplicative depth.
pub const MAX_TVERSKY_SCORE: usize = 101;

/// Tversky coefficients for α = β = 1 at an 80% threshold:
/// `a·|X ∩ S| − b·|X| − c·|S| ≥ 0` iff the similarity meets the threshold.
const TVERSKY_A: usize = 9;
const TVERSKY_B: usize = 4;
const TVERSKY_C: u64 = 4;

/// Fan-in of one multiplicative aggregation tree; bounds its depth.
const MAX_MULT_DEPTH: usize = 64;

/// Observer invoked with `(processed, total)` while the server walks its
/// collection. Injected by the caller; the engine holds no progress state
/// of its own.
pub type ProgressObserver = Box<dyn Fn(usize, usize)>;

/// The responding party. Holds the raw collection and, during a call to
/// [`Server::respond`], exclusive use of the evaluator built from the
/// client's keys. Concurrent responses on one instance are not supported.
pub struct Server<'p> {
	pp: &'p PsiParams,
	encoder: BFVEncoder,
	raw_sets: Vec<Vec<u64>>,
	sets: Vec<Vec<u64>>,
	progress: Option<ProgressObserver>,
}

impl<'p> Server<'p> {
	/// Creates a server over its collection of sets.
	pub fn new(pp: &'p PsiParams, sets: Vec<Vec<u64>>) -> Result<Self> {
		Ok(Self {
			pp,
			encoder: BFVEncoder::new(pp.context())?,
			raw_sets: sets,
			sets: Vec::new(),
			progress: None,
		})
	}

	/// Installs a progress observer for collection walks.
	pub fn set_progress(&mut self, observer: ProgressObserver) {
		self.progress = Some(observer);
	}

	/// Random permutation of the working set list, so positional information
	/// does not survive counting aggregation.
	fn shuffle_sets(&mut self) {
		self.sets = self.raw_sets.clone();
		self.sets.shuffle(&mut rand::thread_rng());
	}

	/// Evaluates the query over the whole collection and returns the
	/// response ciphertexts in collection order, each blinded by the
	/// malicious-client check.
	pub fn respond(&mut self, query: &PsiQuery, key: &ClientKey) -> Result<PsiResponse> {
		let qt = query.query_type();
		qt.validate()?;

		let simd = SimdEvaluator::new(self.pp, &key.evaluation)?;

		if qt.aggregation == Aggregation::CaMs {
			self.shuffle_sets();
		} else {
			self.sets = self.raw_sets.clone();
		}

		// Single-set layer
		let mut ctxs = if qt.small_domain {
			info!("server: running small domain psi-ca");
			let mut ctxs = self.compute_psi_ca_sd(&simd, query)?;
			if qt.matching == Matching::None {
				// Last layer: batch cardinalities into the minimal number
				// of ciphertexts.
				ctxs = simd.batch_simd_ctxs(ctxs, self.pp.sd_bit_vec_len)?;
				debug!("number of batched cardinality ciphertexts: {}", ctxs.len());
			}
			ctxs
		} else {
			info!("server: running large domain psi");
			if qt.psi == PsiMode::Cardinality {
				return Err(Error::LargeDomainCardinality);
			}
			self.interpolation_psi(&simd, query)?
		};

		// Matching layer
		match qt.matching {
			Matching::Fpsm => {
				info!("server: running f-psm");
				self.eval_fpsm(&simd, &mut ctxs)?;
				ctxs = self.batch_psm_resps(&simd, ctxs)?;
			}
			Matching::Tversky | Matching::TverskyPlain => {
				info!("server: running tversky");
				let tv = self.compute_tversky(&simd, query, ctxs)?;
				debug!("number of tversky ciphertexts: {}", tv.len());
				ctxs = simd.batch_simd_ctxs(tv, self.pp.sd_bit_vec_len)?;
				debug!("number of batched tversky ciphertexts: {}", ctxs.len());

				if qt.matching == Matching::Tversky {
					info!("server: converting tversky scores to binary matches");
					self.convert_tversky_score_to_binary(&simd, &mut ctxs, MAX_TVERSKY_SCORE)?;
				}
			}
			Matching::None => {}
		}

		// Many-set layer
		if qt.aggregation == Aggregation::XMs {
			info!("server: running x-ms aggregation");
			if qt.matching == Matching::Fpsm {
				self.aggregate_fpsm(&simd, &mut ctxs)?;
			} else if qt.matching == Matching::Tversky {
				ctxs = self.aggregate_tversky(&simd, ctxs)?;
			}
		} else if qt.aggregation == Aggregation::CaMs {
			// The shuffle above already anonymized positions; the client
			// sums the per-set bits after decryption.
			info!("server: running ca-ms aggregation");
		}

		// Malicious check layer
		if qt.small_domain {
			let check = sd_malicious_check(self.pp, &simd, query.ciphertext())?;
			for ctx in ctxs.iter_mut() {
				let blinded = simd.randomize_mult(&check)?;
				simd.eval.add_inplace(ctx, &blinded)?;
			}
		} else {
			let check = polynomial_malicious_check(self.pp, &simd, query.ciphertext())?;
			for ctx in ctxs.iter_mut() {
				simd.eval.add_inplace(ctx, &check)?;
			}
		}

		Ok(PsiResponse {
			server_set_num: self.sets.len(),
			ciphertexts: ctxs,
		})
	}

	/// Small-domain intersection cardinalities: each plaintext mask packs
	/// `sd_sets_per_ctx` sets as bit-vectors; one multiply with the query
	/// and a window sum leave every set's cardinality broadcast across its
	/// window.
	fn compute_psi_ca_sd(
		&self,
		simd: &SimdEvaluator,
		query: &PsiQuery,
	) -> Result<Vec<Ciphertext>> {
		let n = self.pp.n();
		let per_ctx = self.pp.sd_sets_per_ctx();

		let mut ca_ctxs = Vec::with_capacity(fit_len(self.sets.len(), per_ctx));
		let mut processed = 0usize;

		for group in self.sets.chunks(per_ctx) {
			let mut bits = vec![0u64; n];
			encode_sets_as_bit_vector(group, self.pp.sd_bit_vec_len, &mut bits)?;
			let mask = self.encoder.encode_u64(&bits)?;

			let mut sel = simd.eval.multiply_plain(query.ciphertext(), &mask)?;
			simd.sum_simd(&mut sel, self.pp.sd_bit_vec_len)?;
			ca_ctxs.push(sel);

			processed += group.len();
			if let Some(progress) = &self.progress {
				progress(processed, self.sets.len());
			}
		}

		Ok(ca_ctxs)
	}

	/// Large-domain PSI by polynomial evaluation: each server set becomes
	/// the coefficients of the monic polynomial with the set as roots, two
	/// independently randomized copies per slot group; the inner product
	/// with the client's geometric progressions vanishes exactly on
	/// membership.
	fn interpolation_psi(
		&self,
		simd: &SimdEvaluator,
		query: &PsiQuery,
	) -> Result<Vec<Ciphertext>> {
		let n = self.pp.n();
		let row_n = self.pp.row_n();
		let expansion = self.pp.client_poly_expansion();
		let out_num = fit_len(self.sets.len(), self.pp.cl_rep_num);

		let mut ctxs = Vec::with_capacity(out_num);
		for cn in 0..out_num {
			let mut expanded = vec![0u64; n];

			for rep in 0..self.pp.cl_rep_num {
				let set = match self.sets.get(cn * self.pp.cl_rep_num + rep) {
					Some(set) => set,
					None => continue,
				};
				if set.len() > expansion - 1 {
					return Err(Error::ServerSetTooLarge);
				}

				// The client packs powers starting at c while coefficients
				// start at a[0]; the off-by-one of the inner product acts
				// as adding x = 0 to the roots.
				let a = interpolate_from_roots(self.pp.t(), set);

				for k in 0..self.pp.max_client_elem_per_ctx / 2 {
					let base = (self.pp.max_client_elem_per_ctx / 2 * rep + k) * expansion;
					let ar1 = mult_plain_poly_with_rand(self.pp.t(), &a);
					let ar2 = mult_plain_poly_with_rand(self.pp.t(), &a);
					expanded[base..base + a.len()].copy_from_slice(&ar1);
					expanded[row_n + base..row_n + base + a.len()].copy_from_slice(&ar2);
				}
			}

			let ptx = self.encoder.encode_u64(&expanded)?;
			let mut ctx = simd.eval.multiply_plain(query.ciphertext(), &ptx)?;
			simd.sum_simd(&mut ctx, expansion)?;
			ctxs.push(ctx);
		}

		Ok(ctxs)
	}

	/// Reduces every per-element membership slot into one value per replica:
	/// zero iff the whole client query lies inside the server set. The
	/// surviving slots are blinded with fresh non-zero scalars, everything
	/// else is zeroed.
	fn eval_fpsm(&self, simd: &SimdEvaluator, psi: &mut [Ciphertext]) -> Result<()> {
		let batch_size = self.pp.row_n() / self.pp.cl_rep_num;
		let marks: Vec<usize> = (0..self.pp.cl_rep_num).map(|i| i * batch_size).collect();

		for k in 0..psi.len() {
			if k % 10 == 0 {
				debug!("running f-psm on ciphertext {k}");
			}

			psi[k] = simd.simd_operation(
				&psi[k],
				self.pp.client_poly_expansion(),
				batch_size,
				true,
				false,
			)?;

			let mask = simd.sparse_random_ptx(&marks)?;
			psi[k] = simd.eval.multiply_plain(&psi[k], &mask)?;
		}
		Ok(())
	}

	/// Packs the per-set FPSM outputs, `2·batch_size` per response
	/// ciphertext: a linear batch per half, the upper half row-swapped into
	/// the second row. Padding positions are raised to 1 so empty tail
	/// slots decode as non-matches.
	fn batch_psm_resps(
		&self,
		simd: &SimdEvaluator,
		psm: Vec<Ciphertext>,
	) -> Result<Vec<Ciphertext>> {
		let batch_size = self.pp.row_n() / self.pp.cl_rep_num;
		let group = 2 * batch_size;

		let mut psm = psm;
		let mut ctxs = Vec::with_capacity(fit_len(psm.len(), group));
		while !psm.is_empty() {
			let take = usize::min(group, psm.len());
			let mut now: Vec<Ciphertext> = psm.drain(..take).collect();

			let combined = if now.len() > batch_size {
				let lower = now.split_off(batch_size);
				let up = simd.linear_batch(now)?;
				let down = simd.linear_batch(lower)?;
				let down = simd.swap_rows(&down)?;
				simd.eval.add(&up, &down)?
			} else {
				simd.linear_batch(now)?
			};
			ctxs.push(combined);
		}

		// A full tail ciphertext has no padding and needs no mask.
		let tail = self.sets.len() % self.pp.n();
		if tail != 0 {
			let mask = create_fpsi_mask(self.pp, tail);
			let mask_ptx = self.encoder.encode_u64(&mask)?;
			if let Some(last) = ctxs.last_mut() {
				let masked = simd.eval.add_plain(last, &mask_ptx)?;
				*last = masked;
			}
		}

		Ok(ctxs)
	}

	/// Per-set Tversky scores from the intersection cardinalities:
	/// `a·|X ∩ S_i| − (b·|X| + c·|S_i|)`, non-negative exactly when the
	/// similarity threshold is met. Consumes the cardinality ciphertexts.
	fn compute_tversky(
		&self,
		simd: &SimdEvaluator,
		query: &PsiQuery,
		intersection_ca: Vec<Ciphertext>,
	) -> Result<Vec<Ciphertext>> {
		let n = self.pp.n();
		let bit_len = self.pp.sd_bit_vec_len;
		let per_ctx = self.pp.sd_sets_per_ctx();

		// The client's own cardinality |X|, computed homomorphically once.
		let mut client_ca = query.ciphertext().clone();
		simd.sum_simd(&mut client_ca, bit_len)?;
		let client_ca = simd
			.eval
			.multiply_plain(&client_ca, self.pp.range_ptx(TVERSKY_B))?;

		let mut tv = Vec::with_capacity(intersection_ca.len());
		for (k, ca) in intersection_ca.iter().enumerate() {
			let scaled = simd.eval.multiply_plain(ca, self.pp.range_ptx(TVERSKY_A))?;

			let mut server_ca = vec![0u64; n];
			for i in 0..per_ctx {
				if let Some(set) = self.sets.get(k * per_ctx + i) {
					server_ca[i * bit_len] = TVERSKY_C * set.len() as u64;
				}
			}
			let server_ca_ptx = self.encoder.encode_u64(&server_ca)?;

			let subtrahend = simd.eval.add_plain(&client_ca, &server_ca_ptx)?;
			tv.push(simd.eval.sub(&scaled, &subtrahend)?);
		}

		Ok(tv)
	}

	/// Turns raw scores into blinded match indicators: zero when the score
	/// lies in `[0, score_lim)`, uniformly random otherwise. The range
	/// support is bounded by the remaining noise budget.
	fn convert_tversky_score_to_binary(
		&self,
		simd: &SimdEvaluator,
		tv: &mut [Ciphertext],
		score_lim: usize,
	) -> Result<()> {
		for ctx in tv.iter_mut() {
			let in_range = simd.is_in_range(ctx, score_lim)?;
			*ctx = simd.randomize_mult(&in_range)?;
		}
		Ok(())
	}

	/// Single-ciphertext OR over all FPSM outputs: aligns the packed
	/// positions and multiplies across them, so the top slot is zero iff
	/// some server set matched.
	fn aggregate_fpsm(&self, simd: &SimdEvaluator, ctxs: &mut [Ciphertext]) -> Result<()> {
		if ctxs.is_empty() {
			return Ok(());
		}
		if ctxs.len() * self.pp.cl_rep_num > self.pp.n() {
			return Err(Error::AggregationOverflow);
		}

		let batch_size = self.pp.row_n() / self.pp.cl_rep_num;
		let rotate_to_positive = ctxs.len() as i64 - 1;

		ctxs[0] = simd.extended_rotate(&ctxs[0], -rotate_to_positive)?;
		ctxs[0] = simd.simd_operation(&ctxs[0], 1, ctxs.len(), false, true)?;
		ctxs[0] = simd.simd_operation(&ctxs[0], batch_size, self.pp.row_n(), false, true)?;
		Ok(())
	}

	/// Multiplicative reduction of the Tversky indicators: within a single
	/// ciphertext by strided folding, across ciphertexts by fan-in-bounded
	/// reduction trees.
	fn aggregate_tversky(
		&self,
		simd: &SimdEvaluator,
		ctxs: Vec<Ciphertext>,
	) -> Result<Vec<Ciphertext>> {
		if ctxs.len() == 1 {
			let folded = simd.simd_operation(
				&ctxs[0],
				self.pp.sd_bit_vec_len,
				self.pp.row_n(),
				false,
				true,
			)?;
			return Ok(vec![folded]);
		}

		let mut ctxs = ctxs;
		let mut out = Vec::with_capacity(fit_len(ctxs.len(), MAX_MULT_DEPTH));
		while !ctxs.is_empty() {
			let take = usize::min(MAX_MULT_DEPTH, ctxs.len());
			let group: Vec<Ciphertext> = ctxs.drain(..take).collect();
			debug!("aggregating {} tversky ciphertexts", group.len());
			out.push(simd.array_operation(group, true)?);
		}
		Ok(out)
	}
}

/// Verifies a large-domain query encodes true geometric progressions (and
/// identical replicas): the returned ciphertext is zero in every slot for
/// an honest query and uniformly random otherwise. Already blinded; add it
/// unmodified to every response ciphertext.
///
/// With `rShifted` the random vector `rRaw` delayed by one slot (zeroed at
/// window starts), `poly·rShifted == rot(poly·rRaw·(cc − cn), −1)` holds
/// per stride exactly when `x_{i+1} = x_i · c`.
pub fn polynomial_malicious_check(
	pp: &PsiParams,
	simd: &SimdEvaluator,
	poly: &Ciphertext,
) -> Result<Ciphertext> {
	let n = pp.n();
	let expansion = pp.client_poly_expansion();

	let mut r_vec = gen_random_vector(n, pp.t(), false);
	let r_raw_ptx = simd.encoder.encode_u64(&r_vec)?;
	for i in (1..n).rev() {
		r_vec[i] = r_vec[i - 1];
	}
	for i in (0..n).step_by(expansion) {
		r_vec[i] = 0;
	}
	let r_shifted_ptx = simd.encoder.encode_u64(&r_vec)?;

	let c0 = simd.filter_simd(poly, expansion)?; // c in slot 0 of each window
	let cn = simd.extended_rotate(&c0, 1 - expansion as i64)?; // c in slot -1
	let cc = simd.simd_operation(&c0, 1, expansion, false, false)?;
	let cc = simd.extended_rotate(&cc, 1 - expansion as i64)?; // c broadcast
	let cc_min_cn = simd.eval.sub(&cc, &cn)?; // c everywhere but the window end

	let left = simd.eval.multiply_plain(poly, &r_shifted_ptx)?;
	let right = simd.eval.multiply_plain(poly, &r_raw_ptx)?;
	let right = simd.mul_relin(&right, &cc_min_cn)?;
	let right = simd.extended_rotate(&right, -1)?;
	let mut mal_check = simd.eval.sub(&left, &right)?;

	if pp.cl_rep_num > 1 {
		let rep_rot = simd.rotate(poly, (pp.row_n() / pp.cl_rep_num) as i32)?;
		let duplicate_check = simd.eval.sub(poly, &rep_rot)?;
		let dup_r = gen_random_ptx(&simd.encoder, n, pp.t(), false)?;
		let duplicate_check = simd.eval.multiply_plain(&duplicate_check, &dup_r)?;
		mal_check = simd.eval.add(&mal_check, &duplicate_check)?;
	}

	let mal_check = simd.simd_operation(&mal_check, 1, pp.row_n(), true, false)?;
	let final_r = gen_random_ptx(&simd.encoder, n, pp.t(), false)?;
	Ok(simd.eval.multiply_plain(&mal_check, &final_r)?)
}

/// Verifies a small-domain query is a replicated bit-vector: every slot a
/// bit (`q·(q − 1) = 0`) and every replica identical. The returned
/// ciphertext MUST be independently re-randomized per response ciphertext
/// before use.
pub fn sd_malicious_check(
	pp: &PsiParams,
	simd: &SimdEvaluator,
	q: &Ciphertext,
) -> Result<Ciphertext> {
	let q_min_one = simd.eval.sub_plain(q, pp.range_ptx(1))?;
	let bit_check = simd.mul_relin(q, &q_min_one)?;
	let bit_check = simd.randomize_mult(&bit_check)?;

	let rep_rot = simd.rotate(q, pp.sd_bit_vec_len as i32)?;
	let duplicate_check = simd.eval.sub(q, &rep_rot)?;
	let duplicate_check = simd.randomize_mult(&duplicate_check)?;

	let mal_check = simd.eval.add(&bit_check, &duplicate_check)?;
	simd.simd_operation(&mal_check, 1, pp.row_n(), true, false)
}
