use sealy::{BFVEncoder, Ciphertext, Decryptor, Encryptor, KeyGenerator, SymmetricEncryptor};
use tracing::{debug, info};

use crate::encoding::{
	encode_set_as_bit_vector, is_uint_zero, rearrange_decrypted_batched_cipher,
	rearrange_fpsi_resp,
};
use crate::error::{Error, Result};
use crate::message::{ClientKey, EvaluationKey, PsiQuery, PsiResponse};
use crate::params::PsiParams;
use crate::query::{Aggregation, Matching, PsiMode, QueryType};

/// The querying party: owns the secret key, builds encrypted queries, and
/// decodes server responses.
///
/// Key material is generated once per session; the shareable part is
/// available through [`Client::key`].
pub struct Client<'p> {
	pp: &'p PsiParams,
	key: ClientKey,
	encoder: BFVEncoder,
	encryptor: SymmetricEncryptor,
	decryptor: Decryptor,
}

impl<'p> Client<'p> {
	/// Generates a fresh key pair plus the evaluation keys the server
	/// needs: relinearization and rotations for every power-of-two column
	/// shift and the row swap.
	pub fn new(pp: &'p PsiParams) -> Result<Self> {
		let keygen = KeyGenerator::new(pp.context())?;
		let sk = keygen.secret_key();
		let public = keygen.create_public_key();
		let relin = keygen.create_relinearization_keys()?;
		let galois = keygen.create_galois_keys()?;

		Ok(Self {
			pp,
			key: ClientKey {
				public,
				evaluation: EvaluationKey { relin, galois },
			},
			encoder: BFVEncoder::new(pp.context())?,
			encryptor: Encryptor::with_secret_key(pp.context(), &sk)?,
			decryptor: Decryptor::new(pp.context(), &sk)?,
		})
	}

	/// The shareable key material for the server.
	pub fn key(&self) -> &ClientKey {
		&self.key
	}

	/// Encodes and encrypts `set` into a single-use query.
	///
	/// Small-domain sets are encoded as a bit-vector replicated across the
	/// slot space. Large-domain sets are packed as geometric progressions:
	/// for each replica and element `c`, the powers `c, c², …,
	/// c^client_poly_expansion` occupy one contiguous slot run, with the
	/// upper half of the elements placed in the second slot row.
	pub fn query(&self, set: &[u64], query_type: QueryType) -> Result<PsiQuery> {
		query_type.validate()?;

		let n = self.pp.n();
		let mut expanded = vec![0u64; n];

		if query_type.small_domain {
			info!("client: creating a small domain query");
			let bit_len = self.pp.sd_bit_vec_len;
			for rep in 0..n / bit_len {
				encode_set_as_bit_vector(set, &mut expanded[rep * bit_len..(rep + 1) * bit_len])?;
			}
		} else {
			info!("client: creating a large domain query");
			debug!(
				max_client = self.pp.max_client_elem_per_ctx,
				max_server = self.pp.client_poly_expansion(),
				replicas = self.pp.cl_rep_num,
				"large domain layout"
			);

			if set.len() > self.pp.max_client_elem_per_ctx {
				return Err(Error::QueryTooLarge);
			}

			let expansion = self.pp.client_poly_expansion();
			let half = self.pp.max_client_elem_per_ctx / 2;
			let t = self.pp.t();

			for rep in 0..self.pp.cl_rep_num {
				for (k, &elem) in set.iter().enumerate() {
					let mut base = (rep * half + k % half) * expansion;
					if k >= half {
						base += n / 2;
					}

					expanded[base] = elem % t;
					for i in 1..expansion {
						expanded[base + i] = expanded[base + i - 1] * elem % t;
					}
				}
			}
		}

		let ptx = self.encoder.encode_u64(&expanded)?;
		let ciphertext = self.encryptor.encrypt_symmetric(&ptx)?;

		Ok(PsiQuery {
			query_type,
			client_set_size: set.len(),
			ciphertext,
		})
	}

	/// Decrypts and decodes a server response.
	///
	/// The result depends on the query type: intersection elements for plain
	/// PSI (only the first set's intersection fits the return type; callers
	/// wanting every set must widen the API), per-set cardinalities, per-set
	/// match bits, raw signed Tversky scores, or a single aggregated value.
	pub fn eval_response(
		&self,
		client_set: &[u64],
		query: &PsiQuery,
		resp: &PsiResponse,
	) -> Result<Vec<u64>> {
		info!("client: evaluating the response");
		let qt = query.query_type;

		if qt.matching == Matching::None {
			info!("client: simple psi layer without matching or aggregation");

			if qt.psi == PsiMode::Psi {
				let mut intersections = Vec::with_capacity(resp.ciphertexts.len());
				for ctx in &resp.ciphertexts {
					let data = self.decode(ctx)?;
					let expansion = self.pp.client_poly_expansion();
					let hits = client_set
						.iter()
						.enumerate()
						.filter(|(i, _)| data[i * expansion] == 0)
						.map(|(_, &v)| v)
						.collect();
					intersections.push(hits);
				}
				return Ok(intersections.into_iter().next().unwrap_or_default());
			} else if qt.psi == PsiMode::Cardinality && qt.small_domain {
				let mut ans = Vec::with_capacity(resp.server_set_num);
				for ctx in &resp.ciphertexts {
					let data = self.decode(ctx)?;
					ans.extend(rearrange_decrypted_batched_cipher(
						self.pp,
						&data,
						self.pp.sd_bit_vec_len,
					));
				}
				ans.truncate(resp.server_set_num);
				return Ok(ans);
			}
		}

		let mut ans = Vec::with_capacity(resp.server_set_num);
		for ctx in &resp.ciphertexts {
			let mut data = self.decode(ctx)?;
			match qt.matching {
				Matching::Fpsm => data = rearrange_fpsi_resp(self.pp, &data),
				Matching::Tversky | Matching::TverskyPlain => {
					data = rearrange_decrypted_batched_cipher(
						self.pp,
						&data,
						self.pp.sd_bit_vec_len,
					);
				}
				Matching::None => {}
			}
			ans.extend(data);
		}
		ans.truncate(resp.server_set_num);

		if qt.matching == Matching::TverskyPlain {
			info!("client: plain tversky response");
			return Ok(ans);
		} else if qt.matching != Matching::None {
			ans = is_uint_zero(&ans);
		}

		match qt.aggregation {
			Aggregation::None => {
				info!("client: response without aggregation");
				Ok(ans)
			}
			Aggregation::CaMs => {
				info!("client: aggregated response");
				Ok(vec![ans.iter().sum()])
			}
			Aggregation::XMs => {
				info!("client: aggregated response");
				ans.truncate(1);
				Ok(ans)
			}
		}
	}

	fn decode(&self, ctx: &Ciphertext) -> Result<Vec<u64>> {
		let ptx = self.decryptor.decrypt(ctx)?;
		Ok(self.encoder.decode_u64(&ptx)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::params::bfv_parameters;

	#[test]
	fn rejects_oversized_large_domain_query() {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		let client = Client::new(&pp).unwrap();
		let qt = QueryType::new(false, PsiMode::Psi, Matching::None, Aggregation::None);

		let oversized: Vec<u64> = (1..=pp.max_client_elem_per_ctx as u64 + 1).collect();
		assert!(matches!(
			client.query(&oversized, qt),
			Err(Error::QueryTooLarge)
		));
	}

	#[test]
	fn rejects_illegal_query_type() {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		let client = Client::new(&pp).unwrap();
		let qt = QueryType::new(
			false,
			PsiMode::Cardinality,
			Matching::None,
			Aggregation::None,
		);

		assert!(matches!(
			client.query(&[1, 2], qt),
			Err(Error::LargeDomainCardinality)
		));
	}

	#[test]
	fn rejects_small_domain_overflow() {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		let client = Client::new(&pp).unwrap();
		let qt = QueryType::new(
			true,
			PsiMode::Cardinality,
			Matching::None,
			Aggregation::None,
		);

		let out_of_domain = pp.sd_bit_vec_len as u64;
		assert!(matches!(
			client.query(&[1, out_of_domain], qt),
			Err(Error::DomainOverflow)
		));
	}
}
