//! Protocol messages and their wire framing.
//!
//! Every serialized object is a sequence of length-prefixed parts (u32
//! little-endian), so keys, queries, and responses round-trip through
//! [`sealy`]'s byte representations without any out-of-band sizes.

use sealy::{Ciphertext, Context, FromBytes, GaloisKey, PublicKey, RelinearizationKey, ToBytes};

use crate::error::{Error, Result};
use crate::query::{Aggregation, Matching, PsiMode, QueryType};

/// Evaluation material the server needs to compute on a client's
/// ciphertexts: relinearization plus rotations for every power-of-two
/// column shift and the row swap.
pub struct EvaluationKey {
	/// Relinearization key.
	pub relin: RelinearizationKey,
	/// Galois rotation keys.
	pub galois: GaloisKey,
}

/// The shareable half of a client's key material.
pub struct ClientKey {
	/// Encryption key.
	pub public: PublicKey,
	/// Homomorphic evaluation keys.
	pub evaluation: EvaluationKey,
}

impl ClientKey {
	/// Serializes the public and evaluation keys.
	pub fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		put_frame(&mut out, &self.public.as_bytes()?);
		put_frame(&mut out, &self.evaluation.relin.as_bytes()?);
		put_frame(&mut out, &self.evaluation.galois.as_bytes()?);
		Ok(out)
	}

	/// Deserializes a key bundle under the session context.
	pub fn from_bytes(ctx: &Context, mut bytes: &[u8]) -> Result<Self> {
		let public = PublicKey::from_bytes(ctx, take_frame(&mut bytes)?)?;
		let relin = RelinearizationKey::from_bytes(ctx, take_frame(&mut bytes)?)?;
		let galois = GaloisKey::from_bytes(ctx, take_frame(&mut bytes)?)?;
		Ok(Self {
			public,
			evaluation: EvaluationKey { relin, galois },
		})
	}
}

/// A single-use encrypted query: exactly one ciphertext plus the protocol
/// selection the server should run.
pub struct PsiQuery {
	pub(crate) query_type: QueryType,
	pub(crate) client_set_size: usize,
	pub(crate) ciphertext: Ciphertext,
}

impl PsiQuery {
	/// The protocol selection carried by this query.
	pub fn query_type(&self) -> QueryType {
		self.query_type
	}

	/// Number of elements in the encrypted client set.
	pub fn client_set_size(&self) -> usize {
		self.client_set_size
	}

	/// The encrypted, packed client set.
	pub fn ciphertext(&self) -> &Ciphertext {
		&self.ciphertext
	}

	/// Serializes the query type, set size, and ciphertext.
	pub fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		out.push(u8::from(self.query_type.small_domain));
		out.push(self.query_type.psi.to_tag());
		out.push(self.query_type.matching.to_tag());
		out.push(self.query_type.aggregation.to_tag());
		out.extend_from_slice(&(self.client_set_size as u32).to_le_bytes());
		put_frame(&mut out, &self.ciphertext.as_bytes()?);
		Ok(out)
	}

	/// Deserializes a query under the session context.
	pub fn from_bytes(ctx: &Context, bytes: &[u8]) -> Result<Self> {
		if bytes.len() < 8 {
			return Err(Error::Malformed);
		}
		let small_domain = match bytes[0] {
			0 => false,
			1 => true,
			_ => return Err(Error::Malformed),
		};
		let query_type = QueryType {
			small_domain,
			psi: PsiMode::from_tag(bytes[1])?,
			matching: Matching::from_tag(bytes[2])?,
			aggregation: Aggregation::from_tag(bytes[3])?,
		};
		let client_set_size =
			u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

		let mut rest = &bytes[8..];
		let ciphertext = Ciphertext::from_bytes(ctx, take_frame(&mut rest)?)?;

		Ok(Self {
			query_type,
			client_set_size,
			ciphertext,
		})
	}
}

/// The server's answer: a short list of ciphertexts whose layout depends on
/// the query type, plus the collection size the client needs to trim
/// padding slots.
pub struct PsiResponse {
	pub(crate) server_set_num: usize,
	pub(crate) ciphertexts: Vec<Ciphertext>,
}

impl PsiResponse {
	/// Number of sets the server evaluated.
	pub fn server_set_num(&self) -> usize {
		self.server_set_num
	}

	/// The response ciphertexts, in collection order.
	pub fn ciphertexts(&self) -> &[Ciphertext] {
		&self.ciphertexts
	}

	/// Serializes the collection size and every response ciphertext.
	pub fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		out.extend_from_slice(&(self.server_set_num as u32).to_le_bytes());
		out.extend_from_slice(&(self.ciphertexts.len() as u32).to_le_bytes());
		for ctx in &self.ciphertexts {
			put_frame(&mut out, &ctx.as_bytes()?);
		}
		Ok(out)
	}

	/// Deserializes a response under the session context.
	pub fn from_bytes(ctx: &Context, bytes: &[u8]) -> Result<Self> {
		if bytes.len() < 8 {
			return Err(Error::Malformed);
		}
		let server_set_num =
			u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
		let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

		let mut rest = &bytes[8..];
		let mut ciphertexts = Vec::with_capacity(count);
		for _ in 0..count {
			ciphertexts.push(Ciphertext::from_bytes(ctx, take_frame(&mut rest)?)?);
		}

		Ok(Self {
			server_set_num,
			ciphertexts,
		})
	}
}

fn put_frame(out: &mut Vec<u8>, part: &[u8]) {
	out.extend_from_slice(&(part.len() as u32).to_le_bytes());
	out.extend_from_slice(part);
}

fn take_frame<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8]> {
	if bytes.len() < 4 {
		return Err(Error::Malformed);
	}
	let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
	let rest = &bytes[4..];
	if rest.len() < len {
		return Err(Error::Malformed);
	}
	let (part, tail) = rest.split_at(len);
	*bytes = tail;
	Ok(part)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::params::{bfv_parameters, PsiParams};
	use crate::Client;

	#[test]
	fn frames_reject_truncated_input() {
		let mut short: &[u8] = &[1, 0, 0];
		assert!(matches!(take_frame(&mut short), Err(Error::Malformed)));

		let mut lying: &[u8] = &[9, 0, 0, 0, 1, 2];
		assert!(matches!(take_frame(&mut lying), Err(Error::Malformed)));
	}

	#[test]
	fn query_roundtrips_through_bytes() {
		let pp = PsiParams::new(bfv_parameters(12).unwrap(), 8).unwrap();
		let client = Client::new(&pp).unwrap();
		let qt = QueryType::new(
			true,
			PsiMode::Cardinality,
			Matching::Tversky,
			Aggregation::CaMs,
		);

		let query = client.query(&[1, 2, 3], qt).unwrap();
		let bytes = query.as_bytes().unwrap();
		let back = PsiQuery::from_bytes(pp.context(), &bytes).unwrap();

		assert_eq!(back.query_type(), qt);
		assert_eq!(back.client_set_size(), 3);
		assert_eq!(
			back.ciphertext().as_bytes().unwrap(),
			query.ciphertext().as_bytes().unwrap()
		);
	}
}
