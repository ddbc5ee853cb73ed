//! The query type model: three orthogonal protocol choices and the table of
//! combinations the server actually realizes.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Single-set layer: report the intersection itself or only its cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsiMode {
	/// Reveal the intersection elements.
	Psi,
	/// Reveal only the intersection cardinality.
	Cardinality,
}

impl FromStr for PsiMode {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"psi" => Ok(PsiMode::Psi),
			"ca" => Ok(PsiMode::Cardinality),
			_ => Err(Error::UnsupportedQuery),
		}
	}
}

/// Matching layer applied on top of the per-set intersection results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
	/// No matching layer; the single-set results are returned directly.
	None,
	/// Tversky similarity thresholding with a binary verdict per set.
	Tversky,
	/// Tversky similarity returned as a raw (signed) score per set.
	TverskyPlain,
	/// Fuzzy private set matching: does the query lie inside the set.
	Fpsm,
}

impl FromStr for Matching {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"" => Ok(Matching::None),
			"tversky" => Ok(Matching::Tversky),
			"tversky-plain" => Ok(Matching::TverskyPlain),
			"fpsm" => Ok(Matching::Fpsm),
			_ => Err(Error::UnsupportedQuery),
		}
	}
}

/// Collection-wide aggregation of the per-set matching verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
	/// One verdict per server set.
	None,
	/// A single bit: does any set match.
	XMs,
	/// The number of matching sets; the server shuffles its collection so
	/// the count reveals nothing about positions.
	CaMs,
}

impl FromStr for Aggregation {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"" | "naive" => Ok(Aggregation::None),
			"x-ms" => Ok(Aggregation::XMs),
			"ca-ms" => Ok(Aggregation::CaMs),
			_ => Err(Error::UnsupportedQuery),
		}
	}
}

/// The full protocol selection carried inside every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryType {
	/// Small domain: elements are indices into a fixed bit-vector.
	/// Large domain: elements are arbitrary non-zero values below the
	/// plaintext modulus.
	pub small_domain: bool,
	/// Single-set layer.
	pub psi: PsiMode,
	/// Matching layer.
	pub matching: Matching,
	/// Aggregation layer.
	pub aggregation: Aggregation,
}

impl QueryType {
	/// Bundles the three layer choices.
	pub fn new(
		small_domain: bool,
		psi: PsiMode,
		matching: Matching,
		aggregation: Aggregation,
	) -> Self {
		Self {
			small_domain,
			psi,
			matching,
			aggregation,
		}
	}

	/// Checks the combination against the table of realized protocols.
	///
	/// Small domain only evaluates cardinalities, optionally refined by
	/// Tversky matching; aggregation needs the binary Tversky verdicts.
	/// Large domain only evaluates plain intersections, optionally refined
	/// by FPSM; raw scores cannot be aggregated.
	pub fn validate(&self) -> Result<()> {
		match (self.small_domain, self.psi) {
			(true, PsiMode::Cardinality) => match (self.matching, self.aggregation) {
				(Matching::None, Aggregation::None) => Ok(()),
				(Matching::Tversky, _) => Ok(()),
				(Matching::TverskyPlain, Aggregation::None) => Ok(()),
				_ => Err(Error::UnsupportedQuery),
			},
			(true, PsiMode::Psi) => Err(Error::UnsupportedQuery),
			(false, PsiMode::Psi) => match (self.matching, self.aggregation) {
				(Matching::None, Aggregation::None) => Ok(()),
				(Matching::Fpsm, _) => Ok(()),
				_ => Err(Error::UnsupportedQuery),
			},
			(false, PsiMode::Cardinality) => Err(Error::LargeDomainCardinality),
		}
	}
}

impl PsiMode {
	pub(crate) fn to_tag(self) -> u8 {
		match self {
			PsiMode::Psi => 0,
			PsiMode::Cardinality => 1,
		}
	}

	pub(crate) fn from_tag(tag: u8) -> Result<Self> {
		match tag {
			0 => Ok(PsiMode::Psi),
			1 => Ok(PsiMode::Cardinality),
			_ => Err(Error::Malformed),
		}
	}
}

impl Matching {
	pub(crate) fn to_tag(self) -> u8 {
		match self {
			Matching::None => 0,
			Matching::Tversky => 1,
			Matching::TverskyPlain => 2,
			Matching::Fpsm => 3,
		}
	}

	pub(crate) fn from_tag(tag: u8) -> Result<Self> {
		match tag {
			0 => Ok(Matching::None),
			1 => Ok(Matching::Tversky),
			2 => Ok(Matching::TverskyPlain),
			3 => Ok(Matching::Fpsm),
			_ => Err(Error::Malformed),
		}
	}
}

impl Aggregation {
	pub(crate) fn to_tag(self) -> u8 {
		match self {
			Aggregation::None => 0,
			Aggregation::XMs => 1,
			Aggregation::CaMs => 2,
		}
	}

	pub(crate) fn from_tag(tag: u8) -> Result<Self> {
		match tag {
			0 => Ok(Aggregation::None),
			1 => Ok(Aggregation::XMs),
			2 => Ok(Aggregation::CaMs),
			_ => Err(Error::Malformed),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_layer_names() {
		assert_eq!("ca".parse::<PsiMode>().unwrap(), PsiMode::Cardinality);
		assert_eq!("PSI".parse::<PsiMode>().unwrap(), PsiMode::Psi);
		assert_eq!("".parse::<Matching>().unwrap(), Matching::None);
		assert_eq!(
			"tversky-plain".parse::<Matching>().unwrap(),
			Matching::TverskyPlain
		);
		assert_eq!("naive".parse::<Aggregation>().unwrap(), Aggregation::None);
		assert_eq!("x-ms".parse::<Aggregation>().unwrap(), Aggregation::XMs);
		assert!("jaccard".parse::<Matching>().is_err());
	}

	#[test]
	fn validates_realized_combinations() {
		let ok = [
			QueryType::new(true, PsiMode::Cardinality, Matching::None, Aggregation::None),
			QueryType::new(true, PsiMode::Cardinality, Matching::Tversky, Aggregation::CaMs),
			QueryType::new(
				true,
				PsiMode::Cardinality,
				Matching::TverskyPlain,
				Aggregation::None,
			),
			QueryType::new(false, PsiMode::Psi, Matching::None, Aggregation::None),
			QueryType::new(false, PsiMode::Psi, Matching::Fpsm, Aggregation::XMs),
		];
		for qt in ok {
			assert!(qt.validate().is_ok(), "{qt:?} should be legal");
		}

		let bad = [
			QueryType::new(false, PsiMode::Cardinality, Matching::None, Aggregation::None),
			QueryType::new(true, PsiMode::Psi, Matching::None, Aggregation::None),
			QueryType::new(true, PsiMode::Cardinality, Matching::Fpsm, Aggregation::None),
			QueryType::new(
				true,
				PsiMode::Cardinality,
				Matching::TverskyPlain,
				Aggregation::XMs,
			),
			QueryType::new(false, PsiMode::Psi, Matching::Tversky, Aggregation::None),
		];
		for qt in bad {
			assert!(qt.validate().is_err(), "{qt:?} should be rejected");
		}
	}

	#[test]
	fn tags_roundtrip() {
		for m in [
			Matching::None,
			Matching::Tversky,
			Matching::TverskyPlain,
			Matching::Fpsm,
		] {
			assert_eq!(Matching::from_tag(m.to_tag()).unwrap(), m);
		}
		assert!(Matching::from_tag(9).is_err());
	}
}
