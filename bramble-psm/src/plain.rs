//! Cleartext reference computations and dataset helpers: ground truth for
//! the homomorphic protocols and input material for the benchmarks.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::Rng;

use crate::error::{Error, Result};

/// Elements of `a` that also appear in `b`.
pub fn intersection(a: &[u64], b: &[u64]) -> Vec<u64> {
	let lookup: HashSet<u64> = b.iter().copied().collect();
	a.iter().copied().filter(|v| lookup.contains(v)).collect()
}

/// The thresholded Tversky score `9·|X ∩ S| − 4·|X| − 4·|S|`: non-negative
/// exactly when the similarity reaches 80% (α = β = 1).
pub fn plain_tversky(set1: &[u64], set2: &[u64]) -> i64 {
	let (a, b, c) = (9i64, 4i64, 4i64);
	let i = intersection(set1, set2).len() as i64;
	a * i - b * set1.len() as i64 - c * set2.len() as i64
}

/// [`plain_tversky`] of the client set against every server set.
pub fn plain_tversky_array(client: &[u64], servers: &[Vec<u64>]) -> Vec<i64> {
	servers.iter().map(|s| plain_tversky(client, s)).collect()
}

/// A set of `size` distinct random elements in `[1, max)`. No zeroes.
/// Rejection-sampled, so performance degrades when `max - size` is small.
pub fn random_set(size: usize, max: u64) -> Result<Vec<u64>> {
	if size as u64 >= max {
		return Err(Error::SetTooDense { size, max });
	}

	let mut rng = rand::thread_rng();
	let mut seen = HashSet::with_capacity(size);
	let mut set = Vec::with_capacity(size);
	while set.len() < size {
		let r = rng.gen_range(1..max);
		if seen.insert(r) {
			set.push(r);
		}
	}
	Ok(set)
}

/// `set_num` random sets with sizes drawn uniformly from
/// `[min_set_size, max_set_size]` and elements in `[1, max_value)`.
pub fn random_data_set(
	set_num: usize,
	min_set_size: usize,
	max_set_size: usize,
	max_value: u64,
) -> Result<Vec<Vec<u64>>> {
	let mut rng = rand::thread_rng();
	(0..set_num)
		.map(|_| {
			let size = rng.gen_range(min_set_size..=max_set_size);
			random_set(size, max_value)
		})
		.collect()
}

/// Reads up to `chem_num` chemical compound fingerprints, one `0`/`1`
/// string per line; the positions of the set bits become the set elements.
pub fn read_compounds_from_file(
	path: impl AsRef<Path>,
	chem_num: usize,
) -> Result<Vec<Vec<u64>>> {
	let file = File::open(path)?;
	let mut sets = Vec::with_capacity(chem_num);

	for line in BufReader::new(file).lines().take(chem_num) {
		let fingerprint = line?;
		let set = fingerprint
			.bytes()
			.enumerate()
			.filter(|&(_, b)| b == b'1')
			.map(|(j, _)| j as u64)
			.collect();
		sets.push(set);
	}

	Ok(sets)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intersection_keeps_common_elements() {
		assert_eq!(intersection(&[1, 2, 3, 4], &[2, 4, 6]), vec![2, 4]);
		assert!(intersection(&[1, 2], &[3]).is_empty());
	}

	#[test]
	fn tversky_reference_values() {
		let x: Vec<u64> = (1..=6).collect();
		assert_eq!(plain_tversky(&x, &x), 6);
		assert_eq!(plain_tversky(&x, &[1, 2, 3, 4, 5]), 1);
		assert_eq!(plain_tversky(&x, &(1..=9).collect::<Vec<_>>()), -6);
		assert_eq!(plain_tversky(&x, &[10, 20, 30, 40, 50, 60]), -48);
	}

	#[test]
	fn random_sets_are_bounded_and_distinct() {
		let set = random_set(50, 167).unwrap();
		assert_eq!(set.len(), 50);
		assert!(set.iter().all(|&v| v >= 1 && v < 167));
		let distinct: std::collections::HashSet<_> = set.iter().collect();
		assert_eq!(distinct.len(), set.len());
	}

	#[test]
	fn dense_sets_are_rejected() {
		assert!(matches!(
			random_set(10, 10),
			Err(Error::SetTooDense { .. })
		));
	}

	#[test]
	fn dataset_respects_size_range() {
		let sets = random_data_set(20, 3, 9, 64).unwrap();
		assert_eq!(sets.len(), 20);
		assert!(sets.iter().all(|s| (3..=9).contains(&s.len())));
	}

	#[test]
	fn reads_fingerprint_lines() {
		use std::io::Write;

		let dir = std::env::temp_dir().join("bramble-fps-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("mini.fps");
		let mut file = File::create(&path).unwrap();
		writeln!(file, "01010").unwrap();
		writeln!(file, "10001").unwrap();

		let sets = read_compounds_from_file(&path, 2).unwrap();
		assert_eq!(sets, vec![vec![1, 3], vec![0, 4]]);
	}
}
