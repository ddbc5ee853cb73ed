use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bramble_psm::{
	bfv_parameters, random_data_set, Aggregation, Client, Matching, PsiMode, PsiParams,
	QueryType, Server,
};

fn criterion_benchmark(c: &mut Criterion) {
	let pp =
		PsiParams::new(bfv_parameters(12).expect("preset"), 128).expect("parameter bundle");

	let client = Client::new(&pp).expect("client keys");
	let sets = random_data_set(65, 3, 32, 256).expect("dataset");
	let query_type = QueryType::new(
		true,
		PsiMode::Cardinality,
		Matching::TverskyPlain,
		Aggregation::None,
	);

	c.bench_function("query sd tversky", |b| {
		b.iter(|| {
			client
				.query(black_box(&sets[0]), query_type)
				.expect("query")
		})
	});

	let mut server = Server::new(&pp, sets[1..].to_vec()).expect("server");
	let query = client.query(&sets[0], query_type).expect("query");

	c.bench_function("respond sd tversky 64 sets", |b| {
		b.iter(|| {
			server
				.respond(black_box(&query), client.key())
				.expect("respond")
		})
	});
}

criterion_group! {
	name = benches;
	config = Criterion::default().sample_size(10);
	targets = criterion_benchmark
}
criterion_main!(benches);
