use bramble_psm::{
	bfv_parameters, convert_to_signed, plain_tversky_array, random_data_set, Aggregation, Client,
	Matching, PsiMode, PsiParams, QueryType, Server,
};

fn main() -> anyhow::Result<()> {
	// Session setup: parameters are shared, keys stay with the client.
	let pp = PsiParams::new(bfv_parameters(12)?, 128)?;
	println!("{}", pp.describe());

	let sets = random_data_set(33, 3, 60, 167)?;
	let client_set = &sets[0];
	let server_sets = sets[1..].to_vec();

	let client = Client::new(&pp)?;
	let mut server = Server::new(&pp, server_sets.clone())?;

	// One round trip: encrypted query out, encrypted verdicts back.
	let query_type = QueryType::new(
		true,
		PsiMode::Cardinality,
		Matching::TverskyPlain,
		Aggregation::None,
	);
	let query = client.query(client_set, query_type)?;
	let response = server.respond(&query, client.key())?;
	let scores = client.eval_response(client_set, &query, &response)?;

	let reference = plain_tversky_array(client_set, &server_sets);
	let signed = convert_to_signed(pp.t(), &scores);
	for (i, (&homomorphic, plain)) in signed.iter().zip(reference).enumerate() {
		println!(
			"set {i:2}: score {plain:4} (homomorphic {homomorphic}, agree: {})",
			homomorphic == plain
		);
	}

	Ok(())
}
