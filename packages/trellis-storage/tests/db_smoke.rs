use trellis_config::Postgres;
use trellis_storage::db::Db;
use trellis_testkit::TestDatabase;

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn db_connects_and_bootstraps() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		eprintln!("Skipping db_connects_and_bootstraps; set TRELLIS_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 1 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	// Re-running the bootstrap must be a no-op.
	db.ensure_schema().await.expect("Failed to re-run schema bootstrap.");

	let count: i64 = sqlx::query_scalar(
		"SELECT count(*) FROM information_schema.tables WHERE table_name = 'candidates'",
	)
	.fetch_one(&db.pool)
	.await
	.expect("Failed to query schema tables.");

	assert_eq!(count, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn candidate_tag_associations_are_unique() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		eprintln!("Skipping candidate_tag_associations_are_unique; set TRELLIS_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 1 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let candidate_id = uuid::Uuid::new_v4();
	let tag_id = uuid::Uuid::new_v4();

	sqlx::query(
		"INSERT INTO candidates (candidate_id, tenant_id, name) VALUES ($1, 'acme', 'Ada')",
	)
	.bind(candidate_id)
	.execute(&db.pool)
	.await
	.expect("Failed to insert candidate.");
	sqlx::query("INSERT INTO tags (tag_id, tenant_id, name) VALUES ($1, 'acme', 'rust')")
		.bind(tag_id)
		.execute(&db.pool)
		.await
		.expect("Failed to insert tag.");

	let insert = "INSERT INTO candidate_tags (candidate_id, tag_id) VALUES ($1, $2)";

	sqlx::query(insert)
		.bind(candidate_id)
		.bind(tag_id)
		.execute(&db.pool)
		.await
		.expect("Failed to insert association.");

	assert!(
		sqlx::query(insert).bind(candidate_id).bind(tag_id).execute(&db.pool).await.is_err(),
		"Duplicate association must violate the primary key."
	);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
