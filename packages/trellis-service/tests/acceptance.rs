//! End-to-end service tests against a throwaway Postgres database.
//!
//! All tests are ignored by default; set `TRELLIS_PG_DSN` and run with
//! `cargo test -- --ignored` to exercise them.

use uuid::Uuid;

use trellis_config::{
	Analytics, Auth, Config, Imports, Postgres, Search, Security, Service, Storage,
};
use trellis_domain::access::Role;
use trellis_service::{
	AnalyticsRequest, CreateBatchRequest, CreateCandidateRequest, CreateNoteRequest,
	CreatePipelineRequest, DuplicatesRequest, Error, GrantPipelineRequest, Identity, ImportRow,
	MergeRequest, MoveStageRequest, SearchRequest, TrellisService, UpdateNoteRequest,
	UploadRequest, admin::CreateUserRequest,
};
use trellis_storage::db::Db;
use trellis_testkit::TestDatabase;

fn config(dsn: &str) -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage { postgres: Postgres { dsn: dsn.to_string(), pool_max_conns: 4 } },
		auth: Auth { session_ttl_minutes: 60 },
		search: Search { default_page_size: 25, max_page_size: 200 },
		analytics: Analytics { default_window_days: 30, top_recruiter_limit: 5 },
		imports: Imports { max_rows_per_upload: 5_000 },
		security: Security { bind_localhost_only: true },
	}
}

async fn service(dsn: &str) -> TrellisService {
	let cfg = config(dsn);
	let db = Db::connect(&cfg.storage.postgres).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	TrellisService::new(cfg, db)
}

async fn identity(service: &TrellisService, role: Role) -> Identity {
	let user = service
		.create_user(CreateUserRequest {
			tenant_id: "acme".to_string(),
			email: format!("{}@example.com", Uuid::new_v4().simple()),
			name: "Test User".to_string(),
			role,
		})
		.await
		.expect("Failed to create user.");

	Identity { user_id: user.user_id, tenant_id: "acme".to_string(), role }
}

async fn create_candidate(
	service: &TrellisService,
	identity: &Identity,
	name: &str,
	email: Option<&str>,
	phone: Option<&str>,
) -> Uuid {
	service
		.create_candidate(
			identity,
			CreateCandidateRequest {
				name: name.to_string(),
				email: email.map(str::to_string),
				phone: phone.map(str::to_string),
				source: None,
				owner_id: None,
				pipeline_id: None,
				stage_id: None,
			},
		)
		.await
		.expect("Failed to create candidate.")
		.candidate_id
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn merge_reassigns_children_and_backfills_identity() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;

	// Target has an email but no phone; the source has the reverse.
	let target = create_candidate(&svc, &admin, "T1", Some("a@x.com"), None).await;
	let source = create_candidate(&svc, &admin, "S1", None, Some("+1555")).await;

	svc.create_note(&admin, source, CreateNoteRequest { body: "From the source.".to_string() })
		.await
		.expect("Failed to create note.");

	let response = svc
		.merge_candidates(
			&admin,
			MergeRequest {
				target_id: target,
				source_ids: vec![source],
				overrides: Default::default(),
			},
		)
		.await
		.expect("Merge failed.");

	assert_eq!(response.merged_source_ids, vec![source]);
	assert_eq!(response.target.phone.as_deref(), Some("+1555"));
	assert_eq!(response.target.email.as_deref(), Some("a@x.com"));

	let merged_into: Option<Uuid> =
		sqlx::query_scalar("SELECT merged_into_id FROM candidates WHERE candidate_id = $1")
			.bind(source)
			.fetch_one(&svc.db.pool)
			.await
			.expect("Failed to read source.");

	assert_eq!(merged_into, Some(target));

	// Every child row moved over.
	let orphaned: i64 =
		sqlx::query_scalar("SELECT count(*) FROM candidate_notes WHERE candidate_id = $1")
			.bind(source)
			.fetch_one(&svc.db.pool)
			.await
			.expect("Failed to count notes.");
	let moved: i64 =
		sqlx::query_scalar("SELECT count(*) FROM candidate_notes WHERE candidate_id = $1")
			.bind(target)
			.fetch_one(&svc.db.pool)
			.await
			.expect("Failed to count notes.");

	assert_eq!(orphaned, 0);
	assert_eq!(moved, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn merge_guards_reject_bad_shapes() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let target = create_candidate(&svc, &admin, "Target", Some("t@x.com"), None).await;
	let source = create_candidate(&svc, &admin, "Source", Some("s@x.com"), None).await;

	// Target in the source list is a conflict.
	let err = svc
		.merge_candidates(
			&admin,
			MergeRequest {
				target_id: target,
				source_ids: vec![target, source],
				overrides: Default::default(),
			},
		)
		.await
		.expect_err("Expected a conflict.");

	assert!(matches!(err, Error::Conflict { .. }));

	// First merge succeeds; merging the now-merged source again is not found.
	svc.merge_candidates(
		&admin,
		MergeRequest { target_id: target, source_ids: vec![source], overrides: Default::default() },
	)
	.await
	.expect("Merge failed.");

	let other = create_candidate(&svc, &admin, "Other", Some("o@x.com"), None).await;
	let err = svc
		.merge_candidates(
			&admin,
			MergeRequest {
				target_id: other,
				source_ids: vec![source],
				overrides: Default::default(),
			},
		)
		.await
		.expect_err("Expected not-found.");

	assert!(matches!(err, Error::NotFound { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn duplicates_report_multi_member_groups_only() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;

	create_candidate(&svc, &admin, "A", Some("dup@x.com"), None).await;
	create_candidate(&svc, &admin, "B", Some("DUP@x.com"), None).await;
	create_candidate(&svc, &admin, "C", Some("solo@x.com"), Some("+1999")).await;

	let response = svc
		.find_duplicates(&admin, DuplicatesRequest::default())
		.await
		.expect("Duplicate scan failed.");

	assert_eq!(response.sets.len(), 1);
	assert_eq!(response.sets[0].members.len(), 2);

	for set in &response.sets {
		assert!(set.members.len() >= 2, "A duplicate set must have at least two members.");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn search_presence_filters_and_pagination() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;

	create_candidate(&svc, &admin, "With Email", Some("w@x.com"), None).await;
	create_candidate(&svc, &admin, "Phone Only", None, Some("+1555")).await;

	let with_email = svc
		.search(&admin, SearchRequest { has_email: Some(true), ..Default::default() })
		.await
		.expect("Search failed.");

	assert_eq!(with_email.page.total, 1);
	assert!(with_email.page.items.iter().all(|item| item.email.is_some()));

	let without_email = svc
		.search(&admin, SearchRequest { has_email: Some(false), ..Default::default() })
		.await
		.expect("Search failed.");

	assert_eq!(without_email.page.total, 1);
	assert_eq!(without_email.page.items[0].name, "Phone Only");

	// Page size is clamped to the configured maximum.
	let clamped = svc
		.search(&admin, SearchRequest { page_size: Some(10_000), ..Default::default() })
		.await
		.expect("Search failed.");

	assert_eq!(clamped.page.page_size, 200);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn viewer_cannot_mutate() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let viewer = identity(&svc, Role::Viewer).await;
	let candidate = create_candidate(&svc, &admin, "Target", Some("t@x.com"), None).await;

	let err = svc
		.create_candidate(
			&viewer,
			CreateCandidateRequest {
				name: "Nope".to_string(),
				email: None,
				phone: None,
				source: None,
				owner_id: None,
				pipeline_id: None,
				stage_id: None,
			},
		)
		.await
		.expect_err("Viewer must not create candidates.");

	assert!(matches!(err, Error::PermissionDenied { .. }));

	let err = svc
		.merge_candidates(
			&viewer,
			MergeRequest {
				target_id: candidate,
				source_ids: vec![Uuid::new_v4()],
				overrides: Default::default(),
			},
		)
		.await
		.expect_err("Viewer must not merge.");

	assert!(matches!(err, Error::PermissionDenied { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn analytics_respects_pipeline_scope_and_filter() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let viewer = identity(&svc, Role::Viewer).await;
	let engineering = svc
		.create_pipeline(
			&admin,
			CreatePipelineRequest {
				name: "Engineering".to_string(),
				stages: vec!["Screen".to_string(), "Onsite".to_string()],
			},
		)
		.await
		.expect("Failed to create pipeline.");
	let sales = svc
		.create_pipeline(
			&admin,
			CreatePipelineRequest { name: "Sales".to_string(), stages: vec!["Screen".to_string()] },
		)
		.await
		.expect("Failed to create pipeline.");
	let engineer = svc
		.create_candidate(
			&admin,
			CreateCandidateRequest {
				name: "Grace".to_string(),
				email: Some("grace@x.com".to_string()),
				phone: None,
				source: Some("referral".to_string()),
				owner_id: None,
				pipeline_id: Some(engineering.pipeline_id),
				stage_id: Some(engineering.stages[0].stage_id),
			},
		)
		.await
		.expect("Failed to create candidate.")
		.candidate_id;

	svc.create_candidate(
		&admin,
		CreateCandidateRequest {
			name: "Sal".to_string(),
			email: Some("sal@x.com".to_string()),
			phone: None,
			source: None,
			owner_id: None,
			pipeline_id: Some(sales.pipeline_id),
			stage_id: Some(sales.stages[0].stage_id),
		},
	)
	.await
	.expect("Failed to create candidate.");

	// One forward move in Engineering. With the two initial stage
	// placements that is three moves total, one of them a conversion.
	svc.move_stage(&admin, engineer, MoveStageRequest { stage_id: engineering.stages[1].stage_id })
		.await
		.expect("Failed to move stage.");

	let all = svc
		.analytics(&admin, AnalyticsRequest::default())
		.await
		.expect("Analytics failed.");

	assert_eq!(all.total_candidates, 2);
	assert_eq!(all.new_in_window, 2);
	assert_eq!(all.growth_rate, None, "No previous window, no ratio.");

	let rate = all.stage_conversion_rate.expect("Expected a conversion rate.");

	assert!((rate - 1.0 / 3.0).abs() < 1e-9, "Expected 1/3, got {rate}.");

	// Filtering by pipeline drops the Sales candidate and its stage move
	// from every figure, the conversion rate included.
	let filtered = svc
		.analytics(
			&admin,
			AnalyticsRequest { pipeline_id: Some(engineering.pipeline_id), ..Default::default() },
		)
		.await
		.expect("Analytics failed.");

	assert_eq!(filtered.total_candidates, 1);
	assert_eq!(
		filtered.funnel.iter().map(|s| (s.position, s.count)).collect::<Vec<_>>(),
		vec![(1, 0), (2, 1)]
	);

	let rate = filtered.stage_conversion_rate.expect("Expected a conversion rate.");

	assert!((rate - 0.5).abs() < 1e-9, "Expected 1/2, got {rate}.");

	// A viewer with no grants gets an empty dashboard, not tenant-wide KPIs.
	let scoped = svc
		.analytics(&viewer, AnalyticsRequest::default())
		.await
		.expect("Analytics failed.");

	assert_eq!(scoped.total_candidates, 0);
	assert_eq!(scoped.new_in_window, 0);
	assert!(scoped.funnel.is_empty());
	assert!(scoped.sources.is_empty());
	assert_eq!(scoped.stage_conversion_rate, None);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn import_batches_process_rows_and_reject_reuse() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let batch = svc
		.create_import_batch(&admin, CreateBatchRequest { file_name: Some("hires.csv".to_string()) })
		.await
		.expect("Failed to create batch.");

	assert_eq!(batch.status, "pending");

	let rows = vec![
		ImportRow {
			name: "Ada".to_string(),
			email: Some("ada@x.com".to_string()),
			phone: None,
			source: Some("import".to_string()),
		},
		ImportRow {
			name: "Bad Row".to_string(),
			email: Some("not-an-email".to_string()),
			phone: None,
			source: None,
		},
	];
	let accepted = svc
		.upload_import_rows(&admin, batch.batch_id, UploadRequest { rows: rows.clone() })
		.await
		.expect("Upload failed.");

	assert_eq!(accepted.status, "processing");
	assert_eq!(accepted.total_count, 2);

	// The batch left pending on the first upload, so a second one conflicts
	// no matter how far processing has gotten.
	let err = svc
		.upload_import_rows(&admin, batch.batch_id, UploadRequest { rows })
		.await
		.expect_err("Second upload must conflict.");

	assert!(matches!(err, Error::Conflict { .. }));

	// Processing runs on a detached task; poll until it settles.
	let mut status = svc
		.import_batch_status(&admin, batch.batch_id)
		.await
		.expect("Failed to read batch status.");

	for _ in 0..100 {
		if status.status != "processing" {
			break;
		}

		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		status = svc
			.import_batch_status(&admin, batch.batch_id)
			.await
			.expect("Failed to read batch status.");
	}

	assert_eq!(status.status, "completed");
	assert_eq!(status.processed_count, 1);
	assert_eq!(status.failed_count, 1);

	let imported = svc
		.search(&admin, SearchRequest { query: Some("Ada".to_string()), ..Default::default() })
		.await
		.expect("Search failed.");

	assert_eq!(imported.page.total, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn pipeline_grants_scope_listing() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let recruiter = identity(&svc, Role::Recruiter).await;
	let engineering = svc
		.create_pipeline(
			&admin,
			CreatePipelineRequest {
				name: "Engineering".to_string(),
				stages: vec!["Screen".to_string(), "Onsite".to_string(), "Offer".to_string()],
			},
		)
		.await
		.expect("Failed to create pipeline.");

	svc.create_pipeline(
		&admin,
		CreatePipelineRequest { name: "Sales".to_string(), stages: vec!["Screen".to_string()] },
	)
	.await
	.expect("Failed to create pipeline.");

	// Duplicate name in the tenant is a conflict.
	let err = svc
		.create_pipeline(
			&admin,
			CreatePipelineRequest {
				name: "Engineering".to_string(),
				stages: vec!["Screen".to_string()],
			},
		)
		.await
		.expect_err("Expected a conflict.");

	assert!(matches!(err, Error::Conflict { .. }));

	// An ungranted recruiter sees nothing; a granted one sees the pipeline
	// with its stages in order. Granting twice is harmless.
	assert!(svc.list_pipelines(&recruiter).await.expect("Listing failed.").is_empty());

	for _ in 0..2 {
		svc.grant_pipeline(
			&admin,
			engineering.pipeline_id,
			GrantPipelineRequest { user_id: recruiter.user_id },
		)
		.await
		.expect("Grant failed.");
	}

	let visible = svc.list_pipelines(&recruiter).await.expect("Listing failed.");

	assert_eq!(visible.len(), 1);
	assert_eq!(visible[0].name, "Engineering");
	assert_eq!(
		visible[0].stages.iter().map(|s| s.position).collect::<Vec<_>>(),
		vec![1, 2, 3]
	);

	assert_eq!(svc.list_pipelines(&admin).await.expect("Listing failed.").len(), 2);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set TRELLIS_PG_DSN to run."]
async fn notes_crud_roundtrip() {
	let Some(base_dsn) = trellis_testkit::env_dsn() else {
		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let svc = service(test_db.dsn()).await;
	let admin = identity(&svc, Role::Admin).await;
	let candidate = create_candidate(&svc, &admin, "Ada", Some("ada@x.com"), None).await;
	let note = svc
		.create_note(&admin, candidate, CreateNoteRequest { body: "First call.".to_string() })
		.await
		.expect("Failed to create note.");
	let updated = svc
		.update_note(
			&admin,
			candidate,
			note.note_id,
			UpdateNoteRequest { body: "First call; left voicemail.".to_string() },
		)
		.await
		.expect("Failed to update note.");

	assert_eq!(updated.body, "First call; left voicemail.");

	svc.delete_note(&admin, candidate, note.note_id).await.expect("Failed to delete note.");

	let err = svc
		.update_note(
			&admin,
			candidate,
			note.note_id,
			UpdateNoteRequest { body: "Gone.".to_string() },
		)
		.await
		.expect_err("Deleted note must be gone.");

	assert!(matches!(err, Error::NotFound { .. }));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
