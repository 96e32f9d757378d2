use serde_json::Value;
use sqlx::{Executor, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{Candidate, User},
};

const CANDIDATE_COLUMNS: &str = "\
candidate_id, tenant_id, name, email, phone, source, status, owner_id, pipeline_id, stage_id, \
rejected_at, deleted_at, merged_into_id, created_at, updated_at";

pub async fn fetch_candidate<'e, E>(
	executor: E,
	tenant_id: &str,
	candidate_id: Uuid,
) -> Result<Option<Candidate>>
where
	E: Executor<'e, Database = Postgres>,
{
	let candidate = sqlx::query_as::<_, Candidate>(&format!(
		"SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE tenant_id = $1 AND candidate_id = $2"
	))
	.bind(tenant_id)
	.bind(candidate_id)
	.fetch_optional(executor)
	.await?;

	Ok(candidate)
}

/// Locks the row for the remainder of the surrounding transaction. Merge uses
/// this to keep a concurrent merge from double-assigning the same candidate.
pub async fn fetch_candidate_for_update(
	tx: &mut Transaction<'_, Postgres>,
	tenant_id: &str,
	candidate_id: Uuid,
) -> Result<Option<Candidate>> {
	let candidate = sqlx::query_as::<_, Candidate>(&format!(
		"SELECT {CANDIDATE_COLUMNS} FROM candidates \
		 WHERE tenant_id = $1 AND candidate_id = $2 FOR UPDATE"
	))
	.bind(tenant_id)
	.bind(candidate_id)
	.fetch_optional(&mut **tx)
	.await?;

	Ok(candidate)
}

pub async fn insert_candidate<'e, E>(executor: E, candidate: &Candidate) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO candidates (
	candidate_id,
	tenant_id,
	name,
	email,
	phone,
	source,
	status,
	owner_id,
	pipeline_id,
	stage_id,
	rejected_at,
	deleted_at,
	merged_into_id,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
	)
	.bind(candidate.candidate_id)
	.bind(candidate.tenant_id.as_str())
	.bind(candidate.name.as_str())
	.bind(candidate.email.as_deref())
	.bind(candidate.phone.as_deref())
	.bind(candidate.source.as_deref())
	.bind(candidate.status.as_str())
	.bind(candidate.owner_id)
	.bind(candidate.pipeline_id)
	.bind(candidate.stage_id)
	.bind(candidate.rejected_at)
	.bind(candidate.deleted_at)
	.bind(candidate.merged_into_id)
	.bind(candidate.created_at)
	.bind(candidate.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_user_by_session<'e, E>(
	executor: E,
	token: &str,
	now: OffsetDateTime,
) -> Result<Option<User>>
where
	E: Executor<'e, Database = Postgres>,
{
	let user = sqlx::query_as::<_, User>(
		"\
SELECT u.user_id, u.tenant_id, u.email, u.name, u.role, u.created_at
FROM sessions s
JOIN users u ON u.user_id = s.user_id
WHERE s.token = $1 AND s.expires_at > $2",
	)
	.bind(token)
	.bind(now)
	.fetch_optional(executor)
	.await?;

	Ok(user)
}

/// Pipelines visible to a user through `pipeline_grants`. Empty means the
/// user has no granted pipelines, not "all pipelines".
pub async fn granted_pipeline_ids<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Uuid>>
where
	E: Executor<'e, Database = Postgres>,
{
	let ids = sqlx::query_scalar::<_, Uuid>(
		"SELECT pipeline_id FROM pipeline_grants WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

pub struct AuditEntry<'a> {
	pub tenant_id: &'a str,
	pub actor_id: Option<Uuid>,
	pub action: &'a str,
	pub entity_type: &'a str,
	pub entity_id: Option<Uuid>,
	pub details: Value,
}

pub async fn insert_audit_log<'e, E>(
	executor: E,
	entry: AuditEntry<'_>,
	now: OffsetDateTime,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO audit_logs (audit_id, tenant_id, actor_id, action, entity_type, entity_id, details, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
	)
	.bind(Uuid::new_v4())
	.bind(entry.tenant_id)
	.bind(entry.actor_id)
	.bind(entry.action)
	.bind(entry.entity_type)
	.bind(entry.entity_id)
	.bind(entry.details)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_stage_history<'e, E>(
	executor: E,
	tenant_id: &str,
	candidate_id: Uuid,
	from_stage_id: Option<Uuid>,
	to_stage_id: Option<Uuid>,
	moved_by: Option<Uuid>,
	moved_at: OffsetDateTime,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO stage_history (history_id, tenant_id, candidate_id, from_stage_id, to_stage_id, moved_by, moved_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)",
	)
	.bind(Uuid::new_v4())
	.bind(tenant_id)
	.bind(candidate_id)
	.bind(from_stage_id)
	.bind(to_stage_id)
	.bind(moved_by)
	.bind(moved_at)
	.execute(executor)
	.await?;

	Ok(())
}

const CHILD_TABLES: &[&str] = &["candidate_notes", "attachments", "email_logs", "stage_history"];

/// Moves every child row owned by any source candidate to the target. Runs
/// inside the merge transaction; partial reassignment must never be visible.
pub async fn reassign_children(
	tx: &mut Transaction<'_, Postgres>,
	tenant_id: &str,
	source_ids: &[Uuid],
	target_id: Uuid,
) -> Result<()> {
	for table in CHILD_TABLES {
		sqlx::query(&format!(
			"UPDATE {table} SET candidate_id = $1 \
			 WHERE tenant_id = $2 AND candidate_id = ANY($3)"
		))
		.bind(target_id)
		.bind(tenant_id)
		.bind(source_ids)
		.execute(&mut **tx)
		.await?;
	}

	Ok(())
}

/// Copies source tag associations onto the target, skipping ones the target
/// already has, then drops the source associations.
pub async fn union_tags(
	tx: &mut Transaction<'_, Postgres>,
	source_ids: &[Uuid],
	target_id: Uuid,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO candidate_tags (candidate_id, tag_id)
SELECT $1, tag_id
FROM candidate_tags
WHERE candidate_id = ANY($2)
ON CONFLICT (candidate_id, tag_id) DO NOTHING",
	)
	.bind(target_id)
	.bind(source_ids)
	.execute(&mut **tx)
	.await?;

	sqlx::query("DELETE FROM candidate_tags WHERE candidate_id = ANY($1)")
		.bind(source_ids)
		.execute(&mut **tx)
		.await?;

	Ok(())
}
