use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::{access::Permission, identity};
use trellis_storage::{models::Candidate, queries};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCandidateRequest {
	pub name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
	pub owner_id: Option<Uuid>,
	pub pipeline_id: Option<Uuid>,
	pub stage_id: Option<Uuid>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateCandidateRequest {
	pub name: Option<String>,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
	pub owner_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MoveStageRequest {
	pub stage_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateSummary {
	pub candidate_id: Uuid,
	pub name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
	pub status: String,
	pub owner_id: Option<Uuid>,
	pub pipeline_id: Option<Uuid>,
	pub stage_id: Option<Uuid>,
	#[serde(with = "crate::time_serde::option")]
	pub rejected_at: Option<OffsetDateTime>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl From<Candidate> for CandidateSummary {
	fn from(candidate: Candidate) -> Self {
		Self {
			candidate_id: candidate.candidate_id,
			name: candidate.name,
			email: candidate.email,
			phone: candidate.phone,
			source: candidate.source,
			status: candidate.status,
			owner_id: candidate.owner_id,
			pipeline_id: candidate.pipeline_id,
			stage_id: candidate.stage_id,
			rejected_at: candidate.rejected_at,
			created_at: candidate.created_at,
			updated_at: candidate.updated_at,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateDetail {
	#[serde(flatten)]
	pub summary: CandidateSummary,
	pub tags: Vec<String>,
	pub note_count: i64,
	pub attachment_count: i64,
}

impl TrellisService {
	pub async fn create_candidate(
		&self,
		identity: &Identity,
		req: CreateCandidateRequest,
	) -> Result<CandidateSummary> {
		identity.require(Permission::CandidateCreate)?;

		let name = req.name.trim();

		if name.is_empty() {
			return Err(Error::InvalidRequest { message: "name is required.".to_string() });
		}
		if req.stage_id.is_some() && req.pipeline_id.is_none() {
			return Err(Error::InvalidRequest {
				message: "stage_id requires pipeline_id.".to_string(),
			});
		}

		let email = normalize_email_field(req.email.as_deref())?;
		let phone = normalize_phone_field(req.phone.as_deref())?;

		if let (Some(pipeline_id), Some(stage_id)) = (req.pipeline_id, req.stage_id) {
			self.ensure_stage_in_pipeline(&identity.tenant_id, pipeline_id, stage_id).await?;
		}

		let now = OffsetDateTime::now_utc();
		let candidate = Candidate {
			candidate_id: Uuid::new_v4(),
			tenant_id: identity.tenant_id.clone(),
			name: name.to_string(),
			email,
			phone,
			source: req.source.map(|value| value.trim().to_string()).filter(|s| !s.is_empty()),
			status: "active".to_string(),
			owner_id: req.owner_id.or(Some(identity.user_id)),
			pipeline_id: req.pipeline_id,
			stage_id: req.stage_id,
			rejected_at: None,
			deleted_at: None,
			merged_into_id: None,
			created_at: now,
			updated_at: now,
		};

		queries::insert_candidate(&self.db.pool, &candidate).await?;

		if let Some(stage_id) = candidate.stage_id {
			queries::insert_stage_history(
				&self.db.pool,
				&identity.tenant_id,
				candidate.candidate_id,
				None,
				Some(stage_id),
				Some(identity.user_id),
				now,
			)
			.await?;
		}

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"candidate.create",
			"candidate",
			Some(candidate.candidate_id),
			serde_json::json!({ "name": candidate.name }),
		)
		.await?;

		Ok(candidate.into())
	}

	pub async fn get_candidate(&self, identity: &Identity, id: Uuid) -> Result<CandidateDetail> {
		identity.require(Permission::CandidateView)?;

		let candidate = self.fetch_active_candidate(identity, id).await?;
		let scope = self.pipeline_scope(identity).await?;

		if !scope.permits(candidate.pipeline_id) {
			return Err(Error::NotFound { message: "Candidate not found.".to_string() });
		}

		let tags: Vec<String> = sqlx::query_scalar(
			"\
SELECT t.name
FROM candidate_tags ct
JOIN tags t ON t.tag_id = ct.tag_id
WHERE ct.candidate_id = $1
ORDER BY t.name",
		)
		.bind(id)
		.fetch_all(&self.db.pool)
		.await?;
		let note_count: i64 =
			sqlx::query_scalar("SELECT count(*) FROM candidate_notes WHERE candidate_id = $1")
				.bind(id)
				.fetch_one(&self.db.pool)
				.await?;
		let attachment_count: i64 =
			sqlx::query_scalar("SELECT count(*) FROM attachments WHERE candidate_id = $1")
				.bind(id)
				.fetch_one(&self.db.pool)
				.await?;

		Ok(CandidateDetail { summary: candidate.into(), tags, note_count, attachment_count })
	}

	pub async fn update_candidate(
		&self,
		identity: &Identity,
		id: Uuid,
		req: UpdateCandidateRequest,
	) -> Result<CandidateSummary> {
		identity.require(Permission::CandidateEdit)?;

		let mut candidate = self.fetch_active_candidate(identity, id).await?;

		if let Some(name) = req.name {
			let name = name.trim().to_string();

			if name.is_empty() {
				return Err(Error::InvalidRequest { message: "name must be non-empty.".to_string() });
			}

			candidate.name = name;
		}
		if let Some(email) = req.email.as_deref() {
			candidate.email = normalize_email_field(Some(email))?;
		}
		if let Some(phone) = req.phone.as_deref() {
			candidate.phone = normalize_phone_field(Some(phone))?;
		}
		if let Some(source) = req.source {
			candidate.source = Some(source.trim().to_string()).filter(|s| !s.is_empty());
		}
		if req.owner_id.is_some() {
			candidate.owner_id = req.owner_id;
		}

		candidate.updated_at = OffsetDateTime::now_utc();

		sqlx::query(
			"\
UPDATE candidates
SET name = $1, email = $2, phone = $3, source = $4, owner_id = $5, updated_at = $6
WHERE tenant_id = $7 AND candidate_id = $8",
		)
		.bind(candidate.name.as_str())
		.bind(candidate.email.as_deref())
		.bind(candidate.phone.as_deref())
		.bind(candidate.source.as_deref())
		.bind(candidate.owner_id)
		.bind(candidate.updated_at)
		.bind(identity.tenant_id.as_str())
		.bind(id)
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"candidate.update",
			"candidate",
			Some(id),
			serde_json::json!({}),
		)
		.await?;

		Ok(candidate.into())
	}

	pub async fn delete_candidate(&self, identity: &Identity, id: Uuid) -> Result<()> {
		identity.require(Permission::CandidateDelete)?;

		let candidate = self.fetch_active_candidate(identity, id).await?;
		let now = OffsetDateTime::now_utc();

		sqlx::query(
			"UPDATE candidates SET deleted_at = $1, updated_at = $1 \
			 WHERE tenant_id = $2 AND candidate_id = $3",
		)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(candidate.candidate_id)
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"candidate.delete",
			"candidate",
			Some(id),
			serde_json::json!({}),
		)
		.await?;

		Ok(())
	}

	pub async fn reject_candidate(
		&self,
		identity: &Identity,
		id: Uuid,
	) -> Result<CandidateSummary> {
		identity.require(Permission::CandidateEdit)?;

		let mut candidate = self.fetch_active_candidate(identity, id).await?;

		if candidate.rejected_at.is_some() {
			return Err(Error::Conflict { message: "Candidate is already rejected.".to_string() });
		}

		let now = OffsetDateTime::now_utc();

		candidate.status = "rejected".to_string();
		candidate.rejected_at = Some(now);
		candidate.updated_at = now;

		sqlx::query(
			"UPDATE candidates SET status = 'rejected', rejected_at = $1, updated_at = $1 \
			 WHERE tenant_id = $2 AND candidate_id = $3",
		)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(id)
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"candidate.reject",
			"candidate",
			Some(id),
			serde_json::json!({}),
		)
		.await?;

		Ok(candidate.into())
	}

	pub async fn move_stage(
		&self,
		identity: &Identity,
		id: Uuid,
		req: MoveStageRequest,
	) -> Result<CandidateSummary> {
		identity.require(Permission::CandidateEdit)?;

		let mut candidate = self.fetch_active_candidate(identity, id).await?;
		let Some(pipeline_id) = candidate.pipeline_id else {
			return Err(Error::InvalidRequest {
				message: "Candidate is not assigned to a pipeline.".to_string(),
			});
		};

		self.ensure_stage_in_pipeline(&identity.tenant_id, pipeline_id, req.stage_id).await?;

		if candidate.stage_id == Some(req.stage_id) {
			return Ok(candidate.into());
		}

		let now = OffsetDateTime::now_utc();
		let from_stage_id = candidate.stage_id;

		candidate.stage_id = Some(req.stage_id);
		candidate.updated_at = now;

		let mut tx = self.db.pool.begin().await?;

		sqlx::query(
			"UPDATE candidates SET stage_id = $1, updated_at = $2 \
			 WHERE tenant_id = $3 AND candidate_id = $4",
		)
		.bind(req.stage_id)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(id)
		.execute(&mut *tx)
		.await?;
		queries::insert_stage_history(
			&mut *tx,
			&identity.tenant_id,
			id,
			from_stage_id,
			Some(req.stage_id),
			Some(identity.user_id),
			now,
		)
		.await?;
		queries::insert_audit_log(
			&mut *tx,
			queries::AuditEntry {
				tenant_id: &identity.tenant_id,
				actor_id: Some(identity.user_id),
				action: "candidate.stage_move",
				entity_type: "candidate",
				entity_id: Some(id),
				details: serde_json::json!({
					"from_stage_id": from_stage_id,
					"to_stage_id": req.stage_id,
				}),
			},
			now,
		)
		.await?;

		tx.commit().await?;

		Ok(candidate.into())
	}

	/// Fetches a candidate that is visible to reads: present in the tenant,
	/// not soft-deleted, not merged away.
	pub(crate) async fn fetch_active_candidate(
		&self,
		identity: &Identity,
		id: Uuid,
	) -> Result<Candidate> {
		let candidate = queries::fetch_candidate(&self.db.pool, &identity.tenant_id, id)
			.await?
			.filter(Candidate::is_active)
			.ok_or_else(|| Error::NotFound { message: "Candidate not found.".to_string() })?;

		Ok(candidate)
	}

	async fn ensure_stage_in_pipeline(
		&self,
		tenant_id: &str,
		pipeline_id: Uuid,
		stage_id: Uuid,
	) -> Result<()> {
		let exists: Option<Uuid> = sqlx::query_scalar(
			"SELECT stage_id FROM stages \
			 WHERE tenant_id = $1 AND pipeline_id = $2 AND stage_id = $3",
		)
		.bind(tenant_id)
		.bind(pipeline_id)
		.bind(stage_id)
		.fetch_optional(&self.db.pool)
		.await?;

		if exists.is_none() {
			return Err(Error::InvalidRequest {
				message: "stage_id does not belong to the candidate's pipeline.".to_string(),
			});
		}

		Ok(())
	}
}

fn normalize_email_field(raw: Option<&str>) -> Result<Option<String>> {
	match raw.map(str::trim).filter(|value| !value.is_empty()) {
		None => Ok(None),
		Some(value) => identity::normalize_email(value).map(Some).ok_or_else(|| {
			Error::InvalidRequest { message: "email is not a valid address.".to_string() }
		}),
	}
}

fn normalize_phone_field(raw: Option<&str>) -> Result<Option<String>> {
	match raw.map(str::trim).filter(|value| !value.is_empty()) {
		None => Ok(None),
		Some(value) => identity::normalize_phone(value).map(Some).ok_or_else(|| {
			Error::InvalidRequest { message: "phone must be E.164, e.g. +15550100.".to_string() }
		}),
	}
}
