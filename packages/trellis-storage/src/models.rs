use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
	pub user_id: Uuid,
	pub tenant_id: String,
	pub email: String,
	pub name: String,
	pub role: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
	pub token: String,
	pub tenant_id: String,
	pub user_id: Uuid,
	pub created_at: OffsetDateTime,
	pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Pipeline {
	pub pipeline_id: Uuid,
	pub tenant_id: String,
	pub name: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Stage {
	pub stage_id: Uuid,
	pub tenant_id: String,
	pub pipeline_id: Uuid,
	pub name: String,
	pub position: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Candidate {
	pub candidate_id: Uuid,
	pub tenant_id: String,
	pub name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
	pub status: String,
	pub owner_id: Option<Uuid>,
	pub pipeline_id: Option<Uuid>,
	pub stage_id: Option<Uuid>,
	pub rejected_at: Option<OffsetDateTime>,
	pub deleted_at: Option<OffsetDateTime>,
	pub merged_into_id: Option<Uuid>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl Candidate {
	/// Active means visible to listings, search, dedup, and analytics.
	pub fn is_active(&self) -> bool {
		self.deleted_at.is_none() && self.merged_into_id.is_none()
	}
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateNote {
	pub note_id: Uuid,
	pub tenant_id: String,
	pub candidate_id: Uuid,
	pub author_id: Option<Uuid>,
	pub body: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Attachment {
	pub attachment_id: Uuid,
	pub tenant_id: String,
	pub candidate_id: Uuid,
	pub file_name: String,
	pub content_type: String,
	pub size_bytes: i64,
	pub storage_key: String,
	pub uploaded_by: Option<Uuid>,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailLog {
	pub email_id: Uuid,
	pub tenant_id: String,
	pub candidate_id: Uuid,
	pub template_id: Option<Uuid>,
	pub subject: String,
	pub body: String,
	pub sent_by: Option<Uuid>,
	pub sent_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageHistoryEntry {
	pub history_id: Uuid,
	pub tenant_id: String,
	pub candidate_id: Uuid,
	pub from_stage_id: Option<Uuid>,
	pub to_stage_id: Option<Uuid>,
	pub moved_by: Option<Uuid>,
	pub moved_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tag {
	pub tag_id: Uuid,
	pub tenant_id: String,
	pub name: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MergeLog {
	pub merge_id: Uuid,
	pub tenant_id: String,
	pub target_id: Uuid,
	pub source_id: Uuid,
	pub performed_by: Option<Uuid>,
	pub details: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditLog {
	pub audit_id: Uuid,
	pub tenant_id: String,
	pub actor_id: Option<Uuid>,
	pub action: String,
	pub entity_type: String,
	pub entity_id: Option<Uuid>,
	pub details: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailTemplate {
	pub template_id: Uuid,
	pub tenant_id: String,
	pub name: String,
	pub subject: String,
	pub body: String,
	pub created_by: Option<Uuid>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportBatch {
	pub batch_id: Uuid,
	pub tenant_id: String,
	pub created_by: Option<Uuid>,
	pub file_name: Option<String>,
	pub status: String,
	pub total_count: i32,
	pub processed_count: i32,
	pub failed_count: i32,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImportItem {
	pub item_id: Uuid,
	pub tenant_id: String,
	pub batch_id: Uuid,
	pub row_number: i32,
	pub payload: Value,
	pub status: String,
	pub error: Option<String>,
	pub candidate_id: Option<Uuid>,
	pub created_at: OffsetDateTime,
}
