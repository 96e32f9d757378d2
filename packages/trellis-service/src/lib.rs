pub mod admin;
pub mod analytics;
pub mod attachments;
pub mod auth;
pub mod candidates;
pub mod duplicates;
pub mod imports;
pub mod merge;
pub mod notes;
pub mod pipelines;
pub mod search;
pub mod tags;
pub mod templates;
pub mod time_serde;

mod error;

pub use error::{Error, Result};

pub use admin::{
	AuditListRequest, AuditListResponse, CreateSessionRequest, CreateSessionResponse,
	CreateUserRequest, CreateUserResponse,
};
pub use analytics::{AnalyticsRequest, AnalyticsResponse};
pub use attachments::{AttachmentView, RegisterAttachmentRequest};
pub use auth::Identity;
pub use candidates::{
	CandidateDetail, CandidateSummary, CreateCandidateRequest, MoveStageRequest,
	UpdateCandidateRequest,
};
pub use duplicates::{DuplicateMember, DuplicateSet, DuplicatesRequest, DuplicatesResponse};
pub use imports::{CreateBatchRequest, ImportBatchStatus, ImportRow, UploadRequest};
pub use merge::{MergeOverrides, MergeRequest, MergeResponse};
pub use notes::{CreateNoteRequest, NoteView, UpdateNoteRequest};
pub use pipelines::{CreatePipelineRequest, GrantPipelineRequest, PipelineView, StageView};
pub use search::{Facets, SearchPage, SearchRequest, SearchResponse};
pub use tags::{AttachTagRequest, TagView};
pub use templates::{
	CreateTemplateRequest, EmailLogView, SendEmailRequest, TemplateView, UpdateTemplateRequest,
};

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use trellis_config::Config;
use trellis_storage::{db::Db, queries};

pub struct TrellisService {
	pub cfg: Config,
	pub db: Db,
}
impl TrellisService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self { cfg, db }
	}
}

pub(crate) async fn record_audit(
	executor: &sqlx::PgPool,
	tenant_id: &str,
	actor_id: Uuid,
	action: &str,
	entity_type: &str,
	entity_id: Option<Uuid>,
	details: Value,
) -> Result<()> {
	queries::insert_audit_log(
		executor,
		queries::AuditEntry {
			tenant_id,
			actor_id: Some(actor_id),
			action,
			entity_type,
			entity_id,
			details,
		},
		OffsetDateTime::now_utc(),
	)
	.await?;

	Ok(())
}
