use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::access::Permission;
use trellis_storage::models::Attachment;

/// Metadata for a file that already lives in object storage. The bytes
/// themselves never pass through this service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterAttachmentRequest {
	pub file_name: String,
	pub content_type: String,
	pub size_bytes: i64,
	pub storage_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentView {
	pub attachment_id: Uuid,
	pub candidate_id: Uuid,
	pub file_name: String,
	pub content_type: String,
	pub size_bytes: i64,
	pub storage_key: String,
	pub uploaded_by: Option<Uuid>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl From<Attachment> for AttachmentView {
	fn from(attachment: Attachment) -> Self {
		Self {
			attachment_id: attachment.attachment_id,
			candidate_id: attachment.candidate_id,
			file_name: attachment.file_name,
			content_type: attachment.content_type,
			size_bytes: attachment.size_bytes,
			storage_key: attachment.storage_key,
			uploaded_by: attachment.uploaded_by,
			created_at: attachment.created_at,
		}
	}
}

impl TrellisService {
	pub async fn list_attachments(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
	) -> Result<Vec<AttachmentView>> {
		identity.require(Permission::CandidateView)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let attachments: Vec<Attachment> = sqlx::query_as(
			"\
SELECT attachment_id, tenant_id, candidate_id, file_name, content_type, size_bytes, storage_key, \
 uploaded_by, created_at
FROM attachments
WHERE tenant_id = $1 AND candidate_id = $2
ORDER BY created_at DESC",
		)
		.bind(identity.tenant_id.as_str())
		.bind(candidate_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(attachments.into_iter().map(AttachmentView::from).collect())
	}

	pub async fn register_attachment(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		req: RegisterAttachmentRequest,
	) -> Result<AttachmentView> {
		identity.require(Permission::CandidateEdit)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let file_name = req.file_name.trim().to_string();
		let storage_key = req.storage_key.trim().to_string();

		if file_name.is_empty() || storage_key.is_empty() {
			return Err(Error::InvalidRequest {
				message: "file_name and storage_key are required.".to_string(),
			});
		}
		if req.size_bytes < 0 {
			return Err(Error::InvalidRequest {
				message: "size_bytes must not be negative.".to_string(),
			});
		}

		let attachment = Attachment {
			attachment_id: Uuid::new_v4(),
			tenant_id: identity.tenant_id.clone(),
			candidate_id,
			file_name,
			content_type: req.content_type.trim().to_string(),
			size_bytes: req.size_bytes,
			storage_key,
			uploaded_by: Some(identity.user_id),
			created_at: OffsetDateTime::now_utc(),
		};

		sqlx::query(
			"\
INSERT INTO attachments (attachment_id, tenant_id, candidate_id, file_name, content_type, size_bytes, storage_key, uploaded_by, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
		)
		.bind(attachment.attachment_id)
		.bind(attachment.tenant_id.as_str())
		.bind(attachment.candidate_id)
		.bind(attachment.file_name.as_str())
		.bind(attachment.content_type.as_str())
		.bind(attachment.size_bytes)
		.bind(attachment.storage_key.as_str())
		.bind(attachment.uploaded_by)
		.bind(attachment.created_at)
		.execute(&self.db.pool)
		.await?;

		Ok(attachment.into())
	}
}
