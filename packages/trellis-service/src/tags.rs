use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::access::Permission;
use trellis_storage::models::Tag;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachTagRequest {
	pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagView {
	pub tag_id: Uuid,
	pub name: String,
}
impl From<Tag> for TagView {
	fn from(tag: Tag) -> Self {
		Self { tag_id: tag.tag_id, name: tag.name }
	}
}

impl TrellisService {
	pub async fn list_tags(&self, identity: &Identity) -> Result<Vec<TagView>> {
		identity.require(Permission::CandidateView)?;

		let tags: Vec<Tag> = sqlx::query_as(
			"SELECT tag_id, tenant_id, name, created_at FROM tags \
			 WHERE tenant_id = $1 ORDER BY name",
		)
		.bind(identity.tenant_id.as_str())
		.fetch_all(&self.db.pool)
		.await?;

		Ok(tags.into_iter().map(TagView::from).collect())
	}

	/// Attaches a tag by name, creating the tag on first use. Attaching an
	/// already-attached tag is a no-op.
	pub async fn attach_tag(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		req: AttachTagRequest,
	) -> Result<TagView> {
		identity.require(Permission::TagManage)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let name = req.name.trim().to_lowercase();

		if name.is_empty() {
			return Err(Error::InvalidRequest { message: "name is required.".to_string() });
		}

		let mut tx = self.db.pool.begin().await?;
		let tag: Tag = sqlx::query_as(
			"\
INSERT INTO tags (tag_id, tenant_id, name, created_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (tenant_id, name) DO UPDATE SET name = excluded.name
RETURNING tag_id, tenant_id, name, created_at",
		)
		.bind(Uuid::new_v4())
		.bind(identity.tenant_id.as_str())
		.bind(name.as_str())
		.bind(OffsetDateTime::now_utc())
		.fetch_one(&mut *tx)
		.await?;

		sqlx::query(
			"INSERT INTO candidate_tags (candidate_id, tag_id) VALUES ($1, $2) \
			 ON CONFLICT (candidate_id, tag_id) DO NOTHING",
		)
		.bind(candidate_id)
		.bind(tag.tag_id)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(tag.into())
	}

	pub async fn detach_tag(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		tag_id: Uuid,
	) -> Result<()> {
		identity.require(Permission::TagManage)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let result = sqlx::query(
			"\
DELETE FROM candidate_tags ct
USING tags t
WHERE ct.tag_id = t.tag_id AND t.tenant_id = $1 AND ct.candidate_id = $2 AND ct.tag_id = $3",
		)
		.bind(identity.tenant_id.as_str())
		.bind(candidate_id)
		.bind(tag_id)
		.execute(&self.db.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound { message: "Tag is not attached.".to_string() });
		}

		Ok(())
	}
}
