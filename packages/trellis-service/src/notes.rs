use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::access::{Permission, Role};
use trellis_storage::models::CandidateNote;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateNoteRequest {
	pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateNoteRequest {
	pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoteView {
	pub note_id: Uuid,
	pub candidate_id: Uuid,
	pub author_id: Option<Uuid>,
	pub body: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl From<CandidateNote> for NoteView {
	fn from(note: CandidateNote) -> Self {
		Self {
			note_id: note.note_id,
			candidate_id: note.candidate_id,
			author_id: note.author_id,
			body: note.body,
			created_at: note.created_at,
			updated_at: note.updated_at,
		}
	}
}

impl TrellisService {
	pub async fn list_notes(&self, identity: &Identity, candidate_id: Uuid) -> Result<Vec<NoteView>> {
		identity.require(Permission::NoteView)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let notes: Vec<CandidateNote> = sqlx::query_as(
			"\
SELECT note_id, tenant_id, candidate_id, author_id, body, created_at, updated_at
FROM candidate_notes
WHERE tenant_id = $1 AND candidate_id = $2
ORDER BY created_at DESC",
		)
		.bind(identity.tenant_id.as_str())
		.bind(candidate_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(notes.into_iter().map(NoteView::from).collect())
	}

	pub async fn create_note(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		req: CreateNoteRequest,
	) -> Result<NoteView> {
		identity.require(Permission::NoteCreate)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let body = req.body.trim().to_string();

		if body.is_empty() {
			return Err(Error::InvalidRequest { message: "body is required.".to_string() });
		}

		let now = OffsetDateTime::now_utc();
		let note = CandidateNote {
			note_id: Uuid::new_v4(),
			tenant_id: identity.tenant_id.clone(),
			candidate_id,
			author_id: Some(identity.user_id),
			body,
			created_at: now,
			updated_at: now,
		};

		sqlx::query(
			"\
INSERT INTO candidate_notes (note_id, tenant_id, candidate_id, author_id, body, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)",
		)
		.bind(note.note_id)
		.bind(note.tenant_id.as_str())
		.bind(note.candidate_id)
		.bind(note.author_id)
		.bind(note.body.as_str())
		.bind(note.created_at)
		.bind(note.updated_at)
		.execute(&self.db.pool)
		.await?;

		Ok(note.into())
	}

	pub async fn update_note(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		note_id: Uuid,
		req: UpdateNoteRequest,
	) -> Result<NoteView> {
		identity.require(Permission::NoteEdit)?;

		let mut note = self.fetch_note(identity, candidate_id, note_id).await?;

		ensure_note_access(identity, &note, Permission::NoteEdit)?;

		let body = req.body.trim().to_string();

		if body.is_empty() {
			return Err(Error::InvalidRequest { message: "body is required.".to_string() });
		}

		note.body = body;
		note.updated_at = OffsetDateTime::now_utc();

		sqlx::query(
			"UPDATE candidate_notes SET body = $1, updated_at = $2 \
			 WHERE tenant_id = $3 AND note_id = $4",
		)
		.bind(note.body.as_str())
		.bind(note.updated_at)
		.bind(identity.tenant_id.as_str())
		.bind(note_id)
		.execute(&self.db.pool)
		.await?;

		Ok(note.into())
	}

	pub async fn delete_note(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		note_id: Uuid,
	) -> Result<()> {
		identity.require(Permission::NoteDelete)?;

		let note = self.fetch_note(identity, candidate_id, note_id).await?;

		ensure_note_access(identity, &note, Permission::NoteDelete)?;

		sqlx::query("DELETE FROM candidate_notes WHERE tenant_id = $1 AND note_id = $2")
			.bind(identity.tenant_id.as_str())
			.bind(note_id)
			.execute(&self.db.pool)
			.await?;

		Ok(())
	}

	async fn fetch_note(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
		note_id: Uuid,
	) -> Result<CandidateNote> {
		let note: Option<CandidateNote> = sqlx::query_as(
			"\
SELECT note_id, tenant_id, candidate_id, author_id, body, created_at, updated_at
FROM candidate_notes
WHERE tenant_id = $1 AND candidate_id = $2 AND note_id = $3",
		)
		.bind(identity.tenant_id.as_str())
		.bind(candidate_id)
		.bind(note_id)
		.fetch_optional(&self.db.pool)
		.await?;

		note.ok_or_else(|| Error::NotFound { message: "Note not found.".to_string() })
	}
}

/// Below ADMIN, a note may only be changed by its author.
fn ensure_note_access(
	identity: &Identity,
	note: &CandidateNote,
	permission: Permission,
) -> Result<()> {
	if identity.role.at_least(Role::Admin) || note.author_id == Some(identity.user_id) {
		Ok(())
	} else {
		Err(Error::PermissionDenied { permission })
	}
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;
	use uuid::Uuid;

	use super::ensure_note_access;
	use crate::Identity;
	use trellis_domain::access::{Permission, Role};
	use trellis_storage::models::CandidateNote;

	fn note(author_id: Option<Uuid>) -> CandidateNote {
		let now = OffsetDateTime::now_utc();

		CandidateNote {
			note_id: Uuid::new_v4(),
			tenant_id: "acme".to_string(),
			candidate_id: Uuid::new_v4(),
			author_id,
			body: "Called, voicemail.".to_string(),
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn recruiters_touch_only_their_own_notes() {
		let user_id = Uuid::new_v4();
		let me = Identity { user_id, tenant_id: "acme".to_string(), role: Role::Recruiter };

		assert!(ensure_note_access(&me, &note(Some(user_id)), Permission::NoteEdit).is_ok());
		assert!(
			ensure_note_access(&me, &note(Some(Uuid::new_v4())), Permission::NoteEdit).is_err()
		);
		assert!(ensure_note_access(&me, &note(None), Permission::NoteDelete).is_err());
	}

	#[test]
	fn admins_touch_any_note() {
		let admin =
			Identity { user_id: Uuid::new_v4(), tenant_id: "acme".to_string(), role: Role::Admin };

		assert!(
			ensure_note_access(&admin, &note(Some(Uuid::new_v4())), Permission::NoteEdit).is_ok()
		);
	}
}
