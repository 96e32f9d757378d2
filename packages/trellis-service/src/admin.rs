//! Operator surface, exposed only on the loopback admin listener. These
//! operations trust the caller; the bind address is the access control.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Error, Result, TrellisService};
use trellis_domain::access::Role;
use trellis_storage::models::AuditLog;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
	pub tenant_id: String,
	pub email: String,
	pub name: String,
	pub role: Role,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUserResponse {
	pub user_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
	pub user_id: Uuid,
	pub ttl_minutes: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
	pub token: String,
	#[serde(with = "crate::time_serde")]
	pub expires_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditListRequest {
	pub tenant_id: String,
	pub limit: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntryView {
	pub audit_id: Uuid,
	pub actor_id: Option<Uuid>,
	pub action: String,
	pub entity_type: String,
	pub entity_id: Option<Uuid>,
	pub details: Value,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl From<AuditLog> for AuditEntryView {
	fn from(entry: AuditLog) -> Self {
		Self {
			audit_id: entry.audit_id,
			actor_id: entry.actor_id,
			action: entry.action,
			entity_type: entry.entity_type,
			entity_id: entry.entity_id,
			details: entry.details,
			created_at: entry.created_at,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditListResponse {
	pub entries: Vec<AuditEntryView>,
}

impl TrellisService {
	pub async fn create_user(&self, req: CreateUserRequest) -> Result<CreateUserResponse> {
		let tenant_id = req.tenant_id.trim().to_string();
		let name = req.name.trim().to_string();

		if tenant_id.is_empty() || name.is_empty() {
			return Err(Error::InvalidRequest {
				message: "tenant_id and name are required.".to_string(),
			});
		}

		let email = trellis_domain::identity::normalize_email(&req.email).ok_or_else(|| {
			Error::InvalidRequest { message: "email is not a valid address.".to_string() }
		})?;
		let user_id = Uuid::new_v4();

		sqlx::query(
			"\
INSERT INTO users (user_id, tenant_id, email, name, role, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
		)
		.bind(user_id)
		.bind(tenant_id.as_str())
		.bind(email.as_str())
		.bind(name.as_str())
		.bind(req.role.as_str())
		.bind(OffsetDateTime::now_utc())
		.execute(&self.db.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict {
				message: "A user with this email already exists in the tenant.".to_string(),
			},
			other => other.into(),
		})?;

		Ok(CreateUserResponse { user_id })
	}

	pub async fn create_session(
		&self,
		req: CreateSessionRequest,
	) -> Result<CreateSessionResponse> {
		let tenant_id: Option<String> =
			sqlx::query_scalar("SELECT tenant_id FROM users WHERE user_id = $1")
				.bind(req.user_id)
				.fetch_optional(&self.db.pool)
				.await?;
		let tenant_id =
			tenant_id.ok_or_else(|| Error::NotFound { message: "User not found.".to_string() })?;
		let ttl_minutes = req.ttl_minutes.unwrap_or(self.cfg.auth.session_ttl_minutes).max(1);
		let now = OffsetDateTime::now_utc();
		let expires_at = now + Duration::minutes(ttl_minutes);
		let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());

		sqlx::query(
			"\
INSERT INTO sessions (token, tenant_id, user_id, created_at, expires_at)
VALUES ($1, $2, $3, $4, $5)",
		)
		.bind(token.as_str())
		.bind(tenant_id.as_str())
		.bind(req.user_id)
		.bind(now)
		.bind(expires_at)
		.execute(&self.db.pool)
		.await?;

		Ok(CreateSessionResponse { token, expires_at })
	}

	pub async fn list_audit(&self, req: AuditListRequest) -> Result<AuditListResponse> {
		let limit = i64::from(req.limit.unwrap_or(100).clamp(1, 1_000));
		let entries: Vec<AuditLog> = sqlx::query_as(
			"\
SELECT audit_id, tenant_id, actor_id, action, entity_type, entity_id, details, created_at
FROM audit_logs
WHERE tenant_id = $1
ORDER BY created_at DESC
LIMIT $2",
		)
		.bind(req.tenant_id.as_str())
		.bind(limit)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(AuditListResponse { entries: entries.into_iter().map(AuditEntryView::from).collect() })
	}
}
