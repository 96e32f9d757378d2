use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, TrellisService};
use trellis_domain::access::{Permission, Role};
use trellis_storage::queries;

/// The authenticated caller, resolved from a session token. Everything a
/// handler needs for permission and pipeline-scope checks.
#[derive(Clone, Debug)]
pub struct Identity {
	pub user_id: Uuid,
	pub tenant_id: String,
	pub role: Role,
}
impl Identity {
	pub fn require(&self, permission: Permission) -> Result<()> {
		if self.role.has(permission) { Ok(()) } else { Err(Error::PermissionDenied { permission }) }
	}
}

/// Pipelines the caller may read. OWNER and ADMIN are unrestricted; other
/// roles see only pipelines granted to them.
#[derive(Clone, Debug)]
pub enum PipelineScope {
	All,
	Granted(Vec<Uuid>),
}
impl PipelineScope {
	pub fn permits(&self, pipeline_id: Option<Uuid>) -> bool {
		match self {
			Self::All => true,
			Self::Granted(ids) => pipeline_id.map(|id| ids.contains(&id)).unwrap_or(false),
		}
	}
}

impl TrellisService {
	pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity> {
		let token = token.map(str::trim).filter(|value| !value.is_empty());
		let Some(token) = token else {
			return Err(Error::Unauthorized);
		};
		let now = OffsetDateTime::now_utc();
		let Some(user) = queries::fetch_user_by_session(&self.db.pool, token, now).await? else {
			return Err(Error::Unauthorized);
		};
		let role = user.role.parse::<Role>().map_err(|_| Error::Unauthorized)?;

		Ok(Identity { user_id: user.user_id, tenant_id: user.tenant_id, role })
	}

	pub(crate) async fn pipeline_scope(&self, identity: &Identity) -> Result<PipelineScope> {
		if identity.role.at_least(Role::Admin) {
			return Ok(PipelineScope::All);
		}

		let ids = queries::granted_pipeline_ids(&self.db.pool, identity.user_id).await?;

		Ok(PipelineScope::Granted(ids))
	}
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::{Identity, PipelineScope};
	use trellis_domain::access::{Permission, Role};

	fn identity(role: Role) -> Identity {
		Identity { user_id: Uuid::new_v4(), tenant_id: "acme".to_string(), role }
	}

	#[test]
	fn viewer_denied_merge_and_create() {
		let viewer = identity(Role::Viewer);

		assert!(viewer.require(Permission::CandidateView).is_ok());
		assert!(viewer.require(Permission::CandidateMerge).is_err());
		assert!(viewer.require(Permission::CandidateCreate).is_err());
	}

	#[test]
	fn granted_scope_rejects_unassigned_and_unset_pipelines() {
		let pipeline = Uuid::new_v4();
		let scope = PipelineScope::Granted(vec![pipeline]);

		assert!(scope.permits(Some(pipeline)));
		assert!(!scope.permits(Some(Uuid::new_v4())));
		assert!(!scope.permits(None));
		assert!(PipelineScope::All.permits(None));
	}
}
