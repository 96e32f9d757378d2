use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Fixed role set. Ordering is the role hierarchy: a role satisfies an
/// "at least" check against any role with an equal or lower rank.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
	Owner,
	Admin,
	Recruiter,
	Viewer,
}
impl Role {
	pub fn rank(self) -> u8 {
		match self {
			Self::Owner => 40,
			Self::Admin => 30,
			Self::Recruiter => 20,
			Self::Viewer => 10,
		}
	}

	pub fn at_least(self, required: Role) -> bool {
		self.rank() >= required.rank()
	}

	pub fn has(self, permission: Permission) -> bool {
		permissions_for(self).contains(&permission)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Owner => "OWNER",
			Self::Admin => "ADMIN",
			Self::Recruiter => "RECRUITER",
			Self::Viewer => "VIEWER",
		}
	}
}
impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Role {
	type Err = UnknownRole;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"OWNER" => Ok(Self::Owner),
			"ADMIN" => Ok(Self::Admin),
			"RECRUITER" => Ok(Self::Recruiter),
			"VIEWER" => Ok(Self::Viewer),
			_ => Err(UnknownRole { raw: raw.to_string() }),
		}
	}
}

#[derive(Debug)]
pub struct UnknownRole {
	pub raw: String,
}
impl fmt::Display for UnknownRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Unknown role: {}.", self.raw)
	}
}
impl std::error::Error for UnknownRole {}

/// Closed permission set gating route handlers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
	CandidateView,
	CandidateCreate,
	CandidateEdit,
	CandidateDelete,
	CandidateMerge,
	NoteView,
	NoteCreate,
	NoteEdit,
	NoteDelete,
	TagManage,
	PipelineView,
	PipelineManage,
	AnalyticsView,
	ImportRun,
	TemplateView,
	TemplateManage,
	EmailSend,
	AuditView,
	UserManage,
}
impl Permission {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::CandidateView => "CANDIDATE_VIEW",
			Self::CandidateCreate => "CANDIDATE_CREATE",
			Self::CandidateEdit => "CANDIDATE_EDIT",
			Self::CandidateDelete => "CANDIDATE_DELETE",
			Self::CandidateMerge => "CANDIDATE_MERGE",
			Self::NoteView => "NOTE_VIEW",
			Self::NoteCreate => "NOTE_CREATE",
			Self::NoteEdit => "NOTE_EDIT",
			Self::NoteDelete => "NOTE_DELETE",
			Self::TagManage => "TAG_MANAGE",
			Self::PipelineView => "PIPELINE_VIEW",
			Self::PipelineManage => "PIPELINE_MANAGE",
			Self::AnalyticsView => "ANALYTICS_VIEW",
			Self::ImportRun => "IMPORT_RUN",
			Self::TemplateView => "TEMPLATE_VIEW",
			Self::TemplateManage => "TEMPLATE_MANAGE",
			Self::EmailSend => "EMAIL_SEND",
			Self::AuditView => "AUDIT_VIEW",
			Self::UserManage => "USER_MANAGE",
		}
	}
}
impl fmt::Display for Permission {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

const VIEWER_PERMISSIONS: &[Permission] = &[
	Permission::CandidateView,
	Permission::NoteView,
	Permission::PipelineView,
	Permission::AnalyticsView,
	Permission::TemplateView,
];

const RECRUITER_PERMISSIONS: &[Permission] = &[
	Permission::CandidateView,
	Permission::CandidateCreate,
	Permission::CandidateEdit,
	Permission::NoteView,
	Permission::NoteCreate,
	Permission::NoteEdit,
	Permission::NoteDelete,
	Permission::TagManage,
	Permission::PipelineView,
	Permission::AnalyticsView,
	Permission::ImportRun,
	Permission::TemplateView,
	Permission::EmailSend,
];

const ADMIN_PERMISSIONS: &[Permission] = &[
	Permission::CandidateView,
	Permission::CandidateCreate,
	Permission::CandidateEdit,
	Permission::CandidateDelete,
	Permission::CandidateMerge,
	Permission::NoteView,
	Permission::NoteCreate,
	Permission::NoteEdit,
	Permission::NoteDelete,
	Permission::TagManage,
	Permission::PipelineView,
	Permission::PipelineManage,
	Permission::AnalyticsView,
	Permission::ImportRun,
	Permission::TemplateView,
	Permission::TemplateManage,
	Permission::EmailSend,
	Permission::AuditView,
	Permission::UserManage,
];

/// Static lookup table, not a policy engine. OWNER and ADMIN share the same
/// permission set; they differ only in rank.
pub fn permissions_for(role: Role) -> &'static [Permission] {
	match role {
		Role::Owner | Role::Admin => ADMIN_PERMISSIONS,
		Role::Recruiter => RECRUITER_PERMISSIONS,
		Role::Viewer => VIEWER_PERMISSIONS,
	}
}

#[cfg(test)]
mod tests {
	use super::{Permission, Role};

	#[test]
	fn viewer_is_read_only() {
		assert!(Role::Viewer.has(Permission::CandidateView));
		assert!(!Role::Viewer.has(Permission::CandidateCreate));
		assert!(!Role::Viewer.has(Permission::CandidateMerge));
	}

	#[test]
	fn recruiter_cannot_merge_or_manage_pipelines() {
		assert!(Role::Recruiter.has(Permission::CandidateCreate));
		assert!(Role::Recruiter.has(Permission::ImportRun));
		assert!(!Role::Recruiter.has(Permission::CandidateMerge));
		assert!(!Role::Recruiter.has(Permission::PipelineManage));
	}

	#[test]
	fn admin_and_owner_can_merge() {
		assert!(Role::Admin.has(Permission::CandidateMerge));
		assert!(Role::Owner.has(Permission::CandidateMerge));
	}

	#[test]
	fn hierarchy_at_least() {
		assert!(Role::Owner.at_least(Role::Admin));
		assert!(Role::Admin.at_least(Role::Admin));
		assert!(!Role::Recruiter.at_least(Role::Admin));
		assert!(!Role::Viewer.at_least(Role::Recruiter));
	}

	#[test]
	fn role_round_trips_through_str() {
		for role in [Role::Owner, Role::Admin, Role::Recruiter, Role::Viewer] {
			assert_eq!(role.as_str().parse::<Role>().expect("Role must parse."), role);
		}
		assert!("INTERN".parse::<Role>().is_err());
	}
}
