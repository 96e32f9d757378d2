use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Identity, Result, TrellisService, auth::PipelineScope};
use trellis_domain::{
	access::Permission,
	duplicates::{self, CandidateIdentity, MatchKey},
};
use trellis_storage::models::Candidate;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DuplicatesRequest {
	pub pipeline_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateMember {
	pub candidate_id: Uuid,
	pub name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateSet {
	pub matched_on: MatchKey,
	pub members: Vec<DuplicateMember>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicatesResponse {
	pub sets: Vec<DuplicateSet>,
}

impl TrellisService {
	pub async fn find_duplicates(
		&self,
		identity: &Identity,
		req: DuplicatesRequest,
	) -> Result<DuplicatesResponse> {
		identity.require(Permission::CandidateView)?;

		let scope = self.pipeline_scope(identity).await?;
		let candidates = self.scan_candidates(identity, &scope, req.pipeline_id).await?;
		let identities: Vec<CandidateIdentity> = candidates
			.iter()
			.map(|c| CandidateIdentity {
				id: c.candidate_id,
				email: c.email.clone(),
				phone: c.phone.clone(),
			})
			.collect();
		let by_id: HashMap<Uuid, &Candidate> =
			candidates.iter().map(|c| (c.candidate_id, c)).collect();
		let sets = duplicates::find_duplicates(&identities)
			.into_iter()
			.map(|group| DuplicateSet {
				matched_on: group.matched_on,
				members: group
					.candidate_ids
					.iter()
					.filter_map(|id| by_id.get(id))
					.map(|c| DuplicateMember {
						candidate_id: c.candidate_id,
						name: c.name.clone(),
						email: c.email.clone(),
						phone: c.phone.clone(),
					})
					.collect(),
			})
			.collect();

		Ok(DuplicatesResponse { sets })
	}

	/// All active candidates visible to the caller, optionally narrowed to one
	/// pipeline. Candidates with neither email nor phone cannot match anything
	/// and are filtered out before the scan.
	async fn scan_candidates(
		&self,
		identity: &Identity,
		scope: &PipelineScope,
		pipeline_id: Option<Uuid>,
	) -> Result<Vec<Candidate>> {
		let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
			"SELECT candidate_id, tenant_id, name, email, phone, source, status, owner_id, \
			 pipeline_id, stage_id, rejected_at, deleted_at, merged_into_id, created_at, \
			 updated_at FROM candidates WHERE tenant_id = ",
		);

		query.push_bind(identity.tenant_id.clone());
		query.push(" AND deleted_at IS NULL AND merged_into_id IS NULL");
		query.push(" AND (email IS NOT NULL OR phone IS NOT NULL)");

		match scope {
			PipelineScope::All => {},
			PipelineScope::Granted(ids) if ids.is_empty() => {
				query.push(" AND FALSE");
			},
			PipelineScope::Granted(ids) => {
				query.push(" AND pipeline_id = ANY(").push_bind(ids.clone()).push(")");
			},
		}

		if let Some(pipeline_id) = pipeline_id {
			query.push(" AND pipeline_id = ").push_bind(pipeline_id);
		}

		Ok(query.build_query_as().fetch_all(&self.db.pool).await?)
	}
}
