use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CandidateSummary, Error, Identity, Result, TrellisService};
use trellis_domain::access::Permission;
use trellis_storage::{models::Candidate, queries};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MergeOverrides {
	pub name: Option<String>,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
	pub owner_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeRequest {
	pub target_id: Uuid,
	pub source_ids: Vec<Uuid>,
	#[serde(default)]
	pub overrides: MergeOverrides,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeResponse {
	pub target: CandidateSummary,
	pub merged_source_ids: Vec<Uuid>,
}

impl TrellisService {
	/// Consolidates the source candidates into the target. Field overrides,
	/// email/phone backfill, tag union, child reassignment, and the merge and
	/// audit log rows all commit together or not at all. Row locks on the
	/// target and every source keep a concurrent merge from claiming the same
	/// candidate twice.
	pub async fn merge_candidates(
		&self,
		identity: &Identity,
		req: MergeRequest,
	) -> Result<MergeResponse> {
		identity.require(Permission::CandidateMerge)?;

		let mut source_ids = req.source_ids;

		source_ids.sort_unstable();
		source_ids.dedup();

		if source_ids.is_empty() {
			return Err(Error::InvalidRequest {
				message: "source_ids must not be empty.".to_string(),
			});
		}
		if source_ids.contains(&req.target_id) {
			return Err(Error::Conflict {
				message: "target_id must not appear in source_ids.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		// One sorted pass over target and sources together; two merges
		// touching the same candidates, in either role, acquire their locks
		// in the same sequence instead of deadlocking.
		let (lock_ids, target_index) = lock_order(req.target_id, &source_ids);
		let mut locked = Vec::with_capacity(lock_ids.len());

		for id in &lock_ids {
			let role = if *id == req.target_id { "Target" } else { "Source" };

			locked.push(lock_mergeable(&mut tx, &identity.tenant_id, *id, role).await?);
		}

		let mut target = locked.remove(target_index);
		let sources = locked;

		apply_overrides(&mut target, req.overrides)?;
		backfill_identity(&mut target, &sources);

		target.updated_at = now;

		sqlx::query(
			"\
UPDATE candidates
SET name = $1, email = $2, phone = $3, source = $4, owner_id = $5, updated_at = $6
WHERE tenant_id = $7 AND candidate_id = $8",
		)
		.bind(target.name.as_str())
		.bind(target.email.as_deref())
		.bind(target.phone.as_deref())
		.bind(target.source.as_deref())
		.bind(target.owner_id)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(target.candidate_id)
		.execute(&mut *tx)
		.await?;

		queries::union_tags(&mut tx, &source_ids, target.candidate_id).await?;
		queries::reassign_children(&mut tx, &identity.tenant_id, &source_ids, target.candidate_id)
			.await?;

		sqlx::query(
			"UPDATE candidates SET merged_into_id = $1, updated_at = $2 \
			 WHERE tenant_id = $3 AND candidate_id = ANY($4)",
		)
		.bind(target.candidate_id)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(&source_ids)
		.execute(&mut *tx)
		.await?;

		for source in &sources {
			sqlx::query(
				"\
INSERT INTO merge_logs (merge_id, tenant_id, target_id, source_id, performed_by, details, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)",
			)
			.bind(Uuid::new_v4())
			.bind(identity.tenant_id.as_str())
			.bind(target.candidate_id)
			.bind(source.candidate_id)
			.bind(identity.user_id)
			.bind(json!({ "source_name": source.name }))
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}

		queries::insert_audit_log(
			&mut *tx,
			queries::AuditEntry {
				tenant_id: &identity.tenant_id,
				actor_id: Some(identity.user_id),
				action: "candidate.merge",
				entity_type: "candidate",
				entity_id: Some(target.candidate_id),
				details: json!({ "source_ids": source_ids }),
			},
			now,
		)
		.await?;

		tx.commit().await?;

		Ok(MergeResponse { target: target.into(), merged_source_ids: source_ids })
	}
}

/// Splices the target into the sorted source ids, returning the full lock
/// sequence and the target's index within it. `source_ids` must already be
/// sorted and free of the target.
fn lock_order(target_id: Uuid, source_ids: &[Uuid]) -> (Vec<Uuid>, usize) {
	let mut order = source_ids.to_vec();
	let index = match order.binary_search(&target_id) {
		Ok(index) | Err(index) => index,
	};

	order.insert(index, target_id);

	(order, index)
}

async fn lock_mergeable(
	tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
	tenant_id: &str,
	candidate_id: Uuid,
	role: &str,
) -> Result<Candidate> {
	let candidate = queries::fetch_candidate_for_update(tx, tenant_id, candidate_id)
		.await?
		.filter(Candidate::is_active)
		.ok_or_else(|| Error::NotFound {
			message: format!("{role} candidate {candidate_id} not found."),
		})?;

	Ok(candidate)
}

fn apply_overrides(target: &mut Candidate, overrides: MergeOverrides) -> Result<()> {
	if let Some(name) = overrides.name {
		let name = name.trim().to_string();

		if name.is_empty() {
			return Err(Error::InvalidRequest { message: "name must be non-empty.".to_string() });
		}

		target.name = name;
	}
	if let Some(email) = overrides.email.as_deref() {
		let email = trellis_domain::identity::normalize_email(email).ok_or_else(|| {
			Error::InvalidRequest { message: "email is not a valid address.".to_string() }
		})?;

		target.email = Some(email);
	}
	if let Some(phone) = overrides.phone.as_deref() {
		let phone = trellis_domain::identity::normalize_phone(phone).ok_or_else(|| {
			Error::InvalidRequest { message: "phone must be E.164, e.g. +15550100.".to_string() }
		})?;

		target.phone = Some(phone);
	}
	if let Some(source) = overrides.source {
		target.source = Some(source.trim().to_string()).filter(|s| !s.is_empty());
	}
	if overrides.owner_id.is_some() {
		target.owner_id = overrides.owner_id;
	}

	Ok(())
}

/// Fills the target's missing email and phone from the first source that has
/// one, in request order.
fn backfill_identity(target: &mut Candidate, sources: &[Candidate]) {
	if target.email.is_none() {
		target.email = sources.iter().find_map(|source| source.email.clone());
	}
	if target.phone.is_none() {
		target.phone = sources.iter().find_map(|source| source.phone.clone());
	}
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;
	use uuid::Uuid;

	use super::{MergeOverrides, apply_overrides, backfill_identity, lock_order};
	use trellis_storage::models::Candidate;

	fn candidate(email: Option<&str>, phone: Option<&str>) -> Candidate {
		let now = OffsetDateTime::now_utc();

		Candidate {
			candidate_id: Uuid::new_v4(),
			tenant_id: "acme".to_string(),
			name: "Test".to_string(),
			email: email.map(str::to_string),
			phone: phone.map(str::to_string),
			source: None,
			status: "active".to_string(),
			owner_id: None,
			pipeline_id: None,
			stage_id: None,
			rejected_at: None,
			deleted_at: None,
			merged_into_id: None,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn lock_order_is_sorted_regardless_of_roles() {
		let mut ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

		ids.sort_unstable();

		// Whichever id plays the target, the full lock sequence is the same.
		for target_index in 0..ids.len() {
			let sources: Vec<Uuid> = ids
				.iter()
				.enumerate()
				.filter(|(i, _)| *i != target_index)
				.map(|(_, id)| *id)
				.collect();
			let (order, index) = lock_order(ids[target_index], &sources);

			assert_eq!(order, ids);
			assert_eq!(order[index], ids[target_index]);
		}
	}

	#[test]
	fn backfill_takes_first_source_with_a_value() {
		let mut target = candidate(Some("a@x.com"), None);
		let sources =
			vec![candidate(None, None), candidate(None, Some("+1555")), candidate(None, Some("+2666"))];

		backfill_identity(&mut target, &sources);

		assert_eq!(target.email.as_deref(), Some("a@x.com"));
		assert_eq!(target.phone.as_deref(), Some("+1555"));
	}

	#[test]
	fn backfill_never_overwrites_present_fields() {
		let mut target = candidate(Some("keep@x.com"), Some("+1111"));
		let sources = vec![candidate(Some("drop@x.com"), Some("+2222"))];

		backfill_identity(&mut target, &sources);

		assert_eq!(target.email.as_deref(), Some("keep@x.com"));
		assert_eq!(target.phone.as_deref(), Some("+1111"));
	}

	#[test]
	fn overrides_reject_invalid_identities() {
		let mut target = candidate(None, None);

		assert!(
			apply_overrides(
				&mut target,
				MergeOverrides { email: Some("not-an-email".to_string()), ..Default::default() }
			)
			.is_err()
		);
		assert!(
			apply_overrides(
				&mut target,
				MergeOverrides { phone: Some("12345".to_string()), ..Default::default() }
			)
			.is_err()
		);
	}

	#[test]
	fn overrides_normalize_before_assignment() {
		let mut target = candidate(None, None);

		apply_overrides(
			&mut target,
			MergeOverrides {
				email: Some("  Ada@Example.COM ".to_string()),
				phone: Some("+1 (555) 010-0100".to_string()),
				..Default::default()
			},
		)
		.unwrap();

		assert_eq!(target.email.as_deref(), Some("ada@example.com"));
		assert_eq!(target.phone.as_deref(), Some("+15550100100"));
	}
}
