use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity projection of an active candidate, as fed into the duplicate scan.
/// Callers are responsible for excluding soft-deleted and merged candidates.
#[derive(Clone, Debug)]
pub struct CandidateIdentity {
	pub id: Uuid,
	pub email: Option<String>,
	pub phone: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MatchKey {
	Email(String),
	Phone(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateGroup {
	pub matched_on: MatchKey,
	pub candidate_ids: Vec<Uuid>,
}

/// Groups candidates by lower-cased e-mail, then by exact phone. A group needs
/// at least two members to count. A phone group is skipped when every member
/// was already reported by an e-mail group; if any member is new, the full
/// group is reported so the new match is shown in context. Results are ordered
/// by descending group size.
pub fn find_duplicates(candidates: &[CandidateIdentity]) -> Vec<DuplicateGroup> {
	let mut by_email: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
	let mut by_phone: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();

	for candidate in candidates {
		if let Some(email) = candidate.email.as_deref() {
			let key = email.trim().to_lowercase();

			if !key.is_empty() {
				by_email.entry(key).or_default().push(candidate.id);
			}
		}
		if let Some(phone) = candidate.phone.as_deref() {
			let key = phone.trim();

			if !key.is_empty() {
				by_phone.entry(key.to_string()).or_default().push(candidate.id);
			}
		}
	}

	let mut groups = Vec::new();
	let mut seen: HashSet<Uuid> = HashSet::new();

	for (email, members) in by_email {
		if members.len() < 2 {
			continue;
		}

		seen.extend(members.iter().copied());

		groups.push(DuplicateGroup { matched_on: MatchKey::Email(email), candidate_ids: members });
	}

	for (phone, members) in by_phone {
		if members.len() < 2 {
			continue;
		}
		if members.iter().all(|id| seen.contains(id)) {
			continue;
		}

		groups.push(DuplicateGroup { matched_on: MatchKey::Phone(phone), candidate_ids: members });
	}

	groups.sort_by(|a, b| {
		b.candidate_ids
			.len()
			.cmp(&a.candidate_ids.len())
			.then_with(|| match_key_ordinal(&a.matched_on).cmp(&match_key_ordinal(&b.matched_on)))
			.then_with(|| match_key_value(&a.matched_on).cmp(match_key_value(&b.matched_on)))
	});

	groups
}

fn match_key_ordinal(key: &MatchKey) -> u8 {
	match key {
		MatchKey::Email(_) => 0,
		MatchKey::Phone(_) => 1,
	}
}

fn match_key_value(key: &MatchKey) -> &str {
	match key {
		MatchKey::Email(value) | MatchKey::Phone(value) => value,
	}
}
