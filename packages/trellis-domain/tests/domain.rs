use uuid::Uuid;

use trellis_domain::{
	access::{Permission, Role},
	duplicates::{CandidateIdentity, MatchKey, find_duplicates},
	identity,
};

fn row(email: Option<&str>, phone: Option<&str>) -> CandidateIdentity {
	CandidateIdentity {
		id: Uuid::new_v4(),
		email: email.map(str::to_string),
		phone: phone.map(str::to_string),
	}
}

#[test]
fn viewer_permission_boundary() {
	assert!(Role::Viewer.has(Permission::CandidateView));
	assert!(!Role::Viewer.has(Permission::CandidateMerge));
	assert!(!Role::Viewer.has(Permission::CandidateCreate));
}

#[test]
fn every_role_can_view_candidates() {
	for role in [Role::Owner, Role::Admin, Role::Recruiter, Role::Viewer] {
		assert!(role.has(Permission::CandidateView), "{role} must be able to view candidates");
	}
}

#[test]
fn normalized_email_feeds_duplicate_scan() {
	let email = identity::normalize_email(" Casey@Example.Org ").expect("Address must normalize.");
	let rows = vec![row(Some(&email), None), row(Some("casey@example.org"), None)];
	let groups = find_duplicates(&rows);

	assert_eq!(groups.len(), 1);
	assert_eq!(groups[0].matched_on, MatchKey::Email("casey@example.org".to_string()));
}

#[test]
fn phone_context_group_includes_seen_members() {
	let shared_phone = identity::normalize_phone("+1 555 000 1111").expect("Phone must normalize.");
	let a = row(Some("dup@example.com"), None);
	let b = row(Some("dup@example.com"), Some(&shared_phone));
	let c = row(None, Some(&shared_phone));
	let groups = find_duplicates(&[a, b.clone(), c.clone()]);
	let phone_group = groups
		.iter()
		.find(|group| group.matched_on == MatchKey::Phone(shared_phone.clone()))
		.expect("Expected the phone group to be reported.");

	assert!(phone_group.candidate_ids.contains(&b.id));
	assert!(phone_group.candidate_ids.contains(&c.id));
}

#[test]
fn match_key_serializes_with_kind_and_value() {
	let key = MatchKey::Email("a@x.com".to_string());
	let json = serde_json::to_value(&key).expect("Serialize failed.");

	assert_eq!(json, serde_json::json!({ "kind": "email", "value": "a@x.com" }));
}

#[test]
fn no_group_of_size_one_is_ever_reported() {
	let rows = vec![
		row(Some("solo@example.com"), Some("+15550000001")),
		row(Some("pair@example.com"), Some("+15550000002")),
		row(Some("pair@example.com"), Some("+15550000003")),
	];

	for group in find_duplicates(&rows) {
		assert!(group.candidate_ids.len() >= 2);
	}
}
