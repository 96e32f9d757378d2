use std::sync::OnceLock;

use regex::Regex;

// E.164: leading +, country code 1-9, at most 15 digits total.
fn e164() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();

	RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("E.164 pattern must compile."))
}

/// Lowercases and trims an e-mail address for comparison and storage.
/// Returns `None` when the input is not plausibly an address.
pub fn normalize_email(raw: &str) -> Option<String> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return None;
	}

	let lowered = trimmed.to_lowercase();
	let (local, host) = lowered.split_once('@')?;

	if local.is_empty() || host.is_empty() || !host.contains('.') || host.contains('@') {
		return None;
	}

	Some(lowered)
}

/// Strips formatting characters and validates the result as E.164.
/// Phones compare case-sensitively (digits only), so no folding is applied.
pub fn normalize_phone(raw: &str) -> Option<String> {
	let compact: String =
		raw.chars().filter(|ch| !matches!(ch, ' ' | '-' | '(' | ')' | '.')).collect();

	if e164().is_match(&compact) { Some(compact) } else { None }
}

#[cfg(test)]
mod tests {
	use super::{normalize_email, normalize_phone};

	#[test]
	fn email_is_lowercased_and_trimmed() {
		assert_eq!(normalize_email("  Ada@Example.COM "), Some("ada@example.com".to_string()));
	}

	#[test]
	fn email_without_host_dot_is_rejected() {
		assert_eq!(normalize_email("ada@localhost"), None);
		assert_eq!(normalize_email("not-an-email"), None);
		assert_eq!(normalize_email(""), None);
	}

	#[test]
	fn phone_formatting_is_stripped() {
		assert_eq!(normalize_phone("+1 (555) 010-2030"), Some("+15550102030".to_string()));
	}

	#[test]
	fn phone_must_be_e164() {
		assert_eq!(normalize_phone("555-0102"), None);
		assert_eq!(normalize_phone("+0123"), None);
		assert_eq!(normalize_phone("+12345678901234567890"), None);
	}
}
