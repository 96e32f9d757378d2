pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		// The rendered schema is split on `;` before execution, and `--`
		// comments do not survive that split. Strip them here.
		if trimmed.starts_with("--") {
			continue;
		}
		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_users.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_users.sql")),
				"tables/002_sessions.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_sessions.sql")),
				"tables/003_pipelines.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_pipelines.sql")),
				"tables/004_stages.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_stages.sql")),
				"tables/005_pipeline_grants.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_pipeline_grants.sql")),
				"tables/006_candidates.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_candidates.sql")),
				"tables/007_candidate_notes.sql" =>
					out.push_str(include_str!("../../../sql/tables/007_candidate_notes.sql")),
				"tables/008_attachments.sql" =>
					out.push_str(include_str!("../../../sql/tables/008_attachments.sql")),
				"tables/009_email_logs.sql" =>
					out.push_str(include_str!("../../../sql/tables/009_email_logs.sql")),
				"tables/010_stage_history.sql" =>
					out.push_str(include_str!("../../../sql/tables/010_stage_history.sql")),
				"tables/011_tags.sql" =>
					out.push_str(include_str!("../../../sql/tables/011_tags.sql")),
				"tables/012_candidate_tags.sql" =>
					out.push_str(include_str!("../../../sql/tables/012_candidate_tags.sql")),
				"tables/013_merge_logs.sql" =>
					out.push_str(include_str!("../../../sql/tables/013_merge_logs.sql")),
				"tables/014_audit_logs.sql" =>
					out.push_str(include_str!("../../../sql/tables/014_audit_logs.sql")),
				"tables/015_email_templates.sql" =>
					out.push_str(include_str!("../../../sql/tables/015_email_templates.sql")),
				"tables/016_import_batches.sql" =>
					out.push_str(include_str!("../../../sql/tables/016_import_batches.sql")),
				"tables/017_import_items.sql" =>
					out.push_str(include_str!("../../../sql/tables/017_import_items.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::render_schema;

	// The bootstrap splits the rendered schema on `;`, so every non-empty
	// chunk has to be a statement Postgres will accept on its own. A stray
	// comment line would break the first boot against a fresh database.
	#[test]
	fn rendered_schema_splits_into_executable_statements() {
		for statement in render_schema().split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			assert!(
				trimmed.starts_with("CREATE"),
				"Statement does not start with CREATE: {trimmed}"
			);
			assert!(!trimmed.contains("--"), "Comment line survived into a statement: {trimmed}");
		}
	}

	#[test]
	fn schema_expands_every_include() {
		let sql = render_schema();

		assert!(!sql.contains("\\ir "), "Unexpanded include directive left in schema.");

		for table in [
			"users",
			"sessions",
			"pipelines",
			"stages",
			"pipeline_grants",
			"candidates",
			"candidate_notes",
			"attachments",
			"email_logs",
			"stage_history",
			"tags",
			"candidate_tags",
			"merge_logs",
			"audit_logs",
			"email_templates",
			"import_batches",
			"import_items",
		] {
			assert!(
				sql.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
				"Schema is missing table {table}."
			);
		}
	}
}
