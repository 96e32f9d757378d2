use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{CandidateSummary, Identity, Result, TrellisService, auth::PipelineScope};
use trellis_domain::access::Permission;
use trellis_storage::models::Candidate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
	#[default]
	CreatedDesc,
	CreatedAsc,
	UpdatedDesc,
	NameAsc,
}
impl SortKey {
	fn order_by(self) -> &'static str {
		match self {
			Self::CreatedDesc => "c.created_at DESC, c.candidate_id",
			Self::CreatedAsc => "c.created_at ASC, c.candidate_id",
			Self::UpdatedDesc => "c.updated_at DESC, c.candidate_id",
			Self::NameAsc => "lower(c.name) ASC, c.candidate_id",
		}
	}
}

/// Every field is optional; absent fields do not constrain the result. The
/// boolean presence filters follow last-one-wins query parsing, so a request
/// carrying both `hasEmail=true` and `hasEmail=false` ends up with whichever
/// value appeared last.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchRequest {
	pub query: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	pub source: Option<String>,
	pub status: Option<String>,
	pub owner_id: Option<Uuid>,
	pub pipeline_id: Option<Uuid>,
	pub stage_id: Option<Uuid>,
	#[serde(default, with = "crate::time_serde::option")]
	pub created_after: Option<OffsetDateTime>,
	#[serde(default, with = "crate::time_serde::option")]
	pub created_before: Option<OffsetDateTime>,
	pub has_email: Option<bool>,
	pub has_phone: Option<bool>,
	pub has_notes: Option<bool>,
	pub has_attachments: Option<bool>,
	pub sort: Option<SortKey>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FacetCount {
	pub value: String,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Facets {
	pub sources: Vec<FacetCount>,
	pub statuses: Vec<FacetCount>,
	pub tags: Vec<FacetCount>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchPage {
	pub items: Vec<CandidateSummary>,
	pub page: u32,
	pub page_size: u32,
	pub total: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResponse {
	#[serde(flatten)]
	pub page: SearchPage,
	pub facets: Facets,
}

impl TrellisService {
	pub async fn search(&self, identity: &Identity, req: SearchRequest) -> Result<SearchResponse> {
		identity.require(Permission::CandidateView)?;

		let scope = self.pipeline_scope(identity).await?;
		let page = req.page.unwrap_or(1).max(1);
		let page_size = req
			.page_size
			.unwrap_or(self.cfg.search.default_page_size)
			.clamp(1, self.cfg.search.max_page_size);
		let offset = i64::from(page - 1) * i64::from(page_size);

		let mut count_query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM candidates c");

		push_filters(&mut count_query, &identity.tenant_id, &scope, &req);

		let total: i64 = count_query.build_query_scalar().fetch_one(&self.db.pool).await?;

		let mut select_query = QueryBuilder::<Postgres>::new(
			"SELECT c.candidate_id, c.tenant_id, c.name, c.email, c.phone, c.source, c.status, \
			 c.owner_id, c.pipeline_id, c.stage_id, c.rejected_at, c.deleted_at, \
			 c.merged_into_id, c.created_at, c.updated_at FROM candidates c",
		);

		push_filters(&mut select_query, &identity.tenant_id, &scope, &req);
		select_query
			.push(" ORDER BY ")
			.push(req.sort.unwrap_or_default().order_by())
			.push(" LIMIT ")
			.push_bind(i64::from(page_size))
			.push(" OFFSET ")
			.push_bind(offset);

		let rows: Vec<Candidate> =
			select_query.build_query_as().fetch_all(&self.db.pool).await?;
		let items = rows.into_iter().map(CandidateSummary::from).collect();
		let facets = self.facets(identity, &scope).await?;

		Ok(SearchResponse { page: SearchPage { items, page, page_size, total }, facets })
	}

	/// Facets describe the tenant's visible active candidates as a whole, not
	/// the filtered result, so the filter controls stay stable while the user
	/// narrows the query.
	async fn facets(&self, identity: &Identity, scope: &PipelineScope) -> Result<Facets> {
		let base = SearchRequest::default();
		let mut sources_query = QueryBuilder::<Postgres>::new(
			"SELECT c.source AS value, count(*) AS count FROM candidates c",
		);

		push_filters(&mut sources_query, &identity.tenant_id, scope, &base);
		sources_query
			.push(" AND c.source IS NOT NULL GROUP BY c.source ORDER BY count DESC, c.source");

		let sources = sources_query
			.build_query_as::<(String, i64)>()
			.fetch_all(&self.db.pool)
			.await?
			.into_iter()
			.map(|(value, count)| FacetCount { value, count })
			.collect();
		let mut statuses_query = QueryBuilder::<Postgres>::new(
			"SELECT c.status AS value, count(*) AS count FROM candidates c",
		);

		push_filters(&mut statuses_query, &identity.tenant_id, scope, &base);
		statuses_query.push(" GROUP BY c.status ORDER BY count DESC, c.status");

		let statuses = statuses_query
			.build_query_as::<(String, i64)>()
			.fetch_all(&self.db.pool)
			.await?
			.into_iter()
			.map(|(value, count)| FacetCount { value, count })
			.collect();
		let mut tags_query = QueryBuilder::<Postgres>::new(
			"SELECT t.name AS value, count(*) AS count \
			 FROM candidate_tags ct \
			 JOIN tags t ON t.tag_id = ct.tag_id \
			 JOIN candidates c ON c.candidate_id = ct.candidate_id",
		);

		push_filters(&mut tags_query, &identity.tenant_id, scope, &base);
		tags_query.push(" GROUP BY t.name ORDER BY count DESC, t.name");

		let tags = tags_query
			.build_query_as::<(String, i64)>()
			.fetch_all(&self.db.pool)
			.await?
			.into_iter()
			.map(|(value, count)| FacetCount { value, count })
			.collect();

		Ok(Facets { sources, statuses, tags })
	}
}

/// Appends the WHERE clause shared by the count, page, and facet queries.
/// The builder must end right after `FROM candidates c` (plus joins) when
/// this is called.
fn push_filters(
	query: &mut QueryBuilder<'_, Postgres>,
	tenant_id: &str,
	scope: &PipelineScope,
	req: &SearchRequest,
) {
	query.push(" WHERE c.tenant_id = ").push_bind(tenant_id.to_string());
	query.push(" AND c.deleted_at IS NULL AND c.merged_into_id IS NULL");

	match scope {
		PipelineScope::All => {},
		PipelineScope::Granted(ids) if ids.is_empty() => {
			query.push(" AND FALSE");
		},
		PipelineScope::Granted(ids) => {
			query.push(" AND c.pipeline_id = ANY(").push_bind(ids.clone()).push(")");
		},
	}

	if let Some(text) = req.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
		let pattern = format!("%{}%", escape_like(text));

		query.push(" AND (c.name ILIKE ").push_bind(pattern.clone());
		query.push(" OR c.email ILIKE ").push_bind(pattern.clone());
		query.push(" OR c.phone ILIKE ").push_bind(pattern.clone());
		query
			.push(
				" OR EXISTS (SELECT 1 FROM candidate_notes n \
				 WHERE n.candidate_id = c.candidate_id AND n.body ILIKE ",
			)
			.push_bind(pattern)
			.push("))");
	}

	// Every named tag must be attached; the filter is a conjunction.
	for tag in &req.tags {
		query
			.push(
				" AND EXISTS (SELECT 1 FROM candidate_tags ct \
				 JOIN tags t ON t.tag_id = ct.tag_id \
				 WHERE ct.candidate_id = c.candidate_id AND t.name = ",
			)
			.push_bind(tag.clone())
			.push(")");
	}

	if let Some(source) = &req.source {
		query.push(" AND c.source = ").push_bind(source.clone());
	}
	if let Some(status) = &req.status {
		query.push(" AND c.status = ").push_bind(status.clone());
	}
	if let Some(owner_id) = req.owner_id {
		query.push(" AND c.owner_id = ").push_bind(owner_id);
	}
	if let Some(pipeline_id) = req.pipeline_id {
		query.push(" AND c.pipeline_id = ").push_bind(pipeline_id);
	}
	if let Some(stage_id) = req.stage_id {
		query.push(" AND c.stage_id = ").push_bind(stage_id);
	}
	if let Some(created_after) = req.created_after {
		query.push(" AND c.created_at >= ").push_bind(created_after);
	}
	if let Some(created_before) = req.created_before {
		query.push(" AND c.created_at <= ").push_bind(created_before);
	}
	if let Some(has_email) = req.has_email {
		query.push(if has_email { " AND c.email IS NOT NULL" } else { " AND c.email IS NULL" });
	}
	if let Some(has_phone) = req.has_phone {
		query.push(if has_phone { " AND c.phone IS NOT NULL" } else { " AND c.phone IS NULL" });
	}
	if let Some(has_notes) = req.has_notes {
		query.push(if has_notes { " AND EXISTS" } else { " AND NOT EXISTS" }).push(
			" (SELECT 1 FROM candidate_notes n WHERE n.candidate_id = c.candidate_id)",
		);
	}
	if let Some(has_attachments) = req.has_attachments {
		query.push(if has_attachments { " AND EXISTS" } else { " AND NOT EXISTS" }).push(
			" (SELECT 1 FROM attachments a WHERE a.candidate_id = c.candidate_id)",
		);
	}
}

fn escape_like(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for c in raw.chars() {
		if matches!(c, '%' | '_' | '\\') {
			out.push('\\');
		}

		out.push(c);
	}

	out
}

#[cfg(test)]
mod tests {
	use super::{SearchRequest, SortKey, escape_like};

	#[test]
	fn like_metacharacters_are_escaped() {
		assert_eq!(escape_like("50%_done\\x"), "50\\%\\_done\\\\x");
		assert_eq!(escape_like("plain"), "plain");
	}

	#[test]
	fn sort_keys_map_to_stable_order_clauses() {
		assert_eq!(SortKey::default(), SortKey::CreatedDesc);
		assert!(SortKey::NameAsc.order_by().contains("lower(c.name)"));
		// Every order includes the id so pagination never straddles ties.
		for key in
			[SortKey::CreatedDesc, SortKey::CreatedAsc, SortKey::UpdatedDesc, SortKey::NameAsc]
		{
			assert!(key.order_by().ends_with("c.candidate_id"));
		}
	}

	#[test]
	fn default_request_constrains_nothing() {
		let req = SearchRequest::default();

		assert!(req.query.is_none());
		assert!(req.tags.is_empty());
		assert!(req.has_email.is_none());
	}
}
