use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Identity, Result, TrellisService, auth::PipelineScope};
use trellis_domain::access::Permission;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalyticsRequest {
	pub window_days: Option<i64>,
	pub pipeline_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageCount {
	pub stage_id: Uuid,
	pub stage_name: String,
	pub position: i32,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DayCount {
	pub day: String,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceCount {
	pub source: String,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecruiterCount {
	pub user_id: Uuid,
	pub name: String,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalyticsResponse {
	pub window_days: i64,
	pub total_candidates: i64,
	pub new_in_window: i64,
	pub new_in_previous_window: i64,
	/// Fractional change versus the previous window; `None` when the previous
	/// window is empty and a ratio would be undefined.
	pub growth_rate: Option<f64>,
	pub funnel: Vec<StageCount>,
	pub created_per_day: Vec<DayCount>,
	pub sources: Vec<SourceCount>,
	pub top_recruiters: Vec<RecruiterCount>,
	/// Share of stage moves in the window that advanced the candidate to a
	/// later stage position; `None` when no moves happened.
	pub stage_conversion_rate: Option<f64>,
}

/// The pipeline predicate shared by every query in the battery. Folds the
/// caller's grant scope together with an optional requested pipeline.
#[derive(Clone, Debug, PartialEq)]
enum PipelineFilter {
	Any,
	One(Uuid),
	Among(Vec<Uuid>),
}
impl PipelineFilter {
	fn new(scope: PipelineScope, requested: Option<Uuid>) -> Self {
		match (scope, requested) {
			(PipelineScope::All, None) => Self::Any,
			(PipelineScope::All, Some(id)) => Self::One(id),
			(PipelineScope::Granted(ids), Some(id)) if ids.contains(&id) => Self::One(id),
			// Asking for an ungranted pipeline matches nothing, same as an
			// empty grant list.
			(PipelineScope::Granted(_), Some(_)) => Self::Among(Vec::new()),
			(PipelineScope::Granted(ids), None) => Self::Among(ids),
		}
	}

	fn push(&self, query: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>, column: &str) {
		match self {
			Self::Any => {},
			Self::One(id) => {
				query.push(format!(" AND {column} = ")).push_bind(*id);
			},
			Self::Among(ids) => {
				query.push(format!(" AND {column} = ANY(")).push_bind(ids.clone()).push(")");
			},
		}
	}
}

impl TrellisService {
	pub async fn analytics(
		&self,
		identity: &Identity,
		req: AnalyticsRequest,
	) -> Result<AnalyticsResponse> {
		identity.require(Permission::AnalyticsView)?;

		let scope = self.pipeline_scope(identity).await?;
		let filter = PipelineFilter::new(scope, req.pipeline_id);
		let window_days = req.window_days.unwrap_or(self.cfg.analytics.default_window_days).max(1);
		let now = OffsetDateTime::now_utc();
		let window_start = now - Duration::days(window_days);
		let previous_start = window_start - Duration::days(window_days);
		let pool = &self.db.pool;
		let tenant = identity.tenant_id.as_str();
		let limit = self.cfg.analytics.top_recruiter_limit;

		let (
			total_candidates,
			new_in_window,
			new_in_previous_window,
			funnel,
			created_per_day,
			sources,
			top_recruiters,
			stage_conversion_rate,
		) = tokio::try_join!(
			count_active(pool, tenant, &filter, None),
			count_active(pool, tenant, &filter, Some((window_start, now))),
			count_active(pool, tenant, &filter, Some((previous_start, window_start))),
			funnel_counts(pool, tenant, &filter),
			created_per_day(pool, tenant, &filter, window_start),
			source_breakdown(pool, tenant, &filter),
			top_recruiters(pool, tenant, &filter, window_start, limit),
			conversion_rate(pool, tenant, &filter, window_start),
		)?;

		let growth_rate = if new_in_previous_window > 0 {
			let previous = new_in_previous_window as f64;

			Some((new_in_window as f64 - previous) / previous)
		} else {
			None
		};

		Ok(AnalyticsResponse {
			window_days,
			total_candidates,
			new_in_window,
			new_in_previous_window,
			growth_rate,
			funnel,
			created_per_day,
			sources,
			top_recruiters,
			stage_conversion_rate,
		})
	}
}

async fn count_active(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
	created_between: Option<(OffsetDateTime, OffsetDateTime)>,
) -> Result<i64> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"SELECT count(*) FROM candidates WHERE tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	query.push(" AND deleted_at IS NULL AND merged_into_id IS NULL");
	filter.push(&mut query, "pipeline_id");

	if let Some((start, end)) = created_between {
		query.push(" AND created_at >= ").push_bind(start);
		query.push(" AND created_at < ").push_bind(end);
	}

	Ok(query.build_query_scalar().fetch_one(pool).await?)
}

async fn funnel_counts(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
) -> Result<Vec<StageCount>> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"\
SELECT s.stage_id, s.name, s.position, count(c.candidate_id) AS count
FROM stages s
LEFT JOIN candidates c ON c.stage_id = s.stage_id
	AND c.deleted_at IS NULL AND c.merged_into_id IS NULL
WHERE s.tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	filter.push(&mut query, "s.pipeline_id");
	query.push(" GROUP BY s.stage_id, s.name, s.position ORDER BY s.position");

	let rows: Vec<(Uuid, String, i32, i64)> = query.build_query_as().fetch_all(pool).await?;

	Ok(rows
		.into_iter()
		.map(|(stage_id, stage_name, position, count)| StageCount {
			stage_id,
			stage_name,
			position,
			count,
		})
		.collect())
}

async fn created_per_day(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
	window_start: OffsetDateTime,
) -> Result<Vec<DayCount>> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"\
SELECT to_char(date_trunc('day', created_at), 'YYYY-MM-DD') AS day, count(*) AS count
FROM candidates
WHERE tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	query.push(" AND deleted_at IS NULL AND merged_into_id IS NULL AND created_at >= ");
	query.push_bind(window_start);
	filter.push(&mut query, "pipeline_id");
	query.push(" GROUP BY day ORDER BY day");

	let rows: Vec<(String, i64)> = query.build_query_as().fetch_all(pool).await?;

	Ok(rows.into_iter().map(|(day, count)| DayCount { day, count }).collect())
}

async fn source_breakdown(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
) -> Result<Vec<SourceCount>> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"\
SELECT coalesce(source, 'unknown') AS source, count(*) AS count
FROM candidates
WHERE tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	query.push(" AND deleted_at IS NULL AND merged_into_id IS NULL");
	filter.push(&mut query, "pipeline_id");
	query.push(" GROUP BY coalesce(source, 'unknown') ORDER BY count DESC, source");

	let rows: Vec<(String, i64)> = query.build_query_as().fetch_all(pool).await?;

	Ok(rows.into_iter().map(|(source, count)| SourceCount { source, count }).collect())
}

async fn top_recruiters(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
	window_start: OffsetDateTime,
	limit: i64,
) -> Result<Vec<RecruiterCount>> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"\
SELECT u.user_id, u.name, count(*) AS count
FROM candidates c
JOIN users u ON u.user_id = c.owner_id
WHERE c.tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	query.push(" AND c.deleted_at IS NULL AND c.merged_into_id IS NULL AND c.created_at >= ");
	query.push_bind(window_start);
	filter.push(&mut query, "c.pipeline_id");
	query.push(" GROUP BY u.user_id, u.name ORDER BY count DESC, u.name LIMIT ").push_bind(limit);

	let rows: Vec<(Uuid, String, i64)> = query.build_query_as().fetch_all(pool).await?;

	Ok(rows.into_iter().map(|(user_id, name, count)| RecruiterCount { user_id, name, count }).collect())
}

/// A move "converts" when it lands on a stage with a strictly greater
/// position than the one it left. Moves into or out of an unset stage are
/// counted as moves but never as conversions.
async fn conversion_rate(
	pool: &PgPool,
	tenant_id: &str,
	filter: &PipelineFilter,
	window_start: OffsetDateTime,
) -> Result<Option<f64>> {
	let mut query = sqlx::QueryBuilder::<sqlx::Postgres>::new(
		"\
SELECT
	count(*) AS total,
	count(*) FILTER (WHERE f.position IS NOT NULL AND t.position > f.position) AS converted
FROM stage_history h
JOIN candidates c ON c.candidate_id = h.candidate_id
LEFT JOIN stages f ON f.stage_id = h.from_stage_id
LEFT JOIN stages t ON t.stage_id = h.to_stage_id
WHERE h.tenant_id = ",
	);

	query.push_bind(tenant_id.to_string());
	query.push(" AND h.moved_at >= ").push_bind(window_start);
	filter.push(&mut query, "c.pipeline_id");

	let (total, converted): (i64, i64) = query.build_query_as().fetch_one(pool).await?;

	if total == 0 {
		return Ok(None);
	}

	Ok(Some(converted as f64 / total as f64))
}
