use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService, auth::PipelineScope};
use trellis_domain::access::Permission;
use trellis_storage::models::{Pipeline, Stage};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatePipelineRequest {
	pub name: String,
	/// Stage names in funnel order.
	pub stages: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrantPipelineRequest {
	pub user_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageView {
	pub stage_id: Uuid,
	pub name: String,
	pub position: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineView {
	pub pipeline_id: Uuid,
	pub name: String,
	pub stages: Vec<StageView>,
}

impl TrellisService {
	pub async fn list_pipelines(&self, identity: &Identity) -> Result<Vec<PipelineView>> {
		identity.require(Permission::PipelineView)?;

		let scope = self.pipeline_scope(identity).await?;
		let pipelines: Vec<Pipeline> = sqlx::query_as(
			"SELECT pipeline_id, tenant_id, name, created_at FROM pipelines \
			 WHERE tenant_id = $1 ORDER BY name",
		)
		.bind(identity.tenant_id.as_str())
		.fetch_all(&self.db.pool)
		.await?;
		let stages: Vec<Stage> = sqlx::query_as(
			"SELECT stage_id, tenant_id, pipeline_id, name, position FROM stages \
			 WHERE tenant_id = $1 ORDER BY pipeline_id, position",
		)
		.bind(identity.tenant_id.as_str())
		.fetch_all(&self.db.pool)
		.await?;
		let views = pipelines
			.into_iter()
			.filter(|pipeline| match &scope {
				PipelineScope::All => true,
				PipelineScope::Granted(ids) => ids.contains(&pipeline.pipeline_id),
			})
			.map(|pipeline| PipelineView {
				stages: stages
					.iter()
					.filter(|stage| stage.pipeline_id == pipeline.pipeline_id)
					.map(|stage| StageView {
						stage_id: stage.stage_id,
						name: stage.name.clone(),
						position: stage.position,
					})
					.collect(),
				pipeline_id: pipeline.pipeline_id,
				name: pipeline.name,
			})
			.collect();

		Ok(views)
	}

	pub async fn create_pipeline(
		&self,
		identity: &Identity,
		req: CreatePipelineRequest,
	) -> Result<PipelineView> {
		identity.require(Permission::PipelineManage)?;

		let name = req.name.trim().to_string();

		if name.is_empty() {
			return Err(Error::InvalidRequest { message: "name is required.".to_string() });
		}
		if req.stages.is_empty() {
			return Err(Error::InvalidRequest {
				message: "A pipeline needs at least one stage.".to_string(),
			});
		}

		let pipeline_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		sqlx::query(
			"INSERT INTO pipelines (pipeline_id, tenant_id, name, created_at) \
			 VALUES ($1, $2, $3, $4)",
		)
		.bind(pipeline_id)
		.bind(identity.tenant_id.as_str())
		.bind(name.as_str())
		.bind(now)
		.execute(&mut *tx)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict {
				message: "A pipeline with this name already exists.".to_string(),
			},
			other => other.into(),
		})?;

		let mut stages = Vec::with_capacity(req.stages.len());

		for (index, stage_name) in req.stages.iter().enumerate() {
			let stage_name = stage_name.trim();

			if stage_name.is_empty() {
				return Err(Error::InvalidRequest {
					message: "Stage names must be non-empty.".to_string(),
				});
			}

			let stage = StageView {
				stage_id: Uuid::new_v4(),
				name: stage_name.to_string(),
				position: index as i32 + 1,
			};

			sqlx::query(
				"INSERT INTO stages (stage_id, tenant_id, pipeline_id, name, position) \
				 VALUES ($1, $2, $3, $4, $5)",
			)
			.bind(stage.stage_id)
			.bind(identity.tenant_id.as_str())
			.bind(pipeline_id)
			.bind(stage.name.as_str())
			.bind(stage.position)
			.execute(&mut *tx)
			.await?;
			stages.push(stage);
		}

		tx.commit().await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"pipeline.create",
			"pipeline",
			Some(pipeline_id),
			serde_json::json!({ "name": name, "stages": stages.len() }),
		)
		.await?;

		Ok(PipelineView { pipeline_id, name, stages })
	}

	/// Grants a RECRUITER or VIEWER visibility into a pipeline. Granting
	/// twice is a no-op.
	pub async fn grant_pipeline(
		&self,
		identity: &Identity,
		pipeline_id: Uuid,
		req: GrantPipelineRequest,
	) -> Result<()> {
		identity.require(Permission::PipelineManage)?;

		let exists: Option<Uuid> = sqlx::query_scalar(
			"SELECT pipeline_id FROM pipelines WHERE tenant_id = $1 AND pipeline_id = $2",
		)
		.bind(identity.tenant_id.as_str())
		.bind(pipeline_id)
		.fetch_optional(&self.db.pool)
		.await?;

		if exists.is_none() {
			return Err(Error::NotFound { message: "Pipeline not found.".to_string() });
		}

		sqlx::query(
			"\
INSERT INTO pipeline_grants (grant_id, tenant_id, user_id, pipeline_id, granted_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (user_id, pipeline_id) DO NOTHING",
		)
		.bind(Uuid::new_v4())
		.bind(identity.tenant_id.as_str())
		.bind(req.user_id)
		.bind(pipeline_id)
		.bind(OffsetDateTime::now_utc())
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"pipeline.grant",
			"pipeline",
			Some(pipeline_id),
			serde_json::json!({ "user_id": req.user_id }),
		)
		.await?;

		Ok(())
	}
}
