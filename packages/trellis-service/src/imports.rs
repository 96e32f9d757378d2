use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::{access::Permission, identity};
use trellis_storage::{
	models::{Candidate, ImportBatch},
	queries,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateBatchRequest {
	pub file_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRow {
	pub name: String,
	pub email: Option<String>,
	pub phone: Option<String>,
	pub source: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadRequest {
	pub rows: Vec<ImportRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportBatchStatus {
	pub batch_id: Uuid,
	pub file_name: Option<String>,
	pub status: String,
	pub total_count: i32,
	pub processed_count: i32,
	pub failed_count: i32,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl From<ImportBatch> for ImportBatchStatus {
	fn from(batch: ImportBatch) -> Self {
		Self {
			batch_id: batch.batch_id,
			file_name: batch.file_name,
			status: batch.status,
			total_count: batch.total_count,
			processed_count: batch.processed_count,
			failed_count: batch.failed_count,
			created_at: batch.created_at,
			updated_at: batch.updated_at,
		}
	}
}

const BATCH_COLUMNS: &str = "\
batch_id, tenant_id, created_by, file_name, status, total_count, processed_count, failed_count, \
created_at, updated_at";

impl TrellisService {
	pub async fn create_import_batch(
		&self,
		identity: &Identity,
		req: CreateBatchRequest,
	) -> Result<ImportBatchStatus> {
		identity.require(Permission::ImportRun)?;

		let now = OffsetDateTime::now_utc();
		let batch = ImportBatch {
			batch_id: Uuid::new_v4(),
			tenant_id: identity.tenant_id.clone(),
			created_by: Some(identity.user_id),
			file_name: req.file_name,
			status: "pending".to_string(),
			total_count: 0,
			processed_count: 0,
			failed_count: 0,
			created_at: now,
			updated_at: now,
		};

		sqlx::query(&format!(
			"INSERT INTO import_batches ({BATCH_COLUMNS}) \
			 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
		))
		.bind(batch.batch_id)
		.bind(batch.tenant_id.as_str())
		.bind(batch.created_by)
		.bind(batch.file_name.as_deref())
		.bind(batch.status.as_str())
		.bind(batch.total_count)
		.bind(batch.processed_count)
		.bind(batch.failed_count)
		.bind(batch.created_at)
		.bind(batch.updated_at)
		.execute(&self.db.pool)
		.await?;

		Ok(batch.into())
	}

	pub async fn import_batch_status(
		&self,
		identity: &Identity,
		batch_id: Uuid,
	) -> Result<ImportBatchStatus> {
		identity.require(Permission::ImportRun)?;

		Ok(self.fetch_batch(identity, batch_id).await?.into())
	}

	/// Accepts the rows for a pending batch, then processes them on a
	/// detached task. Upload is fire-and-forget: callers poll the batch
	/// status for progress.
	pub async fn upload_import_rows(
		&self,
		identity: &Identity,
		batch_id: Uuid,
		req: UploadRequest,
	) -> Result<ImportBatchStatus> {
		identity.require(Permission::ImportRun)?;

		if req.rows.is_empty() {
			return Err(Error::InvalidRequest { message: "rows must not be empty.".to_string() });
		}
		if req.rows.len() > self.cfg.imports.max_rows_per_upload as usize {
			return Err(Error::InvalidRequest {
				message: format!(
					"Too many rows; the limit is {} per upload.",
					self.cfg.imports.max_rows_per_upload
				),
			});
		}

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let batch: Option<ImportBatch> = sqlx::query_as(&format!(
			"SELECT {BATCH_COLUMNS} FROM import_batches \
			 WHERE tenant_id = $1 AND batch_id = $2 FOR UPDATE"
		))
		.bind(identity.tenant_id.as_str())
		.bind(batch_id)
		.fetch_optional(&mut *tx)
		.await?;
		let mut batch = batch
			.ok_or_else(|| Error::NotFound { message: "Import batch not found.".to_string() })?;

		if batch.status != "pending" {
			return Err(Error::Conflict {
				message: format!("Batch is {}, expected pending.", batch.status),
			});
		}

		for (index, row) in req.rows.iter().enumerate() {
			sqlx::query(
				"\
INSERT INTO import_items (item_id, tenant_id, batch_id, row_number, payload, status, error, candidate_id, created_at)
VALUES ($1, $2, $3, $4, $5, 'pending', NULL, NULL, $6)",
			)
			.bind(Uuid::new_v4())
			.bind(identity.tenant_id.as_str())
			.bind(batch_id)
			.bind(index as i32 + 1)
			.bind(json!({
				"name": row.name,
				"email": row.email,
				"phone": row.phone,
				"source": row.source,
			}))
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}

		batch.status = "processing".to_string();
		batch.total_count = req.rows.len() as i32;
		batch.updated_at = now;

		sqlx::query(
			"UPDATE import_batches SET status = 'processing', total_count = $1, updated_at = $2 \
			 WHERE tenant_id = $3 AND batch_id = $4",
		)
		.bind(batch.total_count)
		.bind(now)
		.bind(identity.tenant_id.as_str())
		.bind(batch_id)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"import.upload",
			"import_batch",
			Some(batch_id),
			json!({ "rows": batch.total_count }),
		)
		.await?;

		let pool = self.db.pool.clone();
		let tenant_id = identity.tenant_id.clone();
		let actor_id = identity.user_id;

		tokio::spawn(async move {
			if let Err(e) = process_batch(&pool, &tenant_id, batch_id, actor_id).await {
				tracing::warn!("Import batch {batch_id} failed: {e}");

				let _ = sqlx::query(
					"UPDATE import_batches SET status = 'failed', updated_at = $1 \
					 WHERE tenant_id = $2 AND batch_id = $3",
				)
				.bind(OffsetDateTime::now_utc())
				.bind(tenant_id.as_str())
				.bind(batch_id)
				.execute(&pool)
				.await;
			}
		});

		Ok(batch.into())
	}

	async fn fetch_batch(&self, identity: &Identity, batch_id: Uuid) -> Result<ImportBatch> {
		let batch: Option<ImportBatch> = sqlx::query_as(&format!(
			"SELECT {BATCH_COLUMNS} FROM import_batches WHERE tenant_id = $1 AND batch_id = $2"
		))
		.bind(identity.tenant_id.as_str())
		.bind(batch_id)
		.fetch_optional(&self.db.pool)
		.await?;

		batch.ok_or_else(|| Error::NotFound { message: "Import batch not found.".to_string() })
	}
}

async fn process_batch(
	pool: &PgPool,
	tenant_id: &str,
	batch_id: Uuid,
	actor_id: Uuid,
) -> Result<()> {
	let items: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
		"SELECT item_id, payload FROM import_items \
		 WHERE tenant_id = $1 AND batch_id = $2 AND status = 'pending' \
		 ORDER BY row_number",
	)
	.bind(tenant_id)
	.bind(batch_id)
	.fetch_all(pool)
	.await?;
	let mut processed = 0_i32;
	let mut failed = 0_i32;

	for (item_id, payload) in items {
		match import_one(pool, tenant_id, actor_id, &payload).await {
			Ok(candidate_id) => {
				processed += 1;

				sqlx::query(
					"UPDATE import_items SET status = 'processed', candidate_id = $1 \
					 WHERE item_id = $2",
				)
				.bind(candidate_id)
				.bind(item_id)
				.execute(pool)
				.await?;
			},
			Err(Error::InvalidRequest { message }) => {
				failed += 1;

				sqlx::query(
					"UPDATE import_items SET status = 'failed', error = $1 WHERE item_id = $2",
				)
				.bind(message)
				.bind(item_id)
				.execute(pool)
				.await?;
			},
			Err(e) => return Err(e),
		}
	}

	let status = if failed > 0 && processed == 0 { "failed" } else { "completed" };

	sqlx::query(
		"UPDATE import_batches \
		 SET status = $1, processed_count = $2, failed_count = $3, updated_at = $4 \
		 WHERE tenant_id = $5 AND batch_id = $6",
	)
	.bind(status)
	.bind(processed)
	.bind(failed)
	.bind(OffsetDateTime::now_utc())
	.bind(tenant_id)
	.bind(batch_id)
	.execute(pool)
	.await?;

	tracing::info!(
		"Import batch {batch_id} {status}: {processed} processed, {failed} failed."
	);

	Ok(())
}

/// Storage failures bubble up and fail the batch; a bad row only fails the
/// row.
async fn import_one(
	pool: &PgPool,
	tenant_id: &str,
	actor_id: Uuid,
	payload: &serde_json::Value,
) -> Result<Uuid> {
	let row: ImportRow = serde_json::from_value(payload.clone())
		.map_err(|e| Error::InvalidRequest { message: format!("Malformed row: {e}.") })?;
	let name = row.name.trim().to_string();

	if name.is_empty() {
		return Err(Error::InvalidRequest { message: "name is required.".to_string() });
	}

	let email = match row.email.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
		None => None,
		Some(raw) => Some(identity::normalize_email(raw).ok_or_else(|| {
			Error::InvalidRequest { message: format!("Invalid email: {raw}.") }
		})?),
	};
	let phone = match row.phone.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
		None => None,
		Some(raw) => Some(identity::normalize_phone(raw).ok_or_else(|| {
			Error::InvalidRequest { message: format!("Invalid phone: {raw}.") }
		})?),
	};
	let now = OffsetDateTime::now_utc();
	let candidate = Candidate {
		candidate_id: Uuid::new_v4(),
		tenant_id: tenant_id.to_string(),
		name,
		email,
		phone,
		source: row.source.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
		status: "active".to_string(),
		owner_id: Some(actor_id),
		pipeline_id: None,
		stage_id: None,
		rejected_at: None,
		deleted_at: None,
		merged_into_id: None,
		created_at: now,
		updated_at: now,
	};

	queries::insert_candidate(pool, &candidate).await?;

	Ok(candidate.candidate_id)
}
