use std::sync::Arc;

use trellis_service::TrellisService;
use trellis_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<TrellisService>,
}
impl AppState {
	pub async fn new(config: trellis_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let service = TrellisService::new(config, db);

		Ok(Self { service: Arc::new(service) })
	}
}
