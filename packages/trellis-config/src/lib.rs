mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Analytics, Auth, Config, Imports, Postgres, Search, Security, Service, Storage};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.admin_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.auth.session_ttl_minutes <= 0 {
		return Err(Error::Validation {
			message: "auth.session_ttl_minutes must be greater than zero.".to_string(),
		});
	}
	if cfg.search.default_page_size == 0 {
		return Err(Error::Validation {
			message: "search.default_page_size must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_page_size < cfg.search.default_page_size {
		return Err(Error::Validation {
			message: "search.max_page_size must be at least search.default_page_size.".to_string(),
		});
	}
	if cfg.analytics.default_window_days <= 0 {
		return Err(Error::Validation {
			message: "analytics.default_window_days must be greater than zero.".to_string(),
		});
	}
	if cfg.analytics.top_recruiter_limit <= 0 {
		return Err(Error::Validation {
			message: "analytics.top_recruiter_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.imports.max_rows_per_upload == 0 {
		return Err(Error::Validation {
			message: "imports.max_rows_per_upload must be greater than zero.".to_string(),
		});
	}

	Ok(())
}
