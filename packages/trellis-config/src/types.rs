use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub auth: Auth,
	pub search: Search,
	pub analytics: Analytics,
	pub imports: Imports,
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
	pub session_ttl_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct Search {
	#[serde(default = "default_page_size")]
	pub default_page_size: u32,
	#[serde(default = "default_max_page_size")]
	pub max_page_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct Analytics {
	#[serde(default = "default_window_days")]
	pub default_window_days: i64,
	#[serde(default = "default_top_recruiters")]
	pub top_recruiter_limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct Imports {
	#[serde(default = "default_max_rows")]
	pub max_rows_per_upload: u32,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
}

fn default_page_size() -> u32 {
	25
}

fn default_max_page_size() -> u32 {
	200
}

fn default_window_days() -> i64 {
	30
}

fn default_top_recruiters() -> i64 {
	5
}

fn default_max_rows() -> u32 {
	5_000
}
