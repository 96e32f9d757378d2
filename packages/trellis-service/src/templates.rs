use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Identity, Result, TrellisService};
use trellis_domain::access::Permission;
use trellis_storage::models::{Candidate, EmailLog, EmailTemplate};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
	pub name: String,
	pub subject: String,
	pub body: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateTemplateRequest {
	pub name: Option<String>,
	pub subject: Option<String>,
	pub body: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendEmailRequest {
	pub candidate_id: Uuid,
	pub template_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateView {
	pub template_id: Uuid,
	pub name: String,
	pub subject: String,
	pub body: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailLogView {
	pub email_id: Uuid,
	pub candidate_id: Uuid,
	pub template_id: Option<Uuid>,
	pub subject: String,
	pub sent_by: Option<Uuid>,
	#[serde(with = "crate::time_serde")]
	pub sent_at: OffsetDateTime,
}
impl From<EmailLog> for EmailLogView {
	fn from(log: EmailLog) -> Self {
		Self {
			email_id: log.email_id,
			candidate_id: log.candidate_id,
			template_id: log.template_id,
			subject: log.subject,
			sent_by: log.sent_by,
			sent_at: log.sent_at,
		}
	}
}

impl From<EmailTemplate> for TemplateView {
	fn from(template: EmailTemplate) -> Self {
		Self {
			template_id: template.template_id,
			name: template.name,
			subject: template.subject,
			body: template.body,
			created_at: template.created_at,
			updated_at: template.updated_at,
		}
	}
}

const TEMPLATE_COLUMNS: &str =
	"template_id, tenant_id, name, subject, body, created_by, created_at, updated_at";

impl TrellisService {
	pub async fn list_templates(&self, identity: &Identity) -> Result<Vec<TemplateView>> {
		identity.require(Permission::TemplateView)?;

		let templates: Vec<EmailTemplate> = sqlx::query_as(&format!(
			"SELECT {TEMPLATE_COLUMNS} FROM email_templates WHERE tenant_id = $1 ORDER BY name"
		))
		.bind(identity.tenant_id.as_str())
		.fetch_all(&self.db.pool)
		.await?;

		Ok(templates.into_iter().map(TemplateView::from).collect())
	}

	pub async fn create_template(
		&self,
		identity: &Identity,
		req: CreateTemplateRequest,
	) -> Result<TemplateView> {
		identity.require(Permission::TemplateManage)?;

		let name = req.name.trim().to_string();

		if name.is_empty() || req.subject.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "name and subject are required.".to_string(),
			});
		}

		let now = OffsetDateTime::now_utc();
		let template = EmailTemplate {
			template_id: Uuid::new_v4(),
			tenant_id: identity.tenant_id.clone(),
			name,
			subject: req.subject.trim().to_string(),
			body: req.body,
			created_by: Some(identity.user_id),
			created_at: now,
			updated_at: now,
		};

		sqlx::query(&format!(
			"INSERT INTO email_templates ({TEMPLATE_COLUMNS}) \
			 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
		))
		.bind(template.template_id)
		.bind(template.tenant_id.as_str())
		.bind(template.name.as_str())
		.bind(template.subject.as_str())
		.bind(template.body.as_str())
		.bind(template.created_by)
		.bind(template.created_at)
		.bind(template.updated_at)
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"template.create",
			"template",
			Some(template.template_id),
			serde_json::json!({ "name": template.name }),
		)
		.await?;

		Ok(template.into())
	}

	pub async fn update_template(
		&self,
		identity: &Identity,
		template_id: Uuid,
		req: UpdateTemplateRequest,
	) -> Result<TemplateView> {
		identity.require(Permission::TemplateManage)?;

		let mut template = self.fetch_template(identity, template_id).await?;

		if let Some(name) = req.name {
			let name = name.trim().to_string();

			if name.is_empty() {
				return Err(Error::InvalidRequest { message: "name must be non-empty.".to_string() });
			}

			template.name = name;
		}
		if let Some(subject) = req.subject {
			template.subject = subject.trim().to_string();
		}
		if let Some(body) = req.body {
			template.body = body;
		}

		template.updated_at = OffsetDateTime::now_utc();

		sqlx::query(
			"UPDATE email_templates SET name = $1, subject = $2, body = $3, updated_at = $4 \
			 WHERE tenant_id = $5 AND template_id = $6",
		)
		.bind(template.name.as_str())
		.bind(template.subject.as_str())
		.bind(template.body.as_str())
		.bind(template.updated_at)
		.bind(identity.tenant_id.as_str())
		.bind(template_id)
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"template.update",
			"template",
			Some(template_id),
			serde_json::json!({}),
		)
		.await?;

		Ok(template.into())
	}

	pub async fn delete_template(&self, identity: &Identity, template_id: Uuid) -> Result<()> {
		identity.require(Permission::TemplateManage)?;

		let result =
			sqlx::query("DELETE FROM email_templates WHERE tenant_id = $1 AND template_id = $2")
				.bind(identity.tenant_id.as_str())
				.bind(template_id)
				.execute(&self.db.pool)
				.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound { message: "Template not found.".to_string() });
		}

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"template.delete",
			"template",
			Some(template_id),
			serde_json::json!({}),
		)
		.await?;

		Ok(())
	}

	/// Renders the template against the candidate and records the send in
	/// `email_logs`. Actual delivery happens through an external mailer that
	/// tails the log; this service only records intent.
	pub async fn send_email(&self, identity: &Identity, req: SendEmailRequest) -> Result<()> {
		identity.require(Permission::EmailSend)?;

		let candidate = self.fetch_active_candidate(identity, req.candidate_id).await?;

		if candidate.email.is_none() {
			return Err(Error::InvalidRequest {
				message: "Candidate has no email address.".to_string(),
			});
		}

		let template = self.fetch_template(identity, req.template_id).await?;
		let subject = render(&template.subject, &candidate);
		let body = render(&template.body, &candidate);

		sqlx::query(
			"\
INSERT INTO email_logs (email_id, tenant_id, candidate_id, template_id, subject, body, sent_by, sent_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
		)
		.bind(Uuid::new_v4())
		.bind(identity.tenant_id.as_str())
		.bind(candidate.candidate_id)
		.bind(template.template_id)
		.bind(subject)
		.bind(body)
		.bind(identity.user_id)
		.bind(OffsetDateTime::now_utc())
		.execute(&self.db.pool)
		.await?;

		crate::record_audit(
			&self.db.pool,
			&identity.tenant_id,
			identity.user_id,
			"email.send",
			"candidate",
			Some(candidate.candidate_id),
			serde_json::json!({ "template_id": template.template_id }),
		)
		.await?;

		Ok(())
	}

	/// Sends recorded for a candidate, newest first.
	pub async fn list_email_logs(
		&self,
		identity: &Identity,
		candidate_id: Uuid,
	) -> Result<Vec<EmailLogView>> {
		identity.require(Permission::CandidateView)?;
		self.fetch_active_candidate(identity, candidate_id).await?;

		let logs: Vec<EmailLog> = sqlx::query_as(
			"\
SELECT email_id, tenant_id, candidate_id, template_id, subject, body, sent_by, sent_at
FROM email_logs
WHERE tenant_id = $1 AND candidate_id = $2
ORDER BY sent_at DESC",
		)
		.bind(identity.tenant_id.as_str())
		.bind(candidate_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(logs.into_iter().map(EmailLogView::from).collect())
	}

	async fn fetch_template(
		&self,
		identity: &Identity,
		template_id: Uuid,
	) -> Result<EmailTemplate> {
		let template: Option<EmailTemplate> = sqlx::query_as(&format!(
			"SELECT {TEMPLATE_COLUMNS} FROM email_templates \
			 WHERE tenant_id = $1 AND template_id = $2"
		))
		.bind(identity.tenant_id.as_str())
		.bind(template_id)
		.fetch_optional(&self.db.pool)
		.await?;

		template.ok_or_else(|| Error::NotFound { message: "Template not found.".to_string() })
	}
}

/// `{{name}}` and `{{email}}` are the only supported placeholders.
fn render(template: &str, candidate: &Candidate) -> String {
	template
		.replace("{{name}}", &candidate.name)
		.replace("{{email}}", candidate.email.as_deref().unwrap_or_default())
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;
	use uuid::Uuid;

	use super::render;
	use trellis_storage::models::Candidate;

	#[test]
	fn render_substitutes_known_placeholders_only() {
		let now = OffsetDateTime::now_utc();
		let candidate = Candidate {
			candidate_id: Uuid::new_v4(),
			tenant_id: "acme".to_string(),
			name: "Ada".to_string(),
			email: Some("ada@example.com".to_string()),
			phone: None,
			source: None,
			status: "active".to_string(),
			owner_id: None,
			pipeline_id: None,
			stage_id: None,
			rejected_at: None,
			deleted_at: None,
			merged_into_id: None,
			created_at: now,
			updated_at: now,
		};

		assert_eq!(
			render("Hi {{name}} <{{email}}>, re {{role}}", &candidate),
			"Hi Ada <ada@example.com>, re {{role}}"
		);
	}
}
