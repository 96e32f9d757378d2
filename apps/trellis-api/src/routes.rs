use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Response},
	routing::{delete, get, patch, post},
};
use serde::Serialize;
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::state::AppState;
use trellis_service::{
	AnalyticsRequest, AttachTagRequest, AuditListRequest, CreateBatchRequest,
	CreateCandidateRequest, CreateNoteRequest, CreatePipelineRequest, CreateSessionRequest,
	CreateTemplateRequest, CreateUserRequest, DuplicatesRequest, Error as ServiceError,
	GrantPipelineRequest, Identity, MergeRequest, MoveStageRequest, RegisterAttachmentRequest,
	SearchRequest, SendEmailRequest, UpdateCandidateRequest, UpdateNoteRequest,
	UpdateTemplateRequest, UploadRequest, search::SortKey,
};

const SESSION_HEADER: &str = "x-trellis-session";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/search", get(search))
		.route("/api/analytics", get(analytics))
		.route("/api/candidates", post(create_candidate))
		.route("/api/candidates/duplicates", get(duplicates))
		.route("/api/candidates/merge", post(merge))
		.route(
			"/api/candidates/{id}",
			get(get_candidate).patch(update_candidate).delete(delete_candidate),
		)
		.route("/api/candidates/{id}/reject", post(reject_candidate))
		.route("/api/candidates/{id}/stage", post(move_stage))
		.route("/api/candidates/{id}/notes", get(list_notes).post(create_note))
		.route("/api/candidates/{id}/notes/{note_id}", patch(update_note).delete(delete_note))
		.route(
			"/api/candidates/{id}/attachments",
			get(list_attachments).post(register_attachment),
		)
		.route("/api/candidates/{id}/emails", get(list_email_logs))
		.route("/api/candidates/{id}/tags", post(attach_tag))
		.route("/api/candidates/{id}/tags/{tag_id}", delete(detach_tag))
		.route("/api/tags", get(list_tags))
		.route("/api/pipelines", get(list_pipelines).post(create_pipeline))
		.route("/api/pipelines/{id}/grants", post(grant_pipeline))
		.route("/api/templates", get(list_templates).post(create_template))
		.route("/api/templates/{id}", patch(update_template).delete(delete_template))
		.route("/api/emails/send", post(send_email))
		.route("/api/imports", post(create_import_batch))
		.route("/api/imports/{batch_id}", get(import_batch_status))
		.route("/api/imports/{batch_id}/upload", post(upload_import_rows))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/admin/audit", get(list_audit))
		.route("/admin/users", post(create_user))
		.route("/admin/sessions", post(create_session))
		.with_state(state)
}

async fn identify(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
	let token = headers.get(SESSION_HEADER).and_then(|value| value.to_str().ok());

	Ok(state.service.authenticate(token).await?)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<trellis_service::SearchResponse>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let request = search_request_from_pairs(&pairs)?;
	let response = state.service.search(&identity, request).await?;

	Ok(Json(response))
}

async fn duplicates(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(request): Query<DuplicatesRequest>,
) -> Result<Json<trellis_service::DuplicatesResponse>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.find_duplicates(&identity, request).await?;

	Ok(Json(response))
}

async fn merge(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<MergeRequest>,
) -> Result<Json<trellis_service::MergeResponse>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.merge_candidates(&identity, request).await?;

	Ok(Json(response))
}

async fn analytics(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(request): Query<AnalyticsRequest>,
) -> Result<Json<trellis_service::AnalyticsResponse>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.analytics(&identity, request).await?;

	Ok(Json(response))
}

async fn create_candidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<CreateCandidateRequest>,
) -> Result<(StatusCode, Json<trellis_service::CandidateSummary>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.create_candidate(&identity, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn get_candidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<Json<trellis_service::CandidateDetail>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.get_candidate(&identity, id).await?;

	Ok(Json(response))
}

async fn update_candidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<UpdateCandidateRequest>,
) -> Result<Json<trellis_service::CandidateSummary>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.update_candidate(&identity, id, request).await?;

	Ok(Json(response))
}

async fn delete_candidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.delete_candidate(&identity, id).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn reject_candidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<Json<trellis_service::CandidateSummary>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.reject_candidate(&identity, id).await?;

	Ok(Json(response))
}

async fn move_stage(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<MoveStageRequest>,
) -> Result<Json<trellis_service::CandidateSummary>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.move_stage(&identity, id, request).await?;

	Ok(Json(response))
}

async fn list_notes(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<Json<Vec<trellis_service::NoteView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_notes(&identity, id).await?;

	Ok(Json(response))
}

async fn create_note(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<trellis_service::NoteView>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.create_note(&identity, id, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn update_note(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path((id, note_id)): Path<(Uuid, Uuid)>,
	Json(request): Json<UpdateNoteRequest>,
) -> Result<Json<trellis_service::NoteView>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.update_note(&identity, id, note_id, request).await?;

	Ok(Json(response))
}

async fn delete_note(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path((id, note_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.delete_note(&identity, id, note_id).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn list_attachments(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<Json<Vec<trellis_service::AttachmentView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_attachments(&identity, id).await?;

	Ok(Json(response))
}

async fn register_attachment(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<RegisterAttachmentRequest>,
) -> Result<(StatusCode, Json<trellis_service::AttachmentView>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.register_attachment(&identity, id, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn list_email_logs(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<Json<Vec<trellis_service::EmailLogView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_email_logs(&identity, id).await?;

	Ok(Json(response))
}

async fn attach_tag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<AttachTagRequest>,
) -> Result<Json<trellis_service::TagView>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.attach_tag(&identity, id, request).await?;

	Ok(Json(response))
}

async fn detach_tag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path((id, tag_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.detach_tag(&identity, id, tag_id).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn list_pipelines(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<trellis_service::PipelineView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_pipelines(&identity).await?;

	Ok(Json(response))
}

async fn create_pipeline(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<CreatePipelineRequest>,
) -> Result<(StatusCode, Json<trellis_service::PipelineView>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.create_pipeline(&identity, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn grant_pipeline(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<GrantPipelineRequest>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.grant_pipeline(&identity, id, request).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn list_tags(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<trellis_service::TagView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_tags(&identity).await?;

	Ok(Json(response))
}

async fn list_templates(
	State(state): State<AppState>,
	headers: HeaderMap,
) -> Result<Json<Vec<trellis_service::TemplateView>>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.list_templates(&identity).await?;

	Ok(Json(response))
}

async fn create_template(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<trellis_service::TemplateView>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.create_template(&identity, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn update_template(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
	Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<trellis_service::TemplateView>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.update_template(&identity, id, request).await?;

	Ok(Json(response))
}

async fn delete_template(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.delete_template(&identity, id).await?;

	Ok(StatusCode::NO_CONTENT)
}

async fn send_email(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<SendEmailRequest>,
) -> Result<StatusCode, ApiError> {
	let identity = identify(&state, &headers).await?;

	state.service.send_email(&identity, request).await?;

	Ok(StatusCode::ACCEPTED)
}

async fn create_import_batch(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<trellis_service::ImportBatchStatus>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.create_import_batch(&identity, request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn import_batch_status(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(batch_id): Path<Uuid>,
) -> Result<Json<trellis_service::ImportBatchStatus>, ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.import_batch_status(&identity, batch_id).await?;

	Ok(Json(response))
}

async fn upload_import_rows(
	State(state): State<AppState>,
	headers: HeaderMap,
	Path(batch_id): Path<Uuid>,
	Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<trellis_service::ImportBatchStatus>), ApiError> {
	let identity = identify(&state, &headers).await?;
	let response = state.service.upload_import_rows(&identity, batch_id, request).await?;

	Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn list_audit(
	State(state): State<AppState>,
	Query(request): Query<AuditListRequest>,
) -> Result<Json<trellis_service::AuditListResponse>, ApiError> {
	let response = state.service.list_audit(request).await?;

	Ok(Json(response))
}

async fn create_user(
	State(state): State<AppState>,
	Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<trellis_service::CreateUserResponse>), ApiError> {
	let response = state.service.create_user(request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

async fn create_session(
	State(state): State<AppState>,
	Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<trellis_service::CreateSessionResponse>), ApiError> {
	let response = state.service.create_session(request).await?;

	Ok((StatusCode::CREATED, Json(response)))
}

/// Folds raw query pairs into a search request. Scalar parameters are
/// last-one-wins when repeated; `tag` accumulates, so `tag=a&tag=b` narrows
/// to candidates carrying both.
fn search_request_from_pairs(pairs: &[(String, String)]) -> Result<SearchRequest, ApiError> {
	let mut request = SearchRequest::default();

	for (key, value) in pairs {
		match key.as_str() {
			"query" | "q" => request.query = Some(value.clone()),
			"tag" | "tags" => request.tags.push(value.clone()),
			"source" => request.source = Some(value.clone()),
			"status" => request.status = Some(value.clone()),
			"ownerId" | "owner_id" => request.owner_id = Some(parse_uuid(key, value)?),
			"pipelineId" | "pipeline_id" => request.pipeline_id = Some(parse_uuid(key, value)?),
			"stageId" | "stage_id" => request.stage_id = Some(parse_uuid(key, value)?),
			"createdAfter" | "created_after" | "created_from" =>
				request.created_after = Some(parse_timestamp(key, value)?),
			"createdBefore" | "created_before" | "created_to" =>
				request.created_before = Some(parse_timestamp(key, value)?),
			"hasEmail" | "has_email" => request.has_email = Some(parse_bool(key, value)?),
			"hasPhone" | "has_phone" => request.has_phone = Some(parse_bool(key, value)?),
			"hasNotes" | "has_notes" => request.has_notes = Some(parse_bool(key, value)?),
			"hasAttachments" | "has_attachments" =>
				request.has_attachments = Some(parse_bool(key, value)?),
			"sort" => request.sort = Some(parse_sort(value)?),
			"page" => request.page = Some(parse_u32(key, value)?),
			"pageSize" | "page_size" | "per_page" => request.page_size = Some(parse_u32(key, value)?),
			_ =>
				return Err(bad_request(format!("Unknown search parameter: {key}."))),
		}
	}

	Ok(request)
}

fn parse_uuid(key: &str, value: &str) -> Result<Uuid, ApiError> {
	value.parse().map_err(|_| bad_request(format!("{key} must be a UUID.")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ApiError> {
	match value {
		"true" | "1" => Ok(true),
		"false" | "0" => Ok(false),
		_ => Err(bad_request(format!("{key} must be true or false."))),
	}
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ApiError> {
	value.parse().map_err(|_| bad_request(format!("{key} must be a non-negative integer.")))
}

fn parse_timestamp(key: &str, value: &str) -> Result<OffsetDateTime, ApiError> {
	OffsetDateTime::parse(value, &Rfc3339)
		.map_err(|_| bad_request(format!("{key} must be an RFC 3339 timestamp.")))
}

/// Accepts a column name with an optional `-` prefix for descending order.
fn parse_sort(value: &str) -> Result<SortKey, ApiError> {
	match value {
		"-created_at" | "created_desc" => Ok(SortKey::CreatedDesc),
		"created_at" | "created_asc" => Ok(SortKey::CreatedAsc),
		"-updated_at" | "updated_desc" => Ok(SortKey::UpdatedDesc),
		"name" | "name_asc" => Ok(SortKey::NameAsc),
		_ => Err(bad_request(format!("Unknown sort: {value}."))),
	}
}

fn bad_request(message: String) -> ApiError {
	ApiError {
		status: StatusCode::BAD_REQUEST,
		error_code: "invalid_request".to_string(),
		message,
		details: None,
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	details: Option<serde_json::Value>,
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::Unauthorized => Self {
				status: StatusCode::UNAUTHORIZED,
				error_code: "unauthorized".to_string(),
				message: "Authentication required.".to_string(),
				details: None,
			},
			ServiceError::PermissionDenied { permission } => Self {
				status: StatusCode::FORBIDDEN,
				error_code: "permission_denied".to_string(),
				message: format!("Permission denied: {permission} is required."),
				details: Some(json!({ "permission": permission.as_str() })),
			},
			ServiceError::InvalidRequest { message } => Self {
				status: StatusCode::BAD_REQUEST,
				error_code: "invalid_request".to_string(),
				message,
				details: None,
			},
			ServiceError::NotFound { message } => Self {
				status: StatusCode::NOT_FOUND,
				error_code: "not_found".to_string(),
				message,
				details: None,
			},
			ServiceError::Conflict { message } => Self {
				status: StatusCode::CONFLICT,
				error_code: "conflict".to_string(),
				message,
				details: None,
			},
			ServiceError::Storage { message } => {
				tracing::error!("Storage failure: {message}");

				Self {
					status: StatusCode::INTERNAL_SERVER_ERROR,
					error_code: "internal".to_string(),
					message: "Internal error.".to_string(),
					details: None,
				}
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody {
			error_code: self.error_code,
			message: self.message,
			details: self.details,
		};

		(self.status, Json(body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::search_request_from_pairs;

	fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
		raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
	}

	#[test]
	fn repeated_scalar_parameters_are_last_one_wins() {
		let request =
			search_request_from_pairs(&pairs(&[("hasEmail", "true"), ("hasEmail", "false")]))
				.expect("Parse failed.");

		assert_eq!(request.has_email, Some(false));
	}

	#[test]
	fn tags_accumulate() {
		let request = search_request_from_pairs(&pairs(&[("tag", "rust"), ("tag", "senior")]))
			.expect("Parse failed.");

		assert_eq!(request.tags, vec!["rust".to_string(), "senior".to_string()]);
	}

	#[test]
	fn unknown_parameters_are_rejected() {
		assert!(search_request_from_pairs(&pairs(&[("nope", "1")])).is_err());
	}
}
