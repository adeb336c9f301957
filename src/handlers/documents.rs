//! Résumé upload, retrieval, optimization and analysis.
//!
//! Uploads arrive as multipart forms carrying the PDF plus the target
//! position. Text is extracted synchronously during the upload request;
//! unreadable PDFs are rejected there and no document row is created.
//! Optimization is the one quota-gated operation; analysis is open to every
//! authenticated account (free scoring is the hook of the product).

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::document::{
        ArtifactSummary, Document, DocumentResponse, DocumentSummary, GeneratedArtifact,
        GenerationRunResponse, UploadResponse,
    },
    services::{entitlement_service, extraction_service, generation_service::GenerationTask},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::models::billing::{Capability, Coverage};
use crate::services::generation_service::Tier;

/// Upload a résumé PDF together with the target position.
///
/// # Multipart Fields
///
/// - `cv_file` (required): the PDF, at most the configured upload limit
/// - `job_title` (required): position the résumé targets
/// - `job_description` (optional): posting text, improves every later task
///
/// # Responses
///
/// - `201 Created` with `{ "session_token": ..., "filename": ..., ... }`
/// - `400 Bad Request` when the file or job title is missing, or the file
///   is not a PDF
/// - `413 Payload Too Large` over the upload limit
/// - `422 Unprocessable Entity` when no text can be extracted
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut job_title = String::new();
    let mut job_description = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "cv_file" => {
                filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| classify_field_error(e.status(), e.body_text()))?;
                file_bytes = Some(bytes.to_vec());
            }
            "job_title" => {
                job_title = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(format!("unreadable field: {e}")))?;
            }
            "job_description" => {
                job_description = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(format!("unreadable field: {e}")))?;
            }
            _ => {}
        }
    }

    let bytes = file_bytes
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("no file selected".into()))?;
    let filename =
        filename.ok_or_else(|| AppError::InvalidRequest("uploaded file has no name".into()))?;

    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(AppError::InvalidRequest(
            "only PDF files are accepted".into(),
        ));
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge);
    }

    let job_title = job_title.trim().to_string();
    if job_title.is_empty() {
        return Err(AppError::InvalidRequest("job title is required".into()));
    }
    let job_description = job_description.trim().to_string();

    let original_text = extraction_service::extract_text(&bytes)?;

    let session_token = Uuid::new_v4().to_string();
    let document = sqlx::query_as::<_, Document>(
        r#"
        INSERT INTO documents (account_id, session_token, filename, original_text, job_title, job_description)
        VALUES ($1, $2, $3, $4, $5, NULLIF($6, ''))
        RETURNING *
        "#,
    )
    .bind(auth.account_id)
    .bind(&session_token)
    .bind(&filename)
    .bind(&original_text)
    .bind(&job_title)
    .bind(&job_description)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        account_id = %auth.account_id,
        session_token = %document.session_token,
        filename = %document.filename,
        chars = original_text.len(),
        "résumé uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            session_token: document.session_token,
            filename: document.filename,
            job_title: document.job_title,
            message: "résumé uploaded and text extracted",
        }),
    ))
}

/// List the caller's documents, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    let documents = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE account_id = $1 ORDER BY created_at DESC",
    )
    .bind(auth.account_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

/// Retrieve one document with its generated artifacts.
///
/// # Responses
///
/// - `200 OK` with the document, its texts and an artifact summary list
/// - `404 Not Found` for an unknown token or another account's document
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_token): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document = fetch_document(&state, &auth, &session_token).await?;

    let artifacts = sqlx::query_as::<_, GeneratedArtifact>(
        "SELECT * FROM generated_artifacts WHERE document_id = $1 ORDER BY generated_at DESC",
    )
    .bind(document.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(DocumentResponse {
        session_token: document.session_token,
        filename: document.filename,
        job_title: document.job_title,
        job_description: document.job_description,
        original_text: document.original_text,
        optimized_text: document.optimized_text,
        analysis_text: document.analysis_text,
        created_at: document.created_at,
        optimized_at: document.optimized_at,
        analyzed_at: document.analyzed_at,
        artifacts: artifacts
            .into_iter()
            .map(ArtifactSummary::from)
            .collect(),
    }))
}

/// Optimize the résumé for its target position. Quota-gated.
///
/// # Flow
///
/// 1. Load the document (scoped to the caller)
/// 2. Entitlement check for the optimize capability
/// 3. Generate the optimized text (premium tier for developers and
///    subscribers, free tier on a single-use grant)
/// 4. Consume one grant unit, only after generation succeeded and only
///    when a grant was what covered the call
/// 5. Persist the optimized text on the document
///
/// A generation failure therefore never costs quota.
///
/// # Responses
///
/// - `200 OK` with the optimized text
/// - `402 Payment Required` without coverage or with spent quota
/// - `404 Not Found` for an unknown document
/// - `503 Service Unavailable` when generation fails after retries
pub async fn optimize(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_token): Path<String>,
) -> Result<Json<GenerationRunResponse>, AppError> {
    let document = fetch_document(&state, &auth, &session_token).await?;

    let coverage = entitlement_service::check(&state.pool, &auth, Capability::Optimize).await?;
    let tier = match coverage {
        Coverage::Developer | Coverage::Subscription => Tier::Premium,
        Coverage::Grant => Tier::Free,
    };

    let task = GenerationTask::Optimize {
        cv_text: &document.original_text,
        job_title: &document.job_title,
        job_description: document.job_description.as_deref().unwrap_or(""),
    };
    let optimized = state.generation.generate(&task, tier).await.map_err(|err| {
        tracing::error!(session_token = %document.session_token, error = %err, "optimization failed");
        AppError::GenerationUnavailable
    })?;

    if coverage == Coverage::Grant {
        // The atomic decrement is the authority on remaining quota. Losing
        // the race to a concurrent optimize means this one does not land.
        let consumed = entitlement_service::consume_grant(&state.pool, auth.account_id).await?;
        if !consumed {
            tracing::warn!(
                account_id = %auth.account_id,
                "quota exhausted between check and consumption"
            );
            return Err(AppError::QuotaExhausted);
        }
    }

    let document = sqlx::query_as::<_, Document>(
        r#"
        UPDATE documents
        SET optimized_text = $2, optimized_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(document.id)
    .bind(&optimized)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        account_id = %auth.account_id,
        session_token = %document.session_token,
        ?coverage,
        "résumé optimized"
    );

    Ok(Json(GenerationRunResponse {
        session_token: document.session_token,
        content: optimized,
        message: "résumé optimized",
    }))
}

/// Analyze and score the résumé against its target position.
///
/// Open to every authenticated account; only the generation tier differs
/// by payment status. Repeating the call overwrites the previous analysis.
pub async fn analyze(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_token): Path<String>,
) -> Result<Json<GenerationRunResponse>, AppError> {
    let document = fetch_document(&state, &auth, &session_token).await?;
    let tier = entitlement_service::tier_for(&state.pool, &auth).await?;

    let task = GenerationTask::AnalyzeWithScore {
        cv_text: &document.original_text,
        job_title: &document.job_title,
        job_description: document.job_description.as_deref().unwrap_or(""),
    };
    let analysis = state.generation.generate(&task, tier).await.map_err(|err| {
        tracing::error!(session_token = %document.session_token, error = %err, "analysis failed");
        AppError::GenerationUnavailable
    })?;

    let document = sqlx::query_as::<_, Document>(
        r#"
        UPDATE documents
        SET analysis_text = $2, analyzed_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(document.id)
    .bind(&analysis)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        account_id = %auth.account_id,
        session_token = %document.session_token,
        "résumé analyzed"
    );

    Ok(Json(GenerationRunResponse {
        session_token: document.session_token,
        content: analysis,
        message: "résumé analyzed",
    }))
}

/// Map a failed multipart field read to the right denial: only a
/// body-limit overrun is a 413, everything else (truncated stream, bad
/// framing) is a malformed request.
fn classify_field_error(status: StatusCode, detail: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::InvalidRequest(format!("malformed multipart body: {detail}"))
    }
}

/// Load a document by session token, scoped to the authenticated account.
/// Another account's token behaves exactly like an unknown one.
pub(crate) async fn fetch_document(
    state: &AppState,
    auth: &AuthContext,
    session_token: &str,
) -> Result<Document, AppError> {
    sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE session_token = $1 AND account_id = $2",
    )
    .bind(session_token)
    .bind(auth.account_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::DocumentNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_field_reads_map_to_payload_too_large() {
        let err = classify_field_error(StatusCode::PAYLOAD_TOO_LARGE, "length limit exceeded".into());
        assert!(matches!(err, AppError::PayloadTooLarge));
    }

    #[test]
    fn other_field_read_failures_are_bad_requests_not_413() {
        let err = classify_field_error(StatusCode::BAD_REQUEST, "unexpected end of stream".into());
        match err {
            AppError::InvalidRequest(msg) => assert!(msg.contains("unexpected end of stream")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
        let err = classify_field_error(StatusCode::INTERNAL_SERVER_ERROR, "io error".into());
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
