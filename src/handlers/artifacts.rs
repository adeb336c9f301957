//! Premium artifacts generated from an uploaded résumé: cover letters,
//! interview questions and skills-gap analyses.
//!
//! All three share one table and one pair of endpoints; the artifact kind in
//! the path discriminates. Every generation call is gated on the full-package
//! capability (developer flag or in-force subscription); single-use grants
//! never cover these.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        billing::{Capability, Coverage},
        document::{ArtifactKind, ArtifactResponse, GenerateArtifactRequest, GeneratedArtifact},
    },
    services::{entitlement_service, generation_service::GenerationTask},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::services::generation_service::Tier;

/// Generate an artifact of the given kind from a document.
///
/// # Path
///
/// `POST /api/v1/documents/{session_token}/artifacts/{kind}` where `kind` is
/// `cover-letter`, `interview-questions` or `skills-gap`.
///
/// # Request Body
///
/// ```json
/// {
///   "job_title": "Senior Rust Developer",
///   "job_description": "...",
///   "company_name": "Acme"
/// }
/// ```
///
/// `job_title` falls back to the document's own when omitted;
/// `company_name` only matters for cover letters.
///
/// # Responses
///
/// - `201 Created` with the artifact and its own session token
/// - `402 Payment Required` without the full package
/// - `404 Not Found` for an unknown document
/// - `503 Service Unavailable` when generation fails after retries
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((session_token, kind)): Path<(String, String)>,
    Json(payload): Json<GenerateArtifactRequest>,
) -> Result<(StatusCode, Json<ArtifactResponse>), AppError> {
    let kind = ArtifactKind::parse(&kind)?;
    let document =
        super::documents::fetch_document(&state, &auth, &session_token).await?;

    let coverage =
        entitlement_service::check(&state.pool, &auth, Capability::FullFeatures).await?;
    let tier = match coverage {
        Coverage::Developer | Coverage::Subscription => Tier::Premium,
        // FullFeatures is never covered by a grant, but the tier mapping
        // stays total.
        Coverage::Grant => Tier::Free,
    };

    let job_title = if payload.job_title.trim().is_empty() {
        document.job_title.clone()
    } else {
        payload.job_title.trim().to_string()
    };
    let job_description = if payload.job_description.trim().is_empty() {
        document.job_description.clone().unwrap_or_default()
    } else {
        payload.job_description.trim().to_string()
    };
    let company_name = payload.company_name.trim().to_string();

    let task = match kind {
        ArtifactKind::CoverLetter => GenerationTask::CoverLetter {
            cv_text: &document.original_text,
            job_title: &job_title,
            job_description: &job_description,
            company_name: &company_name,
        },
        ArtifactKind::InterviewQuestions => GenerationTask::InterviewQuestions {
            cv_text: &document.original_text,
            job_title: &job_title,
            job_description: &job_description,
        },
        ArtifactKind::SkillsGap => GenerationTask::SkillsGap {
            cv_text: &document.original_text,
            job_title: &job_title,
            job_description: &job_description,
        },
    };

    let content = state.generation.generate(&task, tier).await.map_err(|err| {
        tracing::error!(
            document = %document.session_token,
            kind = kind.as_str(),
            error = %err,
            "artifact generation failed"
        );
        AppError::GenerationUnavailable
    })?;

    let artifact_token = Uuid::new_v4().to_string();
    let artifact = sqlx::query_as::<_, GeneratedArtifact>(
        r#"
        INSERT INTO generated_artifacts
            (account_id, document_id, kind, session_token, job_title, job_description, company_name, content)
        VALUES ($1, $2, $3, $4, $5, NULLIF($6, ''), NULLIF($7, ''), $8)
        RETURNING *
        "#,
    )
    .bind(auth.account_id)
    .bind(document.id)
    .bind(kind.as_str())
    .bind(&artifact_token)
    .bind(&job_title)
    .bind(&job_description)
    .bind(&company_name)
    .bind(&content)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        account_id = %auth.account_id,
        document = %document.session_token,
        kind = kind.as_str(),
        artifact = %artifact.session_token,
        "artifact generated"
    );

    Ok((StatusCode::CREATED, Json(artifact.into())))
}

/// Retrieve a previously generated artifact by kind and its session token.
///
/// # Responses
///
/// - `200 OK` with the artifact content
/// - `404 Not Found` for an unknown token, a token of a different kind, or
///   another account's artifact
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((kind, session_token)): Path<(String, String)>,
) -> Result<Json<ArtifactResponse>, AppError> {
    let kind = ArtifactKind::parse(&kind)?;

    let artifact = sqlx::query_as::<_, GeneratedArtifact>(
        r#"
        SELECT * FROM generated_artifacts
        WHERE session_token = $1 AND kind = $2 AND account_id = $3
        "#,
    )
    .bind(&session_token)
    .bind(kind.as_str())
    .bind(auth.account_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::ArtifactNotFound)?;

    Ok(Json(artifact.into()))
}
