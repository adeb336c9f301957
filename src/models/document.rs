//! Uploaded résumé documents and the artifacts generated from them.
//!
//! A `Document` is created once per upload and then mutated in place as the
//! optimize/analyze stages complete. Generated artifacts (cover letters,
//! interview questions, skills-gap reports) are separate rows, each with
//! its own session token, and can exist multiple times per document since
//! they are regenerable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Represents an uploaded résumé record from the database.
///
/// # Database Table
///
/// Maps to the `documents` table. The `session_token` is an opaque UUID
/// string assigned at upload: immutable, unique across the system, never
/// reused, and distinct from any authentication session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub account_id: Uuid,
    pub session_token: String,
    pub filename: String,
    /// Plain text extracted from the uploaded PDF
    pub original_text: String,
    pub job_title: String,
    pub job_description: Option<String>,
    /// Set once an optimize run succeeds; NULL before that
    pub optimized_text: Option<String>,
    /// Set once an analyze run succeeds; NULL before that
    pub analysis_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub optimized_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

/// The three regenerable artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    CoverLetter,
    InterviewQuestions,
    SkillsGap,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::CoverLetter => "cover_letter",
            ArtifactKind::InterviewQuestions => "interview_questions",
            ArtifactKind::SkillsGap => "skills_gap",
        }
    }

    /// Parse a URL path segment. Accepts the kebab-case route form as well
    /// as the snake_case storage form.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "cover_letter" | "cover-letter" => Ok(ArtifactKind::CoverLetter),
            "interview_questions" | "interview-questions" => Ok(ArtifactKind::InterviewQuestions),
            "skills_gap" | "skills-gap" => Ok(ArtifactKind::SkillsGap),
            other => Err(AppError::InvalidRequest(format!(
                "Unknown artifact kind: {other}"
            ))),
        }
    }
}

/// Represents a generated artifact record from the database.
///
/// # Database Table
///
/// Maps to the `generated_artifacts` table; `kind` discriminates the three
/// artifact kinds sharing this shape. `company_name` is populated only for
/// cover letters.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeneratedArtifact {
    pub id: Uuid,
    pub account_id: Uuid,
    pub document_id: Uuid,
    pub kind: String,
    pub session_token: String,
    pub job_title: String,
    pub job_description: Option<String>,
    pub company_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Response after a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_token: String,
    pub filename: String,
    pub job_title: String,
    pub message: &'static str,
}

/// Full document view, returned by `GET /api/v1/documents/{session_token}`.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub session_token: String,
    pub filename: String,
    pub job_title: String,
    pub job_description: Option<String>,
    pub original_text: String,
    pub optimized_text: Option<String>,
    pub analysis_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub optimized_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    /// Artifacts generated from this document, newest first
    pub artifacts: Vec<ArtifactSummary>,
}

/// Compact document view for listing.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub session_token: String,
    pub filename: String,
    pub job_title: String,
    pub created_at: DateTime<Utc>,
    pub optimized_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl From<Document> for DocumentSummary {
    fn from(doc: Document) -> Self {
        Self {
            session_token: doc.session_token,
            filename: doc.filename,
            job_title: doc.job_title,
            created_at: doc.created_at,
            optimized_at: doc.optimized_at,
            analyzed_at: doc.analyzed_at,
        }
    }
}

/// Artifact reference embedded in a document view (content omitted).
#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub kind: String,
    pub session_token: String,
    pub job_title: String,
    pub generated_at: DateTime<Utc>,
}

impl From<GeneratedArtifact> for ArtifactSummary {
    fn from(artifact: GeneratedArtifact) -> Self {
        Self {
            kind: artifact.kind,
            session_token: artifact.session_token,
            job_title: artifact.job_title,
            generated_at: artifact.generated_at,
        }
    }
}

/// Request body for `POST /api/v1/documents/{session_token}/artifacts/{kind}`.
#[derive(Debug, Deserialize)]
pub struct GenerateArtifactRequest {
    /// Falls back to the document's own job title when omitted
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub job_description: String,
    /// Only meaningful for cover letters
    #[serde(default)]
    pub company_name: String,
}

/// Full artifact view, returned on generation and retrieval.
#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub kind: String,
    pub session_token: String,
    pub job_title: String,
    pub company_name: Option<String>,
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

impl From<GeneratedArtifact> for ArtifactResponse {
    fn from(artifact: GeneratedArtifact) -> Self {
        Self {
            kind: artifact.kind,
            session_token: artifact.session_token,
            job_title: artifact.job_title,
            company_name: artifact.company_name,
            content: artifact.content,
            generated_at: artifact.generated_at,
        }
    }
}

/// Response for optimize/analyze runs on a document.
#[derive(Debug, Serialize)]
pub struct GenerationRunResponse {
    pub session_token: String,
    pub content: String,
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_kind_parses_both_route_and_storage_forms() {
        assert_eq!(
            ArtifactKind::parse("cover-letter").unwrap(),
            ArtifactKind::CoverLetter
        );
        assert_eq!(
            ArtifactKind::parse("interview_questions").unwrap(),
            ArtifactKind::InterviewQuestions
        );
        assert_eq!(
            ArtifactKind::parse("skills-gap").unwrap(),
            ArtifactKind::SkillsGap
        );
        assert!(ArtifactKind::parse("resume").is_err());
    }
}
