//! Client for the external text-generation API (OpenRouter chat completions).
//!
//! One explicitly constructed client wraps every generation task the service
//! offers. The client owns its HTTP connection pool and timeouts, validates
//! the API key when built (startup fails fast on a malformed key), and keeps
//! no other state: persistence of results is entirely the caller's concern.
//!
//! # Retry Contract
//!
//! Each call makes up to 3 total attempts with a fixed 1-second back-off.
//! Every attempt is bounded by a 3 s connect timeout and a 30 s request
//! timeout. Failures are classified (timeout / connection / HTTP status /
//! malformed response) for logging; after the last attempt the caller gets
//! the final classification and maps it to one uniform "unavailable" signal.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full URL of the chat-completions endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const FREE_MODEL: &str = "qwen/qwen-2.5-72b-instruct:free";
const PREMIUM_MODEL: &str = "qwen/qwen-2.5-72b-instruct";

/// Total tries per generation call: one initial attempt plus two retries.
const MAX_ATTEMPTS: u32 = 3;

/// How recent CVs get truncated for the prompt-heavy artifact tasks.
const CV_PROMPT_CHAR_LIMIT: usize = 3000;

const SYSTEM_PROMPT: &str = "You are a world-class recruitment and résumé \
optimization expert with 15 years of experience in HR. You have deep knowledge \
of the job market, hiring trends, and best practices for writing résumés, cover \
letters, and preparing candidates for interviews.";

/// Quality tier for a generation request. Premium is granted to developers
/// and in-force subscribers; one-shot grant holders generate on Free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    fn model(self) -> &'static str {
        match self {
            Tier::Free => FREE_MODEL,
            Tier::Premium => PREMIUM_MODEL,
        }
    }
}

/// Stable classification of a failed attempt.
///
/// Callers never branch on this beyond logging; the HTTP layer maps any of
/// these to `AppError::GenerationUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed")]
    Connection,

    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned HTTP {0}")]
    Status(u16),

    #[error("unexpected response shape")]
    MalformedResponse,
}

/// The five generation tasks, differentiated only by prompt template.
#[derive(Debug)]
pub enum GenerationTask<'a> {
    Optimize {
        cv_text: &'a str,
        job_title: &'a str,
        job_description: &'a str,
    },
    AnalyzeWithScore {
        cv_text: &'a str,
        job_title: &'a str,
        job_description: &'a str,
    },
    CoverLetter {
        cv_text: &'a str,
        job_title: &'a str,
        job_description: &'a str,
        company_name: &'a str,
    },
    InterviewQuestions {
        cv_text: &'a str,
        job_title: &'a str,
        job_description: &'a str,
    },
    SkillsGap {
        cv_text: &'a str,
        job_title: &'a str,
        job_description: &'a str,
    },
}

impl GenerationTask<'_> {
    /// Build the user prompt for this task.
    pub fn prompt(&self) -> String {
        match self {
            GenerationTask::Optimize {
                cv_text,
                job_title,
                job_description,
            } => format!(
                "TASK: Optimize the résumé below for the position \"{job_title}\".\n\n\
                 JOB DESCRIPTION:\n{job_description}\n\n\
                 RÉSUMÉ TO OPTIMIZE:\n{cv_text}\n\n\
                 INSTRUCTIONS:\n\
                 1. Tailor the résumé to this specific position\n\
                 2. Add relevant keywords\n\
                 3. Improve formatting and structure\n\
                 4. Make it more attractive to recruiters\n\
                 5. Keep all information truthful\n\n\
                 Return ONLY the optimized résumé, without additional commentary."
            ),
            GenerationTask::AnalyzeWithScore {
                cv_text,
                job_title,
                job_description,
            } => format!(
                "TASK: Analyze the résumé below against the position \"{job_title}\" and score it.\n\n\
                 JOB DESCRIPTION:\n{job_description}\n\n\
                 RÉSUMÉ TO ANALYZE:\n{cv_text}\n\n\
                 INSTRUCTIONS:\n\
                 1. Score the résumé on a 1-100 scale\n\
                 2. Give a detailed analysis of its strengths\n\
                 3. Point out areas for improvement\n\
                 4. Suggest concrete changes\n\
                 5. Assess the fit for the position\n\n\
                 RESPONSE FORMAT:\n\
                 SCORE: [number]/100\n\n\
                 STRENGTHS:\n- [point]\n\n\
                 AREAS FOR IMPROVEMENT:\n- [point]\n\n\
                 RECOMMENDATIONS:\n- [recommendation]"
            ),
            GenerationTask::CoverLetter {
                cv_text,
                job_title,
                job_description,
                company_name,
            } => {
                let company_info = if company_name.is_empty() {
                    String::new()
                } else {
                    format!(" at {company_name}")
                };
                format!(
                    "TASK: Write a professional cover letter.\n\n\
                     INPUT:\n\
                     - Position: {job_title}{company_info}\n\
                     - Candidate's résumé: {}\n\
                     - Job description: {job_description}\n\n\
                     REQUIREMENTS:\n\
                     1. Professional format (header, salutation, signature)\n\
                     2. 3-4 paragraphs, roughly 250-350 words\n\
                     3. Personalized for this specific position\n\
                     4. Highlight the strongest qualifications from the résumé\n\
                     5. Show motivation; keep the tone professional but warm\n\
                     6. Complement the résumé rather than repeating it\n\n\
                     Write the complete cover letter now:",
                    truncate_chars(cv_text, CV_PROMPT_CHAR_LIMIT)
                )
            }
            GenerationTask::InterviewQuestions {
                cv_text,
                job_title,
                job_description,
            } => format!(
                "TASK: Generate personalized interview questions.\n\n\
                 INPUT:\n\
                 - Position: {job_title}\n\
                 - Candidate's résumé: {}\n\
                 - Job description: {job_description}\n\n\
                 REQUIREMENTS:\n\
                 1. 10-15 questions tailored to the candidate's profile\n\
                 2. Mix of technical, behavioral and situational questions\n\
                 3. Account for the experience and skills in the résumé\n\
                 4. Include industry- and position-specific questions\n\n\
                 RESPONSE FORMAT:\n\
                 BASIC QUESTIONS:\n1. [question]\n\n\
                 TECHNICAL QUESTIONS:\n1. [question]\n\n\
                 BEHAVIORAL QUESTIONS:\n1. [question]\n\n\
                 SITUATIONAL QUESTIONS:\n1. [question]\n\n\
                 COMPANY AND ROLE QUESTIONS:\n1. [question]",
                truncate_chars(cv_text, CV_PROMPT_CHAR_LIMIT)
            ),
            GenerationTask::SkillsGap {
                cv_text,
                job_title,
                job_description,
            } => format!(
                "TASK: Perform a detailed skills-gap analysis.\n\n\
                 INPUT:\n\
                 - Position: {job_title}\n\
                 - Candidate's résumé: {}\n\
                 - Job description: {job_description}\n\n\
                 GOALS:\n\
                 1. Compare the résumé's skills with the position's requirements\n\
                 2. Identify the candidate's strengths\n\
                 3. Detect competency gaps and missing skills\n\
                 4. Suggest ways to close the gaps\n\
                 5. Rate the overall fit (0-100%)\n\n\
                 RESPONSE FORMAT:\n\
                 OVERALL FIT: [XX]%\n\n\
                 STRENGTHS:\n- [skill] - [short justification]\n\n\
                 COMPETENCY GAPS:\n- [missing skill] - [why it matters]\n\n\
                 DEVELOPMENT RECOMMENDATIONS:\n- [course/certificate/experience]\n\n\
                 ACTION PLAN (3-6 months):\n1. [concrete step]",
                truncate_chars(cv_text, CV_PROMPT_CHAR_LIMIT)
            ),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            GenerationTask::Optimize { .. } => "optimize",
            GenerationTask::AnalyzeWithScore { .. } => "analyze",
            GenerationTask::CoverLetter { .. } => "cover_letter",
            GenerationTask::InterviewQuestions { .. } => "interview_questions",
            GenerationTask::SkillsGap { .. } => "skills_gap",
        }
    }
}

/// Knobs for [`GenerationClient`]. Production uses [`GenerationConfig::new`];
/// tests shrink the timeouts and back-off and point at a mock server.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub endpoint_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
}

impl GenerationConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint_url: OPENROUTER_BASE_URL.to_string(),
            // Short connect timeout, longer read timeout: bounds the worst
            // case at (3 + 30 + 1) x 3 seconds per generation call.
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// The generation client. Cheap to clone (reqwest's client is an Arc
/// internally); one instance is built at startup and shared via AppState.
#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    api_key: String,
    endpoint_url: String,
    retry_backoff: Duration,
}

impl GenerationClient {
    /// Build the client, validating the API key format up front so a
    /// misconfigured deployment fails at startup rather than on the first
    /// user request.
    pub fn new(config: GenerationConfig) -> anyhow::Result<Self> {
        if config.api_key.len() < 20 || !config.api_key.starts_with("sk-or-v1-") {
            anyhow::bail!(
                "OPENROUTER_API_KEY is malformed: expected an 'sk-or-v1-' key of at least 20 characters"
            );
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent("CV-Optimizer-API/1.0")
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key,
            endpoint_url: config.endpoint_url,
            retry_backoff: config.retry_backoff,
        })
    }

    /// Run one generation task at the given tier.
    ///
    /// # Errors
    ///
    /// Returns the classification of the final failed attempt once all
    /// retries are exhausted. Never returns an empty or shapeless response
    /// as success.
    pub async fn generate(
        &self,
        task: &GenerationTask<'_>,
        tier: Tier,
    ) -> Result<String, GenerationError> {
        let prompt = task.prompt();
        let body = ChatRequest {
            model: tier.model(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: 1500,
            top_p: 0.9,
            frequency_penalty: 0.1,
            presence_penalty: 0.1,
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&body).await {
                Ok(content) => {
                    tracing::info!(
                        task = task.label(),
                        attempt,
                        chars = content.len(),
                        "generation succeeded"
                    );
                    return Ok(content);
                }
                Err(err) => {
                    tracing::warn!(
                        task = task.label(),
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %err,
                        "generation attempt failed"
                    );
                    if attempt == MAX_ATTEMPTS {
                        return Err(err);
                    }
                }
            }

            tokio::time::sleep(self.retry_backoff).await;
        }

        unreachable!("loop returns on the final attempt")
    }

    async fn attempt(&self, body: &ChatRequest<'_>) -> Result<String, GenerationError> {
        let response = self
            .http
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://cv-optimizer.example.com")
            .header("X-Title", "CV Optimizer")
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Status(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|_| GenerationError::MalformedResponse)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(GenerationError::MalformedResponse);
        }

        Ok(content)
    }
}

fn classify(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else if err.is_connect() {
        GenerationError::Connection
    } else {
        GenerationError::Request(err.to_string())
    }
}

/// Truncate to a character count without splitting a UTF-8 code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_client(endpoint_url: String) -> GenerationClient {
        GenerationClient::new(GenerationConfig {
            api_key: "sk-or-v1-test-key-long-enough".into(),
            endpoint_url,
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(10),
        })
        .expect("valid test config")
    }

    fn sample_task() -> GenerationTask<'static> {
        GenerationTask::Optimize {
            cv_text: "Rust developer, 5 years",
            job_title: "Senior Rust Developer",
            job_description: "Backend services",
        }
    }

    #[test]
    fn malformed_api_key_fails_construction() {
        assert!(GenerationClient::new(GenerationConfig::new("")).is_err());
        assert!(GenerationClient::new(GenerationConfig::new("sk-or-v1-x")).is_err());
        assert!(
            GenerationClient::new(GenerationConfig::new("wrong-prefix-but-quite-long-key"))
                .is_err()
        );
        assert!(
            GenerationClient::new(GenerationConfig::new("sk-or-v1-perfectly-fine-key")).is_ok()
        );
    }

    #[test]
    fn prompts_embed_task_inputs() {
        let task = sample_task();
        let prompt = task.prompt();
        assert!(prompt.contains("Senior Rust Developer"));
        assert!(prompt.contains("Rust developer, 5 years"));
        assert!(prompt.contains("Backend services"));

        let letter = GenerationTask::CoverLetter {
            cv_text: "cv",
            job_title: "Analyst",
            job_description: "",
            company_name: "Acme",
        };
        assert!(letter.prompt().contains("at Acme"));

        let no_company = GenerationTask::CoverLetter {
            cv_text: "cv",
            job_title: "Analyst",
            job_description: "",
            company_name: "",
        };
        assert!(!no_company.prompt().contains(" at \n"));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let text = "żółw".repeat(2000);
        let cut = truncate_chars(&text, 3000);
        assert_eq!(cut.chars().count(), 3000);
        // Slicing did not split a multi-byte character.
        assert!(text.is_char_boundary(cut.len()));

        assert_eq!(truncate_chars("short", 3000), "short");
    }

    #[tokio::test]
    async fn successful_generation_returns_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "An optimized résumé"}}]
                }));
            })
            .await;

        let client = test_client(server.url("/chat/completions"));
        let result = client.generate(&sample_task(), Tier::Free).await;

        assert_eq!(result.unwrap(), "An optimized résumé");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surfaced() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(500);
            })
            .await;

        let client = test_client(server.url("/chat/completions"));
        let result = client.generate(&sample_task(), Tier::Premium).await;

        assert!(matches!(result, Err(GenerationError::Status(500))));
        // One initial attempt plus two retries.
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn shapeless_response_is_never_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(serde_json::json!({"choices": []}));
            })
            .await;

        let client = test_client(server.url("/chat/completions"));
        let result = client.generate(&sample_task(), Tier::Free).await;

        assert!(matches!(result, Err(GenerationError::MalformedResponse)));
        mock.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn slow_responses_classify_as_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .delay(Duration::from_millis(2_000))
                    .json_body(serde_json::json!({
                        "choices": [{"message": {"role": "assistant", "content": "late"}}]
                    }));
            })
            .await;

        let client = test_client(server.url("/chat/completions"));
        let result = client.generate(&sample_task(), Tier::Free).await;

        assert!(matches!(result, Err(GenerationError::Timeout)));
    }

    #[tokio::test]
    async fn unreachable_host_classifies_as_connection_failure() {
        // Port 1 on localhost refuses connections.
        let client = test_client("http://127.0.0.1:1/chat/completions".into());
        let result = client.generate(&sample_task(), Tier::Free).await;
        assert!(matches!(
            result,
            Err(GenerationError::Connection) | Err(GenerationError::Request(_))
        ));
    }
}
