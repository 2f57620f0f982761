//! Answer synthesis.
//!
//! A [`Synthesizer`] turns `(query, context, optional document)` into an
//! answer. Remote providers share one prompt layout built by
//! [`PromptBuilder`]; the `extractive` provider answers offline by returning
//! the retrieved context itself. Every failure surfaces as
//! [`RagError::RemoteGeneration`].

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::error::{RagError, Result};
use crate::remote;
use crate::retrieve::truncate_chars;

/// Returned by the extractive provider when retrieval found nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant passages were found in the uploaded documents for this question.";

/// Inputs to one answer.
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub query: &'a str,
    pub context: &'a str,
    pub document: Option<&'a str>,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;
    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String>;
}

/// Builds the bounded prompt sent to remote models.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
    max_document_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize, max_document_chars: usize) -> Self {
        Self {
            max_context_chars,
            max_document_chars,
        }
    }

    pub fn build(&self, request: AnswerRequest<'_>) -> String {
        let context = truncate_chars(request.context.trim(), self.max_context_chars);
        let document = request
            .document
            .map(|d| truncate_chars(d.trim(), self.max_document_chars))
            .filter(|d| !d.is_empty());

        if context.is_empty() && document.is_none() {
            return format!(
                "Answer the following question directly and simply. \
                 If you are unsure, say so.\n\nQuestion: {}",
                request.query
            );
        }

        let mut prompt = String::from(
            "Answer the question using the passages below. Prefer the excerpts; \
             fall back to the full document, and only then to general knowledge, \
             flagging uncertainty when you do. Reply with a direct, plain \
             explanation and do not refer to the excerpts or the document.\n\n",
        );
        if !context.is_empty() {
            prompt.push_str("Relevant excerpts:\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
        if let Some(document) = document {
            prompt.push_str("Full document:\n");
            prompt.push_str(document);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Question: ");
        prompt.push_str(request.query);
        prompt
    }
}

/// Instantiate the synthesizer named by `generation.provider`.
pub fn create_synthesizer(
    generation: &GenerationConfig,
    retrieval: &RetrievalConfig,
) -> Result<Arc<dyn Synthesizer>> {
    let prompt = PromptBuilder::new(retrieval.max_context_chars, generation.max_document_chars);
    match generation.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveSynthesizer)),
        "openai" => Ok(Arc::new(OpenAIChat::new(generation, prompt)?)),
        "ollama" => Ok(Arc::new(OllamaGenerate::new(generation, prompt)?)),
        other => Err(RagError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

// ============ Extractive ============

/// Offline synthesizer: the answer is the retrieved context.
pub struct ExtractiveSynthesizer;

#[async_trait]
impl Synthesizer for ExtractiveSynthesizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String> {
        if request.context.trim().is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }
        Ok(request.context.to_string())
    }
}

// ============ OpenAI-compatible chat ============

/// Chat completions against any OpenAI-compatible endpoint (OpenAI, Groq,
/// SambaNova). The bearer token comes from `generation.api_key_env`
/// (default `OPENAI_API_KEY`).
pub struct OpenAIChat {
    model: String,
    endpoint: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    prompt: PromptBuilder,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &GenerationConfig, prompt: PromptBuilder) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::Config("generation.model required for openai provider".into()))?;
        let key_var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
        let api_key = remote::api_key_from_env(Some(key_var), key_var)
            .ok_or_else(|| RagError::Config(format!("{} environment variable not set", key_var)))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = remote::build_client(config.timeout_secs)
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model,
            endpoint: format!("{}/chat/completions", url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            prompt,
            client,
        })
    }
}

#[async_trait]
impl Synthesizer for OpenAIChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": self.prompt.build(request)}],
            "temperature": self.temperature,
        });

        let json = remote::send_json("chat completion", self.max_retries, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(|e| RagError::generation(e.to_string()))?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or_else(|| RagError::generation("response has no choices[0].message.content"))
    }
}

// ============ Ollama ============

/// Non-streaming `POST /api/generate` against an Ollama host.
pub struct OllamaGenerate {
    model: String,
    endpoint: String,
    temperature: f32,
    max_retries: u32,
    prompt: PromptBuilder,
    client: reqwest::Client,
}

impl OllamaGenerate {
    pub fn new(config: &GenerationConfig, prompt: PromptBuilder) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::Config("generation.model required for ollama provider".into()))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = remote::build_client(config.timeout_secs)
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model,
            endpoint: format!("{}/api/generate", url.trim_end_matches('/')),
            temperature: config.temperature,
            max_retries: config.max_retries,
            prompt,
            client,
        })
    }
}

#[async_trait]
impl Synthesizer for OllamaGenerate {
    fn name(&self) -> &str {
        &self.model
    }

    async fn answer(&self, request: AnswerRequest<'_>) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": self.prompt.build(request),
            "stream": false,
            "options": {"temperature": self.temperature},
        });

        let json = remote::send_json("ollama generate", self.max_retries, || {
            self.client.post(&self.endpoint).json(&body)
        })
        .await
        .map_err(|e| RagError::generation(e.to_string()))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|r| r.trim().to_string())
            .ok_or_else(|| RagError::generation("ollama response has no 'response' field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request<'a>(context: &'a str, document: Option<&'a str>) -> AnswerRequest<'a> {
        AnswerRequest {
            query: "what boils?",
            context,
            document,
        }
    }

    #[test]
    fn prompt_without_context_is_context_free() {
        let prompt = PromptBuilder::new(100, 100).build(request("", None));
        assert!(!prompt.contains("Relevant excerpts"));
        assert!(prompt.ends_with("Question: what boils?"));
    }

    #[test]
    fn prompt_truncates_context_and_document() {
        let prompt = PromptBuilder::new(5, 3).build(request("abcdefgh", Some("xyzw")));
        assert!(prompt.contains("Relevant excerpts:\nabcde\n"));
        assert!(prompt.contains("Full document:\nxyz\n"));
    }

    #[tokio::test]
    async fn extractive_returns_context_or_notice() {
        let s = ExtractiveSynthesizer;
        assert_eq!(s.answer(request("water boils.", None)).await.unwrap(), "water boils.");
        assert_eq!(s.answer(request("  ", None)).await.unwrap(), NO_CONTEXT_ANSWER);
    }

    #[tokio::test]
    async fn ollama_response_field_is_answer() {
        let router = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], false);
                Json(json!({"response": " water. "}))
            }),
        );
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("llama3.2".to_string()),
            url: Some(spawn(router).await),
            max_retries: 0,
            ..GenerationConfig::default()
        };
        let s = OllamaGenerate::new(&config, PromptBuilder::new(100, 100)).unwrap();
        assert_eq!(s.answer(request("water boils.", None)).await.unwrap(), "water.");
    }

    #[tokio::test]
    async fn remote_failure_is_generation_error() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::BAD_REQUEST, "model not found") }),
        );
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("missing".to_string()),
            url: Some(spawn(router).await),
            max_retries: 0,
            ..GenerationConfig::default()
        };
        let s = OllamaGenerate::new(&config, PromptBuilder::new(100, 100)).unwrap();
        let err = s.answer(request("", None)).await.unwrap_err();
        assert!(matches!(err, RagError::RemoteGeneration(_)));
    }
}
