//! Answer generation via a hosted chat-completion endpoint.
//!
//! [`OpenAiGenerator`] sends one `POST {base_url}/chat/completions` per
//! question. The model is asked for a JSON object
//!
//! ```json
//! { "answer": "markdown", "quick_replies": ["..."], "progress": 40 }
//! ```
//!
//! and [`parse_completion`] tolerates anything else by treating the raw
//! content as the answer. Failures are not retried.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::classify::PromptType;
use crate::config::LlmConfig;
use crate::models::GeneratedAnswer;
use crate::traits::{AnswerGenerator, AnswerRequest};

const DEFAULT_SYSTEM_PROMPT: &str = "Você é o assistente do professor de um curso para \
profissionais de saúde e estética. Responda em português, de forma clara e didática, \
usando apenas o conteúdo das aulas quando ele for fornecido. Se o contexto não cobrir \
a pergunta, diga o que sabe de forma geral e sugira ao aluno rever a aula relacionada. \
Não dê conselhos sobre redes sociais ou produção de vídeo.";

const RESPONSE_FORMAT: &str = "Responda SEMPRE com um único objeto JSON com as chaves \
\"answer\" (resposta em markdown), \"quick_replies\" (até 4 sugestões curtas de próxima \
pergunta) e \"progress\" (inteiro de 0 a 100 indicando o avanço do aluno no tema atual).";

const FIRST_QUESTION_NOTE: &str = "Esta é a primeira pergunta do aluno nesta conversa: \
cumprimente brevemente antes de responder.";

const MAX_QUICK_REPLIES: usize = 4;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            config: config.clone(),
        })
    }

    fn request_body(&self, request: &AnswerRequest<'_>) -> Value {
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let mut body = json!({
            "model": self.config.model,
            "messages": build_messages(system_prompt, self.config.max_history_turns, request),
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, request: AnswerRequest<'_>) -> Result<GeneratedAnswer> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat completion error {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))?;

        tracing::debug!(
            model = %self.config.model,
            prompt_type = %request.prompt_type,
            "chat completion received"
        );

        Ok(parse_completion(content, request.prompt_type))
    }
}

/// Assemble the chat messages: system persona, replayed history, then the
/// context-augmented question.
pub fn build_messages(
    system_prompt: &str,
    max_history_turns: usize,
    request: &AnswerRequest<'_>,
) -> Vec<Value> {
    let mut system = format!("{}\n\n{}", system_prompt, RESPONSE_FORMAT);
    if request.is_first_question {
        system.push_str("\n\n");
        system.push_str(FIRST_QUESTION_NOTE);
    }

    let mut messages = vec![json!({ "role": "system", "content": system })];

    let skip = request.history.len().saturating_sub(max_history_turns);
    for turn in request.history.iter().skip(skip) {
        messages.push(json!({ "role": "user", "content": turn.question }));
        messages.push(json!({ "role": "assistant", "content": turn.answer }));
    }

    let context = if request.context.trim().is_empty() {
        "(nenhum trecho relevante das aulas foi encontrado)"
    } else {
        request.context
    };

    messages.push(json!({
        "role": "user",
        "content": format!(
            "Trechos das aulas:\n{}\n\nCategoria da pergunta: {}\n\nPergunta do aluno: {}",
            context, request.prompt_type, request.question
        ),
    }));

    messages
}

#[derive(Deserialize)]
struct CompletionPayload {
    answer: String,
    // Loosely typed: models send null, non-string items or quoted numbers
    #[serde(default)]
    quick_replies: Option<Value>,
    #[serde(default)]
    progress: Option<Value>,
}

fn quick_replies_from(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(MAX_QUICK_REPLIES)
            .collect(),
        _ => Vec::new(),
    }
}

fn progress_from(value: Option<Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|p| p.is_finite())
        .map(|p| p.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

/// Turn raw completion content into a [`GeneratedAnswer`].
///
/// Non-JSON content becomes the answer verbatim with the category's default
/// quick replies and zero progress.
pub fn parse_completion(content: &str, prompt_type: PromptType) -> GeneratedAnswer {
    let trimmed = strip_code_fence(content.trim());

    match serde_json::from_str::<CompletionPayload>(trimmed) {
        Ok(payload) if !payload.answer.trim().is_empty() => {
            let mut quick_replies = quick_replies_from(payload.quick_replies);
            if quick_replies.is_empty() {
                quick_replies = prompt_type.default_quick_replies();
            }

            GeneratedAnswer {
                markdown: payload.answer,
                quick_replies,
                progress: progress_from(payload.progress),
            }
        }
        _ => {
            tracing::warn!("chat completion was not the expected JSON object");
            GeneratedAnswer {
                markdown: content.trim().to_string(),
                quick_replies: prompt_type.default_quick_replies(),
                progress: 0,
            }
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    text.strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text)
}
