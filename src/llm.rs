use crate::config::LlmConfig;
use crate::error::{Result, Text2SqlError};
use async_trait::async_trait;
use tracing::{info, warn};

/// Upstream text generation. The output is untrusted: it may be empty,
/// malformed, or hostile.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Run the generator and collapse any failure into an empty string, which
/// the pipeline later reports as `GenerationFailed`.
pub async fn generate_or_empty(generator: &dyn SqlGenerator, prompt: &str) -> String {
    match generator.generate(prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!("SQL generation via {} failed: {}", generator.name(), e);
            String::new()
        }
    }
}

/// Client for an OpenAI-compatible chat completions endpoint (Gemini's
/// compatibility endpoint by default).
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.api_key.clone(), config.model.clone(), config.base_url.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You translate questions into PostgreSQL SELECT statements. Return SQL only."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "max_tokens": 1024,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Text2SqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Text2SqlError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Text2SqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        info!("Requesting SQL from {}", self.model);
        self.call_llm(prompt).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Pull the first choice's message content out of a chat completions body.
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(Text2SqlError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Text2SqlError::Llm("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| Text2SqlError::Llm("Empty choices array in LLM response".to_string()))?;

    if let Some(finish_reason) = first.get("finish_reason").and_then(|r| r.as_str()) {
        if finish_reason == "length" {
            warn!("LLM response was truncated due to length limit");
        } else if finish_reason == "content_filter" {
            return Err(Text2SqlError::Llm("LLM response was filtered by content policy".to_string()));
        }
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| Text2SqlError::Llm("No content in LLM response".to_string()))?;

    Ok(content.to_string())
}

/// Canned generator for demos and for running without an API key.
#[derive(Debug, Clone, Default)]
pub struct MockSqlGenerator;

impl MockSqlGenerator {
    pub fn sql_for(question: &str) -> &'static str {
        let q = question.trim().to_lowercase();
        if q.contains("revenue") {
            "SELECT c.category_name, SUM(od.unit_price * od.quantity) AS total_revenue \
             FROM order_details od \
             JOIN products p ON od.product_id = p.product_id \
             JOIN categories c ON p.category_id = c.category_id \
             GROUP BY c.category_name;"
        } else if q.contains("customers") && q.contains("all") {
            "SELECT customer_id, company_name, contact_name FROM customers LIMIT 100;"
        } else if q.contains("orders") && q.contains("count") {
            "SELECT COUNT(*) AS orders_count FROM orders;"
        } else {
            "SELECT 1;"
        }
    }
}

#[async_trait]
impl SqlGenerator for MockSqlGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        // The question sits between the instruction header and the schema block.
        let question = prompt
            .split_once(crate::prompt::QUESTION_MARKER)
            .map(|(_, rest)| rest)
            .unwrap_or(prompt);
        let question = question
            .split_once(crate::prompt::SCHEMA_MARKER)
            .map(|(q, _)| q)
            .unwrap_or(question);
        Ok(Self::sql_for(question).to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
