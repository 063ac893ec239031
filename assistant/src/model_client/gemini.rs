//! Google Gemini `generateContent` client with function calling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{GenerateRequest, ModelClient, ModelError};
use crate::protocol::{Part, Role, ToolDeclaration, Turn};
use crate::settings::ModelSettings;

pub use crate::settings::DEFAULT_GEMINI_BASE_URL;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
    #[serde(default)]
    total_token_count: Option<u32>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &ModelSettings) -> Result<Self, ModelError> {
        let api_key = settings
            .api_key()
            .ok_or_else(|| ModelError::MissingApiKey(settings.api_key_env.clone()))?;
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            api_key,
            settings.request_timeout(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Build the `generateContent` body. System turns become `systemInstruction`.
pub fn build_request_body(request: &GenerateRequest<'_>) -> Value {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();

    for turn in request.turns {
        match turn.role {
            Role::System => system_texts.push(turn.text()),
            Role::User | Role::Model => {
                let role = if turn.role == Role::Model { "model" } else { "user" };
                let parts: Vec<Value> = turn.parts.iter().map(part_to_json).collect();
                contents.push(json!({"role": role, "parts": parts}));
            }
        }
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {"temperature": request.temperature},
    });

    if !system_texts.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system_texts.join("\n\n")}]});
    }

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request.tools.iter().map(declaration_to_json).collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }

    body
}

fn part_to_json(part: &Part) -> Value {
    match part {
        Part::Text { text } => json!({"text": text}),
        Part::FunctionCall { name, args } => json!({"functionCall": {"name": name, "args": args}}),
        Part::FunctionResponse { name, response } => {
            json!({"functionResponse": {"name": name, "response": response}})
        }
    }
}

/// Gemini refuses OBJECT schemas with no properties, so argument-less tools omit `parameters`.
fn declaration_to_json(declaration: &ToolDeclaration) -> Value {
    let has_properties = declaration
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .map_or(false, |props| !props.is_empty());

    let mut value = json!({
        "name": declaration.name,
        "description": declaration.description,
    });
    if has_properties {
        value["parameters"] = declaration.parameters.clone();
    }
    value
}

/// Convert a raw response body into a model turn.
pub fn parse_response(body: &str) -> Result<Turn, ModelError> {
    let response: GeminiResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Decode(e.to_string()))?;

    if let Some(usage) = &response.usage_metadata {
        tracing::debug!(
            prompt_tokens = ?usage.prompt_token_count,
            response_tokens = ?usage.candidates_token_count,
            total_tokens = ?usage.total_token_count,
            "gemini usage"
        );
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ModelError::EmptyResponse)?;

    let parts: Vec<Part> = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| {
            if let Some(call) = part.function_call {
                Some(Part::FunctionCall {
                    name: call.name,
                    args: call.args.unwrap_or_default(),
                })
            } else {
                part.text.map(|text| Part::Text { text })
            }
        })
        .collect();

    if parts.is_empty() {
        tracing::warn!(finish_reason = ?candidate.finish_reason, "gemini candidate has no usable parts");
        return Err(ModelError::EmptyResponse);
    }

    Ok(Turn::new(Role::Model, parts))
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Turn, ModelError> {
        let body = build_request_body(&request);
        tracing::debug!(
            model = %self.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "sending gemini request"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = %status, "gemini API error");
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        parse_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolOutcome;

    #[test]
    fn test_request_body_layout() {
        let mut args = Map::new();
        args.insert("query".into(), json!("SELECT 1"));
        let turns = vec![
            Turn::system("be precise"),
            Turn::user("hello"),
            Turn::model_call("execute_sql_query", args),
            Turn::function_response("execute_sql_query", &ToolOutcome::success("[]")),
        ];
        let tools = vec![
            ToolDeclaration::new("execute_sql_query", "run sql").with_string_param("query", "sql", true),
            ToolDeclaration::new("get_time_info", "time"),
        ];
        let body = build_request_body(&GenerateRequest {
            turns: &turns,
            tools: &tools,
            temperature: 0.3,
        });

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be precise");
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["args"]["query"],
            "SELECT 1"
        );
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["success"],
            true
        );
        let declarations = &body["tools"][0]["functionDeclarations"];
        assert_eq!(declarations[0]["parameters"]["required"][0], "query");
        assert!(declarations[1].get("parameters").is_none());
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
    }

    #[test]
    fn test_parse_function_call_response() {
        let body = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "execute_sql_query", "args": {"query": "SELECT 1"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 42}
        })
        .to_string();
        let turn = parse_response(&body).unwrap();
        let (name, args) = turn.first_function_call().unwrap();
        assert_eq!(name, "execute_sql_query");
        assert_eq!(args["query"], "SELECT 1");
    }

    #[test]
    fn test_parse_text_and_empty_responses() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "Hi "}, {"text": "there"}]}}]});
        assert_eq!(parse_response(&body.to_string()).unwrap().text(), "Hi there");

        assert!(matches!(
            parse_response(r#"{"candidates": []}"#),
            Err(ModelError::EmptyResponse)
        ));
        assert!(matches!(parse_response("not json"), Err(ModelError::Decode(_))));
    }
}
