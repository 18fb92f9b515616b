use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;

/// The shape the completion service is asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    /// Any JSON object.
    JsonObject,
    /// A JSON document matching the given schema.
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

/// A single structured-output completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub format: OutputFormat,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Creates a JSON-object request with the low temperature used for
    /// classification-style prompts.
    pub fn json(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_text: user_text.into(),
            format: OutputFormat::JsonObject,
            max_tokens: 150,
            temperature: 0.1,
        }
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.format = OutputFormat::JsonSchema {
            name: name.into(),
            schema,
        };
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text-completion service returning the raw text of the first choice.
///
/// Implementations are treated as unreliable; callers decide how to degrade.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let response_format = match request.format {
            OutputFormat::JsonObject => ResponseFormat::JsonObject,
            OutputFormat::JsonSchema { name, schema } => ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name,
                    schema: Some(schema),
                    strict: Some(false),
                },
            },
        };

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system_prompt)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.user_text)
                    .build()?
                    .into(),
            ])
            .response_format(response_format)
            .max_completion_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()?;

        let response: CreateChatCompletionResponse =
            self.client.chat().create(chat_request).await?;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_request_defaults() {
        let request = CompletionRequest::json("system", "turn on the lights");
        assert_eq!(request.format, OutputFormat::JsonObject);
        assert_eq!(request.max_tokens, 150);
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_schema_request() {
        let request = CompletionRequest::json("system", "teal")
            .with_schema("hsv_color", serde_json::json!({"type": "object"}))
            .with_max_tokens(100);
        assert_eq!(request.max_tokens, 100);
        match request.format {
            OutputFormat::JsonSchema { name, .. } => assert_eq!(name, "hsv_color"),
            other => panic!("unexpected format {:?}", other),
        }
    }
}
