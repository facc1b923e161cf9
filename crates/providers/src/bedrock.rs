//! AWS Bedrock gateway adapter.
//!
//! Talks to the Bedrock runtime invoke endpoint over HTTP with a bearer
//! token from the environment, using the Anthropic message body format
//! (`anthropic_version: bedrock-2023-05-31`). Credential problems are
//! classified into [`Error::Auth`] with an actionable hint; everything
//! else propagates unchanged.

use serde_json::Value;

use rv_domain::config::BedrockConfig;
use rv_domain::error::{Error, Result};
use rv_domain::llm::{AgentMessage, AgentRunConfig, ToolDefinition};

use crate::anthropic::{messages_to_anthropic, parse_messages_response};
use crate::traits::{ChatBackend, ChatTurn};
use crate::util::from_reqwest;

pub struct BedrockBackend {
    region: String,
    default_model: String,
    token_env: String,
    client: reqwest::Client,
}

impl BedrockBackend {
    pub fn from_config(cfg: &BedrockConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            region: cfg.region.clone(),
            default_model: cfg.model.clone(),
            token_env: cfg.token_env.clone(),
            client,
        })
    }

    fn bearer_token(&self) -> Result<String> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::Auth {
                message: "AWS credentials not found".into(),
                hint: "Configure AWS credentials with 'aws configure' or 'aws sso login'".into(),
            }),
        }
    }

    fn invoke_url(&self, model: &str) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke",
            self.region, model
        )
    }

    fn build_body(
        &self,
        messages: &[AgentMessage],
        config: &AgentRunConfig,
        tools: &[ToolDefinition],
    ) -> Value {
        let mut body = serde_json::json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": config.max_tokens,
            "messages": messages_to_anthropic(messages),
        });
        if !config.system_prompt.is_empty() {
            body["system"] = Value::String(config.system_prompt.clone());
        }
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = config.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

/// Classify a Bedrock error body into the domain error taxonomy.
///
/// Expired or missing credential responses become [`Error::Auth`] with
/// the command that fixes them; anything else is a provider error.
pub(crate) fn classify_bedrock_error(status: u16, body: &str) -> Error {
    if body.contains("Token has expired") {
        return Error::Auth {
            message: "AWS SSO token has expired".into(),
            hint: "Run 'aws sso login' to refresh your credentials".into(),
        };
    }
    if body.contains("ExpiredTokenException") {
        return Error::Auth {
            message: "AWS session token has expired".into(),
            hint: "Run 'aws sso login' or refresh your session credentials".into(),
        };
    }
    if body.contains("Unable to locate credentials") || body.contains("UnrecognizedClientException")
    {
        return Error::Auth {
            message: "AWS credentials not found".into(),
            hint: "Configure AWS credentials with 'aws configure' or 'aws sso login'".into(),
        };
    }
    Error::Provider {
        provider: "bedrock".into(),
        message: format!("HTTP {status} - {body}"),
    }
}

#[async_trait::async_trait]
impl ChatBackend for BedrockBackend {
    async fn complete(
        &self,
        messages: &[AgentMessage],
        config: &AgentRunConfig,
        tools: &[ToolDefinition],
    ) -> Result<ChatTurn> {
        let token = self.bearer_token()?;
        let model = config.model.as_deref().unwrap_or(&self.default_model);
        let url = self.invoke_url(model);
        let body = self.build_body(messages, config, tools);

        tracing::debug!(url = %url, model = %model, "bedrock invoke request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(classify_bedrock_error(status.as_u16(), &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        Ok(parse_messages_response(&resp_json))
    }

    fn provider_id(&self) -> &str {
        "bedrock"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_sso_token_maps_to_auth_with_hint() {
        let err = classify_bedrock_error(403, r#"{"message": "Token has expired"}"#);
        assert!(err.is_auth());
        let text = err.display_with_hint();
        assert!(text.contains("expired"));
        assert!(text.contains("aws sso login"));
    }

    #[test]
    fn expired_session_token_maps_to_auth() {
        let err = classify_bedrock_error(400, "ExpiredTokenException: nope");
        assert!(err.is_auth());
    }

    #[test]
    fn missing_credentials_map_to_auth() {
        let err = classify_bedrock_error(403, "Unable to locate credentials");
        assert!(err.is_auth());
        assert!(err.display_with_hint().contains("aws configure"));
    }

    #[test]
    fn other_errors_stay_provider_errors() {
        let err = classify_bedrock_error(500, "internal failure");
        assert!(!err.is_auth());
        assert!(err.to_string().contains("bedrock"));
    }

    #[test]
    fn missing_token_env_is_auth_error() {
        let backend = BedrockBackend::from_config(&BedrockConfig {
            region: "us-east-1".into(),
            model: "m".into(),
            token_env: "RV_TEST_UNSET_BEDROCK_TOKEN".into(),
        })
        .unwrap();
        let err = backend.bearer_token().unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn invoke_url_embeds_region_and_model() {
        let backend = BedrockBackend::from_config(&BedrockConfig::default()).unwrap();
        let url = backend.invoke_url("us.anthropic.claude-sonnet-4-5-20250929-v1:0");
        assert!(url.starts_with("https://bedrock-runtime.us-east-1.amazonaws.com/model/"));
        assert!(url.ends_with("/invoke"));
    }
}
