//! Neuronpedia HTTP client
//!
//! All four endpoints take a JSON POST body and authenticate with `X-Api-Key`.
//! Response bodies are decoded into private wire structs and then converted
//! into the public types; any shape mismatch becomes `ClientError::Parse`.

use super::{
    de_index, validate_query, ClientError, FeatureCandidate, Neuron,
    NeuronpediaApi, SteerReplies, SteerRequest, TokenExplanation, DEFAULT_STRENGTH,
    NO_DESCRIPTION, NO_RESPONSE,
};
use crate::ScopeConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SEARCH_MODEL_PATH: &str = "/api/explanation/search-model";
const SEARCH_ALL_PATH: &str = "/api/search-all";
const NEURON_PATH: &str = "/api/neuron";
const STEER_CHAT_PATH: &str = "/api/steer-chat";

/// Client for the public Neuronpedia API
pub struct NeuronpediaClient {
    client: Client,
    base_url: String,
    api_key: String,
    /// Model searched by the steer dashboard
    steer_model: String,
    microscope_model: String,
    source_set: String,
    selected_layers: Vec<String>,
    num_results: u32,
}

impl NeuronpediaClient {
    /// Create a client from configuration
    pub fn new(config: &ScopeConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            steer_model: config.steer.model_id.clone(),
            microscope_model: config.microscope.model_id.clone(),
            source_set: config.microscope.source_set.clone(),
            selected_layers: config.microscope.selected_layers.clone(),
            num_results: config.microscope.num_results,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and decode the JSON response
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(path, %status, "Neuronpedia request failed");
            return Err(ClientError::Network(format!("HTTP {}: {}", status, body)));
        }

        let bytes = response.bytes().await?;
        debug!(
            path,
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Neuronpedia response received"
        );

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureSearchRequest<'a> {
    model_id: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct FeatureSearchResponse {
    #[serde(default)]
    results: Vec<FeatureSearchResult>,
}

#[derive(Deserialize)]
struct FeatureSearchResult {
    description: String,
    layer: String,
    #[serde(deserialize_with = "de_index")]
    index: u64,
    #[serde(default)]
    strength: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchAllRequest<'a> {
    model_id: &'a str,
    source_set: &'a str,
    text: &'a str,
    selected_layers: &'a [String],
    sort_indexes: [u32; 1],
    ignore_bos: bool,
    density_threshold: i32,
    num_results: u32,
}

#[derive(Deserialize)]
struct SearchAllResponse {
    #[serde(default)]
    result: Vec<SearchAllResult>,
}

#[derive(Deserialize)]
struct SearchAllResult {
    #[serde(default)]
    neuron: Option<Value>,
}

#[derive(Deserialize)]
struct ExplanationEntry {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NeuronRequest<'a> {
    model_id: &'a str,
    layer: &'a str,
    index: u64,
}

#[derive(Deserialize)]
struct SteerChatResponse {
    #[serde(rename = "DEFAULT", default)]
    default: Option<ChatSection>,
    #[serde(rename = "STEERED", default)]
    steered: Option<ChatSection>,
}

/// Entries stay raw: only the last one is read, and only after its role
#[derive(Deserialize)]
struct ChatSection {
    #[serde(default)]
    chat_template: Vec<Value>,
}

/// Convert a feature search response into candidates
pub fn parse_feature_search(value: Value) -> Result<Vec<FeatureCandidate>, ClientError> {
    let response: FeatureSearchResponse = serde_json::from_value(value)?;
    Ok(response
        .results
        .into_iter()
        .map(|r| FeatureCandidate {
            description: r.description,
            layer: r.layer,
            index: r.index,
            strength: r.strength.unwrap_or(DEFAULT_STRENGTH),
        })
        .collect())
}

/// Flatten a search-all response into one record per explanation
pub fn parse_token_explanations(value: Value) -> Result<Vec<TokenExplanation>, ClientError> {
    let response: SearchAllResponse = serde_json::from_value(value)?;
    let mut explanations = Vec::new();

    for result in response.result {
        let neuron_value = match result.neuron {
            Some(v) if !is_empty_json(&v) => v,
            _ => continue,
        };

        // Non-list explanations are skipped, not rejected
        let entries: Vec<Value> = match neuron_value.get("explanations") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let neuron = Arc::new(serde_json::from_value::<Neuron>(neuron_value)?);

        for entry in entries {
            let entry: ExplanationEntry = serde_json::from_value(entry)?;
            explanations.push(TokenExplanation {
                description: entry
                    .description
                    .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                neuron: Arc::clone(&neuron),
            });
        }
    }

    Ok(explanations)
}

/// Decode a neuron response; empty bodies mean the neuron was not found
pub fn parse_neuron_details(value: Value) -> Result<Option<Neuron>, ClientError> {
    if is_empty_json(&value) {
        return Ok(None);
    }
    if !value.is_object() {
        return Err(ClientError::Parse(format!(
            "expected a neuron object, got {}",
            json_kind(&value)
        )));
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Pull the latest model reply out of each chat section
pub fn parse_steer_replies(value: Value) -> Result<SteerReplies, ClientError> {
    let response: SteerChatResponse = serde_json::from_value(value)?;
    Ok(SteerReplies {
        default: last_model_reply(response.default)?,
        steered: last_model_reply(response.steered)?,
    })
}

fn last_model_reply(section: Option<ChatSection>) -> Result<String, ClientError> {
    let Some(last) = section.and_then(|s| s.chat_template.into_iter().last()) else {
        return Ok(NO_RESPONSE.to_string());
    };
    if last.get("role").and_then(Value::as_str) != Some("model") {
        return Ok(NO_RESPONSE.to_string());
    }
    match last.get("content") {
        Some(Value::String(content)) => Ok(content.clone()),
        other => Err(ClientError::Parse(format!(
            "model reply content must be a string, got {}",
            other.map(json_kind).unwrap_or("nothing")
        ))),
    }
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl NeuronpediaApi for NeuronpediaClient {
    async fn search_features(&self, query: &str) -> Result<Vec<FeatureCandidate>, ClientError> {
        validate_query(query)?;
        info!(query, model = %self.steer_model, "Searching features");

        let request = FeatureSearchRequest {
            model_id: &self.steer_model,
            query,
        };
        let value = self.post(SEARCH_MODEL_PATH, &request).await?;
        parse_feature_search(value)
    }

    async fn fetch_token_explanations(
        &self,
        token: &str,
    ) -> Result<Vec<TokenExplanation>, ClientError> {
        info!(token, source_set = %self.source_set, "Fetching token explanations");

        let request = SearchAllRequest {
            model_id: &self.microscope_model,
            source_set: &self.source_set,
            text: token,
            selected_layers: &self.selected_layers,
            sort_indexes: [1],
            ignore_bos: false,
            density_threshold: -1,
            num_results: self.num_results,
        };
        let value = self.post(SEARCH_ALL_PATH, &request).await?;
        parse_token_explanations(value)
    }

    async fn fetch_neuron_details(
        &self,
        layer: &str,
        index: u64,
    ) -> Result<Option<Neuron>, ClientError> {
        info!(layer, index, "Fetching neuron details");

        let request = NeuronRequest {
            model_id: &self.microscope_model,
            layer,
            index,
        };
        let value = self.post(NEURON_PATH, &request).await?;
        parse_neuron_details(value)
    }

    async fn send_steering_chat(&self, request: &SteerRequest) -> Result<SteerReplies, ClientError> {
        info!(
            model = %request.model_id,
            features = request.features.len(),
            "Sending steering chat"
        );
        let value = self.post(STEER_CHAT_PATH, request).await?;
        parse_steer_replies(value)
    }
}
