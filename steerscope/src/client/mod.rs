//! Neuronpedia API abstraction and types

mod neuronpedia;
#[cfg(test)]
pub(crate) mod mock;

pub use neuronpedia::{
    parse_feature_search, parse_neuron_details, parse_steer_replies, parse_token_explanations,
    NeuronpediaClient,
};

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Strength given to search results that do not carry one
pub const DEFAULT_STRENGTH: i64 = 40;

/// Shortest feature search query sent to the API
pub const MIN_QUERY_LEN: usize = 3;

/// Description used for explanations without one
pub const NO_DESCRIPTION: &str = "No description available";

/// Reply used when a chat section has no trailing model message
pub const NO_RESPONSE: &str = "No response";

/// Errors that can occur when talking to Neuronpedia
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse API response: {0}")]
    Parse(String),

    #[error("Query must be at least {min} characters long.")]
    QueryTooShort { min: usize },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Parse(e.to_string())
    }
}

/// Reject feature search queries that are too short to send
pub fn validate_query(query: &str) -> Result<(), ClientError> {
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(ClientError::QueryTooShort { min: MIN_QUERY_LEN });
    }
    Ok(())
}

/// A feature returned by a search, not yet selected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCandidate {
    pub description: String,
    pub layer: String,
    pub index: u64,
    pub strength: i64,
}

/// One explanation description paired with the neuron it belongs to
#[derive(Debug, Clone)]
pub struct TokenExplanation {
    pub description: String,
    /// Shared by every explanation of the same neuron
    pub neuron: Arc<Neuron>,
}

/// Neuron detail as returned by the search-all and neuron endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neuron {
    #[serde(rename = "modelId", deserialize_with = "nullable")]
    pub model_id: Option<String>,

    #[serde(deserialize_with = "nullable")]
    pub layer: Option<String>,

    #[serde(deserialize_with = "de_opt_index")]
    pub index: Option<u64>,

    /// Words most suppressed by the feature
    #[serde(deserialize_with = "nullable")]
    pub neg_str: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub neg_values: Vec<f64>,

    /// Words most promoted by the feature
    #[serde(deserialize_with = "nullable")]
    pub pos_str: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub pos_values: Vec<f64>,

    #[serde(deserialize_with = "nullable")]
    pub freq_hist_data_bar_values: Vec<f64>,
    #[serde(deserialize_with = "nullable")]
    pub freq_hist_data_bar_heights: Vec<f64>,

    #[serde(deserialize_with = "nullable")]
    pub logits_hist_data_bar_values: Vec<f64>,
    #[serde(deserialize_with = "nullable")]
    pub logits_hist_data_bar_heights: Vec<f64>,

    #[serde(deserialize_with = "nullable")]
    pub activations: Vec<Activation>,
}

/// A recorded firing of a feature over a token sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activation {
    #[serde(deserialize_with = "nullable")]
    pub tokens: Rows<String>,
    #[serde(deserialize_with = "nullable")]
    pub values: Rows<f64>,
}

/// A sequence the API sends either flat or as a sequence of sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rows<T> {
    Nested(Vec<Vec<T>>),
    Flat(Vec<T>),
}

impl<T> Default for Rows<T> {
    fn default() -> Self {
        Rows::Flat(Vec::new())
    }
}

impl<T> Rows<T> {
    /// Normalize to a sequence of sequences; a flat sequence becomes one row
    pub fn into_nested(self) -> Vec<Vec<T>> {
        match self {
            Rows::Nested(rows) => rows,
            Rows::Flat(row) if row.is_empty() => Vec::new(),
            Rows::Flat(row) => vec![row],
        }
    }

    /// Concatenate all rows
    pub fn into_flat(self) -> Vec<T> {
        self.into_nested().into_iter().flatten().collect()
    }
}

/// A steering feature as sent to the steer-chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SteerFeature {
    pub model_id: String,
    pub layer: String,
    pub index: u64,
    pub strength: i64,
}

/// A chat message in steer-chat requests and responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Steer-chat request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SteerRequest {
    #[serde(rename = "defaultChatMessages")]
    pub default_chat_messages: Vec<ChatMessage>,
    #[serde(rename = "steeredChatMessages")]
    pub steered_chat_messages: Vec<ChatMessage>,
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub features: Vec<SteerFeature>,
    pub temperature: f64,
    pub n_tokens: u32,
    pub freq_penalty: i64,
    pub seed: i64,
    pub strength_multiplier: i64,
    pub steer_special_tokens: bool,
}

/// Latest model reply from each side of a steer-chat call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteerReplies {
    pub default: String,
    pub steered: String,
}

/// Operations the dashboards need from Neuronpedia
#[async_trait]
pub trait NeuronpediaApi: Send + Sync {
    /// Search feature explanations by free text
    async fn search_features(&self, query: &str) -> Result<Vec<FeatureCandidate>, ClientError>;

    /// Find explanations of features that fire on a token
    async fn fetch_token_explanations(
        &self,
        token: &str,
    ) -> Result<Vec<TokenExplanation>, ClientError>;

    /// Look up one neuron; `None` when the API has nothing for it
    async fn fetch_neuron_details(
        &self,
        layer: &str,
        index: u64,
    ) -> Result<Option<Neuron>, ClientError>;

    /// Run the default and steered chats for one user turn
    async fn send_steering_chat(&self, request: &SteerRequest) -> Result<SteerReplies, ClientError>;
}

/// Treat `null` as the type's default
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIndex {
    Number(u64),
    Text(String),
}

impl RawIndex {
    fn into_index<E: de::Error>(self) -> Result<u64, E> {
        match self {
            RawIndex::Number(n) => Ok(n),
            RawIndex::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid feature index {:?}", s))),
        }
    }
}

/// Feature indexes arrive as integers or numeric strings
pub(crate) fn de_index<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    RawIndex::deserialize(deserializer)?.into_index()
}

fn de_opt_index<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawIndex>::deserialize(deserializer)?
        .map(|raw| raw.into_index::<D::Error>())
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_query() {
        assert!(matches!(
            validate_query("ab"),
            Err(ClientError::QueryTooShort { min: 3 })
        ));
        assert!(validate_query("abc").is_ok());
        // Counted in characters, not bytes
        assert!(validate_query("éé").is_err());
    }

    #[test]
    fn test_neuron_accepts_string_index_and_nulls() {
        let neuron: Neuron = serde_json::from_value(json!({
            "layer": "6-res-jb",
            "index": "1234",
            "neg_str": null,
            "pos_str": ["dog"],
            "pos_values": [0.5],
            "explanations": "ignored"
        }))
        .unwrap();
        assert_eq!(neuron.layer.as_deref(), Some("6-res-jb"));
        assert_eq!(neuron.index, Some(1234));
        assert!(neuron.neg_str.is_empty());
        assert_eq!(neuron.pos_str, vec!["dog"]);
        assert!(neuron.activations.is_empty());
    }

    #[test]
    fn test_neuron_rejects_bad_index() {
        let result = serde_json::from_value::<Neuron>(json!({"index": "twelve"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_rows_flat_and_nested() {
        let flat: Rows<String> = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(flat.into_nested(), vec![vec!["a".to_string(), "b".to_string()]]);

        let nested: Rows<f64> = serde_json::from_value(json!([[1.0], [2.0, 3.0]])).unwrap();
        assert_eq!(nested.into_flat(), vec![1.0, 2.0, 3.0]);

        let empty: Rows<f64> = serde_json::from_value(json!([])).unwrap();
        assert!(empty.into_flat().is_empty());
    }

    #[test]
    fn test_steer_request_wire_names() {
        let request = SteerRequest {
            default_chat_messages: vec![ChatMessage::user("hi")],
            steered_chat_messages: vec![ChatMessage::user("hi")],
            model_id: "gemma-2-9b-it".to_string(),
            features: vec![SteerFeature {
                model_id: "gemma-2-9b-it".to_string(),
                layer: "20-gemmascope-res-16k".to_string(),
                index: 7,
                strength: 40,
            }],
            temperature: 0.0,
            n_tokens: 48,
            freq_penalty: 2,
            seed: 16,
            strength_multiplier: 4,
            steer_special_tokens: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["defaultChatMessages"][0]["role"], "user");
        assert_eq!(value["steeredChatMessages"][0]["content"], "hi");
        assert_eq!(value["modelId"], "gemma-2-9b-it");
        assert_eq!(value["features"][0]["modelId"], "gemma-2-9b-it");
        assert_eq!(value["features"][0]["index"], 7);
        assert_eq!(value["n_tokens"], 48);
        assert_eq!(value["strength_multiplier"], 4);
        assert_eq!(value["steer_special_tokens"], true);
    }
}
