//! Steering chat session
//!
//! Two transcripts grow in lockstep: each successful submission appends the
//! user turn and the model reply to both the default and the steered side.

use crate::client::{
    ChatMessage, ClientError, NeuronpediaApi, SteerFeature, SteerReplies, SteerRequest,
};
use crate::selection::FeatureSelectionStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from submitting a chat message
#[derive(Error, Debug)]
pub enum SteeringError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One turn of a transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Append-only conversation log
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
    }
}

/// Lowest temperature offered by the dashboard
pub const TEMPERATURE_MIN: f64 = -2.0;
/// Highest temperature offered by the dashboard
pub const TEMPERATURE_MAX: f64 = 2.0;

/// Generation settings read at submission time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringParams {
    pub temperature: f64,
    /// Token budget per reply
    pub n_tokens: u32,
    pub freq_penalty: i64,
    pub seed: i64,
    pub strength_multiplier: i64,
    pub steer_special_tokens: bool,
}

impl Default for SteeringParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            n_tokens: 48,
            freq_penalty: 2,
            seed: 16,
            strength_multiplier: 4,
            steer_special_tokens: true,
        }
    }
}

impl SteeringParams {
    /// Keep temperature inside the slider range
    pub fn clamped(mut self) -> Self {
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(TEMPERATURE_MIN, TEMPERATURE_MAX)
        } else {
            0.0
        };
        self
    }
}

/// Assemble a steer-chat request for one user message
///
/// Both message lists carry the same single user turn; steering comes from
/// `features` alone.
pub fn build_request(
    user_text: &str,
    model_id: &str,
    features: Vec<SteerFeature>,
    params: &SteeringParams,
) -> SteerRequest {
    SteerRequest {
        default_chat_messages: vec![ChatMessage::user(user_text)],
        steered_chat_messages: vec![ChatMessage::user(user_text)],
        model_id: model_id.to_string(),
        features,
        temperature: params.temperature,
        n_tokens: params.n_tokens,
        freq_penalty: params.freq_penalty,
        seed: params.seed,
        strength_multiplier: params.strength_multiplier,
        steer_special_tokens: params.steer_special_tokens,
    }
}

/// Default and steered transcripts for one session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SteeringSession {
    default: Transcript,
    steered: Transcript,
}

impl SteeringSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_transcript(&self) -> &Transcript {
        &self.default
    }

    pub fn steered_transcript(&self) -> &Transcript {
        &self.steered
    }

    /// Build the request for a message, rejecting empty input
    pub fn prepare(
        &self,
        user_text: &str,
        model_id: &str,
        store: &FeatureSelectionStore,
        params: &SteeringParams,
    ) -> Result<SteerRequest, SteeringError> {
        if user_text.trim().is_empty() {
            return Err(SteeringError::EmptyMessage);
        }
        Ok(build_request(
            user_text,
            model_id,
            store.steer_features(model_id),
            params,
        ))
    }

    /// Append one exchange to both transcripts
    pub fn record_exchange(&mut self, user_text: &str, replies: &SteerReplies) {
        self.default.push(Role::User, user_text);
        self.default.push(Role::Model, replies.default.as_str());
        self.steered.push(Role::User, user_text);
        self.steered.push(Role::Model, replies.steered.as_str());
        info!(turns = self.default.len(), "Recorded steering exchange");
    }

    /// Send a message and record the replies
    ///
    /// Nothing is appended when the call fails.
    pub async fn submit(
        &mut self,
        api: &dyn NeuronpediaApi,
        store: &FeatureSelectionStore,
        model_id: &str,
        params: &SteeringParams,
        user_text: &str,
    ) -> Result<SteerReplies, SteeringError> {
        let request = self.prepare(user_text, model_id, store, params)?;
        match api.send_steering_chat(&request).await {
            Ok(replies) => {
                self.record_exchange(user_text, &replies);
                Ok(replies)
            }
            Err(e) => {
                warn!(error = %e, "Steering chat failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{Call, MockApi};
    use crate::client::{FeatureCandidate, NO_RESPONSE};
    use serde_json::json;

    fn store_with_feature(strength: i64) -> FeatureSelectionStore {
        let mut store = FeatureSelectionStore::new();
        store.finish_search(vec![FeatureCandidate {
            description: "dogs".to_string(),
            layer: "20-gemmascope-res-16k".to_string(),
            index: 12082,
            strength,
        }]);
        store.select("dogs");
        store
    }

    #[tokio::test]
    async fn test_submit_records_both_sides() {
        let api = MockApi::new().with_chat_json(json!({
            "DEFAULT": {"chat_template": [{"role": "model", "content": "A"}]},
            "STEERED": {"chat_template": []}
        }));
        let store = FeatureSelectionStore::new();
        let mut session = SteeringSession::new();

        session
            .submit(&api, &store, "gemma-2-9b-it", &SteeringParams::default(), "hello")
            .await
            .unwrap();

        let default = session.default_transcript().turns();
        let steered = session.steered_transcript().turns();
        assert_eq!(default.len(), 2);
        assert_eq!(steered.len(), 2);
        assert_eq!(default[0], Turn { role: Role::User, content: "hello".to_string() });
        assert_eq!(default[1].content, "A");
        assert_eq!(steered[1].role, Role::Model);
        assert_eq!(steered[1].content, NO_RESPONSE);
    }

    #[tokio::test]
    async fn test_failed_submit_appends_nothing() {
        let api = MockApi::new()
            .with_chat(Err(ClientError::Network("HTTP 500".to_string())))
            .with_chat(Ok(SteerReplies {
                default: "d".to_string(),
                steered: "s".to_string(),
            }));
        let store = FeatureSelectionStore::new();
        let mut session = SteeringSession::new();
        let params = SteeringParams::default();

        assert!(session.submit(&api, &store, "m", &params, "again").await.is_err());
        assert!(session.default_transcript().is_empty());
        assert!(session.steered_transcript().is_empty());

        // Same input can be resubmitted as a new call
        session.submit(&api, &store, "m", &params, "again").await.unwrap();
        assert_eq!(session.steered_transcript().turns()[1].content, "s");
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_without_call() {
        let api = MockApi::new();
        let store = FeatureSelectionStore::new();
        let mut session = SteeringSession::new();

        let err = session
            .submit(&api, &store, "m", &SteeringParams::default(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, SteeringError::EmptyMessage));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_features_and_params() {
        let api = MockApi::new().with_chat(Ok(SteerReplies {
            default: "d".to_string(),
            steered: "s".to_string(),
        }));
        let store = store_with_feature(140);
        let mut session = SteeringSession::new();
        let params = SteeringParams {
            temperature: 0.5,
            seed: 99,
            ..SteeringParams::default()
        };

        session
            .submit(&api, &store, "gemma-2-9b-it", &params, "hi")
            .await
            .unwrap();

        let calls = api.calls();
        let Call::Chat(request) = &calls[0] else {
            panic!("expected a chat call");
        };
        assert_eq!(request.default_chat_messages, request.steered_chat_messages);
        assert_eq!(request.default_chat_messages, vec![ChatMessage::user("hi")]);
        assert_eq!(request.features.len(), 1);
        assert_eq!(request.features[0].index, 12082);
        assert_eq!(request.features[0].strength, 100);
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.seed, 99);
        assert_eq!(request.n_tokens, 48);
    }

    #[test]
    fn test_params_clamped() {
        let params = SteeringParams {
            temperature: 7.0,
            ..SteeringParams::default()
        }
        .clamped();
        assert_eq!(params.temperature, TEMPERATURE_MAX);

        let params = SteeringParams {
            temperature: f64::NAN,
            ..SteeringParams::default()
        }
        .clamped();
        assert_eq!(params.temperature, 0.0);
    }

    #[test]
    fn test_params_partial_json() {
        let params: SteeringParams = serde_json::from_value(json!({"seed": 3})).unwrap();
        assert_eq!(params.seed, 3);
        assert_eq!(params.strength_multiplier, 4);
        assert!(params.steer_special_tokens);
    }
}
