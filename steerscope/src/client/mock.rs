//! Scripted in-memory API for tests

use super::{
    parse_steer_replies, ClientError, FeatureCandidate, Neuron, NeuronpediaApi, SteerReplies,
    SteerRequest, TokenExplanation,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A call the mock received
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Search(String),
    Explanations(String),
    Neuron(String, u64),
    Chat(SteerRequest),
}

type Queue<T> = Mutex<VecDeque<Result<T, ClientError>>>;

/// Returns queued responses in order and records every call
#[derive(Default)]
pub struct MockApi {
    search: Queue<Vec<FeatureCandidate>>,
    explanations: Queue<Vec<TokenExplanation>>,
    neurons: Queue<Option<Neuron>>,
    chats: Queue<SteerReplies>,
    calls: Mutex<Vec<Call>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(self, result: Result<Vec<FeatureCandidate>, ClientError>) -> Self {
        self.search.lock().unwrap().push_back(result);
        self
    }

    pub fn with_explanations(self, result: Result<Vec<TokenExplanation>, ClientError>) -> Self {
        self.explanations.lock().unwrap().push_back(result);
        self
    }

    pub fn with_neuron(self, result: Result<Option<Neuron>, ClientError>) -> Self {
        self.neurons.lock().unwrap().push_back(result);
        self
    }

    pub fn with_chat(self, result: Result<SteerReplies, ClientError>) -> Self {
        self.chats.lock().unwrap().push_back(result);
        self
    }

    /// Queue a raw steer-chat response body
    pub fn with_chat_json(self, body: serde_json::Value) -> Self {
        let result = parse_steer_replies(body);
        self.with_chat(result)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next<T>(queue: &Queue<T>) -> Result<T, ClientError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Network("no scripted response".to_string())))
    }
}

#[async_trait]
impl NeuronpediaApi for MockApi {
    async fn search_features(&self, query: &str) -> Result<Vec<FeatureCandidate>, ClientError> {
        self.record(Call::Search(query.to_string()));
        Self::next(&self.search)
    }

    async fn fetch_token_explanations(
        &self,
        token: &str,
    ) -> Result<Vec<TokenExplanation>, ClientError> {
        self.record(Call::Explanations(token.to_string()));
        Self::next(&self.explanations)
    }

    async fn fetch_neuron_details(
        &self,
        layer: &str,
        index: u64,
    ) -> Result<Option<Neuron>, ClientError> {
        self.record(Call::Neuron(layer.to_string(), index));
        Self::next(&self.neurons)
    }

    async fn send_steering_chat(&self, request: &SteerRequest) -> Result<SteerReplies, ClientError> {
        self.record(Call::Chat(request.clone()));
        Self::next(&self.chats)
    }
}
