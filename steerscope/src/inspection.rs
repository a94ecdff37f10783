//! Token inspection session for the microscope
//!
//! Only one token is in focus at a time. Selecting a token replaces the
//! fetched explanations, and inspecting a description replaces the neuron
//! view. Failed calls leave the session exactly as it was.

use crate::activation::{highlight_all, ActivationRow};
use crate::client::{ClientError, Neuron, NeuronpediaApi, TokenExplanation, NO_DESCRIPTION};
use crate::tokenizer::{tokenize_positions, Token};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from selecting tokens or inspecting explanations
#[derive(Error, Debug)]
pub enum InspectionError {
    #[error("No token at position {0}")]
    UnknownToken(usize),

    #[error("No explanation with description {0:?}")]
    UnknownDescription(String),

    #[error("Explanations without a description cannot be inspected")]
    NoDescription,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Result of fetching explanations for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplanationsOutcome {
    Found(usize),
    NoExplanations,
}

/// Which neuron an inspection will look up
#[derive(Debug, Clone)]
pub struct InspectTarget {
    pub description: String,
    pub layer: String,
    pub index: u64,
    pub neuron: Arc<Neuron>,
}

/// Everything shown for the inspected explanation
#[derive(Debug, Clone)]
pub struct NeuronInspection {
    pub description: String,
    pub layer: String,
    pub index: u64,
    /// Neuron as returned with the explanation (logits, histograms)
    pub neuron: Arc<Neuron>,
    /// `false` when the neuron endpoint had nothing
    pub found: bool,
    pub rows: Vec<ActivationRow>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenInspectionSession {
    sentence: String,
    tokens: Vec<Token>,
    selected: Option<String>,
    explanations: Vec<TokenExplanation>,
    inspection: Option<NeuronInspection>,
}

impl TokenInspectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn selected_token(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn explanations(&self) -> &[TokenExplanation] {
        &self.explanations
    }

    pub fn inspection(&self) -> Option<&NeuronInspection> {
        self.inspection.as_ref()
    }

    /// Explanation descriptions in API order
    pub fn descriptions(&self) -> Vec<&str> {
        self.explanations
            .iter()
            .map(|e| e.description.as_str())
            .collect()
    }

    /// Tokenize a new sentence and drop everything derived from the old one
    pub fn set_sentence(&mut self, text: &str) -> &[Token] {
        self.sentence = text.to_string();
        self.tokens = tokenize_positions(text);
        self.selected = None;
        self.explanations.clear();
        self.inspection = None;
        info!(tokens = self.tokens.len(), "Sentence tokenized");
        &self.tokens
    }

    /// Token text at a position of the current sentence
    pub fn token_at(&self, position: usize) -> Result<&str, InspectionError> {
        self.tokens
            .get(position)
            .map(|t| t.text.as_str())
            .ok_or(InspectionError::UnknownToken(position))
    }

    /// Focus a token with freshly fetched explanations
    pub fn finish_select_token(
        &mut self,
        token: &str,
        explanations: Vec<TokenExplanation>,
    ) -> ExplanationsOutcome {
        self.selected = Some(token.to_string());
        self.explanations = explanations;
        self.inspection = None;

        if self.explanations.is_empty() {
            warn!(token, "No explanations found for token");
            ExplanationsOutcome::NoExplanations
        } else {
            ExplanationsOutcome::Found(self.explanations.len())
        }
    }

    /// Fetch explanations for a token and focus it
    pub async fn select_token(
        &mut self,
        api: &dyn NeuronpediaApi,
        token: &str,
    ) -> Result<ExplanationsOutcome, InspectionError> {
        let explanations = api.fetch_token_explanations(token).await?;
        Ok(self.finish_select_token(token, explanations))
    }

    /// Resolve a description to the neuron it should look up
    pub fn begin_inspect(&self, description: &str) -> Result<InspectTarget, InspectionError> {
        if description == NO_DESCRIPTION {
            return Err(InspectionError::NoDescription);
        }

        let explanation = self
            .explanations
            .iter()
            .find(|e| e.description == description)
            .ok_or_else(|| InspectionError::UnknownDescription(description.to_string()))?;

        let neuron = Arc::clone(&explanation.neuron);
        let (layer, index) = match (&neuron.layer, neuron.index) {
            (Some(layer), Some(index)) => (layer.clone(), index),
            _ => {
                return Err(ClientError::Parse(
                    "explanation neuron is missing layer or index".to_string(),
                )
                .into())
            }
        };

        Ok(InspectTarget {
            description: description.to_string(),
            layer,
            index,
            neuron,
        })
    }

    /// Store the neuron view for an inspected description
    pub fn finish_inspect(
        &mut self,
        target: InspectTarget,
        details: Option<Neuron>,
    ) -> &NeuronInspection {
        let found = details.is_some();
        let rows = details
            .map(|d| highlight_all(&d.activations))
            .unwrap_or_default();

        if !found {
            warn!(layer = %target.layer, index = target.index, "No neuron details found");
        }

        self.inspection.insert(NeuronInspection {
            description: target.description,
            layer: target.layer,
            index: target.index,
            neuron: target.neuron,
            found,
            rows,
        })
    }

    /// Look up the neuron behind a description and build its activation rows
    pub async fn inspect(
        &mut self,
        api: &dyn NeuronpediaApi,
        description: &str,
    ) -> Result<&NeuronInspection, InspectionError> {
        let target = self.begin_inspect(description)?;
        let details = api.fetch_neuron_details(&target.layer, target.index).await?;
        Ok(self.finish_inspect(target, details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{Call, MockApi};
    use crate::client::{Activation, Rows};

    fn neuron(layer: Option<&str>, index: Option<u64>) -> Arc<Neuron> {
        Arc::new(Neuron {
            layer: layer.map(str::to_string),
            index,
            ..Neuron::default()
        })
    }

    fn explanations(descriptions: &[&str], neuron: Arc<Neuron>) -> Vec<TokenExplanation> {
        descriptions
            .iter()
            .map(|d| TokenExplanation {
                description: d.to_string(),
                neuron: Arc::clone(&neuron),
            })
            .collect()
    }

    fn details() -> Neuron {
        Neuron {
            activations: vec![Activation {
                tokens: Rows::Flat(vec!["a".to_string(), "b".to_string(), "c".to_string()]),
                values: Rows::Flat(vec![1.0, -1.0, 2.0]),
            }],
            ..Neuron::default()
        }
    }

    #[test]
    fn test_set_sentence_resets() {
        let mut session = TokenInspectionSession::new();
        session.set_sentence("Hello, world!");
        session.finish_select_token("world", explanations(&["d1"], neuron(Some("6-res-jb"), Some(1))));

        let tokens = session.set_sentence("New one");
        assert_eq!(tokens.len(), 2);
        assert!(session.selected_token().is_none());
        assert!(session.explanations().is_empty());
        assert!(session.inspection().is_none());
    }

    #[test]
    fn test_token_at() {
        let mut session = TokenInspectionSession::new();
        session.set_sentence("Hello, world!");
        assert_eq!(session.token_at(2).unwrap(), "world");
        assert!(matches!(session.token_at(9), Err(InspectionError::UnknownToken(9))));
    }

    #[tokio::test]
    async fn test_select_token_replaces_previous_data() {
        let api = MockApi::new()
            .with_explanations(Ok(explanations(&["d1"], neuron(Some("6-res-jb"), Some(1)))))
            .with_neuron(Ok(Some(details())))
            .with_explanations(Ok(explanations(&["d2", "d3"], neuron(Some("6-res-jb"), Some(2)))));
        let mut session = TokenInspectionSession::new();
        session.set_sentence("Hello, world!");

        session.select_token(&api, "Hello").await.unwrap();
        session.inspect(&api, "d1").await.unwrap();
        assert!(session.inspection().is_some());

        let outcome = session.select_token(&api, "world").await.unwrap();
        assert_eq!(outcome, ExplanationsOutcome::Found(2));
        assert_eq!(session.selected_token(), Some("world"));
        assert_eq!(session.descriptions(), vec!["d2", "d3"]);
        assert!(session.inspection().is_none());
    }

    #[tokio::test]
    async fn test_select_token_failure_keeps_state() {
        let api = MockApi::new()
            .with_explanations(Ok(explanations(&["d1"], neuron(Some("6-res-jb"), Some(1)))))
            .with_explanations(Err(ClientError::Network("timeout".to_string())));
        let mut session = TokenInspectionSession::new();

        session.select_token(&api, "Hello").await.unwrap();
        assert!(session.select_token(&api, "world").await.is_err());
        assert_eq!(session.selected_token(), Some("Hello"));
        assert_eq!(session.descriptions(), vec!["d1"]);
    }

    #[tokio::test]
    async fn test_no_explanations() {
        let api = MockApi::new().with_explanations(Ok(Vec::new()));
        let mut session = TokenInspectionSession::new();
        let outcome = session.select_token(&api, "the").await.unwrap();
        assert_eq!(outcome, ExplanationsOutcome::NoExplanations);
        assert_eq!(session.selected_token(), Some("the"));
    }

    #[tokio::test]
    async fn test_inspect_uses_neuron_coordinates() {
        let api = MockApi::new().with_neuron(Ok(Some(details())));
        let mut session = TokenInspectionSession::new();
        session.finish_select_token("dog", explanations(&["d1", "d2"], neuron(Some("6-res-jb"), Some(77))));

        let inspection = session.inspect(&api, "d2").await.unwrap();
        assert!(inspection.found);
        assert_eq!(inspection.rows.len(), 1);
        assert_eq!(inspection.rows[0].tokens[1].intensity, None);
        assert_eq!(inspection.rows[0].tokens[2].intensity, Some(1.0));
        assert_eq!(api.calls(), vec![Call::Neuron("6-res-jb".to_string(), 77)]);
    }

    #[tokio::test]
    async fn test_inspect_not_found_is_not_an_error() {
        let api = MockApi::new().with_neuron(Ok(None));
        let mut session = TokenInspectionSession::new();
        session.finish_select_token("dog", explanations(&["d1"], neuron(Some("6-res-jb"), Some(1))));

        let inspection = session.inspect(&api, "d1").await.unwrap();
        assert!(!inspection.found);
        assert!(inspection.rows.is_empty());
    }

    #[tokio::test]
    async fn test_inspect_rejections_make_no_call() {
        let api = MockApi::new();
        let mut session = TokenInspectionSession::new();
        session.finish_select_token("dog", explanations(&[NO_DESCRIPTION], neuron(Some("6-res-jb"), Some(1))));

        assert!(matches!(
            session.inspect(&api, NO_DESCRIPTION).await,
            Err(InspectionError::NoDescription)
        ));
        assert!(matches!(
            session.inspect(&api, "missing").await,
            Err(InspectionError::UnknownDescription(_))
        ));

        session.finish_select_token("cat", explanations(&["d1"], neuron(None, Some(1))));
        assert!(matches!(
            session.inspect(&api, "d1").await,
            Err(InspectionError::Client(ClientError::Parse(_)))
        ));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inspect_failure_keeps_previous_view() {
        let api = MockApi::new()
            .with_neuron(Ok(Some(details())))
            .with_neuron(Err(ClientError::Parse("bad".to_string())));
        let mut session = TokenInspectionSession::new();
        session.finish_select_token("dog", explanations(&["d1", "d2"], neuron(Some("6-res-jb"), Some(1))));

        session.inspect(&api, "d1").await.unwrap();
        assert!(session.inspect(&api, "d2").await.is_err());
        assert_eq!(session.inspection().unwrap().description, "d1");
    }
}
