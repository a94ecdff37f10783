//! Steer dashboard: feature search, selection and the steering chat

use super::{client_failure, Notice, Transition};
use crate::client::{ClientError, FeatureCandidate, NeuronpediaApi, SteerReplies, SteerRequest};
use crate::selection::{clamp_strength, FeatureSelectionStore, SearchOutcome, SelectOutcome};
use crate::steering::{SteeringError, SteeringParams, SteeringSession};
use serde::Deserialize;
use tracing::{debug, info};

/// A user action on the steer dashboard
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SteerCommand {
    Search { query: String },
    Select { description: String },
    SetStrength { description: String, value: i64 },
    Remove { description: String },
    SetParams { params: SteeringParams },
    Submit { text: String },
}

/// Remote call requested by a steer command
#[derive(Debug, Clone, PartialEq)]
pub enum SteerEffect {
    SearchFeatures { query: String },
    SendChat { user_text: String, request: SteerRequest },
}

/// Result of executing a [`SteerEffect`]
#[derive(Debug)]
pub enum SteerOutcome {
    Searched {
        query: String,
        result: Result<Vec<FeatureCandidate>, ClientError>,
    },
    Chatted {
        user_text: String,
        result: Result<SteerReplies, ClientError>,
    },
}

impl SteerEffect {
    /// Run the remote call
    pub async fn execute(self, api: &dyn NeuronpediaApi) -> SteerOutcome {
        match self {
            SteerEffect::SearchFeatures { query } => {
                let result = api.search_features(&query).await;
                SteerOutcome::Searched { query, result }
            }
            SteerEffect::SendChat { user_text, request } => {
                let result = api.send_steering_chat(&request).await;
                SteerOutcome::Chatted { user_text, result }
            }
        }
    }
}

/// State of one steer dashboard session
#[derive(Debug, Clone)]
pub struct SteerDashboard {
    model_id: String,
    selection: FeatureSelectionStore,
    session: SteeringSession,
    params: SteeringParams,
    last_notice: Option<Notice>,
}

impl SteerDashboard {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            selection: FeatureSelectionStore::new(),
            session: SteeringSession::new(),
            params: SteeringParams::default(),
            last_notice: None,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn selection(&self) -> &FeatureSelectionStore {
        &self.selection
    }

    pub fn session(&self) -> &SteeringSession {
        &self.session
    }

    pub fn params(&self) -> &SteeringParams {
        &self.params
    }

    pub fn last_notice(&self) -> Option<&Notice> {
        self.last_notice.as_ref()
    }

    /// Apply a command's local state change and plan its remote call
    pub fn handle(&mut self, command: SteerCommand) -> Transition<SteerEffect> {
        debug!(?command, "Handling steer command");
        match command {
            SteerCommand::Search { query } => match self.selection.begin_search(&query) {
                Ok(()) => Transition::effect(SteerEffect::SearchFeatures { query }),
                Err(e) => Transition::notice(client_failure("Search API request failed", &e)),
            },
            SteerCommand::Select { description } => match self.selection.select(&description) {
                SelectOutcome::Added => {
                    Transition::notice(Notice::Success(format!("Feature added: {}", description)))
                }
                SelectOutcome::AlreadySelected => Transition::notice(Notice::Info(format!(
                    "Feature already selected: {}",
                    description
                ))),
                SelectOutcome::NotACandidate => Transition::notice(Notice::Warning(format!(
                    "Not in the current search results: {}",
                    description
                ))),
            },
            SteerCommand::SetStrength { description, value } => {
                if self
                    .selection
                    .update_strength(&description, clamp_strength(value))
                {
                    Transition::none()
                } else {
                    Transition::notice(Notice::Warning(format!(
                        "Feature not selected: {}",
                        description
                    )))
                }
            }
            SteerCommand::Remove { description } => {
                if self.selection.remove(&description) {
                    Transition::notice(Notice::Info(format!("Feature removed: {}", description)))
                } else {
                    Transition::none()
                }
            }
            SteerCommand::SetParams { params } => {
                self.params = params.clamped();
                Transition::none()
            }
            SteerCommand::Submit { text } => {
                match self
                    .session
                    .prepare(&text, &self.model_id, &self.selection, &self.params)
                {
                    Ok(request) => Transition::effect(SteerEffect::SendChat {
                        user_text: text,
                        request,
                    }),
                    Err(SteeringError::EmptyMessage) => {
                        Transition::notice(Notice::Warning("Enter a message first.".to_string()))
                    }
                    Err(SteeringError::Client(e)) => {
                        Transition::notice(client_failure("API request failed", &e))
                    }
                }
            }
        }
    }

    /// Fold a remote call's outcome into state
    pub fn complete(&mut self, outcome: SteerOutcome) -> Option<Notice> {
        match outcome {
            SteerOutcome::Searched { query, result } => match result {
                Ok(candidates) => match self.selection.finish_search(candidates) {
                    SearchOutcome::Found(n) => {
                        info!(query, results = n, "Feature search complete");
                        Some(Notice::Info(format!("Found {} features for \"{}\".", n, query)))
                    }
                    SearchOutcome::NoResults => Some(Notice::Info("No features found.".to_string())),
                },
                Err(e) => Some(client_failure("Search API request failed", &e)),
            },
            SteerOutcome::Chatted { user_text, result } => match result {
                Ok(replies) => {
                    self.session.record_exchange(&user_text, &replies);
                    None
                }
                Err(e) => Some(client_failure("API request failed", &e)),
            },
        }
    }

    /// Handle a command end to end, running any remote call through `api`
    pub async fn dispatch(
        &mut self,
        api: &dyn NeuronpediaApi,
        command: SteerCommand,
    ) -> Option<Notice> {
        let transition = self.handle(command);
        let notice = match transition.effect {
            Some(effect) => self.complete(effect.execute(api).await),
            None => transition.notice,
        };
        self.last_notice = notice.clone();
        notice
    }
}
