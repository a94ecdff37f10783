//! Microscope dashboard: tokenize, pick a token, inspect a feature

use super::{client_failure, Notice, Transition};
use crate::client::{ClientError, Neuron, NeuronpediaApi, TokenExplanation};
use crate::inspection::{ExplanationsOutcome, InspectTarget, InspectionError, TokenInspectionSession};
use serde::Deserialize;
use tracing::debug;

/// A user action on the microscope
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MicroscopeCommand {
    SetSentence { text: String },
    /// Select by position in the tokenized sentence
    SelectToken { position: usize },
    Inspect { description: String },
}

/// Remote call requested by a microscope command
#[derive(Debug, Clone)]
pub enum MicroscopeEffect {
    FetchExplanations { token: String },
    FetchNeuron { target: InspectTarget },
}

/// Result of executing a [`MicroscopeEffect`]
#[derive(Debug)]
pub enum MicroscopeOutcome {
    Explanations {
        token: String,
        result: Result<Vec<TokenExplanation>, ClientError>,
    },
    Neuron {
        target: InspectTarget,
        result: Result<Option<Neuron>, ClientError>,
    },
}

impl MicroscopeEffect {
    pub async fn execute(self, api: &dyn NeuronpediaApi) -> MicroscopeOutcome {
        match self {
            MicroscopeEffect::FetchExplanations { token } => {
                let result = api.fetch_token_explanations(&token).await;
                MicroscopeOutcome::Explanations { token, result }
            }
            MicroscopeEffect::FetchNeuron { target } => {
                let result = api.fetch_neuron_details(&target.layer, target.index).await;
                MicroscopeOutcome::Neuron { target, result }
            }
        }
    }
}

/// State of one microscope session
#[derive(Debug, Clone, Default)]
pub struct MicroscopeDashboard {
    session: TokenInspectionSession,
    last_notice: Option<Notice>,
}

impl MicroscopeDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &TokenInspectionSession {
        &self.session
    }

    pub fn last_notice(&self) -> Option<&Notice> {
        self.last_notice.as_ref()
    }

    /// Apply a command's local state change and plan its remote call
    pub fn handle(&mut self, command: MicroscopeCommand) -> Transition<MicroscopeEffect> {
        debug!(?command, "Handling microscope command");
        match command {
            MicroscopeCommand::SetSentence { text } => {
                if self.session.set_sentence(&text).is_empty() {
                    Transition::notice(Notice::Info("The sentence has no tokens.".to_string()))
                } else {
                    Transition::none()
                }
            }
            MicroscopeCommand::SelectToken { position } => match self.session.token_at(position) {
                Ok(token) => Transition::effect(MicroscopeEffect::FetchExplanations {
                    token: token.to_string(),
                }),
                Err(e) => Transition::notice(Notice::Warning(e.to_string())),
            },
            MicroscopeCommand::Inspect { description } => {
                match self.session.begin_inspect(&description) {
                    Ok(target) => Transition::effect(MicroscopeEffect::FetchNeuron { target }),
                    Err(InspectionError::Client(e)) => {
                        Transition::notice(client_failure("API Error", &e))
                    }
                    Err(e) => Transition::notice(Notice::Warning(e.to_string())),
                }
            }
        }
    }

    /// Fold a remote call's outcome into state
    pub fn complete(&mut self, outcome: MicroscopeOutcome) -> Option<Notice> {
        match outcome {
            MicroscopeOutcome::Explanations { token, result } => match result {
                Ok(explanations) => match self.session.finish_select_token(&token, explanations) {
                    ExplanationsOutcome::Found(_) => None,
                    ExplanationsOutcome::NoExplanations => Some(Notice::Warning(
                        "No explanations found for the selected token.".to_string(),
                    )),
                },
                Err(e) => Some(client_failure("API Error", &e)),
            },
            MicroscopeOutcome::Neuron { target, result } => match result {
                Ok(details) => {
                    let inspection = self.session.finish_inspect(target, details);
                    if !inspection.found {
                        Some(Notice::Warning("No neuron details found.".to_string()))
                    } else if inspection.rows.is_empty() {
                        Some(Notice::Info("No activations available.".to_string()))
                    } else {
                        None
                    }
                }
                Err(e) => Some(client_failure("API Error", &e)),
            },
        }
    }

    /// Handle a command end to end, running any remote call through `api`
    pub async fn dispatch(
        &mut self,
        api: &dyn NeuronpediaApi,
        command: MicroscopeCommand,
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
