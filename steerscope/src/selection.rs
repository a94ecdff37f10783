//! Feature selection state for the steer dashboard
//!
//! Holds the candidates from the latest search and the features chosen for
//! steering. Descriptions are the natural key: at most one selection exists
//! per description, and selections keep insertion order.

use crate::client::{
    validate_query, ClientError, FeatureCandidate, NeuronpediaApi, SteerFeature,
};
use serde::Serialize;
use tracing::{debug, info};

/// Lowest strength the input surface accepts
pub const STRENGTH_MIN: i64 = -100;
/// Highest strength the input surface accepts
pub const STRENGTH_MAX: i64 = 100;

/// Clamp a strength into the accepted range
pub fn clamp_strength(value: i64) -> i64 {
    value.clamp(STRENGTH_MIN, STRENGTH_MAX)
}

/// A feature chosen to influence generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSelection {
    pub description: String,
    pub layer: String,
    pub index: u64,
    pub strength: i64,
}

impl From<FeatureCandidate> for FeatureSelection {
    fn from(c: FeatureCandidate) -> Self {
        Self {
            description: c.description,
            layer: c.layer,
            index: c.index,
            strength: c.strength,
        }
    }
}

/// Result of folding search results into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(usize),
    NoResults,
}

/// Result of selecting a description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Promoted from the candidates; the candidate list was cleared
    Added,
    /// A selection with this description already exists
    AlreadySelected,
    /// No candidate has this description
    NotACandidate,
}

/// Candidates plus selected features for one session
#[derive(Debug, Default, Clone)]
pub struct FeatureSelectionStore {
    candidates: Vec<FeatureCandidate>,
    selections: Vec<FeatureSelection>,
}

impl FeatureSelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidates(&self) -> &[FeatureCandidate] {
        &self.candidates
    }

    pub fn selections(&self) -> &[FeatureSelection] {
        &self.selections
    }

    pub fn is_selected(&self, description: &str) -> bool {
        self.selections.iter().any(|s| s.description == description)
    }

    /// Check a query before any network call; the store is not touched
    pub fn begin_search(&self, query: &str) -> Result<(), ClientError> {
        validate_query(query)
    }

    /// Replace the candidates with fresh search results
    pub fn finish_search(&mut self, results: Vec<FeatureCandidate>) -> SearchOutcome {
        let count = results.len();
        self.candidates = results;
        debug!(count, "Candidate list replaced");
        if count == 0 {
            SearchOutcome::NoResults
        } else {
            SearchOutcome::Found(count)
        }
    }

    /// Validate, query the API and replace the candidates
    ///
    /// On any error the candidate list is left as it was.
    pub async fn search(
        &mut self,
        api: &dyn NeuronpediaApi,
        query: &str,
    ) -> Result<SearchOutcome, ClientError> {
        self.begin_search(query)?;
        let results = api.search_features(query).await?;
        Ok(self.finish_search(results))
    }

    /// Promote a candidate to a selection
    pub fn select(&mut self, description: &str) -> SelectOutcome {
        if self.is_selected(description) {
            return SelectOutcome::AlreadySelected;
        }

        let Some(pos) = self
            .candidates
            .iter()
            .position(|c| c.description == description)
        else {
            return SelectOutcome::NotACandidate;
        };

        let candidate = self.candidates.swap_remove(pos);
        info!(description, layer = %candidate.layer, index = candidate.index, "Feature selected");
        self.selections.push(candidate.into());
        self.candidates.clear();
        SelectOutcome::Added
    }

    /// Set a selection's strength; returns false if nothing matched
    pub fn update_strength(&mut self, description: &str, value: i64) -> bool {
        match self
            .selections
            .iter_mut()
            .find(|s| s.description == description)
        {
            Some(selection) => {
                selection.strength = value;
                true
            }
            None => false,
        }
    }

    /// Drop a selection; returns false if it was already absent
    pub fn remove(&mut self, description: &str) -> bool {
        let before = self.selections.len();
        self.selections.retain(|s| s.description != description);
        let removed = self.selections.len() != before;
        if removed {
            info!(description, "Feature removed");
        }
        removed
    }

    /// Steering payload features, in selection order
    pub fn steer_features(&self, model_id: &str) -> Vec<SteerFeature> {
        self.selections
            .iter()
            .map(|s| SteerFeature {
                model_id: model_id.to_string(),
                layer: s.layer.clone(),
                index: s.index,
                strength: clamp_strength(s.strength),
            })
            .collect()
    }
}
