//! Activation heatmap transform
//!
//! Turns activation records into rows of tokens with a highlight intensity
//! in (0, 1] for positive values. Pure and deterministic.

use crate::client::Activation;
use serde::Serialize;

/// Glyph the tokenizer uses for a leading space
pub const SPACE_GLYPH: char = '\u{2581}';

/// A token with its activation value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightedToken {
    pub text: String,
    pub value: f64,
    /// `value / max` for positive values, `None` otherwise
    pub intensity: Option<f64>,
}

impl HighlightedToken {
    /// Green channel of the highlight; stronger activations are darker
    pub fn green(&self) -> Option<u32> {
        self.intensity
            .map(|n| (150.0 + 200.0 * (1.0 - n)).max(0.0) as u32)
    }
}

/// One activation record ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationRow {
    pub top_token: String,
    pub top_value: f64,
    pub tokens: Vec<HighlightedToken>,
}

/// Replace placeholder glyphs with plain spaces
pub fn display_token(token: &str) -> String {
    token.replace(SPACE_GLYPH, " ")
}

/// Highlight one activation; `None` when it has no usable values
pub fn highlight(activation: &Activation) -> Option<ActivationRow> {
    let tokens = activation.tokens.clone().into_flat();
    let values = activation.values.clone().into_flat();

    let (max_index, max_value) = values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })?;

    let top_token = tokens
        .get(max_index)
        .map(|t| display_token(t))
        .unwrap_or_default();

    let tokens = tokens
        .iter()
        .zip(values.iter().copied())
        .map(|(token, value)| HighlightedToken {
            text: display_token(token),
            value,
            intensity: (value > 0.0).then(|| value / max_value),
        })
        .collect();

    Some(ActivationRow {
        top_token,
        top_value: max_value,
        tokens,
    })
}

/// Highlight every activation, skipping records without values
pub fn highlight_all(activations: &[Activation]) -> Vec<ActivationRow> {
    activations.iter().filter_map(highlight).collect()
}
