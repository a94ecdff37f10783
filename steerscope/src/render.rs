//! HTML fragments for the dashboards
//!
//! Every piece of API or user text passes through [`escape_html`].

use crate::activation::ActivationRow;
use crate::inspection::NeuronInspection;
use crate::steering::{Role, Transcript};
use std::fmt::Write;

const DEFAULT_CHAT_BG: &str = "#b5e8c4";
const STEERED_CHAT_BG: &str = "#bccfeb";
const BAR_COLOR: &str = "#A3E4D7";

const CHART_WIDTH: f64 = 600.0;
const CHART_HEIGHT: f64 = 300.0;
const CHART_MARGIN: f64 = 40.0;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Which side of the steering comparison a transcript belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSide {
    Default,
    Steered,
}

impl ChatSide {
    fn label(self) -> &'static str {
        match self {
            ChatSide::Default => "Default Model",
            ChatSide::Steered => "Steered Model",
        }
    }

    fn background(self) -> &'static str {
        match self {
            ChatSide::Default => DEFAULT_CHAT_BG,
            ChatSide::Steered => STEERED_CHAT_BG,
        }
    }
}

/// One chat column
pub fn render_transcript(side: ChatSide, transcript: &Transcript) -> String {
    let mut html = format!(
        "<div class=\"chat\" style=\"background-color: {}\"><h2>{} Chat</h2>",
        side.background(),
        side.label()
    );
    for turn in transcript.turns() {
        let speaker = match turn.role {
            Role::User => "\u{1F464} User",
            Role::Model => match side {
                ChatSide::Default => "\u{1F916} Default Model",
                ChatSide::Steered => "\u{1F916} Steered Model",
            },
        };
        let _ = write!(
            html,
            "<p><strong>{}:</strong> {}</p>",
            speaker,
            escape_html(&turn.content)
        );
    }
    html.push_str("</div>");
    html
}

/// Word/value table for a logit list
pub fn render_logits_table(title: &str, words: &[String], values: &[f64]) -> String {
    let mut html = format!("<div class=\"logits\"><h3>{}</h3>", escape_html(title));
    if words.is_empty() || values.is_empty() {
        let _ = write!(html, "<p>No {} available.</p></div>", escape_html(title));
        return html;
    }

    html.push_str("<table><thead><tr><th>Word</th><th>Value</th></tr></thead><tbody>");
    for (word, value) in words.iter().zip(values) {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{:.3}</td></tr>",
            escape_html(word),
            value
        );
    }
    html.push_str("</tbody></table></div>");
    html
}

/// Bar chart of a histogram as inline SVG; `None` when there is no data
pub fn render_histogram(
    title: &str,
    xs: &[f64],
    ys: &[f64],
    x_label: &str,
    y_label: &str,
) -> Option<String> {
    let bars: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
    if bars.is_empty() {
        return None;
    }

    let y_max = bars
        .iter()
        .map(|(_, y)| *y)
        .filter(|y| y.is_finite())
        .fold(0.0_f64, f64::max);
    let plot_w = CHART_WIDTH - 2.0 * CHART_MARGIN;
    let plot_h = CHART_HEIGHT - 2.0 * CHART_MARGIN;
    let bar_w = plot_w / bars.len() as f64;

    let mut svg = format!(
        "<figure class=\"histogram\"><figcaption>{}</figcaption>\
         <svg viewBox=\"0 0 {w} {h}\" width=\"{w}\" height=\"{h}\" role=\"img\">",
        escape_html(title),
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );

    for (i, (x, y)) in bars.iter().enumerate() {
        let height = if y_max > 0.0 && y.is_finite() {
            (y.max(0.0) / y_max) * plot_h
        } else {
            0.0
        };
        let _ = write!(
            svg,
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\">\
             <title>{:.3}: {}</title></rect>",
            CHART_MARGIN + i as f64 * bar_w,
            CHART_MARGIN + plot_h - height,
            (bar_w - 1.0).max(1.0),
            height,
            BAR_COLOR,
            x,
            y
        );
    }

    let first = bars.first().map(|(x, _)| *x).unwrap_or_default();
    let last = bars.last().map(|(x, _)| *x).unwrap_or_default();
    let _ = write!(
        svg,
        "<text x=\"{m}\" y=\"{b}\" font-size=\"10\">{first:.2}</text>\
         <text x=\"{r}\" y=\"{b}\" font-size=\"10\" text-anchor=\"end\">{last:.2}</text>\
         <text x=\"{c}\" y=\"{bl}\" font-size=\"12\" text-anchor=\"middle\">{xl}</text>\
         <text x=\"12\" y=\"{cy}\" font-size=\"12\" text-anchor=\"middle\" \
         transform=\"rotate(-90 12 {cy})\">{yl}</text></svg></figure>",
        m = CHART_MARGIN,
        r = CHART_WIDTH - CHART_MARGIN,
        b = CHART_HEIGHT - CHART_MARGIN + 14.0,
        bl = CHART_HEIGHT - 6.0,
        c = CHART_WIDTH / 2.0,
        cy = CHART_HEIGHT / 2.0,
        xl = escape_html(x_label),
        yl = escape_html(y_label),
    );
    Some(svg)
}

/// Top-activation table with highlighted token text
pub fn render_activation_rows(rows: &[ActivationRow]) -> String {
    if rows.is_empty() {
        return "<p>No activations available.</p>".to_string();
    }

    let mut html = String::from(
        "<table class=\"activations\"><thead><tr>\
         <th style=\"width: 20%\">Top Activation</th><th style=\"width: 80%\">Text</th>\
         </tr></thead><tbody>",
    );
    for row in rows {
        let _ = write!(
            html,
            "<tr><td>{}<br> {:.3}</td><td style=\"white-space: pre-wrap\">",
            escape_html(&row.top_token),
            row.top_value
        );
        for token in &row.tokens {
            match token.green() {
                Some(green) => {
                    let _ = write!(
                        html,
                        "<span style=\"background-color: rgb(0 {} 0); padding: 2px 6px 6px 2px; \
                         border-radius: 10px; margin-left: 3px; margin-right: 3px; color: white\" \
                         title=\"{}\">{}</span>",
                        green,
                        token.value,
                        escape_html(&token.text)
                    );
                }
                None => {
                    let _ = write!(
                        html,
                        "<span title=\"{}\">{}</span>",
                        token.value,
                        escape_html(&token.text)
                    );
                }
            }
        }
        html.push_str("</td></tr>");
    }
    html.push_str("</tbody></table>");
    html
}

/// Full neuron view: logits, histograms and activations
pub fn render_inspection(inspection: &NeuronInspection) -> String {
    let neuron = &inspection.neuron;
    let mut html = String::from("<div class=\"inspection\"><div class=\"logit-columns\">");
    html.push_str(&render_logits_table("Negative Logits", &neuron.neg_str, &neuron.neg_values));
    html.push_str(&render_logits_table("Positive Logits", &neuron.pos_str, &neuron.pos_values));
    html.push_str("</div>");

    if let Some(svg) = render_histogram(
        "Frequency Histogram",
        &neuron.freq_hist_data_bar_values,
        &neuron.freq_hist_data_bar_heights,
        "Values",
        "Frequency",
    ) {
        html.push_str(&svg);
    }
    if let Some(svg) = render_histogram(
        "Logits Histogram",
        &neuron.logits_hist_data_bar_values,
        &neuron.logits_hist_data_bar_heights,
        "Values",
        "Logits",
    ) {
        html.push_str(&svg);
    }

    let _ = write!(
        html,
        "<h3>Top Activations for Layer: {}, Index: {}</h3>",
        escape_html(&inspection.layer),
        inspection.index
    );
    if inspection.found {
        html.push_str(&render_activation_rows(&inspection.rows));
    } else {
        html.push_str("<p>No neuron details found.</p>");
    }
    html.push_str("</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::highlight;
    use crate::client::{Activation, Neuron, Rows, SteerReplies};
    use crate::steering::SteeringSession;
    use std::sync::Arc;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape_html("<b>\"x\" & 'y'</b>"),
            "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_transcript_labels_and_escaping() {
        let mut session = SteeringSession::new();
        session.record_exchange(
            "<script>",
            &SteerReplies {
                default: "plain".to_string(),
                steered: "dogs!".to_string(),
            },
        );
        let html = render_transcript(ChatSide::Steered, session.steered_transcript());
        assert!(html.contains("Steered Model Chat"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Steered Model:</strong> dogs!"));
        assert!(html.contains(STEERED_CHAT_BG));
    }

    #[test]
    fn test_empty_logits() {
        let html = render_logits_table("Negative Logits", &[], &[]);
        assert!(html.contains("No Negative Logits available."));
    }

    #[test]
    fn test_histogram() {
        assert!(render_histogram("Empty", &[], &[1.0], "x", "y").is_none());
        let svg = render_histogram("Freq", &[0.1, 0.2, 0.3], &[1.0, 4.0, 2.0], "Values", "Frequency")
            .unwrap();
        assert_eq!(svg.matches("<rect").count(), 3);
        assert!(svg.contains("Frequency"));
    }

    #[test]
    fn test_activation_row_markup() {
        let row = highlight(&Activation {
            tokens: Rows::Flat(vec!["a".to_string(), "\u{2581}b".to_string(), "c".to_string()]),
            values: Rows::Flat(vec![1.0, -1.0, 2.0]),
        })
        .unwrap();
        let html = render_activation_rows(&[row]);
        assert!(html.contains("c<br> 2.000"));
        assert!(html.contains("rgb(0 150 0)"));
        assert!(html.contains("rgb(0 250 0)"));
        assert!(html.contains("<span title=\"-1\"> b</span>"));
    }

    #[test]
    fn test_no_activations() {
        assert_eq!(render_activation_rows(&[]), "<p>No activations available.</p>");
    }

    #[test]
    fn test_inspection_not_found() {
        let inspection = NeuronInspection {
            description: "d".to_string(),
            layer: "6-res-jb".to_string(),
            index: 3,
            neuron: Arc::new(Neuron::default()),
            found: false,
            rows: Vec::new(),
        };
        let html = render_inspection(&inspection);
        assert!(html.contains("Layer: 6-res-jb, Index: 3"));
        assert!(html.contains("No neuron details found."));
        assert!(!html.contains("<svg"));
    }
}
