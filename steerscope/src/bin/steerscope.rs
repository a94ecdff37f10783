//! Steerscope CLI - query the Neuronpedia feature API from a terminal
//!
//! Example:
//!   steerscope tokenize "Hello, world!"
//!   steerscope explain dog
//!   steerscope chat "Tell me about cats" --feature 20-gemmascope-res-16k:12082:40

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::str::FromStr;
use steerscope::activation::{highlight_all, ActivationRow};
use steerscope::client::{Neuron, SteerFeature};
use steerscope::selection::clamp_strength;
use steerscope::steering::{build_request, SteeringParams};
use steerscope::{tokenize, NeuronpediaApi, NeuronpediaClient, ScopeConfig, API_KEY_ENV};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "steerscope")]
#[command(about = "Search, inspect and steer Neuronpedia features")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "steerscope.toml")]
    config: PathBuf,

    /// Neuronpedia API key (overrides the config file)
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a sentence into words and punctuation
    Tokenize { sentence: String },

    /// Search feature explanations
    Search { query: String },

    /// List feature explanations active on a token
    Explain { token: String },

    /// Show logits and top activations for a feature
    Neuron {
        layer: String,
        index: u64,
        /// Number of activation rows to print
        #[arg(short = 'n', long, default_value_t = 5)]
        rows: usize,
    },

    /// Send one message to the default and steered models
    Chat {
        message: String,

        /// Steering feature as LAYER:INDEX:STRENGTH (repeatable)
        #[arg(short, long = "feature")]
        features: Vec<FeatureArg>,

        /// Override the steer model
        #[arg(short, long)]
        model: Option<String>,

        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        temperature: f64,

        #[arg(long, default_value_t = 48)]
        n_tokens: u32,

        #[arg(long, default_value_t = 2)]
        freq_penalty: i64,

        #[arg(long, default_value_t = 16)]
        seed: i64,

        #[arg(long, default_value_t = 4)]
        strength_multiplier: i64,

        /// Do not steer special tokens
        #[arg(long)]
        no_steer_special_tokens: bool,
    },
}

/// `LAYER:INDEX:STRENGTH` from the command line
#[derive(Debug, Clone, PartialEq)]
struct FeatureArg {
    layer: String,
    index: u64,
    strength: i64,
}

impl FromStr for FeatureArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, ':');
        let (Some(strength), Some(index), Some(layer)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("expected LAYER:INDEX:STRENGTH, got {:?}", s);
        };
        if layer.is_empty() {
            bail!("empty layer in {:?}", s);
        }
        Ok(Self {
            layer: layer.to_string(),
            index: index
                .parse()
                .map_err(|_| anyhow!("invalid feature index {:?}", index))?,
            strength: clamp_strength(
                strength
                    .parse()
                    .map_err(|_| anyhow!("invalid strength {:?}", strength))?,
            ),
        })
    }
}

fn print_box(title: &str, lines: &[String]) {
    eprintln!(
        "{}",
        "╭──────────────────────────────────────────────────────────────╮".blue()
    );
    eprintln!("{}  {}", "│".blue(), title.bold());
    eprintln!(
        "{}",
        "├──────────────────────────────────────────────────────────────┤".blue()
    );
    for line in lines {
        eprintln!("{}  {}", "│".blue(), line);
    }
    eprintln!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".blue()
    );
}

fn print_logits(title: &str, words: &[String], values: &[f64]) {
    eprintln!("{}", title.bold());
    if words.is_empty() || values.is_empty() {
        eprintln!("  {}", format!("No {} available.", title).dimmed());
        return;
    }
    for (word, value) in words.iter().zip(values) {
        println!("  {:<20} {:>8.3}", word, value);
    }
}

fn print_activation_row(row: &ActivationRow) {
    let text: String = row
        .tokens
        .iter()
        .map(|t| match t.green() {
            Some(g) => t
                .text
                .on_truecolor(0, g.min(255) as u8, 0)
                .white()
                .to_string(),
            None => t.text.clone(),
        })
        .collect();
    println!(
        "{} {}  {}",
        row.top_token.green().bold(),
        format!("{:.3}", row.top_value).dimmed(),
        text
    );
}

fn print_neuron(layer: &str, index: u64, neuron: &Neuron, rows: usize) {
    print_box(
        &format!("Layer: {}, Index: {}", layer, index),
        &[format!(
            "{} activation records",
            neuron.activations.len()
        )],
    );
    print_logits("Negative Logits", &neuron.neg_str, &neuron.neg_values);
    print_logits("Positive Logits", &neuron.pos_str, &neuron.pos_values);

    eprintln!();
    eprintln!(
        "{}",
        format!("Top Activations for Layer: {}, Index: {}", layer, index).bold()
    );
    let highlighted = highlight_all(&neuron.activations);
    if highlighted.is_empty() {
        eprintln!("  {}", "No activations available.".dimmed());
    }
    for row in highlighted.iter().take(rows) {
        print_activation_row(row);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::Tokenize { sentence } = &cli.command {
        for (i, token) in tokenize(sentence).iter().enumerate() {
            println!("{:>3}  {}", i.to_string().dimmed(), token);
        }
        return Ok(());
    }

    let mut config = ScopeConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    if let Some(key) = cli.api_key.filter(|k| !k.is_empty()) {
        config.api_key = key;
    }
    let client = NeuronpediaClient::new(&config).context("Failed to build Neuronpedia client")?;

    match cli.command {
        Command::Tokenize { .. } => {}
        Command::Search { query } => {
            let results = client.search_features(&query).await?;
            if results.is_empty() {
                eprintln!("{}", "No features found.".yellow());
            }
            for c in &results {
                println!(
                    "{}  {}",
                    format!("{}:{}", c.layer, c.index).cyan(),
                    c.description
                );
            }
        }
        Command::Explain { token } => {
            let explanations = client.fetch_token_explanations(&token).await?;
            if explanations.is_empty() {
                eprintln!(
                    "{}",
                    "No explanations found for the selected token.".yellow()
                );
            }
            for e in &explanations {
                let coords = match (&e.neuron.layer, e.neuron.index) {
                    (Some(layer), Some(index)) => format!("{}:{}", layer, index),
                    _ => "?".to_string(),
                };
                println!("{}  {}", coords.cyan(), e.description);
            }
        }
        Command::Neuron { layer, index, rows } => {
            match client.fetch_neuron_details(&layer, index).await? {
                Some(neuron) => print_neuron(&layer, index, &neuron, rows),
                None => eprintln!("{}", "No neuron details found.".yellow()),
            }
        }
        Command::Chat {
            message,
            features,
            model,
            temperature,
            n_tokens,
            freq_penalty,
            seed,
            strength_multiplier,
            no_steer_special_tokens,
        } => {
            if message.trim().is_empty() {
                bail!("Enter a message first.");
            }
            let model_id = model.unwrap_or_else(|| config.steer.model_id.clone());
            let params = SteeringParams {
                temperature,
                n_tokens,
                freq_penalty,
                seed,
                strength_multiplier,
                steer_special_tokens: !no_steer_special_tokens,
            }
            .clamped();
            let steer_features = features
                .into_iter()
                .map(|f| SteerFeature {
                    model_id: model_id.clone(),
                    layer: f.layer,
                    index: f.index,
                    strength: f.strength,
                })
                .collect::<Vec<_>>();

            print_box(
                "Steer chat",
                &[
                    format!("{}  {}", "Model:".dimmed(), model_id),
                    format!("{}  {}", "Features:".dimmed(), steer_features.len()),
                ],
            );

            let request = build_request(&message, &model_id, steer_features, &params);
            let replies = client.send_steering_chat(&request).await?;

            eprintln!("{}", "🤖 Default Model".bold());
            println!("{}", replies.default.green());
            eprintln!();
            eprintln!("{}", "🤖 Steered Model".bold());
            println!("{}", replies.steered.cyan());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_arg() {
        let f: FeatureArg = "20-gemmascope-res-16k:12082:40".parse().unwrap();
        assert_eq!(f.layer, "20-gemmascope-res-16k");
        assert_eq!(f.index, 12082);
        assert_eq!(f.strength, 40);

        let f: FeatureArg = "6-res-jb:3:-500".parse().unwrap();
        assert_eq!(f.strength, -100);

        assert!("6-res-jb:3".parse::<FeatureArg>().is_err());
        assert!("6-res-jb:x:1".parse::<FeatureArg>().is_err());
        assert!(":3:1".parse::<FeatureArg>().is_err());
    }

    #[test]
    fn test_cli_api_key_flag() {
        let cli = Cli::try_parse_from(["steerscope", "--api-key", "k", "search", "dogs"]).unwrap();
        assert_eq!(cli.api_key.as_deref(), Some("k"));
        assert!(matches!(cli.command, Command::Search { .. }));
    }

    #[test]
    fn test_cli_parses_chat() {
        let cli = Cli::try_parse_from([
            "steerscope",
            "chat",
            "hello",
            "--feature",
            "6-res-jb:3:10",
            "--temperature",
            "-1.5",
        ])
        .unwrap();
        match cli.command {
            Command::Chat {
                features,
                temperature,
                ..
            } => {
                assert_eq!(features.len(), 1);
                assert_eq!(temperature, -1.5);
            }
            _ => panic!("expected chat"),
        }
    }
}
