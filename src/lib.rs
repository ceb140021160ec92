// Spice Jadoo - Oracle judgement and narrated playback backend
// Module declarations
pub mod audio;
pub mod commands;
pub mod credentials;
pub mod narration;
pub mod oracle;
pub mod settings;
pub mod state;

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use oracle::{Challenge, FlavorProfile, SelectedSpice};
use settings::{AppSettings, OutputKind};
use state::AppState;

/// Consult the Oracle of Flavors from the command line
#[derive(Parser, Debug)]
#[command(name = "spice-jadoo", version, about)]
pub struct Cli {
    /// Directory holding settings.json
    #[arg(long, default_value = ".spice-jadoo")]
    pub settings_dir: PathBuf,

    /// Challenge as a JSON file (title, description, base, ...)
    #[arg(long)]
    pub challenge: Option<PathBuf>,

    /// Spice to add, as name=quantity. Repeatable.
    #[arg(long = "spice", value_parser = parse_spice)]
    pub spices: Vec<SelectedSpice>,

    /// Run without an audio device
    #[arg(long)]
    pub mute: bool,
}

pub fn parse_spice(arg: &str) -> Result<SelectedSpice, String> {
    let (name, quantity) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=quantity, got '{}'", arg))?;

    let name = name.trim();
    if name.is_empty() {
        return Err("spice name is empty".to_string());
    }
    let quantity: u32 = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity '{}'", quantity))?;
    if quantity == 0 {
        return Err(format!("quantity for '{}' must be at least 1", name));
    }

    Ok(SelectedSpice {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        quantity,
    })
}

pub fn default_challenge() -> Challenge {
    Challenge {
        title: "Chana Masala".to_string(),
        description: "A robust and tangy chickpea curry from the heart of Punjab.".to_string(),
        base: "Chickpeas, onion, tomato, ginger, garlic".to_string(),
        region: "North".to_string(),
        target_profile: FlavorProfile {
            heat: 6.0,
            earthy: 7.0,
            sweet: 2.0,
            tangy: 8.0,
            aromatic: 6.0,
        },
    }
}

fn default_spices() -> Vec<SelectedSpice> {
    [("cumin", "Cumin", 2), ("amchur", "Amchur", 2), ("garam-masala", "Garam Masala", 1)]
        .into_iter()
        .map(|(id, name, quantity)| SelectedSpice {
            id: id.to_string(),
            name: name.to_string(),
            quantity,
        })
        .collect()
}

fn load_challenge(path: &Path) -> anyhow::Result<Challenge> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read challenge file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse challenge file {:?}", path))
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut settings = AppSettings::load(&cli.settings_dir).context("Failed to load settings")?;
    settings.apply_env().context("Invalid environment override")?;
    if cli.mute {
        settings.audio.output = OutputKind::Null;
    }
    settings.validate();

    let challenge = match &cli.challenge {
        Some(path) => load_challenge(path)?,
        None => default_challenge(),
    };
    let spices = if cli.spices.is_empty() {
        default_spices()
    } else {
        cli.spices
    };

    let state = AppState::initialize(settings, cli.settings_dir)?;

    let (subscription, mut transitions) =
        commands::subscribe_playback(&state).map_err(anyhow::Error::msg)?;
    let logger = tokio::spawn(async move {
        while let Some(transition) = transitions.recv().await {
            info!(status = ?transition.status, identifier = ?transition.active_identifier, "Playback");
        }
    });

    let judgement = commands::consult_oracle(challenge, spices, &state)
        .await
        .map_err(anyhow::Error::msg)?;

    println!("{}  ({:.1}/10)", judgement.dish_name, judgement.score);
    println!();
    println!("{}", judgement.description);
    println!();
    println!("{}", judgement.feedback);

    let report = commands::await_narration(&state)
        .await
        .map_err(anyhow::Error::msg)?;
    info!(stages = ?report.stages, "Narration finished");

    subscription.unsubscribe();
    logger.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spice_argument_parses() {
        let spice = parse_spice("Garam Masala=3").unwrap();
        assert_eq!(spice.id, "garam-masala");
        assert_eq!(spice.name, "Garam Masala");
        assert_eq!(spice.quantity, 3);
    }

    #[test]
    fn bad_spice_arguments_are_rejected() {
        assert!(parse_spice("cumin").is_err());
        assert!(parse_spice("=2").is_err());
        assert!(parse_spice("cumin=two").is_err());
        assert!(parse_spice("cumin=0").is_err());
    }

    #[test]
    fn cli_collects_repeated_spices() {
        let cli = Cli::try_parse_from(["spice-jadoo", "--spice", "cumin=1", "--spice", "hing=2", "--mute"]).unwrap();
        assert_eq!(cli.spices.len(), 2);
        assert!(cli.mute);
        assert_eq!(cli.settings_dir, PathBuf::from(".spice-jadoo"));
    }
}
