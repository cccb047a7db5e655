/*!
Morph ledger admin tool
*/

use clap::{Arg, ArgMatches, Command};
use morph_ledger::{ModelId, PlayerId};
use morph_tracker::{MorphConfig, MorphService, core::config::load_config};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("morph-tracker")
        .version(clap::crate_version!())
        .about("Inspects and edits the morph unlock ledger")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the TOML config file")
                .value_name("PATH")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("list").about("List a player's unlocked morphs").arg(
                Arg::new("player")
                    .short('p')
                    .long("player")
                    .help("Player UUID")
                    .value_name("UUID")
                    .required(true),
            ),
        )
        .subcommand(
            Command::new("grant")
                .about("Unlock a morph for a player")
                .arg(
                    Arg::new("player")
                        .short('p')
                        .long("player")
                        .help("Player UUID")
                        .value_name("UUID")
                        .required(true),
                )
                .arg(
                    Arg::new("model")
                        .short('m')
                        .long("model")
                        .help("Model id to unlock")
                        .value_name("ID")
                        .required(true),
                ),
        )
        .subcommand(Command::new("players").about("Show every player in the ledger"))
        .subcommand(Command::new("default-config").about("Print the default config as TOML"))
}

fn player_arg(matches: &ArgMatches) -> Result<PlayerId, Box<dyn std::error::Error>> {
    let raw = matches
        .get_one::<String>("player")
        .ok_or("missing --player")?;
    raw.parse::<PlayerId>()
        .map_err(|e| format!("invalid player id {raw:?}: {e}").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    if matches.subcommand_name() == Some("default-config") {
        print!("{}", MorphConfig::default().to_toml()?);
        return Ok(());
    }

    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            info!("Loading config from {}", path);
            load_config(path).await?
        }
        None => MorphConfig::default(),
    };
    config.validate()?;
    // Never fall back to an in-memory ledger here.
    let mut storage = config.storage.clone();
    storage.require_persistence = true;
    let ledger = MorphService::open_ledger(&storage)?;

    match matches.subcommand() {
        Some(("list", sub)) => {
            let player = player_arg(sub)?;
            let models: Vec<String> = ledger.list_unlocked(&player).iter().map(ModelId::to_string).collect();
            println!("Morphs: {}", models.join(", "));
        }
        Some(("grant", sub)) => {
            let player = player_arg(sub)?;
            let model = sub.get_one::<String>("model").ok_or("missing --model")?;
            if ledger.unlock(player, ModelId::from(model.as_str())) {
                println!("Unlocked {model}");
            } else {
                println!("Already unlocked {model}");
            }
            ledger.flush()?;
        }
        Some(("players", _)) => {
            for (player, count) in ledger.players() {
                println!("{player}\t{count}");
            }
        }
        _ => return Err("no subcommand given".into()),
    }

    Ok(())
}
