//! koboldrs - command-line front end
//!
//! Query a local KoboldCpp server, generate text and manage characters.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use koboldrs::storage::settings::{load_settings, BASE_URL_ENV};
use koboldrs::{Character, CharacterStore, KoboldClient, Session};

#[derive(Parser)]
#[command(name = "koboldrs")]
#[command(about = "Chat with a local KoboldCpp server", version)]
struct Args {
    /// Server base URL (overrides settings)
    #[arg(long, env = BASE_URL_ENV)]
    base_url: Option<String>,

    /// Directory holding character files (overrides settings)
    #[arg(long)]
    characters_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the loaded model
    Model,
    /// Show the server version
    Version,
    /// Generate a completion for a prompt
    Generate {
        prompt: String,
        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Interactive chat, one line per message
    Chat {
        /// Character to play
        #[arg(long, short)]
        character: Option<String>,
        /// Use the non-streaming endpoint
        #[arg(long)]
        no_stream: bool,
    },
    /// Manage stored characters
    #[command(subcommand)]
    Characters(CharacterCommand),
}

#[derive(Subcommand)]
enum CharacterCommand {
    /// List stored character ids
    List,
    /// Print a character
    Show { id: String },
    /// Store a character from a JSON object; an id is generated when missing
    Create { json: String },
    /// Replace the character stored under an id
    Edit { id: String, json: String },
    /// Delete a character
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.base_url {
        settings.base_url = url;
    }
    if let Some(dir) = args.characters_dir {
        settings.characters_directory = dir;
    }
    settings.validate();

    let store = CharacterStore::from_settings(&settings);
    let client = KoboldClient::from_settings(&settings)?;

    match args.command {
        Command::Model => print_json(&client.get_model_info().await?)?,
        Command::Version => print_json(&client.get_version().await?)?,
        Command::Generate { prompt, stream } => {
            if stream {
                client
                    .generate_response_stream_with(&prompt, print_token)
                    .await?;
                println!();
            } else {
                println!("{}", client.generate_response(&prompt).await?);
            }
        }
        Command::Chat {
            character,
            no_stream,
        } => {
            let session = match character {
                Some(id) => {
                    let character = store
                        .load_character(&id)
                        .await?
                        .with_context(|| format!("No character named {:?}", id))?;
                    Session::with_character(client, character)
                }
                None => Session::new(client),
            };
            run_chat(session, !no_stream).await?;
        }
        Command::Characters(command) => run_characters(&store, command).await?,
    }

    Ok(())
}

async fn run_chat(mut session: Session, stream: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let name = session.assistant_name().to_string();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        print!("{}: ", name);
        let result = if stream {
            session.send_stream(line, print_token).await.map(|_| ())
        } else {
            session.send(line).await.map(|reply| print!("{}", reply))
        };
        println!();

        if let Err(e) = result {
            tracing::error!("Generation failed: {}", e);
            eprintln!("error: {}", e);
        }
    }

    Ok(())
}

async fn run_characters(store: &CharacterStore, command: CharacterCommand) -> Result<()> {
    match command {
        CharacterCommand::List => {
            for id in store.list_characters().await? {
                println!("{}", id);
            }
        }
        CharacterCommand::Show { id } => match store.load_character(&id).await? {
            Some(character) => print_json(&serde_json::to_value(character)?)?,
            None => bail!("No character named {:?}", id),
        },
        CharacterCommand::Create { json } => {
            let character = parse_character(&json, None)?;
            store.create_character(&character).await?;
            if let Some(id) = character.key() {
                println!("{}", id);
            }
        }
        CharacterCommand::Edit { id, json } => {
            let character = parse_character(&json, Some(&id))?;
            store.edit_character(&id, &character).await?;
        }
        CharacterCommand::Delete { id } => store.remove_character(&id).await?,
    }
    Ok(())
}

/// Parse a character from the command line, filling in the id if absent
fn parse_character(json: &str, id: Option<&str>) -> Result<Character> {
    let mut value: Value = serde_json::from_str(json).context("Character must be JSON")?;
    let Some(object) = value.as_object_mut() else {
        bail!("Character must be a JSON object");
    };
    if !object.contains_key("id") {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        object.insert("id".to_string(), Value::String(id));
    }
    serde_json::from_value(value).context("Invalid character")
}

fn print_token(token: &str) {
    print!("{}", token);
    let _ = std::io::stdout().flush();
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
