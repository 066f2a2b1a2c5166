use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use easel_contracts::capabilities::{CapabilityKind, CapabilityRegistry};
use easel_contracts::chat::{parse_intent, ConversationHistory, CHAT_HELP_COMMANDS};
use easel_contracts::events::EventWriter;
use easel_contracts::input::{ImageInput, RequestInput};
use easel_engine::{
    DispatchError, EngineConfig, InferenceController, InferenceTransport, ResultArtifact,
};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "easel", version, about = "Hosted image generation, upscaling and chat")]
struct Cli {
    /// Append lifecycle events as JSON lines to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Upscale(UpscaleArgs),
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    instruction: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// Directory for images produced by /imagine and /upscale.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("easel error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let events = cli
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, session_id()));
    match cli.command {
        Command::Generate(args) => run_generate(args, events),
        Command::Upscale(args) => run_upscale(args, events),
        Command::Chat(args) => run_chat(args, events),
    }
}

fn build_controller(
    kind: CapabilityKind,
    model: Option<&str>,
    config: &EngineConfig,
    events: Option<&EventWriter>,
) -> Result<InferenceController> {
    let capability = CapabilityRegistry::default()
        .resolve(kind, model)?;
    log::debug!("using {} via {}", capability.name, capability.model);
    let controller = InferenceController::http(capability, config.clone())?;
    Ok(match events {
        Some(events) => controller.with_events(events.clone()),
        None => controller,
    })
}

fn run_generate(args: GenerateArgs, events: Option<EventWriter>) -> Result<i32> {
    let config = EngineConfig::from_env();
    let controller = build_controller(
        CapabilityKind::TextToImage,
        args.model.as_deref(),
        &config,
        events.as_ref(),
    )?;
    if let Some(notice) = blocked_notice(&controller) {
        eprintln!("easel: {notice}");
        return Ok(1);
    }
    eprintln!("Generating...");
    let outcome = controller.dispatch(RequestInput::prompt(args.prompt));
    report_single_shot(outcome, args.out.as_deref(), args.json)
}

fn run_upscale(args: UpscaleArgs, events: Option<EventWriter>) -> Result<i32> {
    let config = EngineConfig::from_env();
    let controller = build_controller(
        CapabilityKind::ImageToImage,
        args.model.as_deref(),
        &config,
        events.as_ref(),
    )?;
    if let Some(notice) = blocked_notice(&controller) {
        eprintln!("easel: {notice}");
        return Ok(1);
    }
    let image = ImageInput::from_path(&args.image)?;
    eprintln!("Upscaling...");
    let outcome = controller.dispatch(RequestInput::upload(Some(image), args.instruction));
    report_single_shot(outcome, args.out.as_deref(), args.json)
}

/// The controller's missing-credential message while it refuses dispatch.
fn blocked_notice<T: InferenceTransport>(controller: &InferenceController<T>) -> Option<String> {
    if !controller.is_blocked() {
        return None;
    }
    controller.current_error().map(|detail| detail.message)
}

fn report_single_shot(
    outcome: Result<ResultArtifact, DispatchError>,
    out: Option<&Path>,
    as_json: bool,
) -> Result<i32> {
    match outcome {
        Ok(artifact) => {
            let saved = save_artifact(&artifact, out)?;
            if as_json {
                println!("{}", outcome_json(Some(&artifact), saved.as_deref(), None));
            } else if let Some(path) = saved.as_deref() {
                println!("{}", describe_saved(&artifact, path));
            }
            Ok(0)
        }
        Err(err) => {
            if as_json {
                println!("{}", outcome_json(None, None, Some(&err)));
            } else {
                eprintln!("easel error: {err}");
            }
            Ok(1)
        }
    }
}

fn save_artifact(artifact: &ResultArtifact, out: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some(image) = artifact.as_image() else {
        return Ok(None);
    };
    let target = out.unwrap_or_else(|| Path::new("."));
    let written = image
        .write_to(target)
        .with_context(|| format!("failed saving image artifact {}", image.id))?;
    Ok(Some(written))
}

fn describe_saved(artifact: &ResultArtifact, path: &Path) -> String {
    match artifact.as_image() {
        Some(image) => format!(
            "Saved {} ({}x{}, {})",
            path.display(),
            image.width,
            image.height,
            image.mime_type
        ),
        None => format!("Saved {}", path.display()),
    }
}

fn outcome_json(
    artifact: Option<&ResultArtifact>,
    path: Option<&Path>,
    err: Option<&DispatchError>,
) -> Value {
    let mut payload = json!({ "ok": err.is_none() });
    if let Some(image) = artifact.and_then(ResultArtifact::as_image) {
        payload["artifact"] = json!({
            "id": image.id.to_string(),
            "mime_type": image.mime_type,
            "width": image.width,
            "height": image.height,
            "sha256": image.sha256,
        });
    }
    if let Some(path) = path {
        payload["path"] = Value::String(path.to_string_lossy().to_string());
    }
    if let Some(err) = err {
        payload["error"] = match err.failure() {
            Some(detail) => serde_json::to_value(detail).unwrap_or(Value::Null),
            None => json!({ "message": err.to_string() }),
        };
    }
    payload
}

fn run_chat(args: ChatArgs, events: Option<EventWriter>) -> Result<i32> {
    let config = EngineConfig::from_env();
    let chat = build_controller(
        CapabilityKind::Chat,
        args.model.as_deref(),
        &config,
        events.as_ref(),
    )?;
    let imagine = build_controller(
        CapabilityKind::TextToImage,
        args.image_model.as_deref(),
        &config,
        events.as_ref(),
    )?;
    let upscale = build_controller(CapabilityKind::ImageToImage, None, &config, events.as_ref())?;

    println!(
        "Chatting with {}. Type /help for commands.",
        chat.capability().model
    );
    if let Some(notice) = blocked_notice(&chat) {
        println!("{notice}");
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(&line);
        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join("  ")),
            "show_history" => print!("{}", format_history(&chat.history())),
            "show_status" => {
                for controller in [&chat, &imagine, &upscale] {
                    let snapshot = controller.snapshot();
                    println!(
                        "{:<14} {:<10} {}",
                        controller.capability().name,
                        snapshot.state.as_str(),
                        snapshot
                            .error
                            .as_ref()
                            .map(|detail| detail.message.as_str())
                            .unwrap_or("")
                    );
                }
            }
            "send_message" => {
                if let Some(notice) = blocked_notice(&chat) {
                    println!("{notice}");
                    continue;
                }
                let text = intent.text.clone().unwrap_or_default();
                match chat.dispatch(RequestInput::message(text)) {
                    Ok(reply) => println!("{}", reply.as_message().unwrap_or_default()),
                    Err(err) => println!("error: {err}"),
                }
            }
            "generate_image" => {
                if let Some(notice) = blocked_notice(&imagine) {
                    println!("{notice}");
                    continue;
                }
                println!("Generating...");
                let prompt = intent.text.clone().unwrap_or_default();
                let outcome = imagine.dispatch(RequestInput::prompt(prompt));
                print_repl_outcome(outcome, &args.out_dir);
            }
            "upscale_image" => {
                if let Some(notice) = blocked_notice(&upscale) {
                    println!("{notice}");
                    continue;
                }
                let image = match intent.arg_str("path").filter(|path| !path.is_empty()) {
                    Some(path) => match ImageInput::from_path(Path::new(path)) {
                        Ok(image) => Some(image),
                        Err(err) => {
                            println!("error: {err:#}");
                            continue;
                        }
                    },
                    None => None,
                };
                let instruction = intent
                    .arg_str("instruction")
                    .filter(|text| !text.trim().is_empty())
                    .map(str::to_string);
                println!("Upscaling...");
                let outcome = upscale.dispatch(RequestInput::upload(image, instruction));
                print_repl_outcome(outcome, &args.out_dir);
            }
            _ => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }
    Ok(0)
}

fn print_repl_outcome(outcome: Result<ResultArtifact, DispatchError>, out_dir: &Path) {
    match outcome {
        Ok(artifact) => match save_artifact(&artifact, Some(out_dir)) {
            Ok(Some(path)) => println!("{}", describe_saved(&artifact, &path)),
            Ok(None) => {}
            Err(err) => println!("error: {err:#}"),
        },
        Err(err) => println!("error: {err}"),
    }
}

fn format_history(history: &ConversationHistory) -> String {
    if history.is_empty() {
        return "(no messages yet)\n".to_string();
    }
    history
        .entries()
        .iter()
        .map(|entry| format!("{}: {}\n", entry.role.as_str(), entry.content))
        .collect()
}

fn session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("session-{millis}-{}", std::process::id())
}
