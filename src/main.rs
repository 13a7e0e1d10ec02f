use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use sparkles_relay::client::ProxyClient;
use sparkles_relay::config::{ClientConfig, Config};
use sparkles_relay::error::PipelineError;
use sparkles_relay::history::HistoryFile;
use sparkles_relay::llm::ChunkStream;
use sparkles_relay::models::Mode;
use sparkles_relay::pipeline::{classify, Intent};
use sparkles_relay::render;
use sparkles_relay::session::{RequestId, Session};
use sparkles_relay::server;

#[derive(Parser)]
#[command(name = "sparkles-relay", about = "Interview assistant relay with verified code answers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print intent and per-line details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP backend
    Serve {
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask a single question against a running backend
    Ask {
        question: String,
        /// Hints only, no full solution
        #[arg(long)]
        hint: bool,
        /// Print the answer as it streams
        #[arg(long)]
        stream: bool,
    },
    /// Interactive chat with persisted history
    Chat {
        #[arg(long)]
        hint: bool,
        #[arg(long, default_value = ".sparkles_history.json")]
        history_file: PathBuf,
        /// Rewrite this HTML file with the rendered answer after every chunk
        #[arg(long)]
        render: Option<PathBuf>,
    },
    /// Transcribe an audio file through the backend
    Transcribe {
        file: PathBuf,
        #[arg(long, default_value = "audio/webm")]
        content_type: String,
    },
    /// Measure intent classification accuracy on a question set
    Eval {
        /// Path to JSONL file with `question` and `expected_intent`
        path: String,
    },
}

#[derive(serde::Deserialize)]
struct EvalQuestion {
    question: String,
    expected_intent: Intent,
}

fn mode_for(hint: bool) -> Mode {
    if hint {
        Mode::Hint
    } else {
        Mode::Full
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = Config::from_env()?;
            if let Some(port) = port {
                config.port = port;
            }
            server::serve(config).await?;
        }
        Commands::Ask {
            question,
            hint,
            stream,
        } => {
            let client = ProxyClient::new(&ClientConfig::from_env().backend_url);
            let mode = mode_for(hint);
            if cli.verbose {
                eprintln!("Intent (local): {}", classify(&question));
            }
            if stream {
                let mut chunks = client.chat_stream(&question, mode, &[]).await?;
                let mut stdout = std::io::stdout();
                while let Some(chunk) = chunks.next().await {
                    write!(stdout, "{}", chunk?)?;
                    stdout.flush()?;
                }
                println!();
            } else {
                let reply = client.chat(&question, mode).await?;
                println!("\n{}\n", reply.solution);
                println!("Intent: {}", reply.intent);
            }
        }
        Commands::Chat {
            hint,
            history_file,
            render,
        } => {
            let client = ProxyClient::new(&ClientConfig::from_env().backend_url);
            let mut session = Session::new(Some(HistoryFile::new(history_file)), mode_for(hint));
            session.start()?;
            run_chat(&client, &mut session, render.as_deref(), cli.verbose).await?;
            session.stop();
        }
        Commands::Transcribe { file, content_type } => {
            let audio = std::fs::read(&file)
                .context(format!("Failed to read audio file: {}", file.display()))?;
            let client = ProxyClient::new(&ClientConfig::from_env().backend_url);
            println!("{}", client.transcribe(audio, &content_type).await?);
        }
        Commands::Eval { path } => {
            let file =
                std::fs::File::open(&path).context(format!("Failed to open eval file: {}", path))?;
            let reader = std::io::BufReader::new(file);

            let mut total = 0usize;
            let mut correct = 0usize;
            let mut misses: BTreeMap<(String, String), usize> = BTreeMap::new();

            for (i, line) in reader.lines().enumerate() {
                let line = line.context("Failed to read line")?;
                if line.trim().is_empty() {
                    continue;
                }

                let eq: EvalQuestion =
                    serde_json::from_str(&line).context(format!("Failed to parse line {}", i + 1))?;
                let predicted = classify(&eq.question);
                total += 1;

                if predicted == eq.expected_intent {
                    correct += 1;
                } else {
                    *misses
                        .entry((eq.expected_intent.to_string(), predicted.to_string()))
                        .or_default() += 1;
                }
                if cli.verbose {
                    eprintln!(
                        "[{}] {} -> {} (expected {})",
                        i + 1,
                        eq.question,
                        predicted,
                        eq.expected_intent
                    );
                }
            }

            if total > 0 {
                println!("\n=== Classification Summary ===");
                println!("Questions: {}", total);
                println!(
                    "Accuracy: {}/{} ({:.1}%)",
                    correct,
                    total,
                    correct as f64 * 100.0 / total as f64
                );
                for ((expected, predicted), count) in &misses {
                    println!("  {} classified as {}: {}", expected, predicted, count);
                }
            }
        }
    }

    Ok(())
}

enum ChatEvent {
    Line(Option<String>),
    Chunk(Option<Result<String, PipelineError>>),
}

async fn run_chat(
    client: &ProxyClient,
    session: &mut Session,
    render_path: Option<&std::path::Path>,
    verbose: bool,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active: Option<(RequestId, ChunkStream)> = None;

    eprintln!(
        "Mode: {}. Commands: /clear /hint /full /quit. {} turns of history loaded.",
        session.mode().as_str(),
        session.history().len()
    );

    loop {
        let event = match active.as_mut() {
            Some((_, stream)) => tokio::select! {
                line = lines.next_line() => ChatEvent::Line(line?),
                chunk = stream.next() => ChatEvent::Chunk(chunk),
            },
            None => ChatEvent::Line(lines.next_line().await?),
        };

        match event {
            ChatEvent::Line(None) => break,
            ChatEvent::Line(Some(line)) => {
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => break,
                    "/clear" => {
                        session.clear_history()?;
                        eprintln!("History cleared.");
                        continue;
                    }
                    "/hint" | "/full" => {
                        let mode = if line == "/hint" { Mode::Hint } else { Mode::Full };
                        session.set_mode(mode);
                        eprintln!("Mode: {}", mode.as_str());
                        continue;
                    }
                    _ => {}
                }

                if active.take().is_some() {
                    eprintln!("\n[previous answer superseded]");
                }
                let turn = session.begin(line)?;
                if verbose {
                    eprintln!("Intent (local): {}", classify(turn.query.text()));
                }
                match client
                    .chat_stream(turn.query.text(), turn.query.mode(), &turn.context)
                    .await
                {
                    Ok(stream) => active = Some((turn.id, stream)),
                    Err(err) => {
                        session.fail(turn.id);
                        eprintln!("Error: {}", err);
                    }
                }
            }
            ChatEvent::Chunk(Some(Ok(chunk))) => {
                let Some((id, _)) = &active else { continue };
                if let Some(fragment) = session.push_chunk(*id, &chunk) {
                    print!("{}", chunk);
                    std::io::stdout().flush()?;
                    if let Some(path) = render_path {
                        std::fs::write(path, render::page(&fragment))
                            .context(format!("Failed to write {}", path.display()))?;
                    }
                }
            }
            ChatEvent::Chunk(Some(Err(err))) => {
                if let Some((id, _)) = active.take() {
                    session.fail(id);
                }
                eprintln!("\nError: {}", err);
            }
            ChatEvent::Chunk(None) => {
                if let Some((id, _)) = active.take() {
                    session.finish(id)?;
                }
                println!();
            }
        }
    }

    Ok(())
}
