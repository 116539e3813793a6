//! `localmind chat` — Interactive or single-message chat.
//!
//! Every turn carries the whole learned-knowledge block. Ctrl+C stops the
//! response being generated; at the prompt it quits.

use localmind_agent::{ChatStream, ChatStreamEvent, LocalMind, Profile};
use localmind_core::message::{Conversation, Message};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// A line typed at the interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Exit,
    Help,
    /// `/profile` alone shows the current one
    Profile(Option<String>),
    Forget(String),
    Memory,
    /// Start over with an empty conversation
    Reset,
    Unknown(String),
    Message(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line == "exit" || line == "quit" {
        return Input::Exit;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "exit" | "quit" => Input::Exit,
        "help" => Input::Help,
        "profile" if arg.is_empty() => Input::Profile(None),
        "profile" => Input::Profile(Some(arg.to_string())),
        "forget" if !arg.is_empty() => Input::Forget(arg.to_string()),
        "memory" => Input::Memory,
        "reset" => Input::Reset,
        _ => Input::Unknown(line.to_string()),
    }
}

/// How a streamed turn ended.
struct TurnEnd {
    text: String,
    cancelled: bool,
    failed: bool,
}

pub async fn run(
    message: Option<String>,
    profile: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mind = super::open_with_model().await?;
    let mut profile = match profile {
        Some(name) => name.parse::<Profile>()?,
        None => mind.default_profile(),
    };

    if let Some(msg) = message {
        let stream = mind.chat(&[], &msg, profile).await?;
        let end = stream_turn(stream, "").await?;
        if end.failed {
            return Err("Generation failed".into());
        }
        return Ok(());
    }

    let records = mind.list_records().await?;
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        LocalMind — Interactive Chat          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Profile:   {profile}");
    println!("  Memory:    {} document(s)", records.len());
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!("  Ctrl+C stops a response; at the prompt it quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conv = Conversation::new();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Exit => break,
            Input::Help => print_help(),
            Input::Profile(None) => {
                println!("  Current profile: {profile} (temperature {:.2})", profile.temperature());
                let names: Vec<_> = Profile::all().iter().map(Profile::name).collect();
                println!("  Available: {}", names.join(", "));
            }
            Input::Profile(Some(name)) => match name.parse::<Profile>() {
                Ok(next) => {
                    profile = next;
                    println!("  Switched to {profile} (temperature {:.2})", profile.temperature());
                }
                Err(e) => eprintln!("  [Error] {e}"),
            },
            Input::Forget(id) => {
                let outcome = mind.forget(&id).await;
                match outcome.removed {
                    Some(record) => println!("  🗑️  Forgot {}", record.name),
                    None => println!("  No document with id {id}"),
                }
                if let Some(warning) = outcome.persistence {
                    eprintln!("  ⚠️  {warning}");
                }
            }
            Input::Memory => print_memory(&mind).await?,
            Input::Reset => {
                conv.clear();
                println!("  Conversation cleared.");
            }
            Input::Unknown(command) => {
                println!("  Unknown command: {command}. /help lists commands.");
            }
            Input::Message(text) => {
                let stream = match mind.chat(&conv.messages, &text, profile).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        eprintln!("  [Error] {e}");
                        println!();
                        continue;
                    }
                };
                let end = stream_turn(stream, "  Assistant > ").await?;
                debug!(
                    chars = end.text.len(),
                    cancelled = end.cancelled,
                    failed = end.failed,
                    turns = conv.messages.len() / 2 + 1,
                    "Turn finished"
                );
                conv.push(Message::user(text));
                if !end.text.is_empty() {
                    conv.push(Message::assistant(end.text));
                }
                if end.cancelled {
                    println!("  (stopped)");
                }
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}

/// Print chunks as they arrive; Ctrl+C cancels the generation.
async fn stream_turn(
    mut stream: ChatStream,
    prefix: &str,
) -> Result<TurnEnd, Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    let mut started = false;
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                stream.cancel();
                continue;
            }
        };
        let Some(event) = event else {
            return Ok(TurnEnd {
                text: stream.delivered().to_string(),
                cancelled: interrupted,
                failed: false,
            });
        };
        match event {
            ChatStreamEvent::Chunk { content } => {
                if !started {
                    write!(stdout, "{prefix}")?;
                    started = true;
                }
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            ChatStreamEvent::Done { text, cancelled, .. } => {
                writeln!(stdout)?;
                return Ok(TurnEnd {
                    text,
                    cancelled,
                    failed: false,
                });
            }
            ChatStreamEvent::Error { message, partial } => {
                writeln!(stdout)?;
                eprintln!("  [Error] {message}");
                return Ok(TurnEnd {
                    text: partial,
                    cancelled: false,
                    failed: true,
                });
            }
        }
    }
}

async fn print_memory(mind: &LocalMind) -> Result<(), Box<dyn std::error::Error>> {
    let records = mind.list_records().await?;
    if records.is_empty() {
        println!("  Nothing learned yet. Run `localmind learn <FILE>` in another shell.");
        return Ok(());
    }
    for record in &records {
        println!(
            "  {}  {}  ({:.1} KB)",
            record.id,
            record.name,
            super::kb(record.size_bytes)
        );
    }
    let context = mind.memory_context().await?;
    println!(
        "  ~{} / {} context tokens per turn",
        context.report.tokens, context.report.budget
    );
    Ok(())
}

fn print_help() {
    println!("  /profile [name]  Show or switch the generation profile");
    println!("  /forget <id>     Remove a learned document");
    println!("  /memory          List learned documents");
    println!("  /reset           Start a new conversation");
    println!("  /exit            Quit");
}
