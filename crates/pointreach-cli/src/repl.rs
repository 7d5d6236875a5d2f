//! REPL – the operator console.
//!
//! Bare words are the idle-manager command vocabulary and are answered with
//! its reply tokens:
//!   help | move [index] | dontMove | okMove
//!
//! Slash-commands control the console itself:
//!   /help         – show this list
//!   /status       – motion gate and bus listeners
//!   /config       – print the active configuration
//!   /save         – write the active configuration to disk
//!   /quit | /exit – shut pointreach down

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pointreach_kernel::{IdleManager, IdleReply};
use pointreach_middleware::{EventBus, Topic};

use crate::config::{self, Config};

/// What the loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything the console commands act on.
pub struct Console {
    pub idle: Arc<IdleManager>,
    pub cfg: Config,
    pub bus: EventBus,
}

/// Read commands from stdin until `/quit`, end of input, or `shutdown`.
///
/// End of input only closes the console; `/quit` also sets `shutdown`.
pub fn run(console: Console, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "pointreach>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                println!("  {}", "Console closed; running until interrupted.".dimmed());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        if dispatch(&console, line.trim()) == Flow::Quit {
            println!("{}", "Goodbye.".green());
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
    }
}

pub fn dispatch(console: &Console, cmd: &str) -> Flow {
    match cmd {
        "" => {}
        "/help" => cmd_help(),
        "/status" => cmd_status(console),
        "/config" => cmd_config(&console.cfg),
        "/save" => cmd_save(&console.cfg),
        "/quit" | "/exit" => return Flow::Quit,
        other if other.starts_with('/') => {
            println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            );
        }
        idle_cmd => print_reply(&console.idle.respond(idle_cmd)),
    }
    Flow::Continue
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "pointreach Commands".bold().underline());
    println!("  {}     – idle-manager commands", "help".bold().cyan());
    println!("  {}   – motion gate and bus listeners", "/status".bold().cyan());
    println!("  {}   – print the active configuration", "/config".bold().cyan());
    println!("  {}     – save it to {}", "/save".bold().cyan(), config::config_path().display());
    println!("  {} – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(console: &Console) {
    let gate = if console.idle.may_move() {
        "permitted".green()
    } else {
        "forbidden".yellow()
    };
    println!("  Idle motions     : {gate}");
    println!("  Bridge           : {}", console.cfg.bridge_addr.bold());
    println!(
        "  Target listeners : {}",
        console.bus.subscriber_count(Topic::TargetPoints)
    );
    println!(
        "  Frames           : {} → {}",
        console.cfg.camera_frame, console.cfg.base_frame
    );
}

fn cmd_config(cfg: &Config) {
    match toml_preview(cfg) {
        Ok(raw) => println!("{raw}"),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_save(cfg: &Config) {
    match config::save(cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Config saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

fn toml_preview(cfg: &Config) -> Result<String, String> {
    toml::to_string_pretty(cfg).map_err(|e| e.to_string())
}

fn print_reply(reply: &IdleReply) {
    match reply {
        IdleReply::Ack => println!("{}", reply.to_string().green()),
        IdleReply::Nack => println!("{} (type {})", reply.to_string().red(), "help".bold()),
        IdleReply::Help(_) => println!("{reply}"),
        IdleReply::Error(detail) => println!("{}: {}", reply.to_string().red(), detail),
    }
}
