mod api;
mod backend;
mod cli;
mod compose;
mod config;
mod logging;
mod session;

use api::client::ApiClient;
use api::types::MessageDetail;
use backend::{BackendCommand, BackendResponse};
use compose::QuoteComposer;
use config::Config;
use session::{MailboxSession, Severity};
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;

const ROW_WIDTH: usize = 100;

fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("deskmail").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("deskmail")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

pub fn run_token_command(cmd: &str) -> Result<String, String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| format!("failed to execute token command: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "token command exited with {}: {}",
            output.status, stderr
        ));
    }

    let token = String::from_utf8(output.stdout)
        .map_err(|e| format!("token command output is not valid UTF-8: {}", e))?;
    let token = token.trim();
    if token.is_empty() {
        return Err("token command printed nothing".to_string());
    }
    Ok(token.to_string())
}

type Channels = (
    MailboxSession,
    mpsc::Sender<BackendCommand>,
    mpsc::Receiver<BackendResponse>,
);

fn start_session(config: &Config) -> Result<Channels, String> {
    let token = run_token_command(&config.server.token_command)?;
    let client = ApiClient::new(
        &config.server.base_url,
        &token,
        config.server.list_timeout_secs,
        config.server.action_timeout_secs,
    );
    let (cmd_tx, resp_rx) = backend::spawn(client);
    let composer = QuoteComposer::new(
        &config.mail.date_format,
        config.mail.reply_prefix_regex.clone(),
        config.mail.forward_prefix_regex.clone(),
    );
    let session = MailboxSession::new(
        cmd_tx.clone(),
        config.mailboxes.clone(),
        config.mail.page_size,
        composer,
    );
    Ok((session, cmd_tx, resp_rx))
}

fn show_log() {
    let path = logging::log_path();
    if !path.exists() {
        eprintln!("No log file found at {}", path.display());
        std::process::exit(1);
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let status = Command::new(&pager).arg(&path).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => std::process::exit(s.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("Failed to launch pager '{}': {}", pager, e);
            std::process::exit(1);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut)
    }
}

fn format_row(msg: &MessageDetail, width: usize) -> String {
    let summary = &msg.summary;
    let unread = if summary.is_read { " " } else { "N" };
    let attach = if summary.has_attachments { "@" } else { " " };
    let from = summary.from.as_deref().unwrap_or("(unknown)");
    let subject = summary.subject.as_deref().unwrap_or("(no subject)");
    let date = summary
        .timestamp
        .render("%Y-%m-%d %H:%M")
        .unwrap_or_default();

    let from_width = 24.min(width.saturating_sub(24));
    let subj_width = width.saturating_sub(24 + from_width);

    format!(
        " {}{} {:16} {:from_w$} {}",
        unread,
        attach,
        truncate(&date, 16),
        truncate(from, from_width),
        truncate(subject, subj_width),
        from_w = from_width
    )
}

/// Print the first page of `mailbox` and exit non-zero if it can't be loaded.
fn print_mailbox(config: &Config, mailbox: &str) {
    let (mut session, cmd_tx, resp_rx) = match start_session(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = session.select_mailbox(mailbox) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    while session.is_loading() {
        match resp_rx.recv() {
            Ok(resp) => {
                session.on_response(resp);
            }
            Err(_) => {
                eprintln!("backend stopped unexpectedly");
                std::process::exit(1);
            }
        }
    }
    let _ = cmd_tx.send(BackendCommand::Shutdown);

    if let Some(n) = session.notification() {
        if n.severity == Severity::Error {
            eprintln!("{}", n.message);
            std::process::exit(1);
        }
    }

    let label = session
        .mailboxes()
        .iter()
        .find(|m| m.name == mailbox)
        .map(|m| m.label.as_str())
        .unwrap_or(mailbox);
    match session.total() {
        Some(total) => println!("{} ({} messages)", label, total),
        None => println!("{}", label),
    }
    println!("{}", "-".repeat(ROW_WIDTH));
    for msg in session.messages() {
        println!("{}", format_row(msg, ROW_WIDTH));
    }
    if session.has_more() {
        let remaining = session
            .total()
            .map(|t| format!("{} more", t.saturating_sub(session.offset() as u64)))
            .unwrap_or_else(|| "more".to_string());
        println!("({}; use --cli to page through)", remaining);
    }
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!();
    println!("Available options:");
    println!();
    println!("[server]                         # Required");
    println!("  base_url = \"https://crm.example.com/api\"  # API root (required)");
    println!("  token_command = \"pass show crm/token\"     # Shell command printing the API token (required)");
    println!("  list_timeout_secs = 60       # Timeout for message list requests (default: 60)");
    println!("  action_timeout_secs = 10     # Timeout for mark/delete requests (default: 10)");
    println!();
    println!("[mail]");
    println!("  page_size = 25               # Messages per page (default: 25)");
    println!("  date_format = \"%d.%m.%Y, %H:%M:%S\"  # strftime format for quoted dates");
    println!("  default_mailbox = \"INBOX\"    # Mailbox shown when none is given (default: first [[mailbox]])");
    println!("  reply_prefix_regex = \"(?i)^\\\\s*re:\"     # Skip 'Re: ' when matched (default: always prefix)");
    println!("  forward_prefix_regex = \"(?i)^\\\\s*fwd?:\" # Skip 'Fwd: ' when matched (default: always prefix)");
    println!();
    println!("[[mailbox]]                      # Repeatable; defaults to INBOX, INBOX.Sent, INBOX.Trash");
    println!("  name = \"INBOX.Archive\"       # Server mailbox name (required)");
    println!("  label = \"Archive\"            # Display label (default: name)");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: deskmail [OPTIONS]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --config=PATH    Use config file at PATH instead of default");
        eprintln!("  --mailbox=NAME   List the first page of NAME (default: default_mailbox)");
        eprintln!("  --cli            Run in JSON-over-stdin/stdout CLI mode");
        eprintln!("  --clear-log      Truncate the log file at startup");
        eprintln!("  --log            View the log file in $PAGER");
        eprintln!("  --help-cli       Print CLI mode protocol documentation");
        eprintln!("  --help-config    Print default config path and all options");
        eprintln!("  --help           Show this help");
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--clear-log") {
        if let Err(e) = logging::clear() {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }

    if args.iter().any(|a| a == "--log") {
        show_log();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-cli") {
        cli::print_help_cli();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-config") {
        print_help_config();
        std::process::exit(0);
    }

    logging::init();

    let config_path = args
        .iter()
        .find(|a| a.starts_with("--config="))
        .map(|a| PathBuf::from(&a["--config=".len()..]))
        .unwrap_or_else(default_config_path);

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config from {}: {}", config_path.display(), e);
            eprintln!("Create a config file with:");
            eprintln!();
            eprintln!("  [server]");
            eprintln!("  base_url = \"https://crm.example.com/api\"");
            eprintln!("  token_command = \"pass show crm/token\"");
            std::process::exit(1);
        }
    };
    log::info!(
        "Loaded config from {} ({} mailboxes)",
        config_path.display(),
        config.mailboxes.len()
    );

    if args.iter().any(|a| a == "--cli") {
        match start_session(&config) {
            Ok((session, cmd_tx, resp_rx)) => cli::run_cli(session, cmd_tx, resp_rx),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        std::process::exit(0);
    }

    let mailbox = args
        .iter()
        .find(|a| a.starts_with("--mailbox="))
        .map(|a| a["--mailbox=".len()..].to_string())
        .unwrap_or_else(|| config.mail.default_mailbox.clone());
    print_mailbox(&config, &mailbox);
}
