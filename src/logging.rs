use std::fs::{self, OpenOptions};
use std::path::PathBuf;

/// Location of the log file: `$XDG_STATE_HOME/deskmail/deskmail.log`,
/// falling back to `~/.local/state` and then the temp dir.
pub fn log_path() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("state")
    } else {
        std::env::temp_dir()
    };
    base.join("deskmail").join("deskmail.log")
}

/// Route the `log` facade into the log file. `RUST_LOG` overrides the
/// default `info` filter. Falls back to stderr if the file can't be opened.
pub fn init() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();

    let path = log_path();
    let file = path
        .parent()
        .map(fs::create_dir_all)
        .transpose()
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));

    match file {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => {
            eprintln!(
                "Could not open log file {}: {} (logging to stderr)",
                path.display(),
                e
            );
        }
    }

    // A second init (tests, repeated calls) is harmless.
    let _ = builder.try_init();
}

pub fn clear() -> Result<(), String> {
    let path = log_path();
    if !path.exists() {
        return Ok(());
    }
    fs::write(&path, b"").map_err(|e| format!("failed to clear log {}: {}", path.display(), e))
}

/// Cut `s` to at most `max_len` bytes on a char boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
