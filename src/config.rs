use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub token_command: String,
    pub list_timeout_secs: u64,
    pub action_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    pub name: String,
    pub label: String,
}

#[derive(Debug)]
pub struct MailConfig {
    pub page_size: u32,
    pub date_format: String,
    pub default_mailbox: String,
    /// Subjects matching this are not prefixed again on reply. Unset means
    /// always prefix.
    pub reply_prefix_regex: Option<Regex>,
    pub forward_prefix_regex: Option<Regex>,
}

#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub mail: MailConfig,
    pub mailboxes: Vec<MailboxEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    server: Option<RawServerConfig>,
    #[serde(default)]
    mail: RawMailConfig,
    #[serde(default)]
    mailbox: Vec<RawMailbox>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    base_url: Option<String>,
    token_command: Option<String>,
    #[serde(default = "default_list_timeout_secs")]
    list_timeout_secs: u64,
    #[serde(default = "default_action_timeout_secs")]
    action_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMailConfig {
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default)]
    default_mailbox: Option<String>,
    #[serde(default)]
    reply_prefix_regex: Option<String>,
    #[serde(default)]
    forward_prefix_regex: Option<String>,
}

impl Default for RawMailConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            date_format: default_date_format(),
            default_mailbox: None,
            reply_prefix_regex: None,
            forward_prefix_regex: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMailbox {
    name: Option<String>,
    label: Option<String>,
}

fn default_list_timeout_secs() -> u64 {
    60
}

fn default_action_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    25
}

fn default_date_format() -> String {
    "%d.%m.%Y, %H:%M:%S".to_string()
}

fn default_mailboxes() -> Vec<MailboxEntry> {
    [("INBOX", "Inbox"), ("INBOX.Sent", "Sent"), ("INBOX.Trash", "Trash")]
        .iter()
        .map(|(name, label)| MailboxEntry {
            name: name.to_string(),
            label: label.to_string(),
        })
        .collect()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let server = raw
            .server
            .ok_or_else(|| ConfigError::Parse("missing [server] section".to_string()))?;
        let base_url = require_field(server.base_url, "missing base_url in [server]")?;
        let token_command =
            require_field(server.token_command, "missing token_command in [server]")?;
        if server.list_timeout_secs == 0 || server.action_timeout_secs == 0 {
            return Err(ConfigError::Parse(
                "timeouts in [server] must be greater than 0".to_string(),
            ));
        }

        if StrftimeItems::new(&raw.mail.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Parse(format!(
                "invalid date_format '{}' in [mail]",
                raw.mail.date_format
            )));
        }

        let reply_prefix_regex = raw
            .mail
            .reply_prefix_regex
            .as_deref()
            .map(|p| compile_regex(p, "reply_prefix_regex"))
            .transpose()?;
        let forward_prefix_regex = raw
            .mail
            .forward_prefix_regex
            .as_deref()
            .map(|p| compile_regex(p, "forward_prefix_regex"))
            .transpose()?;

        if raw.mail.page_size == 0 {
            return Err(ConfigError::Parse(
                "page_size must be greater than 0 in [mail]".to_string(),
            ));
        }

        let mailboxes = if raw.mailbox.is_empty() {
            default_mailboxes()
        } else {
            let mut entries: Vec<MailboxEntry> = Vec::new();
            for (i, mbox) in raw.mailbox.into_iter().enumerate() {
                let name = require_field(
                    mbox.name,
                    &format!("missing name in [[mailbox]] entry {}", i + 1),
                )?;
                if entries.iter().any(|e| e.name == name) {
                    return Err(ConfigError::Parse(format!(
                        "duplicate mailbox name '{}'",
                        name
                    )));
                }
                let label = mbox.label.unwrap_or_else(|| name.clone());
                entries.push(MailboxEntry { name, label });
            }
            entries
        };

        let default_mailbox = match raw.mail.default_mailbox {
            Some(name) => {
                if !mailboxes.iter().any(|m| m.name == name) {
                    return Err(ConfigError::Parse(format!(
                        "default_mailbox '{}' is not a configured mailbox",
                        name
                    )));
                }
                name
            }
            None => mailboxes[0].name.clone(),
        };

        Ok(Config {
            server: ServerConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                token_command,
                list_timeout_secs: server.list_timeout_secs,
                action_timeout_secs: server.action_timeout_secs,
            },
            mail: MailConfig {
                page_size: raw.mail.page_size,
                date_format: raw.mail.date_format,
                default_mailbox,
                reply_prefix_regex,
                forward_prefix_regex,
            },
            mailboxes,
        })
    }
}

fn compile_regex(pattern: &str, key: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| {
        ConfigError::Parse(format!("invalid regex '{}' for {}: {}", pattern, key, e))
    })
}

fn require_field(value: Option<String>, err: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::Parse(err.to_string()))
}
