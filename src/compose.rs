use crate::api::types::MessageDetail;
use regex::Regex;
use serde::{Deserialize, Serialize};

const NO_SUBJECT: &str = "(no subject)";
const UNKNOWN_SENDER: &str = "Unknown sender";
const UNKNOWN_DATE: &str = "Unknown date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeMode {
    Reply,
    ReplyAll,
    Forward,
}

impl ComposeMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reply" => Some(ComposeMode::Reply),
            "reply_all" | "reply-all" => Some(ComposeMode::ReplyAll),
            "forward" => Some(ComposeMode::Forward),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedMessage {
    pub id: String,
    pub mailbox: String,
    pub mode: ComposeMode,
}

/// Seed handed to the external compose UI. Reply-all folds the original cc
/// into `to`, so there is no separate cc list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeSeed {
    pub to: Vec<String>,
    pub subject: String,
    pub content: String,
    pub related: RelatedMessage,
}

impl ComposeSeed {
    /// Rich-text form: an empty paragraph to type into, then the quote.
    pub fn content_html(&self) -> String {
        format!("<p><br></p>{}", escape_html(&self.content).replace('\n', "<br>"))
    }
}

pub struct QuoteComposer {
    date_format: String,
    reply_guard: Option<Regex>,
    forward_guard: Option<Regex>,
}

impl QuoteComposer {
    /// Without guards every subject gets a fresh `Re: ` or `Fwd: `.
    pub fn new(
        date_format: &str,
        reply_guard: Option<Regex>,
        forward_guard: Option<Regex>,
    ) -> Self {
        QuoteComposer {
            date_format: date_format.to_string(),
            reply_guard,
            forward_guard,
        }
    }

    pub fn compose(&self, source: &MessageDetail, mode: ComposeMode) -> ComposeSeed {
        let summary = &source.summary;

        let to = match mode {
            ComposeMode::Reply => summary.from.iter().cloned().collect(),
            ComposeMode::ReplyAll => unique_recipients(
                summary
                    .from
                    .iter()
                    .chain(source.to.iter())
                    .chain(source.cc.iter()),
            ),
            ComposeMode::Forward => Vec::new(),
        };

        let original_subject = summary.subject.as_deref().unwrap_or(NO_SUBJECT);
        let subject = match mode {
            ComposeMode::Reply | ComposeMode::ReplyAll => {
                prefixed(original_subject, "Re: ", self.reply_guard.as_ref())
            }
            ComposeMode::Forward => {
                prefixed(original_subject, "Fwd: ", self.forward_guard.as_ref())
            }
        };

        let date = summary
            .timestamp
            .render(&self.date_format)
            .unwrap_or_else(|| UNKNOWN_DATE.to_string());

        let content = format!(
            "\n\n----- Original message -----\nFrom: {}\nDate: {}\nSubject: {}\n\n{}",
            summary.from.as_deref().unwrap_or(UNKNOWN_SENDER),
            date,
            original_subject,
            source.body.plain_text()
        );

        ComposeSeed {
            to,
            subject,
            content,
            related: RelatedMessage {
                id: summary.id.clone(),
                mailbox: source.mailbox.clone(),
                mode,
            },
        }
    }
}

fn prefixed(subject: &str, prefix: &str, guard: Option<&Regex>) -> String {
    if guard.is_some_and(|g| g.is_match(subject)) {
        subject.to_string()
    } else {
        format!("{}{}", prefix, subject)
    }
}

/// Lower-cased address inside `<...>`, or the whole string when there are
/// no brackets.
fn bare_address(addr: &str) -> String {
    let inner = match (addr.rfind('<'), addr.rfind('>')) {
        (Some(start), Some(end)) if start < end => &addr[start + 1..end],
        _ => addr,
    };
    inner.trim().to_lowercase()
}

fn unique_recipients<'a>(addrs: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for addr in addrs {
        let key = bare_address(addr);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(addr.clone());
    }
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
