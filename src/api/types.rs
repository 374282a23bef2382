use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// Wire types for GET /email/messages/

/// The list endpoint answers either `{ emails, total_count }` or a bare array.
/// A missing `total_count` is treated like a bare array: no known total.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListPayload {
    Flat(Vec<WireEmail>),
    Wrapped {
        #[serde(default)]
        emails: Option<Vec<WireEmail>>,
        #[serde(default)]
        total_count: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct WireEmail {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "de_addresses")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "de_addresses")]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_iso: Option<String>,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_html: bool,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub mailbox: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdField {
    Text(String),
    Number(serde_json::Number),
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdField::deserialize(deserializer)? {
        IdField::Text(s) => s,
        IdField::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AddressField {
    List(Vec<String>),
    Text(String),
}

fn de_addresses<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<AddressField>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(AddressField::Text(s)) => split_addresses(&s),
        Some(AddressField::List(list)) => list
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Split a header-style address list on commas that are not inside a quoted
/// display name or an angle-bracketed address.
pub fn split_addresses(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(c);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(c);
            }
            ',' if !in_quotes && !in_angle => {
                let part = current.trim();
                if !part.is_empty() {
                    out.push(part.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let part = current.trim();
    if !part.is_empty() {
        out.push(part.to_string());
    }
    out
}

// Domain types

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Attachment {
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_kb: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Timestamp {
    pub iso: Option<DateTime<FixedOffset>>,
    pub display: Option<String>,
}

impl Timestamp {
    /// Render with `fmt` when the server gave a parseable RFC 3339 date,
    /// otherwise fall back to the server's own display string.
    pub fn render(&self, fmt: &str) -> Option<String> {
        match (&self.iso, &self.display) {
            (Some(dt), _) => Some(dt.format(fmt).to_string()),
            (None, Some(display)) => Some(display.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageSummary {
    pub id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub preview: String,
    pub timestamp: Timestamp,
    pub is_read: bool,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Plain { text: String },
    Html { html: String, plain: Option<String> },
    Empty,
}

impl MessageBody {
    pub fn is_html(&self) -> bool {
        matches!(self, MessageBody::Html { .. })
    }

    /// Plain-text rendition, converting HTML when no plain part exists.
    pub fn plain_text(&self) -> String {
        match self {
            MessageBody::Plain { text } => text.clone(),
            MessageBody::Html {
                plain: Some(plain), ..
            } => plain.clone(),
            MessageBody::Html { html, plain: None } => {
                html2text::from_read(html.as_bytes(), 80).unwrap_or_default()
            }
            MessageBody::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    pub body: MessageBody,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub mailbox: String,
}

impl MessageDetail {
    pub fn id(&self) -> &str {
        &self.summary.id
    }
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageDetail>,
    /// `None` when the server answered with a bare array.
    pub total: Option<u64>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl WireEmail {
    pub fn into_detail(self, requested_mailbox: &str) -> MessageDetail {
        let body_plain = non_empty(self.body_plain);
        let body_html = non_empty(self.body_html);
        let body = match non_empty(self.body) {
            Some(body) if self.is_html => MessageBody::Html {
                html: body,
                plain: body_plain,
            },
            Some(text) => MessageBody::Plain { text },
            None => match (body_html, body_plain) {
                (Some(html), plain) => MessageBody::Html { html, plain },
                (None, Some(text)) => MessageBody::Plain { text },
                (None, None) => MessageBody::Empty,
            },
        };

        let iso = self
            .date_iso
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok());
        let attachments = self.attachments.unwrap_or_default();
        let preview = match non_empty(self.content_preview) {
            Some(p) => p,
            None => preview_from(&body.plain_text()),
        };

        MessageDetail {
            summary: MessageSummary {
                id: self.id,
                from: non_empty(self.from),
                subject: non_empty(self.subject),
                preview,
                timestamp: Timestamp {
                    iso,
                    display: non_empty(self.date),
                },
                is_read: self.is_read,
                has_attachments: !attachments.is_empty(),
            },
            body,
            to: self.to,
            cc: self.cc,
            attachments,
            mailbox: non_empty(self.mailbox).unwrap_or_else(|| requested_mailbox.to_string()),
        }
    }
}

const PREVIEW_CHARS: usize = 100;

fn preview_from(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

impl ListPayload {
    pub fn into_page(self, requested_mailbox: &str) -> MessagePage {
        let (emails, total) = match self {
            ListPayload::Flat(emails) => (emails, None),
            ListPayload::Wrapped {
                emails,
                total_count,
            } => (emails.unwrap_or_default(), total_count),
        };
        MessagePage {
            messages: emails
                .into_iter()
                .map(|e| e.into_detail(requested_mailbox))
                .collect(),
            total,
        }
    }
}

// POST /email/messages/action/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MarkRead,
    MarkUnread,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::MarkRead => "mark_read",
            ActionKind::MarkUnread => "mark_unread",
            ActionKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mark_read" => Some(ActionKind::MarkRead),
            "mark_unread" => Some(ActionKind::MarkUnread),
            "delete" => Some(ActionKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
pub struct ActionRequest<'a> {
    pub action: ActionKind,
    pub email_ids: &'a [String],
    pub mailbox: &'a str,
}

/// Error payload on non-2xx responses. Keys vary by endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorPayload {
    pub fn into_detail(self) -> Option<String> {
        non_empty(self.error)
            .or_else(|| non_empty(self.detail))
            .or_else(|| non_empty(self.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrapped_payload() {
        let data = json!({
            "emails": [{
                "id": "17",
                "from": "Alice <alice@example.com>",
                "to": "bob@example.com, \"Doe, Carol\" <carol@example.com>",
                "subject": "Invoice",
                "date": "15.01.2025 10:30",
                "date_iso": "2025-01-15T10:30:00+03:00",
                "content_preview": "Please find...",
                "body_plain": "Please find attached.",
                "body_html": "",
                "is_read": false,
                "attachments": [{"filename": "inv.pdf", "content_type": "application/pdf", "size_kb": 12.5}],
                "mailbox": "INBOX"
            }],
            "total_count": 42
        });
        let payload: ListPayload = serde_json::from_value(data).unwrap();
        let page = payload.into_page("INBOX");

        assert_eq!(page.total, Some(42));
        assert_eq!(page.messages.len(), 1);
        let msg = &page.messages[0];
        assert_eq!(msg.id(), "17");
        assert_eq!(msg.to, vec!["bob@example.com", "\"Doe, Carol\" <carol@example.com>"]);
        assert_eq!(
            msg.body,
            MessageBody::Plain {
                text: "Please find attached.".to_string()
            }
        );
        assert!(msg.summary.has_attachments);
        assert!(msg.summary.timestamp.iso.is_some());
    }

    #[test]
    fn test_wrapped_payload_missing_fields() {
        let payload: ListPayload = serde_json::from_value(json!({})).unwrap();
        let page = payload.into_page("INBOX");
        assert!(page.messages.is_empty());
        assert_eq!(page.total, None);

        let payload: ListPayload =
            serde_json::from_value(json!({"emails": [{"id": 5}]})).unwrap();
        let page = payload.into_page("INBOX.Sent");
        assert_eq!(page.total, None);
        assert_eq!(page.messages[0].id(), "5");
        assert_eq!(page.messages[0].mailbox, "INBOX.Sent");
    }

    #[test]
    fn test_flat_payload_has_no_total() {
        let payload: ListPayload = serde_json::from_value(json!([
            {"id": 1, "subject": "one"},
            {"id": "2", "subject": null, "from": ""}
        ]))
        .unwrap();
        let page = payload.into_page("INBOX");
        assert_eq!(page.total, None);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[1].summary.subject, None);
        assert_eq!(page.messages[1].summary.from, None);
    }

    #[test]
    fn test_body_variants() {
        let email: WireEmail = serde_json::from_value(json!({
            "id": "1", "body": "<p>Hi</p>", "is_html": true
        }))
        .unwrap();
        let detail = email.into_detail("INBOX");
        assert!(detail.body.is_html());
        assert!(detail.body.plain_text().contains("Hi"));
        assert_eq!(detail.summary.preview, "Hi");

        let email: WireEmail = serde_json::from_value(json!({
            "id": "2", "body_plain": "  ", "body_html": null
        }))
        .unwrap();
        assert_eq!(email.into_detail("INBOX").body, MessageBody::Empty);
    }

    #[test]
    fn test_address_list_forms() {
        let email: WireEmail = serde_json::from_value(json!({
            "id": "1",
            "to": ["a@example.com", " ", "b@example.com"],
            "cc": null
        }))
        .unwrap();
        assert_eq!(email.to, vec!["a@example.com", "b@example.com"]);
        assert!(email.cc.is_empty());

        assert_eq!(
            split_addresses("<x@y.z>, Name <n@y.z>,,"),
            vec!["<x@y.z>", "Name <n@y.z>"]
        );
    }

    #[test]
    fn test_timestamp_render_fallback() {
        let ts = Timestamp {
            iso: DateTime::parse_from_rfc3339("2025-01-15T10:30:00+03:00").ok(),
            display: Some("yesterday".to_string()),
        };
        assert_eq!(
            ts.render("%d.%m.%Y, %H:%M:%S").as_deref(),
            Some("15.01.2025, 10:30:00")
        );

        let ts = Timestamp {
            iso: None,
            display: Some("yesterday".to_string()),
        };
        assert_eq!(ts.render("%Y").as_deref(), Some("yesterday"));
        assert_eq!(Timestamp::default().render("%Y"), None);
    }

    #[test]
    fn test_action_request_wire_format() {
        let ids = vec!["3".to_string(), "7".to_string()];
        let req = ActionRequest {
            action: ActionKind::MarkRead,
            email_ids: &ids,
            mailbox: "INBOX",
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"action": "mark_read", "email_ids": ["3", "7"], "mailbox": "INBOX"})
        );
        assert_eq!(ActionKind::parse("delete"), Some(ActionKind::Delete));
        assert_eq!(ActionKind::parse("archive"), None);
    }

    #[test]
    fn test_error_payload_key_precedence() {
        let p: ErrorPayload =
            serde_json::from_value(json!({"detail": "d", "message": "m"})).unwrap();
        assert_eq!(p.into_detail().as_deref(), Some("d"));
        let p: ErrorPayload =
            serde_json::from_value(json!({"error": "IMAP down", "error_type": "x"})).unwrap();
        assert_eq!(p.into_detail().as_deref(), Some("IMAP down"));
        assert_eq!(ErrorPayload::default().into_detail(), None);
    }
}
