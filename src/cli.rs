use crate::api::types::{ActionKind, MessageDetail};
use crate::backend::{BackendCommand, BackendResponse};
use crate::compose::ComposeMode;
use crate::session::{MailboxSession, SessionError, SessionEvent, Severity};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::mpsc;

struct CliState {
    session: MailboxSession,
    cmd_tx: mpsc::Sender<BackendCommand>,
    resp_rx: mpsc::Receiver<BackendResponse>,
}

impl CliState {
    /// Feed backend responses into the session until nothing is in flight.
    fn settle(&mut self) -> Result<(), String> {
        while self.session.is_busy() {
            let resp = self
                .resp_rx
                .recv()
                .map_err(|_| "backend channel closed".to_string())?;
            self.session.on_response(resp);
        }
        Ok(())
    }

    fn notification_id(&self) -> Option<u64> {
        self.session.notification().map(|n| n.id)
    }

    /// The error banner raised since `before`, if any.
    fn new_error(&self, before: Option<u64>) -> Option<String> {
        self.session
            .notification()
            .filter(|n| n.severity == Severity::Error && Some(n.id) != before)
            .map(|n| n.message.clone())
    }

    fn list_state(&self) -> Value {
        json!({
            "mailbox": self.session.active_mailbox(),
            "offset": self.session.offset(),
            "limit": self.session.limit(),
            "total": self.session.total(),
            "has_more": self.session.has_more(),
            "selected": self.session.selection().count(),
        })
    }
}

fn ok_response(data: Value) -> Value {
    let mut obj = match data {
        Value::Object(m) => m,
        _ => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), data);
            m
        }
    };
    obj.insert("ok".to_string(), Value::Bool(true));
    Value::Object(obj)
}

fn err_response(msg: &str) -> Value {
    json!({"ok": false, "error": msg})
}

fn session_err(e: SessionError) -> Value {
    err_response(&e.to_string())
}

fn serialize_message(msg: &MessageDetail, headers_only: bool, max_body_chars: usize) -> Value {
    if headers_only {
        return json!(msg.summary);
    }
    let mut obj = json!(msg);
    let text = msg.body.plain_text();
    let (text, truncated) = if max_body_chars > 0 && text.chars().count() > max_body_chars {
        (text.chars().take(max_body_chars).collect::<String>(), true)
    } else {
        (text, false)
    };
    obj["is_html"] = json!(msg.body.is_html());
    obj["text"] = json!(text);
    obj["text_truncated"] = json!(truncated);
    obj
}

fn serialize_event(event: &SessionEvent) -> Value {
    match event {
        SessionEvent::Compose(seed) => json!({"type": "compose", "seed": seed}),
        SessionEvent::ActionComplete { kind, ids, mailbox } => json!({
            "type": "action_complete",
            "action": kind,
            "ids": ids,
            "mailbox": mailbox,
        }),
    }
}

fn str_field<'a>(input: &'a Value, field: &str) -> Result<&'a str, Value> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err_response(&format!("missing '{}' field", field)))
}

fn action_field(input: &Value) -> Result<ActionKind, Value> {
    let name = str_field(input, "action")?;
    ActionKind::parse(name).ok_or_else(|| err_response(&format!("unknown action '{}'", name)))
}

fn dispatch(state: &mut CliState, input: &Value) -> Value {
    let command = match input.get("command").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => return err_response("missing 'command' field"),
    };

    let result = match command {
        "list_mailboxes" => Ok(cmd_list_mailboxes(state)),
        "select_mailbox" => cmd_select_mailbox(state, input),
        "load_more" => cmd_load_more(state),
        "refresh" => cmd_refresh(state),
        "status" => Ok(cmd_status(state)),
        "list" => Ok(cmd_list(state, input)),
        "toggle" => cmd_toggle(state, input),
        "toggle_all" => cmd_toggle_all(state, input),
        "open" => cmd_open(state, input),
        "close" => Ok(ok_response(json!({"closed": state.session.close_message()}))),
        "action" => cmd_action(state, input),
        "detail_action" => cmd_detail_action(state, input),
        "compose" => cmd_compose(state, input),
        "dismiss" => Ok(cmd_dismiss(state, input)),
        _ => Err(err_response(&format!("unknown command '{}'", command))),
    };
    result.unwrap_or_else(|e| e)
}

// --- Command handlers ---

fn cmd_list_mailboxes(state: &CliState) -> Value {
    let list: Vec<Value> = state
        .session
        .mailboxes()
        .iter()
        .map(|m| json!({"name": m.name, "label": m.label}))
        .collect();
    ok_response(json!({
        "mailboxes": list,
        "active": state.session.active_mailbox(),
    }))
}

fn cmd_select_mailbox(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let name = str_field(input, "mailbox")?;
    let before = state.notification_id();
    state.session.select_mailbox(name).map_err(session_err)?;
    finish_load(state, before)
}

fn cmd_load_more(state: &mut CliState) -> Result<Value, Value> {
    let before = state.notification_id();
    let issued = state.session.load_more().map_err(session_err)?;
    if !issued {
        let mut resp = state.list_state();
        resp["loaded"] = json!(0);
        return Ok(ok_response(resp));
    }
    let offset = state.session.offset();
    let mut resp = finish_load(state, before)?;
    resp["loaded"] = json!(state.session.offset().saturating_sub(offset));
    Ok(resp)
}

fn cmd_refresh(state: &mut CliState) -> Result<Value, Value> {
    let before = state.notification_id();
    state.session.refresh().map_err(session_err)?;
    finish_load(state, before)
}

fn finish_load(state: &mut CliState, before: Option<u64>) -> Result<Value, Value> {
    state.settle().map_err(|e| err_response(&e))?;
    if let Some(msg) = state.new_error(before) {
        return Err(err_response(&msg));
    }
    Ok(ok_response(state.list_state()))
}

fn cmd_status(state: &CliState) -> Value {
    let s = &state.session;
    let mut resp = state.list_state();
    resp["generation"] = json!(s.generation());
    resp["selected_ids"] = json!(s.selected_ids());
    resp["load_state"] = json!(format!("{:?}", s.load_state()));
    resp["action_pending"] = json!(s.action_pending());
    resp["open"] = json!(s.open_detail().map(|m| m.id()));
    resp["notification"] = json!(s.notification());
    resp["can_load_more"] = json!(s.can_load_more());
    resp["can_refresh"] = json!(s.can_refresh());
    resp["can_dispatch"] = json!(s.can_dispatch());
    ok_response(resp)
}

fn cmd_list(state: &CliState, input: &Value) -> Value {
    let headers_only = input
        .get("headers_only")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let max_body_chars = input
        .get("max_body_chars")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    let selection = state.session.selection();
    let list: Vec<Value> = state
        .session
        .messages()
        .iter()
        .map(|m| {
            let mut obj = serialize_message(m, headers_only, max_body_chars);
            obj["selected"] = json!(selection.contains(m.id()));
            obj
        })
        .collect();

    let mut resp = state.list_state();
    resp["messages"] = json!(list);
    ok_response(resp)
}

fn cmd_toggle(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let id = str_field(input, "id")?;
    let selected = state.session.toggle(id).map_err(session_err)?;
    Ok(ok_response(json!({
        "id": id,
        "selected": selected,
        "count": state.session.selection().count(),
    })))
}

fn cmd_toggle_all(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let checked = input
        .get("checked")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| err_response("missing 'checked' field"))?;
    state.session.toggle_all(checked);
    Ok(ok_response(json!({
        "count": state.session.selection().count(),
        "all": state.session.is_all_selected(),
        "partial": state.session.is_partially_selected(),
    })))
}

fn cmd_open(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let id = str_field(input, "id")?;
    state.session.open_message(id).map_err(session_err)?;
    let msg = state
        .session
        .open_detail()
        .map(|m| serialize_message(m, false, 0))
        .unwrap_or(Value::Null);
    Ok(ok_response(json!({"message": msg})))
}

fn cmd_action(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let kind = action_field(input)?;
    let before = state.notification_id();
    let dispatched = match input.get("ids").and_then(|v| v.as_array()) {
        Some(arr) => {
            let mut ids = Vec::with_capacity(arr.len());
            for v in arr {
                match v.as_str() {
                    Some(s) => ids.push(s.to_string()),
                    None => return Err(err_response("'ids' must be an array of strings")),
                }
            }
            state.session.dispatch_action(kind, &ids)
        }
        None => state.session.dispatch_selected(kind),
    };
    dispatched.map_err(session_err)?;
    finish_action(state, before)
}

fn cmd_detail_action(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let kind = action_field(input)?;
    let before = state.notification_id();
    state.session.detail_action(kind).map_err(session_err)?;
    finish_action(state, before)
}

/// Wait for the action and its follow-up refresh. The action succeeded iff
/// it produced a completion event; a failed refresh afterwards is reported
/// alongside rather than as a failure.
fn finish_action(state: &mut CliState, before: Option<u64>) -> Result<Value, Value> {
    state.settle().map_err(|e| err_response(&e))?;
    let events = state.session.take_events();
    let completed = events
        .iter()
        .any(|e| matches!(e, SessionEvent::ActionComplete { .. }));
    if !completed {
        let msg = state
            .new_error(before)
            .unwrap_or_else(|| "action did not complete".to_string());
        return Err(err_response(&msg));
    }

    let mut resp = state.list_state();
    resp["events"] = json!(events.iter().map(serialize_event).collect::<Vec<_>>());
    resp["notification"] = json!(state.session.notification());
    resp["open"] = json!(state.session.open_detail().map(|m| m.id()));
    Ok(ok_response(resp))
}

fn cmd_compose(state: &mut CliState, input: &Value) -> Result<Value, Value> {
    let mode_name = str_field(input, "mode")?;
    let mode = ComposeMode::parse(mode_name)
        .ok_or_else(|| err_response(&format!("unknown compose mode '{}'", mode_name)))?;
    let seed = state.session.compose(mode).map_err(session_err)?;
    // The seed is returned directly; drop the queued copy.
    state.session.discard_compose_events();
    Ok(ok_response(json!({
        "seed": seed,
        "content_html": seed.content_html(),
    })))
}

fn cmd_dismiss(state: &mut CliState, input: &Value) -> Value {
    let dismissed = match input.get("id").and_then(|v| v.as_u64()) {
        Some(id) => state.session.dismiss_notification_id(id),
        None => state.session.dismiss_notification().is_some(),
    };
    ok_response(json!({"dismissed": dismissed}))
}

pub fn run_cli(
    session: MailboxSession,
    cmd_tx: mpsc::Sender<BackendCommand>,
    resp_rx: mpsc::Receiver<BackendResponse>,
) {
    let mut state = CliState {
        session,
        cmd_tx,
        resp_rx,
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(input) => dispatch(&mut state, &input),
            Err(e) => err_response(&format!("JSON parse error: {}", e)),
        };
        let _ = serde_json::to_writer(&mut stdout, &response);
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }

    let _ = state.cmd_tx.send(BackendCommand::Shutdown);
}

pub fn print_help_cli() {
    print!(
        r#"deskmail --cli: JSON-over-stdin/stdout CLI mode
===============================================

Protocol: Newline-Delimited JSON (NDJSON)
- Send one JSON object per line to stdin
- Receive one JSON response per line from stdout
- Responses have {{"ok": true, ...}} on success or {{"ok": false, "error": "..."}} on failure
- Every command waits until its requests (and any follow-up refresh) finish

Mailbox Commands
----------------
list_mailboxes: Configured mailboxes and the active one.
   > {{"command": "list_mailboxes"}}
   < {{"ok": true, "mailboxes": [{{"name": "INBOX", "label": "Inbox"}}, ...], "active": null}}

select_mailbox: Switch mailbox and load its first page.
   > {{"command": "select_mailbox", "mailbox": "INBOX"}}
   < {{"ok": true, "mailbox": "INBOX", "offset": 25, "limit": 25, "total": 30, "has_more": true, "selected": 0}}

load_more: Load the next page (no-op when nothing is left).
   > {{"command": "load_more"}}
   < {{"ok": true, ..., "loaded": 5}}

refresh: Reload the first page of the active mailbox.
   > {{"command": "refresh"}}

status: Pagination, selection, open message and current notification.
   > {{"command": "status"}}

Message Commands
----------------
list: Loaded messages in order.
   > {{"command": "list"}}
   Optional: headers_only (bool), max_body_chars (int, 0=unlimited)
   < {{"ok": true, ..., "messages": [{{"id": "1", "subject": "...", "selected": false, ...}}]}}

toggle:     {{"command": "toggle", "id": "1"}}
toggle_all: {{"command": "toggle_all", "checked": true}}
open:       {{"command": "open", "id": "1"}}
close:      {{"command": "close"}}

Actions
-------
action: Apply to the given ids, or to the selection when "ids" is omitted.
   > {{"command": "action", "action": "mark_read", "ids": ["1", "2"]}}
   < {{"ok": true, ..., "events": [{{"type": "action_complete", ...}}], "notification": {{...}}}}
   Actions: mark_read, mark_unread, delete

detail_action: Apply to the open message.
   > {{"command": "detail_action", "action": "delete"}}

Compose
-------
compose: Reply/forward seed for the open message.
   > {{"command": "compose", "mode": "reply"}}
   Modes: reply, reply_all, forward
   < {{"ok": true, "seed": {{"to": [...], "subject": "Re: ...", "content": "...", "related": {{...}}}}, "content_html": "..."}}

dismiss: Clear the notification (optionally only if "id" matches).
   > {{"command": "dismiss"}}
"#
    );
}
