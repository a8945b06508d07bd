//! Rendering of records as single log lines.
//!
//! Pure functions: no I/O, deterministic for the same input.
//!
//! ```text
//! GET http://localhost:3000/api/employee/5?expand=true
//! POST http://localhost:3000/echo hello there
//! 200: {"ID":5,"Name":"Ada"}
//! ```

use axum::http::StatusCode;
use std::borrow::Cow;

use crate::types::{CapturedBody, RequestSnapshot};

/// `{METHOD} {scheme}://{host}{path}[?{query}][ {body}]`
pub fn format_request(snapshot: &RequestSnapshot) -> String {
    let mut line = format!(
        "{} {}://{}{}",
        snapshot.method, snapshot.scheme, snapshot.host, snapshot.path
    );
    if !snapshot.query.is_empty() {
        line.push('?');
        line.push_str(&snapshot.query);
    }
    append_body(&mut line, &snapshot.body);
    line
}

/// `{code}:[ {body}]`
pub fn format_response(status: StatusCode, body: &CapturedBody) -> String {
    let mut line = format!("{}:", status.as_u16());
    append_body(&mut line, body);
    line
}

/// The body text, with a marker when it is not the full body.
pub fn format_body(body: &CapturedBody) -> Cow<'_, str> {
    match body {
        CapturedBody::Complete(text) => Cow::Borrowed(text.as_str()),
        CapturedBody::Truncated(text) => Cow::Owned(format!("{text}...[truncated]")),
        CapturedBody::Skipped(content_type) => Cow::Owned(format!("[{content_type} body not captured]")),
        CapturedBody::NotCaptured => Cow::Borrowed(""),
        CapturedBody::Incomplete { text, error } => {
            Cow::Owned(format!("{text}...[body read failed: {error}]"))
        }
    }
}

fn append_body(line: &mut String, body: &CapturedBody) {
    let body = format_body(body);
    if !body.is_empty() {
        line.push(' ');
        line.push_str(&body);
    }
}
