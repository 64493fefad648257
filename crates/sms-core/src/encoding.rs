//! Message text transforms required by each gateway.

use std::borrow::Cow;
use std::fmt::Write;

use crate::{Gateway, MessageType};

/// Rewrite `text` into the encoding `gateway` expects for `message_type`.
///
/// Plain text is passed through untouched. Unicode becomes decimal numeric
/// character references for CDAC and concatenated 4-digit uppercase hex
/// UTF-16 units for NIC.
pub fn encode(text: &str, message_type: MessageType, gateway: Gateway) -> Cow<'_, str> {
    match (message_type, gateway) {
        (MessageType::PlainText, _) => Cow::Borrowed(text),
        (MessageType::Unicode, Gateway::Cdac) => Cow::Owned(numeric_references(text)),
        (MessageType::Unicode, Gateway::Nic) => Cow::Owned(hex_units(text)),
    }
}

fn numeric_references(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 8);
    for c in text.chars() {
        // writing to a String cannot fail
        let _ = write!(out, "&#{};", c as u32);
    }
    out
}

fn hex_units(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 4);
    for unit in text.encode_utf16() {
        let _ = write!(out, "{:04X}", unit);
    }
    out
}

/// Inverse of the numeric character reference form.
///
/// Returns `None` if `encoded` is not a sequence of well-formed `&#N;` references.
pub fn decode_numeric_references(encoded: &str) -> Option<String> {
    let mut out = String::new();
    let mut rest = encoded;
    while !rest.is_empty() {
        let body = rest.strip_prefix("&#")?;
        let end = body.find(';')?;
        let code: u32 = body[..end].parse().ok()?;
        out.push(char::from_u32(code)?);
        rest = &body[end + 1..];
    }
    Some(out)
}
