//! Qt Pro protocol codec.
//!
//! Requests are ASCII strings built from a header, a mnemonic, an optional
//! zone digit and an optional `=value`:
//!
//! ```text
//! CSGET,IPAD            system get
//! CZSET,MAXM1=12        zone 1 set
//! ALZONE2               every parameter of zone 2
//! ```
//!
//! Replies are wrapped in braces and carry comma-separated `key=value`
//! tokens after a header: `{CSGET,IPAD=172.16.10.141}`,
//! `{ACK,MAXM1=12}`, `{ALSYS=MACA=0050C28C2D4F,FIRM=6.7.2,LOCK=1}`.
//! Keys may carry the zone digit (`MAXM1`), which is stripped before the
//! reverse lookup. Keys that are not in the lookup table are dropped so
//! that newer firmware adding fields does not break decoding.
//!
//! The codec is pure: no IO, no state.

use std::collections::BTreeMap;

use qtpro_core::error::{Error, Result};
use qtpro_core::types::{Direction, Scope};
use qtpro_text_io::protocol::strip_line_endings;

use crate::api::{self, ParameterTable};

/// Decoded reply: semantic parameter name to raw value.
pub type ParsedResponse = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode one get or set request.
///
/// Fails with [`Error::UnknownParameter`] when `parameter` is not in the
/// table for `scope` and `direction`, and with [`Error::InvalidParameter`]
/// when the zone index does not fit in one digit or the value contains a
/// line break.
pub fn encode(
    scope: Scope,
    direction: Direction,
    parameter: &str,
    zone: Option<u8>,
    value: Option<&str>,
) -> Result<String> {
    let table = api::table(scope, direction);
    let mnemonic = table
        .mnemonic(parameter)
        .ok_or_else(|| Error::UnknownParameter {
            scope,
            direction,
            name: parameter.to_string(),
        })?;

    let mut command = String::with_capacity(24);
    command.push_str(table.header());
    command.push_str(mnemonic);
    if let Some(zone) = zone {
        push_zone(&mut command, zone)?;
    }
    if let Some(value) = value {
        if value.contains(['\r', '\n']) {
            return Err(Error::InvalidParameter(format!(
                "value for {parameter} contains a line break"
            )));
        }
        command.push('=');
        command.push_str(value);
    }
    Ok(command)
}

/// Encode a request for every parameter of a scope.
///
/// System scope ignores `zone`; zone scope requires it.
pub fn encode_all(scope: Scope, zone: Option<u8>) -> Result<String> {
    match scope {
        Scope::System => Ok(api::ALL_SYSTEM.to_string()),
        Scope::Zone => {
            let zone = zone.ok_or(Error::MissingZone)?;
            let mut command = String::from(api::ALL_ZONE);
            push_zone(&mut command, zone)?;
            Ok(command)
        }
    }
}

fn push_zone(command: &mut String, zone: u8) -> Result<()> {
    if zone > 9 {
        return Err(Error::InvalidParameter(format!(
            "zone index {zone} does not fit in one digit"
        )));
    }
    command.push(char::from(b'0' + zone));
    Ok(())
}

// ---------------------------------------------------------------------------
// Reply headers
// ---------------------------------------------------------------------------

/// Header expected inside the braces of a reply to a get or set.
///
/// Set acknowledgements use `ACK,` regardless of scope.
pub fn response_header(scope: Scope, direction: Direction) -> &'static str {
    match direction {
        Direction::Get => api::header(scope, direction),
        Direction::Set => api::ACK_HEADER,
    }
}

/// Header expected inside the braces of a reply to [`encode_all`].
pub fn all_response_header(scope: Scope, zone: Option<u8>) -> String {
    match (scope, zone) {
        (Scope::Zone, Some(zone)) => format!("{}{}=", api::ALL_ZONE, zone),
        (Scope::Zone, None) => format!("{}=", api::ALL_ZONE),
        (Scope::System, _) => format!("{}=", api::ALL_SYSTEM),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a reply against `header` and `table`.
///
/// Returns `None` only when the reply does not contain `{<header>...}`.
/// A reply that matches but contains no known keys decodes to an empty map.
/// Only the first line of the reply is considered.
pub fn decode(response: &str, header: &str, table: &ParameterTable) -> Option<ParsedResponse> {
    let body = capture(response, header)?;

    let mut parsed = ParsedResponse::new();
    for token in body.split(',') {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let key = strip_zone_digit(key);
        if let Some(name) = table.name_for(key) {
            parsed.insert(name.to_string(), value.to_string());
        }
    }
    Some(parsed)
}

/// The text between `{<header>` and the last `}` on the same line.
fn capture<'a>(response: &'a str, header: &str) -> Option<&'a str> {
    let open = format!("{{{header}");
    let start = response.find(&open)? + open.len();
    let rest = &response[start..];
    let line = rest
        .split(|c: char| c == '\r' || c == '\n')
        .next()
        .unwrap_or(rest);
    let end = line.rfind('}')?;
    Some(&line[..end])
}

/// Remove a single trailing zone digit from a reply key.
pub fn strip_zone_digit(key: &str) -> &str {
    match key.as_bytes().last() {
        Some(b) if b.is_ascii_digit() && key.len() > 1 => &key[..key.len() - 1],
        _ => key,
    }
}

/// Whether `response` is exactly the acknowledgement `{ACK,<token>}`,
/// ignoring trailing line endings.
pub fn ack_matches(response: &str, token: &str) -> bool {
    strip_line_endings(response) == format!("{{{}{}}}", api::ACK_HEADER, token)
}
