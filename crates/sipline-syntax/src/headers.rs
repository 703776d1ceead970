// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Header field parsers.
//!
//! Each parser is a pure function from `(lowercased name, field text)` to one
//! or more typed headers. The default dispatch table registers the headers
//! the stack must understand, long and compact forms alike; everything else
//! falls back to a generic header in the parse loop.

use std::collections::HashMap;

use sipline_core::{CSeq, Header, Method, NameAddr, Params, Uri, Via, ViaHop, MAX_CSEQ};
use smol_str::SmolStr;

use crate::error::SyntaxError;
use crate::params::{lowercase_keys, parse_params, ABNF_WS};
use crate::uri::{parse_host_port, parse_uri};

/// A header parser turns raw field text into typed headers.
///
/// Receives arguments of the form `("max-forwards", "70")`.
pub type HeaderParser = fn(&str, &str) -> Result<Vec<Header>, SyntaxError>;

/// The standard set of header parsers, keyed by lowercase header name.
pub(crate) fn default_header_parsers() -> HashMap<SmolStr, HeaderParser> {
    let entries: [(&str, HeaderParser); 14] = [
        ("to", parse_address_header),
        ("t", parse_address_header),
        ("from", parse_address_header),
        ("f", parse_address_header),
        ("contact", parse_address_header),
        ("m", parse_address_header),
        ("call-id", parse_call_id),
        ("i", parse_call_id),
        ("cseq", parse_cseq),
        ("via", parse_via_header),
        ("v", parse_via_header),
        ("max-forwards", parse_max_forwards),
        ("content-length", parse_content_length),
        ("l", parse_content_length),
    ];
    entries
        .into_iter()
        .map(|(name, parser)| (SmolStr::new(name), parser))
        .collect()
}

/// Parses a To, From, or Contact field (long or compact form).
///
/// The field text is split into comma-separated address sections, honouring
/// `<...>` brackets and quoted strings. `To` and `From` permit a single
/// section and reject the wildcard URI; `Contact` permits many sections and
/// allows the bare `*`, but only without display name or parameters.
pub fn parse_address_header(name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let mut headers = Vec::new();

    for (idx, section) in split_address_sections(text).into_iter().enumerate() {
        let (display_name, uri, params) = parse_address_value(section)?;

        match name {
            "to" | "t" | "from" | "f" => {
                if idx > 0 {
                    return Err(SyntaxError::HeaderParse(format!(
                        "multiple {} sections in \"{}\"",
                        if name.starts_with('t') { "To" } else { "From" },
                        text
                    )));
                }
                if uri.is_wildcard() {
                    return Err(SyntaxError::HeaderParse(format!(
                        "wildcard URI not permitted outside Contact: \"{}\"",
                        text
                    )));
                }
                let addr = NameAddr {
                    display_name,
                    uri,
                    params,
                };
                headers.push(if name.starts_with('t') {
                    Header::To(addr)
                } else {
                    Header::From(addr)
                });
            }
            "contact" | "m" => {
                if uri.is_wildcard() {
                    if !params.is_empty() {
                        return Err(SyntaxError::HeaderParse(format!(
                            "wildcard Contact must carry no parameters: \"{}\"",
                            text
                        )));
                    }
                    if display_name.is_some() {
                        return Err(SyntaxError::HeaderParse(format!(
                            "wildcard Contact must carry no display name: \"{}\"",
                            text
                        )));
                    }
                }
                headers.push(Header::Contact(NameAddr {
                    display_name,
                    uri,
                    params,
                }));
            }
            other => {
                return Err(SyntaxError::HeaderParse(format!(
                    "\"{}\" is not an address-form header",
                    other
                )))
            }
        }
    }

    Ok(headers)
}

/// Parses a Call-ID field: an opaque token with no whitespace or semicolons.
pub fn parse_call_id(_name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let value = text.trim();
    if value.is_empty() {
        return Err(SyntaxError::HeaderParse("empty Call-ID body".into()));
    }
    if value.bytes().any(|b| ABNF_WS.contains(&b)) {
        return Err(SyntaxError::HeaderParse(format!(
            "unexpected whitespace in Call-ID body \"{}\"",
            value
        )));
    }
    if value.contains(';') {
        return Err(SyntaxError::HeaderParse(format!(
            "unexpected semicolon in Call-ID body \"{}\"",
            value
        )));
    }
    Ok(vec![Header::CallId(SmolStr::new(value))])
}

/// Parses a CSeq field: sequence number (at most 2³¹−1) and method token.
pub fn parse_cseq(_name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let parts: Vec<&str> = text.split_ascii_whitespace().collect();
    if parts.len() != 2 {
        return Err(SyntaxError::HeaderParse(format!(
            "CSeq field should have precisely one whitespace section: \"{}\"",
            text
        )));
    }

    let seq = parts[0].parse::<u64>().map_err(|_| {
        SyntaxError::HeaderParse(format!("invalid CSeq number in \"{}\"", text))
    })?;
    if seq > u64::from(MAX_CSEQ) {
        return Err(SyntaxError::HeaderParse(format!(
            "CSeq {} exceeds the maximum permitted value 2**31 - 1",
            seq
        )));
    }

    if parts[1].contains(';') {
        return Err(SyntaxError::HeaderParse(format!(
            "unexpected ';' in CSeq body: \"{}\"",
            text
        )));
    }

    Ok(vec![Header::CSeq(CSeq {
        seq: seq as u32,
        method: Method::from_token(parts[1]),
    })])
}

/// Parses a Via field into one header holding the full hop list.
///
/// RFC 3261 treats a comma-separated Via as multiple values on one logical
/// header rather than separate headers.
pub fn parse_via_header(_name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let mut hops = Vec::new();

    for section in text.split(',') {
        let parts: Vec<&str> = section.splitn(3, '/').collect();
        if parts.len() < 3 {
            return Err(SyntaxError::HeaderParse(format!(
                "not enough protocol parts in Via header: \"{}\"",
                section
            )));
        }

        // The transport token may start after whitespace and ends at the
        // first whitespace following its leading non-whitespace run.
        let tail = parts[2];
        let after_ws = tail.trim_start_matches([' ', '\t']);
        let ws_idx = after_ws.find([' ', '\t']).ok_or_else(|| {
            SyntaxError::HeaderParse(format!(
                "expected whitespace after sent-protocol part in Via header: \"{}\"",
                section
            ))
        })?;

        let protocol_name = parts[0].trim();
        let protocol_version = parts[1].trim();
        let transport = &after_ws[..ws_idx];
        if protocol_name.is_empty() {
            return Err(SyntaxError::HeaderParse(format!(
                "no protocol name in Via header: \"{}\"",
                section
            )));
        }
        if protocol_version.is_empty() {
            return Err(SyntaxError::HeaderParse(format!(
                "no protocol version in Via header: \"{}\"",
                section
            )));
        }
        if transport.is_empty() {
            return Err(SyntaxError::HeaderParse(format!(
                "no transport in Via header: \"{}\"",
                section
            )));
        }

        let via_body = after_ws[ws_idx + 1..].trim_start_matches([' ', '\t']);
        let (host_part, params) = match via_body.find(';') {
            None => (via_body, Params::new()),
            Some(idx) => {
                let (params, _) =
                    parse_params(&via_body[idx..], Some(b';'), b';', None, true, true)?;
                (&via_body[..idx], lowercase_keys(params))
            }
        };
        let (host, port) = parse_host_port(host_part.trim())?;

        hops.push(ViaHop {
            protocol_name: SmolStr::new(protocol_name),
            protocol_version: SmolStr::new(protocol_version),
            transport: SmolStr::new(transport),
            host,
            port,
            params,
        });
    }

    Ok(vec![Header::Via(Via(hops))])
}

/// Parses a Max-Forwards field as an unsigned 32-bit integer.
pub fn parse_max_forwards(_name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let value = text.trim().parse::<u32>().map_err(|_| {
        SyntaxError::HeaderParse(format!("invalid Max-Forwards value \"{}\"", text))
    })?;
    Ok(vec![Header::MaxForwards(value)])
}

/// Parses a Content-Length field as an unsigned 32-bit integer.
pub fn parse_content_length(_name: &str, text: &str) -> Result<Vec<Header>, SyntaxError> {
    let value = text.trim().parse::<u32>().map_err(|_| {
        SyntaxError::HeaderParse(format!("invalid Content-Length value \"{}\"", text))
    })?;
    Ok(vec![Header::ContentLength(value)])
}

/// Splits a comma-separated address list into sections, leaving commas
/// inside `<...>` brackets or quoted strings alone.
fn split_address_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut prev = 0;
    let mut in_brackets = false;
    let mut in_quotes = false;

    for (idx, &byte) in text.as_bytes().iter().enumerate() {
        match byte {
            b'<' if !in_quotes => in_brackets = true,
            b'>' if !in_quotes => in_brackets = false,
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes && !in_brackets => {
                sections.push(&text[prev..idx]);
                prev = idx + 1;
            }
            _ => {}
        }
    }
    sections.push(&text[prev..]);
    sections
}

/// Parses one address section into display name, URI, and header params
/// (RFC 3261 §20.10).
fn parse_address_value(
    text: &str,
) -> Result<(Option<SmolStr>, Uri, Params), SyntaxError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyntaxError::HeaderParse(
            "address-form header has an empty body".into(),
        ));
    }

    let mut rest = trimmed;
    let mut display_name = None;

    if let Some(bracket) = find_unquoted(rest, b'<') {
        if bracket > 0 {
            if let Some(after_quote) = rest.strip_prefix('"') {
                let close = after_quote.find('"').ok_or_else(|| {
                    SyntaxError::HeaderParse(format!(
                        "unclosed quotes in address \"{}\"",
                        trimmed
                    ))
                })?;
                display_name = Some(SmolStr::new(&after_quote[..close]));
                rest = &after_quote[close + 1..];
            } else {
                // Unquoted display name: everything up to the bracket.
                display_name = Some(SmolStr::new(rest[..bracket].trim()));
                rest = &rest[bracket..];
            }
        }
    }

    let rest = rest.trim_start();
    let (uri_text, params_text) = match rest.strip_prefix('<') {
        None => {
            if display_name.is_some() {
                // A bare URI is only allowed when there is no display name.
                return Err(SyntaxError::HeaderParse(format!(
                    "expected '<' after display name in address \"{}\"",
                    trimmed
                )));
            }
            let end = rest.find(';').unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        }
        Some(inner) => {
            let close = inner.find('>').ok_or_else(|| {
                SyntaxError::HeaderParse(format!(
                    "'<' without closing '>' in address \"{}\"",
                    trimmed
                ))
            })?;
            (&inner[..close], &inner[close + 1..])
        }
    };

    let uri = parse_uri(uri_text)?;
    let params = if params_text.is_empty() {
        Params::new()
    } else {
        parse_params(params_text, Some(b';'), b';', Some(b','), true, true)?.0
    };

    Ok((display_name, uri, params))
}

/// First index of `target` outside any quoted string.
fn find_unquoted(text: &str, target: u8) -> Option<usize> {
    let mut in_quotes = false;
    for (idx, &byte) in text.as_bytes().iter().enumerate() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == target && !in_quotes {
            return Some(idx);
        }
    }
    None
}
