// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! URI grammar (RFC 3261 §19.1).
//!
//! Recognises `sip:`/`sips:` URIs and the bare `*` wildcard; every other
//! scheme is rejected. The SIP form is parsed positionally:
//! `sip:[user[:password]@]host[:port][;params][?headers]`.

use sipline_core::{SipUri, Uri};
use smol_str::SmolStr;

use crate::error::SyntaxError;
use crate::params::{lowercase_keys, parse_params};

/// Parses any supported URI form.
pub fn parse_uri(text: &str) -> Result<Uri, SyntaxError> {
    if text.trim() == "*" {
        // Wildcard form used by Contact headers when de-registering.
        return Ok(Uri::Wildcard);
    }

    let scheme = match text.find(':') {
        Some(idx) => &text[..idx],
        None => {
            return Err(SyntaxError::HeaderParse(format!(
                "no ':' in URI \"{}\"",
                text
            )))
        }
    };

    match scheme.to_ascii_lowercase().as_str() {
        // sips shares the sip grammar; only the secure flag differs.
        "sip" | "sips" => parse_sip_uri(text).map(Uri::Sip),
        other => Err(SyntaxError::HeaderParse(format!(
            "unsupported URI scheme \"{}\"",
            other
        ))),
    }
}

/// Parses a `sip:` or `sips:` URI.
pub fn parse_sip_uri(text: &str) -> Result<SipUri, SyntaxError> {
    let original = text;
    let mut uri = SipUri::default();

    let mut rest = text
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("sip"))
        .map(|_| &text[3..])
        .ok_or_else(|| {
            SyntaxError::HeaderParse(format!("invalid SIP URI scheme in \"{}\"", original))
        })?;

    if rest.get(..1).is_some_and(|c| c.eq_ignore_ascii_case("s")) {
        uri.secure = true;
        rest = &rest[1..];
    }

    rest = rest.strip_prefix(':').ok_or_else(|| {
        SyntaxError::HeaderParse(format!("no ':' after scheme in SIP URI \"{}\"", original))
    })?;

    // The user-info part ends at '@', the only place that character occurs.
    if let Some(at) = rest.find('@') {
        let user_info = &rest[..at];
        match user_info.find(':') {
            Some(colon) => {
                uri.user = Some(SmolStr::new(&user_info[..colon]));
                uri.password = Some(SmolStr::new(&user_info[colon + 1..]));
            }
            None => uri.user = Some(SmolStr::new(user_info)),
        }
        rest = &rest[at + 1..];
    }

    // The host[:port] part runs until the URI params (';') or headers ('?').
    let end_of_host = rest
        .find(';')
        .or_else(|| rest.find('?'))
        .unwrap_or(rest.len());
    let (host, port) = parse_host_port(&rest[..end_of_host])?;
    uri.host = host;
    uri.port = port;
    rest = &rest[end_of_host..];

    if rest.is_empty() {
        return Ok(uri);
    }

    if rest.starts_with(';') {
        let (params, consumed) = parse_params(rest, Some(b';'), b';', Some(b'?'), true, true)?;
        uri.params = lowercase_keys(params);
        rest = &rest[consumed..];
    }

    let (headers, consumed) = parse_params(rest, Some(b'?'), b'&', None, true, false)?;
    uri.headers = headers;
    rest = &rest[consumed..];

    if !rest.is_empty() {
        return Err(SyntaxError::HeaderParse(format!(
            "trailing characters after SIP URI \"{}\"",
            original
        )));
    }

    Ok(uri)
}

/// Parses a `host[:port]` pair.
pub(crate) fn parse_host_port(text: &str) -> Result<(SmolStr, Option<u16>), SyntaxError> {
    let (host, port) = match text.find(':') {
        Some(idx) => {
            let port = text[idx + 1..].parse::<u16>().map_err(|_| {
                SyntaxError::HeaderParse(format!("invalid port in \"{}\"", text))
            })?;
            (&text[..idx], Some(port))
        }
        None => (text, None),
    };

    if host.is_empty() {
        return Err(SyntaxError::HeaderParse(format!(
            "empty host in \"{}\"",
            text
        )));
    }

    Ok((SmolStr::new(host), port))
}
