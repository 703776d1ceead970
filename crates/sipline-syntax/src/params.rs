// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! General `key[=value]` parameter parsing.
//!
//! One stateful routine covers URI parameters, URI headers, Via parameters,
//! and address header parameters; callers choose the delimiters, whether
//! quoted values are honoured, and whether valueless keys are allowed.

use sipline_core::Params;
use smol_str::SmolStr;

use crate::error::SyntaxError;

/// ABNF whitespace (RFC 3261 §25): space and horizontal tab.
pub(crate) const ABNF_WS: &[u8] = b" \t";

/// Parses `key[=value]` pairs from the front of `source`.
///
/// When `start` is given, `source` must begin with it. Pairs are separated
/// by `sep`; parsing stops at `end` (uncounted in the consumed total) or at
/// the end of input. With `quote_values`, a value may be wrapped entirely in
/// double quotes; the quotes must be followed by `sep`, `end`, or the end of
/// input, and are not stored. With `permit_singletons`, keys may appear
/// without a value.
///
/// Returns the parsed map and the number of bytes consumed.
pub(crate) fn parse_params(
    source: &str,
    start: Option<u8>,
    sep: u8,
    end: Option<u8>,
    quote_values: bool,
    permit_singletons: bool,
) -> Result<(Params, usize), SyntaxError> {
    let mut params = Params::new();
    let bytes = source.as_bytes();

    if bytes.is_empty() {
        return Ok((params, 0));
    }

    let mut consumed = 0usize;
    if let Some(start) = start {
        if bytes[0] != start {
            return Err(SyntaxError::HeaderParse(format!(
                "expected '{}' at start of key-value section: \"{}\"",
                start as char, source
            )));
        }
        consumed += 1;
    }

    let mut buffer: Vec<u8> = Vec::new();
    let mut key: Option<SmolStr> = None;
    let mut parsing_key = true;
    let mut in_quotes = false;

    let flush = |params: &mut Params,
                 buffer: &mut Vec<u8>,
                 key: &mut Option<SmolStr>,
                 parsing_key: bool|
     -> Result<(), SyntaxError> {
        if parsing_key {
            if buffer.is_empty() {
                return Err(SyntaxError::HeaderParse(format!(
                    "key of length 0 in params \"{}\"",
                    source
                )));
            }
            if !permit_singletons {
                return Err(SyntaxError::HeaderParse(format!(
                    "valueless param '{}' where a value is required: \"{}\"",
                    String::from_utf8_lossy(buffer),
                    source
                )));
            }
            params.insert(to_smol(buffer), None);
        } else {
            let value = to_smol(buffer);
            params.insert(key.take().expect("value without key"), Some(value));
        }
        buffer.clear();
        Ok(())
    };

    while consumed < bytes.len() {
        let byte = bytes[consumed];
        match byte {
            b if Some(b) == end && !in_quotes => break,
            b if b == sep => {
                if in_quotes {
                    buffer.push(byte);
                } else {
                    flush(&mut params, &mut buffer, &mut key, parsing_key)?;
                    parsing_key = true;
                }
            }
            b'"' => {
                if !quote_values {
                    buffer.push(byte);
                } else if parsing_key {
                    return Err(SyntaxError::HeaderParse(format!(
                        "unexpected '\"' in parameter key in params \"{}\"",
                        source
                    )));
                } else if !in_quotes && !buffer.is_empty() {
                    return Err(SyntaxError::HeaderParse(format!(
                        "unexpected '\"' in params \"{}\"",
                        source
                    )));
                } else if in_quotes && consumed + 1 < bytes.len() {
                    let next = bytes[consumed + 1];
                    if next != sep && Some(next) != end {
                        return Err(SyntaxError::HeaderParse(format!(
                            "unexpected character '{}' after quoted param in \"{}\"",
                            next as char, source
                        )));
                    }
                    in_quotes = false;
                } else {
                    in_quotes = !in_quotes;
                }
            }
            b'=' => {
                if in_quotes {
                    buffer.push(byte);
                } else if buffer.is_empty() {
                    return Err(SyntaxError::HeaderParse(format!(
                        "key of length 0 in params \"{}\"",
                        source
                    )));
                } else if !parsing_key {
                    return Err(SyntaxError::HeaderParse(format!(
                        "unexpected '=' in value token: \"{}\"",
                        source
                    )));
                } else {
                    key = Some(to_smol(&buffer));
                    buffer.clear();
                    parsing_key = false;
                }
            }
            b if !in_quotes && ABNF_WS.contains(&b) => {}
            _ => buffer.push(byte),
        }
        consumed += 1;
    }

    if in_quotes {
        return Err(SyntaxError::HeaderParse(format!(
            "unclosed quotes in parameter string: \"{}\"",
            source
        )));
    }
    flush(&mut params, &mut buffer, &mut key, parsing_key)?;

    Ok((params, consumed))
}

fn to_smol(bytes: &[u8]) -> SmolStr {
    SmolStr::new(String::from_utf8_lossy(bytes))
}

/// Rebuilds a parameter map with ASCII-lowercased keys, for parameter sets
/// whose keys are case-insensitive on the wire (URI and Via parameters).
pub(crate) fn lowercase_keys(params: Params) -> Params {
    params
        .iter()
        .map(|(k, v)| (SmolStr::new(k.to_ascii_lowercase()), v.clone()))
        .collect()
}
