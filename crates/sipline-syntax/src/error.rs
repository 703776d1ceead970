// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

/// Errors produced by the message parser.
///
/// `InvalidStartLine` is recoverable in datagram mode (the rest of the
/// datagram is skipped); every error is terminal in stream mode and leaves
/// the parser parked until [`Parser::reset`](crate::Parser::reset).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// The first line of a message matched neither request nor response form.
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    /// Stream-mode framing failure: missing or duplicated `Content-Length`.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The input ended mid-message, or the declared body could not be read.
    #[error("broken message: {0}")]
    BrokenMessage(String),

    /// A single header field could not be parsed. Non-terminal: the header
    /// is dropped and parsing continues.
    #[error("malformed header: {0}")]
    HeaderParse(String),

    /// `write` was called after `stop`.
    #[error("cannot write to a stopped parser")]
    ParserStopped,
}
