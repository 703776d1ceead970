// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP message syntax: parsing bytes into [`sipline_core::Message`] values.
//!
//! The central type is [`Parser`], a push parser fed through
//! [`Parser::write`] that publishes messages and errors on caller-provided
//! channels. It runs in either datagram mode (one complete message per
//! write, body framed by the double-CRLF position) or stream mode (arbitrary
//! fragments, body framed by the mandatory `Content-Length` header).
//!
//! # Example
//! ```
//! use sipline_syntax::parse_message;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let raw = b"OPTIONS sip:example.com SIP/2.0\r\n\
//!     Via: SIP/2.0/UDP host;branch=z9hG4bK776\r\n\
//!     Call-ID: a84b4c76@pc33\r\n\
//!     CSeq: 63104 OPTIONS\r\n\
//!     Content-Length: 0\r\n\r\n";
//! let msg = parse_message(raw).await.expect("well-formed message");
//! assert!(msg.as_request().is_some());
//! # }
//! ```

mod buffer;
mod error;
mod headers;
mod params;
mod parser;
mod uri;

pub use error::SyntaxError;
pub use headers::{
    parse_address_header, parse_call_id, parse_content_length, parse_cseq, parse_max_forwards,
    parse_via_header, HeaderParser,
};
pub use parser::{parse_message, Parser};
pub use uri::{parse_sip_uri, parse_uri};
