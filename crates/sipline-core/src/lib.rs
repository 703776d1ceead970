// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP data model shared by the sipline crates.
//!
//! Messages, URIs, headers, and parameter maps as defined by RFC 3261,
//! restricted to what the parser, transport, and transaction layers consume
//! or produce. Headers without a typed representation are carried verbatim
//! as [`Header::Generic`].

pub mod headers;
pub mod method;
pub mod msg;
pub mod params;
pub mod uri;
pub mod version;

pub use headers::{CSeq, Header, Headers, NameAddr, Via, ViaHop, MAX_CSEQ};
pub use method::Method;
pub use msg::{Message, Request, Response};
pub use params::Params;
pub use uri::{SipUri, Uri};
pub use version::SipVersion;
