// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory SIP messages.
//!
//! A [`Message`] is either a [`Request`] or a [`Response`]. Both share an
//! ordered header collection, an opaque body, and a protocol version.
//! The only serialization path is `to_bytes`, which emits the RFC 3261
//! wire form with CRLF line endings and appends the body octets untouched;
//! there is deliberately no `Display` for whole messages, so an opaque
//! binary body can never be routed through a `String`.

use bytes::{BufMut, Bytes, BytesMut};
use smol_str::SmolStr;

use crate::headers::{CSeq, Header, Headers, ViaHop};
use crate::method::Method;
use crate::uri::Uri;
use crate::version::SipVersion;

/// An outgoing or incoming SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub recipient: Uri,
    pub version: SipVersion,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    /// Creates a request with the given start-line fields and no body.
    pub fn new(method: Method, recipient: Uri, version: SipVersion) -> Self {
        Self {
            method,
            recipient,
            version,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Returns the topmost Via hop, when a Via header is present.
    pub fn top_via_hop(&self) -> Option<&ViaHop> {
        self.headers.iter().find_map(|h| match h {
            Header::Via(via) => Some(via.top()),
            _ => None,
        })
    }

    /// Returns the CSeq header, when present.
    pub fn cseq(&self) -> Option<&CSeq> {
        self.headers.iter().find_map(|h| match h {
            Header::CSeq(cseq) => Some(cseq),
            _ => None,
        })
    }

    /// Returns `true` for INVITE requests.
    pub fn is_invite(&self) -> bool {
        self.method.is_invite()
    }

    /// Compact description for log lines.
    pub fn short(&self) -> String {
        format!("request {} {}", self.method, self.recipient)
    }

    /// Serializes the request into its wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!("{} {} {}\r\n", self.method, self.recipient, self.version);
        push_headers(&mut head, &self.headers);
        wire_bytes(head, &self.body)
    }
}

/// An incoming or outgoing SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: SipVersion,
    pub code: u16,
    pub reason: SmolStr,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the given status line and no body.
    pub fn new(version: SipVersion, code: u16, reason: impl Into<SmolStr>) -> Self {
        Self {
            version,
            code,
            reason: reason.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// `true` for 1xx responses.
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// `true` for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// `true` for any final response (2xx and above).
    pub fn is_final(&self) -> bool {
        self.code >= 200
    }

    /// Compact description for log lines.
    pub fn short(&self) -> String {
        format!("response {} {}", self.code, self.reason)
    }

    /// Serializes the response into its wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut head = format!("{} {} {}\r\n", self.version, self.code, self.reason);
        push_headers(&mut head, &self.headers);
        wire_bytes(head, &self.body)
    }
}

fn push_headers(out: &mut String, headers: &Headers) {
    use std::fmt::Write;
    for header in headers {
        let _ = write!(out, "{}\r\n", header);
    }
    out.push_str("\r\n");
}

/// Appends the raw body octets to the textual head section.
fn wire_bytes(head: String, body: &Bytes) -> Bytes {
    let mut out = BytesMut::with_capacity(head.len() + body.len());
    out.put_slice(head.as_bytes());
    out.put_slice(body);
    out.freeze()
}

/// A SIP message of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Shared view of the header collection.
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(req) => &req.headers,
            Message::Response(res) => &res.headers,
        }
    }

    /// Mutable view of the header collection.
    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(req) => &mut req.headers,
            Message::Response(res) => &mut res.headers,
        }
    }

    /// Appends a header.
    pub fn append_header(&mut self, header: Header) {
        self.headers_mut().push(header);
    }

    /// The message body.
    pub fn body(&self) -> &Bytes {
        match self {
            Message::Request(req) => &req.body,
            Message::Response(res) => &res.body,
        }
    }

    /// Replaces the message body.
    pub fn set_body(&mut self, body: Bytes) {
        match self {
            Message::Request(req) => req.body = body,
            Message::Response(res) => res.body = body,
        }
    }

    /// Returns the request, when this is one.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    /// Returns the response, when this is one.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(res) => Some(res),
        }
    }

    /// Compact description for log lines.
    pub fn short(&self) -> String {
        match self {
            Message::Request(req) => req.short(),
            Message::Response(res) => res.short(),
        }
    }

    /// Serializes the message into its wire bytes, body octets untouched.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(req) => req.to_bytes(),
            Message::Response(res) => res.to_bytes(),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}
