// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The message parser: reconstructs SIP messages from framed or unframed
//! byte streams.
//!
//! One parse task per parser consumes an awaitable input buffer a line at a
//! time and publishes messages and errors on the caller's channels, in input
//! order. In datagram mode every `write` supplies one complete message and
//! the writer side computes the body length, passed to the task through a
//! FIFO so malformed start lines can skip the exact remainder. In stream
//! mode the mandatory `Content-Length` header frames the body, and any
//! framing failure parks the parser until [`Parser::reset`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sipline_core::{Header, Message, Method, Request, Response, SipVersion};
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::ParserBuffer;
use crate::error::SyntaxError;
use crate::headers::{default_header_parsers, HeaderParser};
use crate::uri::parse_uri;

/// Body and total datagram length computed by `write` in datagram mode.
#[derive(Debug, Clone, Copy)]
struct BodyLengths {
    body: usize,
    total: usize,
}

#[derive(Default)]
struct ParserState {
    stopped: bool,
    terminal_err: Option<SyntaxError>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    streamed: bool,
    input: ParserBuffer,
    body_lengths_tx: mpsc::UnboundedSender<BodyLengths>,
    body_lengths_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BodyLengths>>,
    output: mpsc::Sender<Message>,
    errs: mpsc::Sender<SyntaxError>,
    header_parsers: RwLock<HashMap<SmolStr, HeaderParser>>,
    state: Mutex<ParserState>,
}

/// Converts raw SIP bytes into [`Message`] values.
///
/// Parsed messages are sent down the `output` channel and parse failures
/// down `errs`, both in production order. See the module docs for the two
/// framing modes.
pub struct Parser {
    inner: Arc<Inner>,
}

impl Parser {
    /// Creates a parser and spawns its parse task.
    ///
    /// With `streamed` set, `write` calls may carry arbitrary message
    /// fragments and every message must have a `Content-Length` header.
    /// Without it, each `write` must carry exactly one complete message.
    pub fn new(
        output: mpsc::Sender<Message>,
        errs: mpsc::Sender<SyntaxError>,
        streamed: bool,
    ) -> Self {
        let (body_lengths_tx, body_lengths_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            streamed,
            input: ParserBuffer::new(),
            body_lengths_tx,
            body_lengths_rx: tokio::sync::Mutex::new(body_lengths_rx),
            output,
            errs,
            header_parsers: RwLock::new(default_header_parsers()),
            state: Mutex::new(ParserState::default()),
        });

        inner.state.lock().task = Some(tokio::spawn(parse_loop(inner.clone())));
        Self { inner }
    }

    /// Queues bytes for parsing.
    ///
    /// Success means the data was accepted, not that it is valid. Once the
    /// parser has failed terminally the error is returned here until
    /// [`reset`](Self::reset); writes after [`stop`](Self::stop) fail with
    /// [`SyntaxError::ParserStopped`].
    pub fn write(&self, data: &[u8]) -> Result<usize, SyntaxError> {
        {
            let state = self.inner.state.lock();
            if state.stopped {
                return Err(SyntaxError::ParserStopped);
            }
            if let Some(err) = &state.terminal_err {
                return Err(err.clone());
            }
        }

        if !self.inner.streamed {
            let lengths = BodyLengths {
                body: body_length(data),
                total: data.len(),
            };
            let _ = self.inner.body_lengths_tx.send(lengths);
        }

        self.inner.input.write(data);
        Ok(data.len())
    }

    /// Installs (or overrides) the parser for a header name.
    ///
    /// The name is matched case-insensitively against the wire form.
    pub fn set_header_parser(&self, name: &str, parser: HeaderParser) {
        let name = SmolStr::new(name.to_ascii_lowercase());
        self.inner.header_parsers.write().insert(name, parser);
    }

    /// Stops all parsing and waits for the parse task to finish.
    pub async fn stop(&self) {
        let task = {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            state.task.take()
        };
        self.inner.input.stop();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("parser stopped");
    }

    /// Clears a terminal error and resumes parsing.
    ///
    /// No attempt is made to resynchronise a stream: callers owning a
    /// connection should prefer dropping it after a stream-mode failure.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        // A task that has neither stopped nor failed is still healthy; a
        // terminal error guarantees the old task is already on its way out.
        let failed = state.stopped || state.terminal_err.is_some();
        let finished = state
            .task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(true);
        if !failed && !finished {
            return;
        }
        state.stopped = false;
        state.terminal_err = None;
        self.inner.input.resume();
        state.task = Some(tokio::spawn(parse_loop(self.inner.clone())));
        debug!("parser reset");
    }
}

/// Parses a single message by constructing a one-shot datagram-mode parser.
///
/// Costlier than reusing a parser, but necessary when consecutive datagrams
/// may come from different endpoints (e.g. UDP).
pub async fn parse_message(data: &[u8]) -> Result<Message, SyntaxError> {
    let (output_tx, mut output_rx) = mpsc::channel(1);
    let (errs_tx, mut errs_rx) = mpsc::channel(1);
    let parser = Parser::new(output_tx, errs_tx, false);
    let write_result = parser.write(data);

    let result = match write_result {
        Err(err) => Err(err),
        Ok(_) => tokio::select! {
            Some(msg) = output_rx.recv() => Ok(msg),
            Some(err) = errs_rx.recv() => Err(err),
            else => Err(SyntaxError::BrokenMessage(
                "parser terminated without producing output".into(),
            )),
        },
    };

    parser.stop().await;
    result
}

/// Reads input lines, producing messages until the buffer stops or a
/// terminal error parks the task.
async fn parse_loop(inner: Arc<Inner>) {
    // In datagram mode the task owns the body-length FIFO for its lifetime;
    // the guard is released when the task ends so `reset` can take over.
    let mut body_lengths = if inner.streamed {
        None
    } else {
        Some(inner.body_lengths_rx.lock().await)
    };

    loop {
        let start_line = match inner.input.next_line().await {
            Ok(line) => line,
            Err(_) => {
                debug!("parser input stopped");
                break;
            }
        };

        let msg = if is_request(&start_line) {
            parse_request_line(&start_line).map(Message::Request)
        } else if is_response(&start_line) {
            parse_status_line(&start_line).map(Message::Response)
        } else {
            Err(SyntaxError::InvalidStartLine(format!(
                "transmission beginning \"{}\" is not a SIP message",
                start_line
            )))
        };

        let mut msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                warn!(line = %start_line, "failed to parse start line");
                if inner.streamed {
                    park(&inner, err).await;
                    break;
                }
                let _ = inner.errs.send(err).await;
                // Skip exactly the rest of the failed datagram.
                if let Some(rx) = body_lengths.as_deref_mut() {
                    if let Some(lengths) = rx.recv().await {
                        let skip = lengths.total.saturating_sub(start_line.len() + 2);
                        debug!(total = lengths.total, skip, "skipping rest of datagram");
                        let _ = inner.input.next_chunk(skip).await;
                    }
                }
                continue;
            }
        };

        // Header section: wire lines accumulate into one logical header;
        // leading whitespace marks a folded continuation.
        let mut logical_line = String::new();
        let mut input_ended = false;
        loop {
            let line = match inner.input.next_line().await {
                Ok(line) => line,
                Err(_) => {
                    input_ended = true;
                    break;
                }
            };

            if line.is_empty() {
                flush_header(&inner, &mut logical_line, &mut msg);
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if logical_line.is_empty() {
                    debug!(
                        line = %line,
                        message = %msg.short(),
                        "discarded unexpected continuation line at start of header block"
                    );
                } else {
                    logical_line.push(' ');
                    logical_line.push_str(&line);
                }
            } else {
                flush_header(&inner, &mut logical_line, &mut msg);
                logical_line = line;
            }
        }

        if input_ended {
            park(
                &inner,
                SyntaxError::BrokenMessage(format!(
                    "input stopped inside the header section of {}",
                    msg.short()
                )),
            )
            .await;
            break;
        }

        // Determine the body length for this framing mode.
        let content_length = if inner.streamed {
            match declared_content_length(&msg) {
                Ok(length) => length,
                Err(err) => {
                    park(&inner, err).await;
                    break;
                }
            }
        } else {
            match body_lengths.as_deref_mut().expect("datagram FIFO").recv().await {
                Some(lengths) => lengths.body,
                None => break,
            }
        };

        debug!(content_length, message = %msg.short(), "reading message body");
        let body = match inner.input.next_chunk(content_length).await {
            Ok(body) => body,
            Err(_) => {
                park(
                    &inner,
                    SyntaxError::BrokenMessage(format!(
                        "failed to read {} body bytes of {}",
                        content_length,
                        msg.short()
                    )),
                )
                .await;
                break;
            }
        };

        if body.iter().any(|b| !b" \t\r\n".contains(b)) {
            msg.set_body(body);
        }

        if inner.output.send(msg).await.is_err() {
            debug!("message consumer dropped; parser exiting");
            break;
        }
    }
}

/// Records a terminal error and publishes it.
async fn park(inner: &Arc<Inner>, err: SyntaxError) {
    warn!(error = %err, "parser failed terminally");
    inner.state.lock().terminal_err = Some(err.clone());
    let _ = inner.errs.send(err).await;
}

/// Flushes the pending logical header line into the message.
///
/// A header that fails to parse is dropped; parsing continues.
fn flush_header(inner: &Arc<Inner>, logical_line: &mut String, msg: &mut Message) {
    if logical_line.is_empty() {
        return;
    }
    let line = std::mem::take(logical_line);

    let Some((name, field_text)) = line.split_once(':') else {
        warn!(header = %line, "skipping header: field name with no value");
        return;
    };

    let raw_name = name.trim();
    let lower_name = raw_name.to_ascii_lowercase();
    let field_text = field_text.trim();

    let parser = inner.header_parsers.read().get(lower_name.as_str()).copied();
    match parser {
        Some(parser) => match parser(&lower_name, field_text) {
            Ok(headers) => {
                for header in headers {
                    msg.append_header(header);
                }
            }
            Err(err) => {
                warn!(header = %line, error = %err, "skipping unparseable header");
            }
        },
        None => {
            debug!(name = %raw_name, "no parser registered; keeping generic header");
            msg.append_header(Header::Generic {
                name: SmolStr::new(raw_name),
                value: SmolStr::new(field_text),
            });
        }
    }
}

/// Extracts the mandatory stream-mode `Content-Length`.
fn declared_content_length(msg: &Message) -> Result<usize, SyntaxError> {
    let mut lengths = msg.headers().iter().filter_map(|h| match h {
        Header::ContentLength(n) => Some(*n),
        _ => None,
    });

    match (lengths.next(), lengths.next()) {
        (Some(length), None) => Ok(length as usize),
        (None, _) => Err(SyntaxError::MalformedMessage(format!(
            "missing required Content-Length header on {}",
            msg.short()
        ))),
        (Some(_), Some(_)) => Err(SyntaxError::MalformedMessage(format!(
            "multiple Content-Length headers on {}",
            msg.short()
        ))),
    }
}

/// Computes a datagram's body length: everything after the first CRLFCRLF.
fn body_length(data: &[u8]) -> usize {
    match data.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => data.len() - (pos + 4),
        None => 0,
    }
}

/// Request heuristic: exactly two spaces and a third field beginning "SIP".
///
/// Any RFC 3261-compliant request passes; some invalid messages may too.
fn is_request(start_line: &str) -> bool {
    if start_line.matches(' ').count() != 2 {
        return false;
    }
    match start_line.split(' ').nth(2) {
        Some(field) => field.len() >= 3 && field.as_bytes()[..3].eq_ignore_ascii_case(b"SIP"),
        None => false,
    }
}

/// Response heuristic: at least two spaces and a first field beginning "SIP".
fn is_response(start_line: &str) -> bool {
    if start_line.matches(' ').count() < 2 {
        return false;
    }
    match start_line.split(' ').next() {
        Some(field) => field.len() >= 3 && field.as_bytes()[..3].eq_ignore_ascii_case(b"SIP"),
        None => false,
    }
}

/// Parses a request line such as `INVITE sip:bob@example.com SIP/2.0`.
fn parse_request_line(line: &str) -> Result<Request, SyntaxError> {
    use nom::{
        bytes::complete::take_while1, character::complete::space1, combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(|c: char| c != ' '),
        space1::<_, nom::error::Error<_>>,
        take_while1::<_, _, nom::error::Error<_>>(|c: char| c != ' '),
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (method_token, _, uri_token, _, version_token)) = parser(line)
        .map_err(|_| SyntaxError::InvalidStartLine(format!("malformed request line \"{}\"", line)))?;

    let uri = parse_uri(uri_token)
        .map_err(|err| SyntaxError::InvalidStartLine(format!("{} in \"{}\"", err, line)))?;
    if uri.is_wildcard() {
        return Err(SyntaxError::InvalidStartLine(format!(
            "wildcard URI '*' not permitted in request line \"{}\"",
            line
        )));
    }

    Ok(Request::new(
        Method::from_token(method_token),
        uri,
        SipVersion::from_token(version_token),
    ))
}

/// Parses a status line such as `SIP/2.0 200 OK`.
fn parse_status_line(line: &str) -> Result<Response, SyntaxError> {
    use nom::{
        bytes::complete::take_while1,
        character::complete::{digit1, space1},
        combinator::rest,
        sequence::tuple,
    };

    let mut parser = tuple((
        take_while1::<_, _, nom::error::Error<_>>(|c: char| c != ' '),
        space1::<_, nom::error::Error<_>>,
        digit1::<_, nom::error::Error<_>>,
        space1::<_, nom::error::Error<_>>,
        rest::<_, nom::error::Error<_>>,
    ));
    let (_, (version_token, _, code_token, _, reason)) = parser(line)
        .map_err(|_| SyntaxError::InvalidStartLine(format!("malformed status line \"{}\"", line)))?;

    let code: u16 = code_token
        .parse()
        .map_err(|_| SyntaxError::InvalidStartLine(format!("invalid status code in \"{}\"", line)))?;
    if code > 699 {
        return Err(SyntaxError::InvalidStartLine(format!(
            "status code {} out of range in \"{}\"",
            code, line
        )));
    }

    Ok(Response::new(
        SipVersion::from_token(version_token),
        code,
        reason,
    ))
}
