// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Awaitable byte buffer feeding the parse task.
//!
//! Producers append with [`ParserBuffer::write`] without blocking; the single
//! consumer (the parse task) awaits [`next_line`](ParserBuffer::next_line) /
//! [`next_chunk`](ParserBuffer::next_chunk) until enough data arrives or the
//! buffer is stopped.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Returned when the buffer is stopped before a read could be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferStopped;

#[derive(Default)]
struct BufferState {
    data: BytesMut,
    stopped: bool,
}

pub(crate) struct ParserBuffer {
    state: Mutex<BufferState>,
    readable: Notify,
}

impl ParserBuffer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            readable: Notify::new(),
        }
    }

    /// Appends bytes and wakes the consumer.
    pub(crate) fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.data.extend_from_slice(bytes);
        drop(state);
        self.readable.notify_one();
    }

    /// Stops the buffer: pending and future reads fail once queued data runs
    /// out.
    pub(crate) fn stop(&self) {
        self.state.lock().stopped = true;
        self.readable.notify_one();
    }

    /// Re-enables reads after a stop. Data queued before the stop is kept.
    pub(crate) fn resume(&self) {
        self.state.lock().stopped = false;
    }

    /// Returns the next CRLF-terminated line without its terminator.
    pub(crate) async fn next_line(&self) -> Result<String, BufferStopped> {
        loop {
            let notified = self.readable.notified();
            {
                let mut state = self.state.lock();
                if let Some(pos) = find_crlf(&state.data) {
                    let mut line = state.data.split_to(pos + 2);
                    line.truncate(pos);
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                if state.stopped {
                    return Err(BufferStopped);
                }
            }
            notified.await;
        }
    }

    /// Returns exactly `n` bytes.
    pub(crate) async fn next_chunk(&self, n: usize) -> Result<Bytes, BufferStopped> {
        loop {
            let notified = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.data.len() >= n {
                    return Ok(state.data.split_to(n).freeze());
                }
                if state.stopped {
                    return Err(BufferStopped);
                }
            }
            notified.await;
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_lines_without_terminator() {
        let buffer = ParserBuffer::new();
        buffer.write(b"INVITE sip:a SIP/2.0\r\nVia: x\r\n");

        assert_eq!(buffer.next_line().await.unwrap(), "INVITE sip:a SIP/2.0");
        assert_eq!(buffer.next_line().await.unwrap(), "Via: x");
    }

    #[tokio::test]
    async fn line_blocks_until_terminator_arrives() {
        let buffer = std::sync::Arc::new(ParserBuffer::new());
        buffer.write(b"partial");

        let reader = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.next_line().await })
        };
        tokio::task::yield_now().await;
        buffer.write(b" line\r\n");

        assert_eq!(reader.await.unwrap().unwrap(), "partial line");
    }

    #[tokio::test]
    async fn chunk_returns_exact_count() {
        let buffer = ParserBuffer::new();
        buffer.write(b"abcdef");

        assert_eq!(buffer.next_chunk(4).await.unwrap().as_ref(), b"abcd");
        assert_eq!(buffer.next_chunk(2).await.unwrap().as_ref(), b"ef");
    }

    #[tokio::test]
    async fn stop_fails_pending_reads() {
        let buffer = std::sync::Arc::new(ParserBuffer::new());
        let reader = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.next_chunk(10).await })
        };
        tokio::task::yield_now().await;
        buffer.stop();

        assert_eq!(reader.await.unwrap(), Err(BufferStopped));
    }

    #[tokio::test]
    async fn queued_data_survives_stop() {
        let buffer = ParserBuffer::new();
        buffer.write(b"line\r\n");
        buffer.stop();

        assert_eq!(buffer.next_line().await.unwrap(), "line");
        assert_eq!(buffer.next_line().await, Err(BufferStopped));
    }
}
