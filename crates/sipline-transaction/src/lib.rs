// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 §17.1 client transactions.
//!
//! One [`ClientTx`] per outgoing request drives the INVITE or non-INVITE
//! state machine: retransmissions on timer A, the timer B timeout, the
//! timer D wait for response retransmissions, and ACK generation for 3xx+
//! INVITE finals. Exactly one terminal signal — final response, timeout, or
//! transport error — reaches the consumer; later stimuli are absorbed.

mod client;
mod fsm;

use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use sipline_core::{Message, Request};
use sipline_transport::{TransportError, TransportKind};
use smol_str::SmolStr;
use thiserror::Error;

pub use client::{new_client_tx, new_client_tx_with_settings, ClientTx, TxResponse};

/// RTT estimate, RFC 3261 Table 4.
pub const T1: Duration = Duration::from_millis(500);
/// Maximum retransmit interval for non-INVITE requests.
pub const T2: Duration = Duration::from_secs(4);
/// Wait time for response retransmissions on unreliable transports.
pub const TIMER_D_UNRELIABLE: Duration = Duration::from_secs(32);

/// The RFC 3261 magic cookie every compliant branch starts with.
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// Timer periods used by client transactions.
///
/// Defaults are the RFC 3261 Table 4 values; tests compress them.
#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    /// Base retransmission interval (timer A starts here).
    pub t1: Duration,
    /// Cap for the non-INVITE retransmission interval.
    pub t2: Duration,
    /// Transaction timeout (timer B), 64·T1 by default.
    pub timer_b: Duration,
    /// Timer D period on unreliable transports; zero on reliable ones.
    pub timer_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: T1,
            t2: T2,
            timer_b: T1.saturating_mul(64),
            timer_d: TIMER_D_UNRELIABLE,
        }
    }
}

/// Client transaction failures.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// `receive` was handed something other than a response.
    #[error("transaction received a non-response message: {0}")]
    UnexpectedMessage(String),

    /// Timer B fired before a final response arrived.
    #[error("transaction timed out")]
    Timeout,

    /// The transport façade failed to send.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The request carries no Via header to derive a key from.
    #[error("request has no Via header")]
    MissingVia,

    /// The request's top Via hop carries no branch parameter.
    #[error("request's top Via hop has no branch parameter")]
    MissingBranch,

    /// The request carries no CSeq header.
    #[error("request has no CSeq header")]
    MissingCSeq,
}

/// Transaction key per RFC 3261 §17.1.3: the branch parameter of the top
/// Via plus the CSeq method. Two live transactions never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxKey {
    pub branch: SmolStr,
    pub method: sipline_core::Method,
}

/// Derives the client transaction key for an outgoing request.
pub fn client_tx_key(req: &Request) -> Result<TxKey, TransactionError> {
    let hop = req.top_via_hop().ok_or(TransactionError::MissingVia)?;
    let branch = hop.branch().ok_or(TransactionError::MissingBranch)?.clone();
    let cseq = req.cseq().ok_or(TransactionError::MissingCSeq)?;
    Ok(TxKey {
        branch,
        method: cseq.method.clone(),
    })
}

/// Generates a fresh RFC 3261 magic-cookie branch identifier.
pub fn generate_branch_id() -> SmolStr {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{MAGIC_COOKIE}{suffix}"))
}

/// Sending façade over the transport layer.
///
/// The transaction layer never touches sockets; it hands serialized-ready
/// messages to this trait and asks it about transport reliability.
#[async_trait]
pub trait TransportLayer: Send + Sync + 'static {
    /// Sends `msg` towards `dest`.
    async fn send(&self, dest: &str, msg: &Message) -> Result<(), TransportError>;

    /// Whether the named Via transport is reliable (no retransmissions).
    fn is_reliable(&self, transport: &str) -> bool {
        TransportKind::parse(transport)
            .map(|kind| kind.is_reliable())
            .unwrap_or(false)
    }
}
