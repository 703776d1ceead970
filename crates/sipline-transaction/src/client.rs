// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client transaction runtime.
//!
//! Every transaction is one task owning its FSM; responses, timer firings,
//! transport errors, cancellation, and deletion all funnel through that
//! task, which is the serialisation point the state machine requires.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sipline_core::{CSeq, Header, Message, Method, Request, Response};
use sipline_transport::TransportError;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::fsm::{ClientFsm, TxAction, TxInput};
use crate::{client_tx_key, TimerSettings, TransactionError, TransportLayer, TxKey};

/// A response passed up to the transaction consumer.
#[derive(Debug, Clone)]
pub struct TxResponse {
    pub key: TxKey,
    pub response: Response,
}

/// Handle to a running client transaction.
///
/// Dropping the handle does not cancel the transaction; it keeps running on
/// its timers until a terminal outcome. Use the cancel token passed at
/// construction to abort it.
pub struct ClientTx {
    key: TxKey,
    inputs: mpsc::Sender<Response>,
}

impl ClientTx {
    /// The transaction key derived from the origin request.
    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// Feeds a received message into the transaction.
    ///
    /// Only responses are accepted. Responses arriving after the
    /// transaction has terminated are silently swallowed.
    pub async fn receive(&self, msg: Message) -> Result<(), TransactionError> {
        match msg {
            Message::Response(response) => {
                let _ = self.inputs.send(response).await;
                Ok(())
            }
            Message::Request(req) => Err(TransactionError::UnexpectedMessage(req.short())),
        }
    }
}

/// Creates a client transaction for `origin` with RFC 3261 default timers.
///
/// Provisional and final responses are passed up on `msgs`; the single
/// terminal failure (timeout or transport error), if any, on `errs`.
/// Retransmission timers start immediately for unreliable transports, as
/// does the timer B timeout; the caller performs the initial send.
pub fn new_client_tx(
    origin: Request,
    dest: impl Into<String>,
    tpl: Arc<dyn TransportLayer>,
    msgs: mpsc::Sender<TxResponse>,
    errs: mpsc::Sender<TransactionError>,
    cancel: CancellationToken,
) -> Result<ClientTx, TransactionError> {
    new_client_tx_with_settings(origin, dest, tpl, msgs, errs, cancel, TimerSettings::default())
}

/// As [`new_client_tx`], with explicit timer settings (test hook).
pub fn new_client_tx_with_settings(
    origin: Request,
    dest: impl Into<String>,
    tpl: Arc<dyn TransportLayer>,
    msgs: mpsc::Sender<TxResponse>,
    errs: mpsc::Sender<TransactionError>,
    cancel: CancellationToken,
    settings: TimerSettings,
) -> Result<ClientTx, TransactionError> {
    let key = client_tx_key(&origin)?;
    // RFC 3261 §17.1.1.2: reliable transports do not retransmit, and wait
    // no time for response retransmissions.
    let reliable = origin
        .top_via_hop()
        .map(|hop| tpl.is_reliable(hop.transport.as_str()))
        .unwrap_or(false);
    let invite = origin.is_invite();

    let (input_tx, input_rx) = mpsc::channel(16);
    let runner = TxRunner {
        key: key.clone(),
        origin,
        dest: dest.into(),
        tpl,
        msgs,
        errs,
        cancel,
        settings,
        fsm: ClientFsm::new(invite),
        reliable,
        last_resp: None,
        last_err: None,
    };
    tokio::spawn(runner.run(input_rx));

    Ok(ClientTx {
        key,
        inputs: input_tx,
    })
}

/// The transaction has executed its delete action.
struct Deleted;

struct TxTimers {
    a: Option<Pin<Box<Sleep>>>,
    b: Option<Pin<Box<Sleep>>>,
    d: Option<Pin<Box<Sleep>>>,
    a_period: Duration,
    d_period: Duration,
}

struct TxRunner {
    key: TxKey,
    origin: Request,
    dest: String,
    tpl: Arc<dyn TransportLayer>,
    msgs: mpsc::Sender<TxResponse>,
    errs: mpsc::Sender<TransactionError>,
    cancel: CancellationToken,
    settings: TimerSettings,
    fsm: ClientFsm,
    reliable: bool,
    last_resp: Option<Response>,
    last_err: Option<TransactionError>,
}

impl TxRunner {
    async fn run(mut self, mut inputs: mpsc::Receiver<Response>) {
        let mut timers = TxTimers {
            // Timer A drives retransmissions and only runs on unreliable
            // transports.
            a: (!self.reliable).then(|| -> Pin<Box<Sleep>> { Box::pin(sleep(self.settings.t1)) }),
            b: Some(Box::pin(sleep(self.settings.timer_b))),
            d: None,
            a_period: self.settings.t1,
            d_period: if self.reliable {
                Duration::ZERO
            } else {
                self.settings.timer_d
            },
        };
        let mut inputs_open = true;

        debug!(
            key = ?self.key,
            reliable = self.reliable,
            "client transaction started"
        );

        'serve: loop {
            let input = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(key = ?self.key, "client transaction cancelled");
                    break 'serve;
                }

                maybe = inputs.recv(), if inputs_open => match maybe {
                    Some(response) => self.classify(response),
                    None => {
                        // The handle is gone; keep running on timers so the
                        // terminal outcome still surfaces.
                        inputs_open = false;
                        continue;
                    }
                },

                _ = async { timers.a.as_mut().expect("armed").await }, if timers.a.is_some() => {
                    timers.a = None;
                    TxInput::TimerA
                }

                _ = async { timers.b.as_mut().expect("armed").await }, if timers.b.is_some() => {
                    timers.b = None;
                    TxInput::TimerB
                }

                _ = async { timers.d.as_mut().expect("armed").await }, if timers.d.is_some() => {
                    timers.d = None;
                    TxInput::TimerD
                }
            };

            // Actions can inject follow-up inputs (deletion, transport
            // errors); drain them before taking the next stimulus.
            let mut next = Some(input);
            while let Some(input) = next.take() {
                let state = self.fsm.state();
                let action = self.fsm.apply(input);
                if self.fsm.state() != state {
                    debug!(
                        key = ?self.key,
                        from = ?state,
                        to = ?self.fsm.state(),
                        ?input,
                        "client transaction transition"
                    );
                }
                match self.execute(action, &mut timers).await {
                    Ok(follow_up) => next = follow_up,
                    Err(Deleted) => break 'serve,
                }
            }
        }

        debug!(key = ?self.key, "client transaction deleted");
    }

    /// Stores the response and maps it onto an FSM input class.
    fn classify(&mut self, response: Response) -> TxInput {
        let input = if response.is_provisional() {
            TxInput::Provisional
        } else if response.is_success() {
            TxInput::Success
        } else {
            TxInput::Failure
        };
        self.last_resp = Some(response);
        input
    }

    async fn execute(
        &mut self,
        action: TxAction,
        timers: &mut TxTimers,
    ) -> Result<Option<TxInput>, Deleted> {
        match action {
            TxAction::None => Ok(None),

            TxAction::PassUp => {
                self.pass_up().await;
                Ok(None)
            }

            TxAction::PassUpDelete => {
                self.pass_up().await;
                Ok(Some(TxInput::Delete))
            }

            TxAction::InviteFinal => {
                self.pass_up().await;
                let ack_failed = self.send_ack().await.is_err();
                timers.d = Some(Box::pin(sleep(timers.d_period)));
                Ok(ack_failed.then_some(TxInput::TransportErr))
            }

            TxAction::NonInviteFinal => {
                self.pass_up().await;
                timers.d = Some(Box::pin(sleep(timers.d_period)));
                Ok(None)
            }

            TxAction::InviteResend => {
                timers.a_period = timers.a_period.saturating_mul(2);
                timers.a = Some(Box::pin(sleep(timers.a_period)));
                Ok(self.resend().await)
            }

            TxAction::NonInviteResend => {
                // Non-INVITE retransmission intervals cap at T2.
                timers.a_period = timers.a_period.saturating_mul(2).min(self.settings.t2);
                timers.a = Some(Box::pin(sleep(timers.a_period)));
                Ok(self.resend().await)
            }

            TxAction::Ack => {
                let ack_failed = self.send_ack().await.is_err();
                Ok(ack_failed.then_some(TxInput::TransportErr))
            }

            TxAction::Timeout => {
                let _ = self.errs.send(TransactionError::Timeout).await;
                Ok(Some(TxInput::Delete))
            }

            TxAction::TransErr => {
                let err = self.last_err.take().unwrap_or_else(|| {
                    TransactionError::Transport(TransportError::Network(io::Error::new(
                        io::ErrorKind::Other,
                        "transport send failed",
                    )))
                });
                let _ = self.errs.send(err).await;
                Ok(Some(TxInput::Delete))
            }

            TxAction::Delete => Err(Deleted),
        }
    }

    /// Forwards the last stored response to the consumer.
    async fn pass_up(&mut self) {
        if let Some(response) = &self.last_resp {
            let passed = TxResponse {
                key: self.key.clone(),
                response: response.clone(),
            };
            let _ = self.msgs.send(passed).await;
        }
    }

    /// Retransmits the origin request through the transport façade.
    async fn resend(&mut self) -> Option<TxInput> {
        debug!(key = ?self.key, request = %self.origin.short(), "retransmitting");
        match self
            .tpl
            .send(&self.dest, &Message::Request(self.origin.clone()))
            .await
        {
            Ok(()) => None,
            Err(err) => {
                warn!(key = ?self.key, error = %err, "retransmission failed");
                self.last_err = Some(TransactionError::Transport(err));
                Some(TxInput::TransportErr)
            }
        }
    }

    /// Synthesizes and sends an ACK for a 3xx+ final (RFC 3261 §17.1.1.3).
    async fn send_ack(&mut self) -> Result<(), ()> {
        let Some(ack) = self.build_ack() else {
            error!(
                key = ?self.key,
                "cannot build ACK: origin request is missing its CSeq or Via header"
            );
            return Ok(());
        };

        match self.tpl.send(&self.dest, &Message::Request(ack)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(key = ?self.key, error = %err, "failed to send ACK");
                self.last_err = Some(TransactionError::Transport(err));
                Err(())
            }
        }
    }

    /// Builds the ACK: `From`, `Call-ID`, and `Route` copied from the origin
    /// request, the origin `CSeq` with its method set to ACK, the origin's
    /// top `Via`, and `To` taken from the final response. Empty body.
    fn build_ack(&self) -> Option<Request> {
        let mut ack = Request::new(
            Method::Ack,
            self.origin.recipient.clone(),
            self.origin.version.clone(),
        );

        for name in ["From", "Call-ID", "Route"] {
            for header in self.origin.headers.all_named(name) {
                ack.headers.push(header.clone());
            }
        }

        let cseq = self.origin.cseq()?;
        ack.headers.push(Header::CSeq(CSeq {
            seq: cseq.seq,
            method: Method::Ack,
        }));

        let via = self.origin.headers.first_named("Via")?;
        ack.headers.push(via.clone());

        if let Some(response) = &self.last_resp {
            for header in response.headers.all_named("To") {
                ack.headers.push(header.clone());
            }
        }

        Some(ack)
    }
}
