// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pure client transaction state machines (RFC 3261 §17.1.1 and §17.1.2).
//!
//! The tables map `(state, input)` to `(next state, action)`; the runtime in
//! `client` executes the actions. Inputs with no table entry are no-ops, so
//! duplicate or late stimuli in `Proceeding`/`Completed`/`Terminated` are
//! absorbed silently.

/// Client transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

/// Everything that can drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxInput {
    /// A 1xx response.
    Provisional,
    /// A 2xx response.
    Success,
    /// A 3xx–6xx response.
    Failure,
    TimerA,
    TimerB,
    TimerD,
    TransportErr,
    Delete,
}

/// What the runtime must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxAction {
    None,
    /// Forward the last response to the consumer.
    PassUp,
    /// Forward the last response, then request deletion.
    PassUpDelete,
    /// Forward, emit an ACK, and arm timer D (INVITE 3xx+ final).
    InviteFinal,
    /// Forward and arm timer D (non-INVITE final).
    NonInviteFinal,
    /// Double timer A, restart it, and retransmit.
    InviteResend,
    /// Double timer A capped at T2, restart it, and retransmit.
    NonInviteResend,
    /// Re-ACK a retransmitted 3xx+ final.
    Ack,
    /// Surface a timeout, then request deletion.
    Timeout,
    /// Surface a transport error, then request deletion.
    TransErr,
    /// Tear the transaction down.
    Delete,
}

/// One client transaction FSM, INVITE or non-INVITE flavoured.
#[derive(Debug)]
pub(crate) struct ClientFsm {
    invite: bool,
    state: TxState,
}

impl ClientFsm {
    pub(crate) fn new(invite: bool) -> Self {
        Self {
            invite,
            state: TxState::Calling,
        }
    }

    pub(crate) fn state(&self) -> TxState {
        self.state
    }

    /// Applies one input, returning the action for the runtime to execute.
    pub(crate) fn apply(&mut self, input: TxInput) -> TxAction {
        let (next, action) = if self.invite {
            Self::invite_transition(self.state, input)
        } else {
            Self::non_invite_transition(self.state, input)
        };
        self.state = next;
        action
    }

    fn invite_transition(state: TxState, input: TxInput) -> (TxState, TxAction) {
        use TxAction as A;
        use TxInput as I;
        use TxState as S;

        match (state, input) {
            (S::Calling, I::Provisional) => (S::Proceeding, A::PassUp),
            (S::Calling, I::Success) => (S::Terminated, A::PassUpDelete),
            (S::Calling, I::Failure) => (S::Completed, A::InviteFinal),
            (S::Calling, I::TimerA) => (S::Calling, A::InviteResend),
            (S::Calling, I::TimerB) => (S::Terminated, A::Timeout),
            (S::Calling, I::TransportErr) => (S::Terminated, A::TransErr),

            (S::Proceeding, I::Provisional) => (S::Proceeding, A::PassUp),
            (S::Proceeding, I::Success) => (S::Terminated, A::PassUpDelete),
            (S::Proceeding, I::Failure) => (S::Completed, A::InviteFinal),

            (S::Completed, I::Failure) => (S::Completed, A::Ack),
            (S::Completed, I::TransportErr) => (S::Terminated, A::TransErr),
            (S::Completed, I::TimerD) => (S::Terminated, A::Delete),

            (S::Terminated, I::Delete) => (S::Terminated, A::Delete),

            (state, _) => (state, A::None),
        }
    }

    fn non_invite_transition(state: TxState, input: TxInput) -> (TxState, TxAction) {
        use TxAction as A;
        use TxInput as I;
        use TxState as S;

        match (state, input) {
            (S::Calling, I::Provisional) => (S::Proceeding, A::PassUp),
            (S::Calling, I::Success | I::Failure) => (S::Completed, A::NonInviteFinal),
            (S::Calling, I::TimerA) => (S::Calling, A::NonInviteResend),
            (S::Calling, I::TimerB) => (S::Terminated, A::Timeout),
            (S::Calling, I::TransportErr) => (S::Terminated, A::TransErr),

            (S::Proceeding, I::Provisional) => (S::Proceeding, A::PassUp),
            (S::Proceeding, I::Success | I::Failure) => (S::Completed, A::NonInviteFinal),
            (S::Proceeding, I::TimerA) => (S::Proceeding, A::NonInviteResend),
            (S::Proceeding, I::TimerB) => (S::Terminated, A::Timeout),
            (S::Proceeding, I::TransportErr) => (S::Terminated, A::TransErr),

            (S::Completed, I::TimerD) => (S::Terminated, A::Delete),

            (S::Terminated, I::Delete) => (S::Terminated, A::Delete),

            (state, _) => (state, A::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TxAction as A;
    use TxInput as I;
    use TxState as S;

    #[test]
    fn invite_provisional_then_failure_final() {
        let mut fsm = ClientFsm::new(true);
        assert_eq!(fsm.apply(I::Provisional), A::PassUp);
        assert_eq!(fsm.state(), S::Proceeding);

        assert_eq!(fsm.apply(I::Failure), A::InviteFinal);
        assert_eq!(fsm.state(), S::Completed);

        // A retransmitted final gets re-ACKed without leaving Completed.
        assert_eq!(fsm.apply(I::Failure), A::Ack);
        assert_eq!(fsm.state(), S::Completed);

        assert_eq!(fsm.apply(I::TimerD), A::Delete);
        assert_eq!(fsm.state(), S::Terminated);
    }

    #[test]
    fn invite_success_terminates_immediately() {
        let mut fsm = ClientFsm::new(true);
        assert_eq!(fsm.apply(I::Success), A::PassUpDelete);
        assert_eq!(fsm.state(), S::Terminated);
    }

    #[test]
    fn invite_timer_a_only_resends_while_calling() {
        let mut fsm = ClientFsm::new(true);
        assert_eq!(fsm.apply(I::TimerA), A::InviteResend);
        assert_eq!(fsm.state(), S::Calling);

        fsm.apply(I::Provisional);
        assert_eq!(fsm.apply(I::TimerA), A::None);
        assert_eq!(fsm.state(), S::Proceeding);
    }

    #[test]
    fn invite_timer_b_is_ignored_in_proceeding() {
        let mut fsm = ClientFsm::new(true);
        fsm.apply(I::Provisional);
        assert_eq!(fsm.apply(I::TimerB), A::None);
        assert_eq!(fsm.state(), S::Proceeding);
    }

    #[test]
    fn non_invite_success_goes_to_completed() {
        let mut fsm = ClientFsm::new(false);
        assert_eq!(fsm.apply(I::Success), A::NonInviteFinal);
        assert_eq!(fsm.state(), S::Completed);

        // Late responses in Completed are absorbed.
        assert_eq!(fsm.apply(I::Success), A::None);
        assert_eq!(fsm.apply(I::Failure), A::None);
    }

    #[test]
    fn non_invite_keeps_retransmitting_in_proceeding() {
        let mut fsm = ClientFsm::new(false);
        fsm.apply(I::Provisional);
        assert_eq!(fsm.state(), S::Proceeding);
        assert_eq!(fsm.apply(I::TimerA), A::NonInviteResend);
        assert_eq!(fsm.apply(I::TimerB), A::Timeout);
        assert_eq!(fsm.state(), S::Terminated);
    }

    #[test]
    fn transport_error_terminates_from_active_states() {
        let mut invite = ClientFsm::new(true);
        assert_eq!(invite.apply(I::TransportErr), A::TransErr);
        assert_eq!(invite.state(), S::Terminated);

        let mut non_invite = ClientFsm::new(false);
        non_invite.apply(I::Provisional);
        assert_eq!(non_invite.apply(I::TransportErr), A::TransErr);
        assert_eq!(non_invite.state(), S::Terminated);
    }

    #[test]
    fn terminated_absorbs_everything_except_delete() {
        let mut fsm = ClientFsm::new(true);
        fsm.apply(I::Success);
        assert_eq!(fsm.state(), S::Terminated);

        for input in [I::Provisional, I::Success, I::Failure, I::TimerA, I::TimerB, I::TimerD] {
            assert_eq!(fsm.apply(input), A::None);
            assert_eq!(fsm.state(), S::Terminated);
        }
        assert_eq!(fsm.apply(I::Delete), A::Delete);
    }
}
