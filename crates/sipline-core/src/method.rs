// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

/// SIP request method (RFC 3261 §7.1).
///
/// Unknown tokens are preserved as [`Method::Extension`] so extension methods
/// survive a parse/serialize round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Subscribe,
    Notify,
    Refer,
    Info,
    Message,
    Prack,
    Update,
    Extension(SmolStr),
}

impl Method {
    /// Maps a wire token onto a method, uppercasing it on the way in.
    pub fn from_token(token: &str) -> Self {
        let upper = token.trim().to_ascii_uppercase();
        match upper.as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "PRACK" => Method::Prack,
            "UPDATE" => Method::Update,
            _ => Method::Extension(SmolStr::new(upper)),
        }
    }

    /// Returns the canonical uppercase wire token.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Prack => "PRACK",
            Method::Update => "UPDATE",
            Method::Extension(token) => token.as_str(),
        }
    }

    /// Returns `true` for the INVITE method.
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }

    /// Returns `true` for the ACK method.
    pub fn is_ack(&self) -> bool {
        matches!(self, Method::Ack)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tokens_map_to_variants() {
        assert_eq!(Method::from_token("INVITE"), Method::Invite);
        assert_eq!(Method::from_token("invite"), Method::Invite);
        assert_eq!(Method::from_token(" options "), Method::Options);
    }

    #[test]
    fn unknown_tokens_become_extensions() {
        let method = Method::from_token("foo");
        assert_eq!(method, Method::Extension(SmolStr::new("FOO")));
        assert_eq!(method.as_str(), "FOO");
    }

    #[test]
    fn invite_detection() {
        assert!(Method::from_token("INVITE").is_invite());
        assert!(!Method::from_token("BYE").is_invite());
    }
}
