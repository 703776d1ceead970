// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

/// SIP protocol version carried on the start line.
///
/// `SIP/2.0` is the only version in real deployments; anything else that
/// still begins with `SIP` is kept verbatim so it can be echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SipVersion {
    V2,
    Other(SmolStr),
}

impl SipVersion {
    /// Parses a version token such as `SIP/2.0`.
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("SIP/2.0") {
            SipVersion::V2
        } else {
            SipVersion::Other(SmolStr::new(token))
        }
    }

    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            SipVersion::V2 => "SIP/2.0",
            SipVersion::Other(v) => v.as_str(),
        }
    }
}

impl Default for SipVersion {
    fn default() -> Self {
        SipVersion::V2
    }
}

impl fmt::Display for SipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_version_round_trips() {
        assert_eq!(SipVersion::from_token("SIP/2.0"), SipVersion::V2);
        assert_eq!(SipVersion::from_token("sip/2.0").as_str(), "SIP/2.0");
    }

    #[test]
    fn unusual_versions_are_preserved() {
        let v = SipVersion::from_token("SIP/1.0");
        assert_eq!(v.as_str(), "SIP/1.0");
        assert_ne!(v, SipVersion::V2);
    }
}
