// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP URI model (RFC 3261 §19.1).
//!
//! `sip:` and `sips:` URIs share one representation distinguished by the
//! `secure` flag. The bare `*` used by Contact headers during
//! de-registration is a separate [`Uri`] variant.

use std::fmt;

use smol_str::SmolStr;

use crate::params::Params;

/// A parsed `sip:` / `sips:` URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipUri {
    /// `true` for `sips:`.
    pub secure: bool,
    pub user: Option<SmolStr>,
    pub password: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    /// `;`-delimited URI parameters, insertion order preserved.
    pub params: Params,
    /// `?`-introduced, `&`-delimited URI headers.
    pub headers: Params,
}

impl SipUri {
    /// Constructs a plain `sip:` URI for the given host.
    pub fn new(host: impl Into<SmolStr>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Scheme token for this URI.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "sips"
        } else {
            "sip"
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme())?;
        if let Some(user) = &self.user {
            write!(f, "{}", user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params.serialize_with(';'))?;
        }
        if !self.headers.is_empty() {
            write!(f, "?{}", self.headers.serialize_with('&'))?;
        }
        Ok(())
    }
}

/// Any URI the core stack understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uri {
    Sip(SipUri),
    /// The bare `*` contact form used when de-registering.
    Wildcard,
}

impl Uri {
    /// Returns the inner [`SipUri`] unless this is the wildcard form.
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            Uri::Wildcard => None,
        }
    }

    /// Returns `true` for the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Uri::Wildcard)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => uri.fmt(f),
            Uri::Wildcard => f.write_str("*"),
        }
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minimal_uri() {
        let uri = SipUri::new("example.com");
        assert_eq!(uri.to_string(), "sip:example.com");
    }

    #[test]
    fn renders_full_uri() {
        let mut uri = SipUri::new("example.com");
        uri.secure = true;
        uri.user = Some(SmolStr::new("alice"));
        uri.password = Some(SmolStr::new("hunter2"));
        uri.port = Some(5061);
        uri.params.insert("transport", Some(SmolStr::new("tls")));
        uri.headers.insert("subject", Some(SmolStr::new("call")));

        assert_eq!(
            uri.to_string(),
            "sips:alice:hunter2@example.com:5061;transport=tls?subject=call"
        );
    }

    #[test]
    fn wildcard_renders_as_star() {
        assert_eq!(Uri::Wildcard.to_string(), "*");
        assert!(Uri::Wildcard.is_wildcard());
        assert!(Uri::Wildcard.as_sip().is_none());
    }
}
