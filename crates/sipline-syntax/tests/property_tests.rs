// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use proptest::prelude::*;
use sipline_core::Header;
use sipline_syntax::{parse_cseq, parse_sip_uri, parse_via_header};

proptest! {
    #[test]
    fn sip_uri_round_trips(
        user in proptest::option::of("[a-z][a-z0-9]{0,7}"),
        host in "[a-z][a-z0-9]{0,9}\\.[a-z]{2,3}",
        port in proptest::option::of(1u16..),
        secure in proptest::bool::ANY,
    ) {
        let mut text = String::from(if secure { "sips:" } else { "sip:" });
        if let Some(user) = &user {
            text.push_str(user);
            text.push('@');
        }
        text.push_str(&host);
        if let Some(port) = port {
            text.push_str(&format!(":{port}"));
        }

        let uri = parse_sip_uri(&text).expect("parse");
        prop_assert_eq!(uri.secure, secure);
        prop_assert_eq!(uri.user.as_deref(), user.as_deref());
        prop_assert_eq!(uri.host.as_str(), host.as_str());
        prop_assert_eq!(uri.port, port);

        let reparsed = parse_sip_uri(&uri.to_string()).expect("reparse");
        prop_assert_eq!(uri, reparsed);
    }

    #[test]
    fn sip_uri_params_round_trip(
        keys in proptest::collection::vec("[a-z]{1,6}", 1..4),
        value in "[a-z0-9]{1,8}",
    ) {
        let mut text = String::from("sip:example.com");
        for key in &keys {
            text.push_str(&format!(";{key}={value}"));
        }

        let uri = parse_sip_uri(&text).expect("parse");
        let reparsed = parse_sip_uri(&uri.to_string()).expect("reparse");
        prop_assert_eq!(uri.params, reparsed.params);
    }

    #[test]
    fn via_round_trips(
        host in "[a-z][a-z0-9]{0,9}\\.[a-z]{2,3}",
        port in proptest::option::of(1u16..),
        branch in "z9hG4bK[a-zA-Z0-9]{1,12}",
    ) {
        let mut text = format!("SIP/2.0/UDP {host}");
        if let Some(port) = port {
            text.push_str(&format!(":{port}"));
        }
        text.push_str(&format!(";branch={branch}"));

        let headers = parse_via_header("via", &text).expect("parse");
        prop_assert_eq!(headers.len(), 1);
        let wire = match &headers[0] {
            Header::Via(via) => {
                prop_assert_eq!(via.top().host.as_str(), host.as_str());
                prop_assert_eq!(via.top().port, port);
                prop_assert_eq!(
                    via.top().branch().map(|b| b.as_str()),
                    Some(branch.as_str())
                );
                via.to_string()
            }
            other => return Err(TestCaseError::fail(format!("not a Via: {other:?}"))),
        };

        let reparsed = parse_via_header("via", &wire).expect("reparse");
        prop_assert_eq!(&headers, &reparsed);
    }

    #[test]
    fn cseq_enforces_31_bit_bound(seq in proptest::num::u64::ANY) {
        let text = format!("{seq} INVITE");
        let result = parse_cseq("cseq", &text);
        if seq <= (1 << 31) - 1 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
    }
}
