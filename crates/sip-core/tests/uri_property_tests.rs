// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use proptest::prelude::*;
use sip_core::SipUri;

proptest! {
    #[test]
    fn user_host_and_port_are_broken_out(
        sips in prop::bool::ANY,
        user in proptest::option::of("[a-z0-9]{1,8}"),
        host in "[a-z][a-z0-9\\-]{0,10}",
        port in proptest::option::of(1024u16..65535),
    ) {
        let scheme = if sips { "sips" } else { "sip" };
        let user_part = user.as_ref().map(|u| format!("{}@", u)).unwrap_or_default();
        let port_part = port.map(|p| format!(":{}", p)).unwrap_or_default();
        let text = format!("{}:{}{}{}", scheme, user_part, host, port_part);

        let uri = SipUri::parse(&text).expect("parse");
        prop_assert_eq!(uri.sips, sips);
        prop_assert_eq!(uri.user.as_deref(), user.as_deref());
        prop_assert_eq!(uri.host.as_str(), host.as_str());
        prop_assert_eq!(uri.port, port);
        prop_assert_eq!(uri.as_str(), text.as_str());
        prop_assert!(!uri.is_numeric_host());
    }

    #[test]
    fn resolution_params_are_case_insensitive(
        host in "[a-z]{2,8}",
        transport in prop::sample::select(vec!["udp", "TCP", "Tls", "sctp"]),
        lr in prop::bool::ANY,
    ) {
        let lr_part = if lr { ";LR" } else { "" };
        let uri = SipUri::parse(&format!("sip:{};Transport={}{}", host, transport, lr_part)).expect("parse");
        prop_assert_eq!(uri.transport_param(), Some(transport));
        prop_assert_eq!(uri.is_loose_route(), lr);
    }

    #[test]
    fn numeric_hosts_are_recognised(v6 in prop::bool::ANY, octet in 1u8..255) {
        let host = if v6 {
            format!("[2001:db8::{:x}]", octet)
        } else {
            format!("192.0.2.{}", octet)
        };
        let uri = SipUri::parse(&format!("sip:{}:5060", host)).expect("parse");
        prop_assert!(uri.is_numeric_host());
        prop_assert!(!uri.bare_host().starts_with('['));
    }

    #[test]
    fn q_param_does_not_change_destination(q in 0u16..=1000) {
        let plain = SipUri::parse("sip:bob@192.0.2.1").expect("parse");
        let weighted = SipUri::parse(&format!("sip:bob@192.0.2.1;q=0.{:03}", q)).expect("parse");
        prop_assert!(plain.same_destination(&weighted));
        prop_assert!(weighted.same_destination(&plain));
    }
}

#[test]
fn rejects_unusable_uris() {
    for text in [
        "",
        "example.com",
        "http://example.com",
        "tel:+15551234567",
        "sip:",
        "sip:user@",
        "sip:example.com:99999",
        "sip:[2001:db8::1",
    ] {
        assert!(SipUri::parse(text).is_none(), "accepted {:?}", text);
    }
}

#[test]
fn explicit_port_is_kept_apart_from_defaults() {
    assert_eq!(SipUri::parse("sip:example.com").unwrap().port, None);
    let sips = SipUri::parse("sips:example.com").unwrap();
    assert!(sips.sips);
    assert_eq!(sips.port, None);
}
