use std::net::Ipv4Addr;

use ipxlink_core::{Endpoint, IpxError, DEFAULT_PORT};
use ipxlink_transport::discovery_code::{decode, resolve_host, DiscoveryCode};
use once_cell::sync::Lazy;
use proptest::prelude::*;
use regex::Regex;

static DEFAULT_PORT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]+-[0-9A-Z]{5}$").unwrap());
static ANY_PORT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]+-[0-9A-Z]{5}(-P[0-9A-Z]{4})?$").unwrap());

fn endpoint_strategy() -> impl Strategy<Value = Endpoint> {
    (any::<[u8; 4]>(), 1u16..=u16::MAX)
        .prop_map(|(octets, port)| Endpoint::new(Ipv4Addr::from(octets), port).unwrap())
}

proptest! {
    #[test]
    fn decode_inverts_encode(ep in endpoint_strategy()) {
        let code = DiscoveryCode::encode(ep);
        prop_assert_eq!(decode(code.as_str()).unwrap(), ep);
        prop_assert_eq!(decode(&code.as_str().to_lowercase()).unwrap(), ep);
    }

    #[test]
    fn codes_match_published_pattern(ep in endpoint_strategy()) {
        let code = DiscoveryCode::encode(ep);
        prop_assert!(ANY_PORT_CODE.is_match(code.as_str()), "{}", code);
        prop_assert_eq!(DEFAULT_PORT_CODE.is_match(code.as_str()), ep.port() == DEFAULT_PORT);
    }

    #[test]
    fn default_port_codes_are_short(octets in any::<[u8; 4]>()) {
        let ep = Endpoint::new(Ipv4Addr::from(octets), DEFAULT_PORT).unwrap();
        let code = DiscoveryCode::encode(ep);
        prop_assert!(DEFAULT_PORT_CODE.is_match(code.as_str()), "{}", code);
    }

    #[test]
    fn distinct_endpoints_get_distinct_codes(a in endpoint_strategy(), b in endpoint_strategy()) {
        prop_assume!(a != b);
        prop_assert_ne!(DiscoveryCode::encode(a), DiscoveryCode::encode(b));
    }

    #[test]
    fn decode_never_panics(input in "\\PC{0,24}") {
        let _ = decode(&input);
        let _ = resolve_host(&input, DEFAULT_PORT);
    }
}

#[test]
fn encoding_is_stable_across_runs() {
    let ep = Endpoint::new(Ipv4Addr::new(203, 0, 113, 5), DEFAULT_PORT).unwrap();
    let first = DiscoveryCode::encode(ep);
    for _ in 0..10 {
        assert_eq!(DiscoveryCode::encode(ep), first);
    }
    assert_eq!(first.to_string(), "TORCH-00MBP");
}

#[test]
fn lan_and_internet_hosts_resolve() {
    let lan = resolve_host("192.168.1.42", DEFAULT_PORT).unwrap();
    assert!(!lan.from_code);
    assert_eq!(lan.endpoint.address(), Ipv4Addr::new(192, 168, 1, 42));

    let wan = resolve_host(" torch-00mbp ", 20000).unwrap();
    assert!(wan.from_code);
    assert_eq!(wan.endpoint.address(), Ipv4Addr::new(203, 0, 113, 5));
    assert_eq!(wan.endpoint.port(), DEFAULT_PORT);

    assert!(matches!(resolve_host("not-a-code!!", DEFAULT_PORT), Err(IpxError::InvalidHost(_))));
}
