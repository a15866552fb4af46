//! Live-network aggregator tests.
//!
//! These hit the real public resolvers, so they are ignored by default:
//!
//! ```shell
//! $ cargo test --test aggregator -- --ignored
//! ```

use async_trait::async_trait;
use dnsdig::geo::{GeoLookup, IpLocation};
use dnsdig::resolver::{Aggregator, ParsedRecord};
use dnsdig::types::Type;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

struct StubGeo;

#[async_trait]
impl GeoLookup for StubGeo {
    async fn ip_to_location(&self, ip: &str, ttl: u32) -> IpLocation {
        IpLocation::minimal(ip, ttl)
    }
}

fn aggregator() -> Aggregator {
    Aggregator::new(Arc::new(StubGeo))
}

fn random_hostname() -> String {
    let label: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(|c| c.to_ascii_lowercase() as char)
        .collect();

    format!("{}.invalid", label)
}

#[tokio::test]
#[ignore = "requires network access to public resolvers"]
async fn test_resolver_a() {
    let result = aggregator()
        .resolve_record("google.com", Type::A, false, None)
        .await;

    for name in ["cloudflare", "google", "opendns"] {
        let records = &result.records[name];
        assert!(!records.is_empty(), "{} returned no records", name);

        for record in records {
            match record {
                ParsedRecord::Ip(location) => {
                    assert!(location.ip.parse::<std::net::Ipv4Addr>().is_ok())
                }
                other => panic!("expected an IP record, got {:?}", other),
            }
        }
    }
}

#[tokio::test]
#[ignore = "requires network access to public resolvers"]
async fn test_resolver_mx() {
    let result = aggregator()
        .resolve_record("google.com", Type::MX, false, None)
        .await;

    for name in ["cloudflare", "google", "opendns"] {
        let records = &result.records[name];
        assert!(!records.is_empty(), "{} returned no records", name);

        match &records[0] {
            ParsedRecord::Mx(mx) => {
                assert!(!mx.hostname.is_empty());
                assert!(!mx.hostname.ends_with('.'));
            }
            other => panic!("expected an MX record, got {:?}", other),
        }
    }
}

#[tokio::test]
#[ignore = "requires network access to public resolvers"]
async fn test_resolver_nxdomain() {
    let result = aggregator()
        .resolve_record(&random_hostname(), Type::A, false, None)
        .await;

    assert_eq!(result.records.len(), 3);
    for name in ["cloudflare", "google", "opendns"] {
        assert!(result.records[name].is_empty());
        assert!(
            result.metadata.contains(&format!("{}: NXDOMAIN", name)),
            "missing NXDOMAIN metadata for {} in {:?}",
            name,
            result.metadata
        );
    }
}

#[tokio::test]
#[ignore = "requires network access to public resolvers"]
async fn test_resolver6_aaaa() {
    let result = aggregator().resolve_record6("google.com", Type::AAAA).await;

    for name in ["cloudflare", "google", "opendns"] {
        assert!(
            !result.records[name].is_empty(),
            "{} returned no records over IPv6",
            name
        );
    }
}
