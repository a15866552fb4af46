//! Multi-resolver aggregation: query Cloudflare, Google and OpenDNS
//! concurrently for one (hostname, record type) pair, parse the per-type
//! record payloads into typed results, and geolocate A/AAAA answers.

use crate::geo::{GeoLookup, IpLocation};
use crate::Type;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use log::warn;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const CLOUDFLARE_NAMESERVERS: &[&str] = &["1.1.1.1", "1.0.0.1"];
pub const CLOUDFLARE_NAMESERVERS6: &[&str] = &["2606:4700:4700::1111", "2606:4700:4700::1001"];

pub const GOOGLE_NAMESERVERS: &[&str] = &["8.8.8.8", "8.8.4.4"];
pub const GOOGLE_NAMESERVERS6: &[&str] = &["2001:4860:4860::8888", "2001:4860:4860::8844"];

pub const OPENDNS_NAMESERVERS: &[&str] = &["208.67.222.222", "208.67.220.220"];
pub const OPENDNS_NAMESERVERS6: &[&str] = &["2620:119:35::35", "2620:119:53::53"];

/// One public resolver's nameserver endpoints.
#[derive(Clone, Debug)]
pub struct DnsResolver {
    nameservers: Vec<IpAddr>,
    nameservers6: Vec<IpAddr>,
}

impl DnsResolver {
    fn from_literals(nameservers: &[&str], nameservers6: &[&str]) -> DnsResolver {
        let parse = |addrs: &[&str]| {
            addrs
                .iter()
                .map(|a| a.parse().expect("invalid nameserver literal"))
                .collect()
        };

        DnsResolver {
            nameservers: parse(nameservers),
            nameservers6: parse(nameservers6),
        }
    }

    /// A random IPv4 nameserver.
    pub fn random(&self) -> IpAddr {
        *self
            .nameservers
            .choose(&mut rand::thread_rng())
            .expect("at least one nameserver")
    }

    /// A random IPv6 nameserver.
    pub fn random6(&self) -> IpAddr {
        *self
            .nameservers6
            .choose(&mut rand::thread_rng())
            .expect("at least one nameserver")
    }
}

/// The fixed, process-wide set of public resolvers the aggregator queries.
#[derive(Clone, Debug)]
pub struct ResolverSet {
    pub cloudflare: DnsResolver,
    pub google: DnsResolver,
    pub opendns: DnsResolver,
}

impl Default for ResolverSet {
    fn default() -> Self {
        ResolverSet {
            cloudflare: DnsResolver::from_literals(CLOUDFLARE_NAMESERVERS, CLOUDFLARE_NAMESERVERS6),
            google: DnsResolver::from_literals(GOOGLE_NAMESERVERS, GOOGLE_NAMESERVERS6),
            opendns: DnsResolver::from_literals(OPENDNS_NAMESERVERS, OPENDNS_NAMESERVERS6),
        }
    }
}

impl ResolverSet {
    pub fn all(&self) -> [(&'static str, &DnsResolver); 3] {
        [
            ("cloudflare", &self.cloudflare),
            ("google", &self.google),
            ("opendns", &self.opendns),
        ]
    }
}

/// One parsed record. The JSON form carries a `kind` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ParsedRecord {
    Mx(MxResult),
    Soa(SoaResult),
    Txt(TxtResult),
    Ns(NsResult),
    Ip(IpLocation),
    Raw { data: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MxResult {
    pub priority: u16,
    pub hostname: String,
    pub ttl: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoaResult {
    pub primary_ns: String,
    pub email: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
    pub ttl: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxtResult {
    pub text: String,
    pub ttl: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NsResult {
    pub hostname: String,
    pub ttl: u32,
}

#[derive(Error, Debug)]
pub enum RecordParseError {
    #[error("record data doesn't match the expected format: '{0}'")]
    InvalidFormat(String),

    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),

    #[error(transparent)]
    AddrParseError(#[from] std::net::AddrParseError),
}

fn strip_trailing_dot(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// Converts per-type textual record forms into [`ParsedRecord`]s.
///
/// The geolocation enricher is an injected capability, A/AAAA answers go
/// through it.
pub struct RecordParser {
    geo: Arc<dyn GeoLookup>,
}

impl RecordParser {
    pub fn new(geo: Arc<dyn GeoLookup>) -> RecordParser {
        RecordParser { geo }
    }

    /// Parses `text`, the canonical presentation form of one record of
    /// `r#type`, carrying `ttl` through to the result.
    pub async fn parse(
        &self,
        r#type: Type,
        text: &str,
        ttl: u32,
    ) -> Result<ParsedRecord, RecordParseError> {
        Ok(match r#type {
            Type::A | Type::AAAA => {
                text.parse::<IpAddr>()?;
                ParsedRecord::Ip(self.geo.ip_to_location(text, ttl).await)
            }

            Type::MX => {
                let mut parts = text.split(' ');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(priority), Some(hostname), None) => ParsedRecord::Mx(MxResult {
                        priority: priority.parse()?,
                        hostname: strip_trailing_dot(hostname),
                        ttl,
                    }),
                    _ => return Err(RecordParseError::InvalidFormat(text.to_string())),
                }
            }

            Type::NS => ParsedRecord::Ns(NsResult {
                hostname: strip_trailing_dot(text),
                ttl,
            }),

            Type::SOA => {
                let parts: Vec<&str> = text.split(' ').collect();
                if parts.len() != 7 {
                    return Err(RecordParseError::InvalidFormat(text.to_string()));
                }

                ParsedRecord::Soa(SoaResult {
                    primary_ns: parts[0].to_string(),
                    // Only the first dot separates the mailbox from its
                    // domain; dotted mailbox labels are a known limitation.
                    email: parts[1].replacen('.', "@", 1),
                    serial: parts[2].parse()?,
                    refresh: parts[3].parse()?,
                    retry: parts[4].parse()?,
                    expire: parts[5].parse()?,
                    minimum: parts[6].parse()?,
                    ttl,
                })
            }

            Type::TXT => ParsedRecord::Txt(TxtResult {
                text: text.replace('"', ""),
                ttl,
            }),

            // PTR, CNAME, SRV and everything else pass through untouched.
            _ => ParsedRecord::Raw {
                data: text.to_string(),
            },
        })
    }
}

/// The aggregation result: one list per resolver, plus the `metadata` list
/// describing empty or failed lookups as `"<resolver>: <Kind>"` strings.
#[derive(Debug, PartialEq, Serialize)]
pub struct AggregatedResult {
    #[serde(flatten)]
    pub records: BTreeMap<String, Vec<ParsedRecord>>,

    pub metadata: Vec<String>,
}

/// What one resolver's stub lookup came back with.
#[derive(Debug)]
enum LookupOutcome {
    Answers { min_ttl: u32, data: Vec<String> },
    Empty(String),
}

fn classify(e: &ResolveError) -> String {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound {
            response_code: ResponseCode::NXDomain,
            ..
        } => "NXDOMAIN".to_string(),
        ResolveErrorKind::NoRecordsFound { .. } => "NoAnswer".to_string(),
        ResolveErrorKind::Timeout => "Timeout".to_string(),
        _ => "ResolveError".to_string(),
    }
}

fn record_type(r#type: Type) -> RecordType {
    match r#type {
        Type::A => RecordType::A,
        Type::NS => RecordType::NS,
        Type::CNAME => RecordType::CNAME,
        Type::SOA => RecordType::SOA,
        Type::PTR => RecordType::PTR,
        Type::MX => RecordType::MX,
        Type::TXT => RecordType::TXT,
        Type::AAAA => RecordType::AAAA,
        Type::SRV => RecordType::SRV,
        Type::Reserved | Type::OPT | Type::ANY => RecordType::ANY,
    }
}

/// Queries every resolver in the set concurrently and collates the answers.
pub struct Aggregator {
    resolvers: ResolverSet,
    parser: RecordParser,

    timeout: Duration,
}

impl Aggregator {
    pub fn new(geo: Arc<dyn GeoLookup>) -> Aggregator {
        Aggregator {
            resolvers: ResolverSet::default(),
            parser: RecordParser::new(geo),
            timeout: Duration::new(5, 0),
        }
    }

    /// Resolves (hostname, record_type) against all configured resolvers.
    ///
    /// `use_ipv6` selects the nameserver endpoint family; it does not
    /// constrain the queried record type. An explicit `nameserver` overrides
    /// the per-resolver random pick, for all of them.
    ///
    /// The result always carries exactly the configured resolver names as
    /// keys; resolvers that returned nothing get an empty list and a
    /// metadata entry.
    pub async fn resolve_record(
        &self,
        hostname: &str,
        record_type: Type,
        use_ipv6: bool,
        nameserver: Option<IpAddr>,
    ) -> AggregatedResult {
        let lookups = self.resolvers.all().map(|(name, resolver)| {
            let ns = nameserver.unwrap_or_else(|| {
                if use_ipv6 {
                    resolver.random6()
                } else {
                    resolver.random()
                }
            });

            async move { (name, self.lookup_at(ns, hostname, record_type).await) }
        });

        let outcomes = futures::future::join_all(lookups).await;

        self.collate(record_type, outcomes).await
    }

    /// [`Aggregator::resolve_record`] against the IPv6 nameserver endpoints.
    pub async fn resolve_record6(&self, hostname: &str, record_type: Type) -> AggregatedResult {
        self.resolve_record(hostname, record_type, true, None).await
    }

    async fn lookup_at(&self, nameserver: IpAddr, hostname: &str, r#type: Type) -> LookupOutcome {
        let group = NameServerConfigGroup::from_ips_clear(&[nameserver], 53, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 2;

        let resolver = TokioAsyncResolver::tokio(config, opts);

        match resolver.lookup(hostname, record_type(r#type)).await {
            Ok(lookup) => {
                // The lookup result includes any CNAME chain; only records of
                // the requested type are aggregated.
                let records: Vec<_> = lookup
                    .records()
                    .iter()
                    .filter(|r| r.record_type() == record_type(r#type))
                    .collect();

                let data: Vec<String> = records
                    .iter()
                    .filter_map(|r| r.data().map(|d| d.to_string()))
                    .collect();

                if data.is_empty() {
                    return LookupOutcome::Empty("NoAnswer".to_string());
                }

                let min_ttl = records.iter().map(|r| r.ttl()).min().unwrap_or(0);

                LookupOutcome::Answers { min_ttl, data }
            }
            Err(e) => LookupOutcome::Empty(classify(&e)),
        }
    }

    async fn collate(
        &self,
        r#type: Type,
        outcomes: Vec<(&'static str, LookupOutcome)>,
    ) -> AggregatedResult {
        let mut records = BTreeMap::new();
        let mut metadata = Vec::new();

        for (name, outcome) in outcomes {
            match outcome {
                LookupOutcome::Answers { min_ttl, data } => {
                    let mut parsed = Vec::with_capacity(data.len());
                    let mut failed = false;

                    for text in &data {
                        match self.parser.parse(r#type, text, min_ttl).await {
                            Ok(record) => parsed.push(record),
                            Err(e) => {
                                warn!("Failed to parse {} answer '{}' from {}: {}", r#type, text, name, e);
                                failed = true;
                                break;
                            }
                        }
                    }

                    if failed {
                        records.insert(name.to_string(), Vec::new());
                        metadata.push(format!("{}: ParseError", name));
                    } else {
                        records.insert(name.to_string(), parsed);
                    }
                }

                LookupOutcome::Empty(kind) => {
                    records.insert(name.to_string(), Vec::new());
                    metadata.push(format!("{}: {}", name, kind));
                }
            }
        }

        AggregatedResult { records, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

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

    fn parser() -> RecordParser {
        RecordParser::new(Arc::new(StubGeo))
    }

    #[tokio::test]
    async fn test_parse_mx() {
        let record = parser()
            .parse(Type::MX, "10 smtp.google.com.", 300)
            .await
            .expect("failed to parse MX");

        assert_eq!(
            record,
            ParsedRecord::Mx(MxResult {
                priority: 10,
                hostname: "smtp.google.com".to_string(),
                ttl: 300,
            })
        );
    }

    #[tokio::test]
    async fn test_parse_mx_wrong_arity() {
        assert!(parser().parse(Type::MX, "10", 300).await.is_err());
        assert!(parser()
            .parse(Type::MX, "10 smtp.google.com. extra", 300)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_parse_soa() {
        let record = parser()
            .parse(
                Type::SOA,
                "ns1.google.com. dns-admin.google.com. 12345 900 900 1800 60",
                60,
            )
            .await
            .expect("failed to parse SOA");

        assert_eq!(
            record,
            ParsedRecord::Soa(SoaResult {
                primary_ns: "ns1.google.com.".to_string(),
                email: "dns-admin@google.com.".to_string(),
                serial: 12345,
                refresh: 900,
                retry: 900,
                expire: 1800,
                minimum: 60,
                ttl: 60,
            })
        );
    }

    #[tokio::test]
    async fn test_parse_txt() {
        let record = parser()
            .parse(Type::TXT, "\"v=spf1 -all\"", 3600)
            .await
            .expect("failed to parse TXT");

        assert_eq!(
            record,
            ParsedRecord::Txt(TxtResult {
                text: "v=spf1 -all".to_string(),
                ttl: 3600,
            })
        );
    }

    #[tokio::test]
    async fn test_parse_ns() {
        let record = parser()
            .parse(Type::NS, "ns1.google.com.", 21599)
            .await
            .expect("failed to parse NS");

        assert_eq!(
            record,
            ParsedRecord::Ns(NsResult {
                hostname: "ns1.google.com".to_string(),
                ttl: 21599,
            })
        );
    }

    #[tokio::test]
    async fn test_parse_a_enriches_with_geo() {
        let record = parser()
            .parse(Type::A, "192.0.2.1", 60)
            .await
            .expect("failed to parse A");

        assert_eq!(record, ParsedRecord::Ip(IpLocation::minimal("192.0.2.1", 60)));
    }

    #[tokio::test]
    async fn test_parse_a_rejects_garbage() {
        assert!(parser().parse(Type::A, "not-an-ip", 60).await.is_err());
    }

    #[tokio::test]
    async fn test_parse_cname_passes_through() {
        let record = parser()
            .parse(Type::CNAME, "www.google.com.", 60)
            .await
            .expect("failed to parse CNAME");

        assert_eq!(
            record,
            ParsedRecord::Raw {
                data: "www.google.com.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_collate_nxdomain() {
        let outcomes = vec![
            ("cloudflare", LookupOutcome::Empty("NXDOMAIN".to_string())),
            ("google", LookupOutcome::Empty("NXDOMAIN".to_string())),
            ("opendns", LookupOutcome::Empty("NXDOMAIN".to_string())),
        ];

        let result = aggregator().collate(Type::A, outcomes).await;

        for name in ["cloudflare", "google", "opendns"] {
            assert_eq!(result.records[name], Vec::new());
            assert!(result.metadata.contains(&format!("{}: NXDOMAIN", name)));
        }
        assert_eq!(result.metadata.len(), 3);
    }

    #[tokio::test]
    async fn test_collate_parse_error_substitutes_empty_list() {
        let outcomes = vec![
            (
                "cloudflare",
                LookupOutcome::Answers {
                    min_ttl: 300,
                    data: vec!["10 smtp.google.com.".to_string()],
                },
            ),
            (
                "google",
                LookupOutcome::Answers {
                    min_ttl: 300,
                    data: vec!["garbage".to_string()],
                },
            ),
            ("opendns", LookupOutcome::Empty("Timeout".to_string())),
        ];

        let result = aggregator().collate(Type::MX, outcomes).await;

        assert_eq!(result.records["cloudflare"].len(), 1);
        assert_eq!(result.records["google"], Vec::new());
        assert_eq!(result.records["opendns"], Vec::new());
        assert!(result.metadata.contains(&"google: ParseError".to_string()));
        assert!(result.metadata.contains(&"opendns: Timeout".to_string()));
        assert_eq!(result.metadata.len(), 2);
    }

    #[tokio::test]
    async fn test_result_schema_keys() {
        let outcomes = vec![
            ("cloudflare", LookupOutcome::Empty("NXDOMAIN".to_string())),
            ("google", LookupOutcome::Empty("NXDOMAIN".to_string())),
            ("opendns", LookupOutcome::Empty("NXDOMAIN".to_string())),
        ];

        let result = aggregator().collate(Type::A, outcomes).await;
        let json = serde_json::to_value(&result).unwrap();

        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["cloudflare", "google", "metadata", "opendns"]);
    }

    #[test]
    fn test_parsed_record_carries_discriminator() {
        let record = ParsedRecord::Mx(MxResult {
            priority: 10,
            hostname: "smtp.google.com".to_string(),
            ttl: 300,
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "mx");
        assert_eq!(json["priority"], 10);
        assert_eq!(json["hostname"], "smtp.google.com");
    }

    #[test]
    fn test_resolver_set_random_selection() {
        let set = ResolverSet::default();

        for _ in 0..16 {
            let ns = set.google.random();
            assert!(GOOGLE_NAMESERVERS.contains(&ns.to_string().as_str()));

            let ns6 = set.cloudflare.random6();
            assert!(ns6.is_ipv6());
        }
    }
}
