//! dnsdig is a caching DNS forwarder and multi-resolver aggregator.
//!
//! Two cores live here:
//!
//! * A **DNS-over-UDP forwarder**: accepts wire-format queries on a UDP
//!   socket, forwards them to a public recursive resolver over an encrypted
//!   transport (DNS-over-TLS, or DNS-over-HTTPS in Google's JSON flavour),
//!   caches answers for their TTL with single-flight upstream coordination,
//!   and records per-query latency analytics.
//! * A **multi-resolver aggregator**: for one (hostname, record type) pair,
//!   queries Cloudflare, Google and OpenDNS concurrently, parses the
//!   per-type record payloads into typed results, and enriches A/AAAA
//!   answers with IP geolocation.
//!
//! # Usage (forwarder)
//!
//! ```rust,no_run
//! use dnsdig::analytics::{Analytics, MemorySampleStore};
//! use dnsdig::cache::{AnswerCache, MemoryStore, DEFAULT_TTL_CEILING};
//! use dnsdig::clients::DotClient;
//! use dnsdig::forwarder::UdpForwarder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dnsdig::Error> {
//!     let cache = AnswerCache::new(Arc::new(MemoryStore::default()), DEFAULT_TTL_CEILING);
//!     let analytics = Arc::new(Analytics::new(Arc::new(MemorySampleStore::default())));
//!     let upstream = Arc::new(DotClient::default());
//!
//!     UdpForwarder::new("127.0.0.1", 5053, cache, upstream, analytics)
//!         .serve()
//!         .await
//! }
//! ```
//!
//! # Usage (aggregator)
//!
//! ```rust,no_run
//! use dnsdig::geo::IpInfoClient;
//! use dnsdig::resolver::Aggregator;
//! use dnsdig::types::Type;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let geo = Arc::new(IpInfoClient::new("https://ipinfo.io", "token"));
//!     let aggregator = Aggregator::new(geo);
//!
//!     let result = aggregator
//!         .resolve_record("google.com", Type::MX, false, None)
//!         .await;
//!
//!     println!("{}", serde_json::to_string_pretty(&result).unwrap());
//! }
//! ```
//!
//! ## Reference
//!
//! * [rfc1034]: DOMAIN NAMES - CONCEPTS AND FACILITIES
//! * [rfc1035]: DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION
//! * [rfc7858]: Specification for DNS over Transport Layer Security (TLS)
//! * [Google's DoH-JSON API](https://developers.google.com/speed/public-dns/docs/doh/json)
//! * [IANA Domain Name System (DNS) Parameters](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml)
//!
//! [rfc1034]: https://datatracker.ietf.org/doc/html/rfc1034
//! [rfc1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [rfc7858]: https://datatracker.ietf.org/doc/html/rfc7858

pub mod analytics;
pub mod cache;
pub mod clients;
mod display;
mod dns;
mod errors;
pub mod forwarder;
mod from_str;
pub mod geo;
mod io;
pub mod json;
pub mod resolver;
pub mod resource;
pub mod settings;
pub mod types;

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate lazy_static;

// Pull up the various types that should be on the front page of the docs.
#[doc(inline)]
pub use crate::types::*;

#[doc(inline)]
pub use crate::resource::*;

#[doc(inline)]
pub use crate::resolver::Aggregator;

pub use crate::errors::Error;
pub use crate::errors::ParseError;
pub use crate::from_str::FromStrError;
