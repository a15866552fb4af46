//! IP-to-geolocation enrichment for A/AAAA answers.
//!
//! Lookups go to an ipinfo-style provider (`{host}/{ip}/json` with a bearer
//! token) and are memoized in a process-local LRU keyed by the IP alone; the
//! TTL travels through to the returned record but is not part of the key.

use crate::Error;
use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION};
use http::Method;
use http::Request;
use hyper::{Body, Client as HyperClient};
use hyper_alpn::AlpnConnector;
use log::warn;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

/// How many distinct IPs are memoized at once.
const LOCATION_CACHE_CAPACITY: usize = 8192;

/// GeoJSON-style point. Coordinates are `[longitude, latitude]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub r#type: String,
    pub coordinates: (f64, f64),
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> GeoPoint {
        GeoPoint {
            r#type: "Point".to_string(),
            coordinates: (longitude, latitude),
        }
    }
}

/// A geolocated IP address. Everything besides `ip` and `ttl` is optional,
/// lookups that fail produce the minimal record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpLocation {
    pub ip: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_iso_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,

    pub ttl: u32,
}

impl IpLocation {
    /// The record returned when the provider has nothing for us.
    pub fn minimal(ip: &str, ttl: u32) -> IpLocation {
        IpLocation {
            ip: ip.to_string(),
            country_iso_code: None,
            province: None,
            city: None,
            geo: None,
            ttl,
        }
    }
}

/// What the geolocation provider replies with.
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[allow(dead_code)]
    ip: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,

    /// `"lat,lon"`
    loc: Option<String>,
}

/// The capability the record parser needs. Injected, so tests can substitute
/// a stub and the parser doesn't couple to the provider.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Maps `ip` to a location. Never fails, lookup problems degrade to the
    /// minimal record.
    async fn ip_to_location(&self, ip: &str, ttl: u32) -> IpLocation;
}

/// [`GeoLookup`] against an ipinfo-style HTTP provider.
pub struct IpInfoClient {
    host: String,
    token: String,

    client: HyperClient<AlpnConnector>,
    cache: Mutex<LruCache<String, IpLocation>>,
}

impl IpInfoClient {
    pub fn new(host: &str, token: &str) -> IpInfoClient {
        let alpn = AlpnConnector::new();
        let client = HyperClient::builder().build::<_, Body>(alpn);

        IpInfoClient {
            host: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(LOCATION_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    async fn fetch(&self, ip: &str, ttl: u32) -> Result<IpLocation, Error> {
        let uri: hyper::Uri = format!("{}/{}/json", self.host, ip).parse()?;

        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .body(Body::empty())?;

        let resp = self.client.request(req).await?;

        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "geolocation provider returned {}",
                resp.status()
            )));
        }

        let body = hyper::body::to_bytes(resp.into_body()).await?;
        let info: IpInfoResponse =
            serde_json::from_slice(&body).map_err(crate::ParseError::JsonError)?;

        let geo = info.loc.as_deref().and_then(|loc| {
            let (lat, lon) = loc.split_once(',')?;
            Some(GeoPoint::new(lon.trim().parse().ok()?, lat.trim().parse().ok()?))
        });

        Ok(IpLocation {
            ip: ip.to_string(),
            country_iso_code: info.country,
            province: info.region,
            city: info.city,
            geo,
            ttl,
        })
    }
}

#[async_trait]
impl GeoLookup for IpInfoClient {
    async fn ip_to_location(&self, ip: &str, ttl: u32) -> IpLocation {
        if let Some(cached) = self.cache.lock().await.get(ip) {
            let mut location = cached.clone();
            location.ttl = ttl;
            return location;
        }

        let location = match self.fetch(ip, ttl).await {
            Ok(location) => location,
            Err(e) => {
                warn!("Geolocation lookup for {} failed: {}", ip, e);
                return IpLocation::minimal(ip, ttl);
            }
        };

        self.cache
            .lock()
            .await
            .put(ip.to_string(), location.clone());

        location
    }
}

/// Converts an IP literal into its integer form. `None` for invalid input.
pub fn ip_to_integer(ip: &str) -> Option<u128> {
    match ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(u32::from(v4) as u128),
        IpAddr::V6(v6) => Some(u128::from(v6)),
    }
}

/// The reverse of [`ip_to_integer`]. Values that fit 32 bits come back as
/// IPv4, everything else as IPv6.
pub fn integer_to_ip(integer: u128) -> IpAddr {
    match u32::try_from(integer) {
        Ok(v4) => IpAddr::from(std::net::Ipv4Addr::from(v4)),
        Err(_) => IpAddr::from(std::net::Ipv6Addr::from(integer)),
    }
}
