use crate::clients::Exchanger;
use crate::json::MessageJson;
use crate::Error;
use crate::Message;
use crate::ParseError;
use async_trait::async_trait;
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use http::Method;
use http::Request;
use hyper::{Body, Client as HyperClient};
use hyper_alpn::AlpnConnector;
use mime::Mime;
use rand::seq::SliceRandom;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const GOOGLE: &str = "https://dns.google/resolve";
pub const CLOUDFLARE: &str = "https://cloudflare-dns.com/dns-query";

// For use in Content-type and Accept headers
// Google actually uses "application/x-javascript", but Cloud Flare requires "application/dns-json".
// Since Google's API seems to accept either, we default to dns-json.
const CONTENT_TYPE_APPLICATION_DNS_JSON: &str = "application/dns-json";
const CONTENT_TYPE_APPLICATION_X_JAVASCRIPT: &str = "application/x-javascript";

// Compares the "type/subtype" essence, ignoring any "+suffix; param=value".
fn content_type_equal(content_type: &HeaderValue, expected: &str) -> bool {
    content_type
        .to_str()
        .ok()
        .and_then(|t| Mime::from_str(t).ok())
        .map(|mime| mime.essence_str() == expected)
        .unwrap_or(false)
}

/// A DNS over HTTPS client using the Google JSON API.
///
/// # Example
///
/// ```rust,no_run
/// use dnsdig::clients::{DohJsonClient, Exchanger};
/// use dnsdig::types::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), dnsdig::Error> {
///     let mut query = Message::default();
///     query.add_question("example.com", Type::A, Class::Internet);
///
///     let response = DohJsonClient::new(&["https://dns.google/resolve"])?
///        .exchange(&query)
///        .await?;
///
///     println!("{}", response);
///     Ok(())
/// }
/// ```
///
/// See <https://developers.google.com/speed/public-dns/docs/doh/json> and
/// <https://developers.cloudflare.com/1.1.1.1/encrypted-dns/dns-over-https/make-api-requests/dns-json>
pub struct DohJsonClient {
    servers: Vec<Url>,

    // A single ALPN client (so connections upgrade to HTTP/2), shared by all
    // exchanges. Idle connections are kept for up to a day, so the forwarder
    // does not depend on its own resolution path to re-resolve the server's
    // hostname on every query.
    client: HyperClient<AlpnConnector>,
}

impl Default for DohJsonClient {
    fn default() -> Self {
        DohJsonClient::new(&[GOOGLE]).expect("invalid built-in server")
    }
}

impl DohJsonClient {
    /// Creates a new client bound to the specific servers.
    ///
    /// Be aware that the servers will typically be in the form of
    /// `https://domain_name/`. That `domain_name` is resolved through the
    /// system's standard DNS library.
    pub fn new(servers: &[&str]) -> Result<Self, Error> {
        let servers = servers
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Url>, url::ParseError>>()?;

        let alpn = AlpnConnector::new();
        let client = HyperClient::builder()
            .pool_idle_timeout(Duration::from_secs(24 * 60 * 60))
            .http2_only(true)
            .build::<_, Body>(alpn);

        Ok(Self { servers, client })
    }
}

#[async_trait]
impl Exchanger for DohJsonClient {
    /// Sends the [`Message`]'s question to a randomly picked server via HTTPS
    /// and returns the reconstructed response.
    async fn exchange(&self, query: &Message) -> Result<Message, Error> {
        if query.questions.len() != 1 {
            return Err(Error::InvalidArgument(
                "expected exactly one question".to_string(),
            ));
        }

        let question = &query.questions[0];

        let mut url = self
            .servers
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::InvalidArgument("no DoH servers configured".to_string()))?
            .clone();

        url.query_pairs_mut().append_pair("name", &question.name);
        url.query_pairs_mut()
            .append_pair("type", &question.r#type.to_string());
        url.query_pairs_mut()
            .append_pair("cd", &query.cd.to_string());

        if let Some(extension) = &query.extension {
            url.query_pairs_mut()
                .append_pair("do", &extension.dnssec_ok.to_string());
        }

        // We have to do this wierd as_str().parse() thing because the
        // http::Uri doesn't provide a way to easily mutate or construct it.
        let uri: hyper::Uri = url.as_str().parse()?;

        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(ACCEPT, CONTENT_TYPE_APPLICATION_DNS_JSON)
            .body(Body::empty())?;

        let resp = self.client.request(req).await?;

        if let Some(content_type) = resp.headers().get(CONTENT_TYPE) {
            if !content_type_equal(content_type, CONTENT_TYPE_APPLICATION_DNS_JSON)
                && !content_type_equal(content_type, CONTENT_TYPE_APPLICATION_X_JAVASCRIPT)
            {
                return Err(Error::Upstream(format!(
                    "received invalid content-type: {:?} expected {} or {}",
                    content_type,
                    CONTENT_TYPE_APPLICATION_DNS_JSON,
                    CONTENT_TYPE_APPLICATION_X_JAVASCRIPT,
                )));
            }
        }

        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "received unexpected HTTP status code: {}",
                resp.status()
            )));
        }

        // Read the full body
        let body = hyper::body::to_bytes(resp.into_body()).await?;

        let json: MessageJson = serde_json::from_slice(&body).map_err(ParseError::JsonError)?;

        // The JSON form is only used in replies, so the QR flag is implied.
        let m = Message::from_doh_json(json, true)?;

        Ok(m)
    }
}
