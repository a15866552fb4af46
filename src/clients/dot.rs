use crate::clients::Exchanger;
use crate::Error;
use crate::Message;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// One upstream DNS-over-TLS resolver endpoint.
#[derive(Clone, Debug)]
pub struct DotServer {
    /// Resolver address, usually on port 853.
    pub addr: SocketAddr,

    /// Name presented as SNI and verified against the resolver's certificate.
    pub server_name: String,
}

impl DotServer {
    pub fn new(addr: &str, server_name: &str) -> io::Result<DotServer> {
        let addr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;

        Ok(DotServer {
            addr,
            server_name: server_name.to_string(),
        })
    }
}

/// A DNS over TLS (DoT) client.
///
/// A fresh TLS connection is opened for every exchange. That is acceptable
/// for forwarder throughput because the answer cache absorbs most of the
/// load before it reaches an upstream.
///
/// One server is picked at random from the pool per exchange.
///
/// # Example
///
/// ```rust,no_run
/// use dnsdig::clients::{DotClient, Exchanger};
/// use dnsdig::types::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), dnsdig::Error> {
///     let mut query = Message::default();
///     query.add_question("example.com", Type::A, Class::Internet);
///
///     let response = DotClient::default().exchange(&query).await?;
///
///     println!("{}", response);
///     Ok(())
/// }
/// ```
///
/// See <https://datatracker.ietf.org/doc/html/rfc7858>
pub struct DotClient {
    servers: Vec<DotServer>,
    connector: TlsConnector,

    timeout: Duration,
}

/// Defaults to the public Google and Cloudflare resolvers.
impl Default for DotClient {
    fn default() -> Self {
        let servers = [
            ("8.8.8.8:853", "dns.google"),
            ("8.8.4.4:853", "dns.google"),
            ("1.1.1.1:853", "one.one.one.one"),
            ("1.0.0.1:853", "one.one.one.one"),
        ]
        .into_iter()
        .map(|(addr, name)| DotServer::new(addr, name).expect("invalid built-in server"))
        .collect();

        DotClient::new(servers)
    }
}

impl DotClient {
    /// Creates a new DotClient bound to the specific servers.
    pub fn new(servers: Vec<DotServer>) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        DotClient {
            servers,
            connector: TlsConnector::from(Arc::new(config)),
            timeout: Duration::new(5, 0),
        }
    }

    async fn exchange_with(&self, server: &DotServer, query: &Message) -> io::Result<Message> {
        let server_name = ServerName::try_from(server.server_name.as_str())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}", e)))?;

        let stream = timeout(self.timeout, TcpStream::connect(server.addr)).await??;
        stream.set_nodelay(true)?; // We send discrete packets, so we can send as soon as possible.

        let mut stream = timeout(self.timeout, self.connector.connect(server_name, stream)).await??;

        let message = query.to_vec()?;

        // Two byte length prefix followed by the message.
        stream
            .write_all(&(message.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&message).await?;
        stream.flush().await?;

        // Now receive a two byte length
        let mut len = [0; 2];
        timeout(self.timeout, stream.read_exact(&mut len)).await??;

        // and finally the message
        let mut buf = vec![0; u16::from_be_bytes(len).into()];
        timeout(self.timeout, stream.read_exact(&mut buf)).await??;

        Message::from_slice(&buf)
    }
}

#[async_trait]
impl Exchanger for DotClient {
    /// Sends the [`Message`] to a randomly picked server over TLS and returns
    /// the result.
    async fn exchange(&self, query: &Message) -> Result<Message, Error> {
        let server = self
            .servers
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::InvalidArgument("no DoT servers configured".to_string()))?;

        self.exchange_with(&server, query)
            .await
            .map_err(|e| Error::Upstream(format!("{}: {}", server.addr, e)))
    }
}
