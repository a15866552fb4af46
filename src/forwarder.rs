//! The DNS-over-UDP forwarder: decode, consult the cache, query upstream on
//! a miss, reply, and record the latency.
//!
//! Malformed datagrams, question-less queries and upstream failures all drop
//! the datagram silently; DNS clients retransmit on their own. Synthesizing
//! SERVFAIL instead is a possible future improvement.

use crate::analytics::Analytics;
use crate::cache::AnswerCache;
use crate::clients::Exchanger;
use crate::Error;
use crate::Message;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// The biggest datagram accepted. EDNS0 payload sizes are not negotiated.
const MAX_DATAGRAM_SIZE: usize = 512;

/// How long in-flight datagrams get to finish after a shutdown signal.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

struct ForwarderContext {
    cache: AnswerCache,
    upstream: Arc<dyn Exchanger>,
    analytics: Arc<Analytics>,
}

/// A UDP DNS forwarder serving one socket.
pub struct UdpForwarder {
    host: String,
    port: u16,

    ctx: Arc<ForwarderContext>,
}

impl UdpForwarder {
    pub fn new(
        host: &str,
        port: u16,
        cache: AnswerCache,
        upstream: Arc<dyn Exchanger>,
        analytics: Arc<Analytics>,
    ) -> UdpForwarder {
        UdpForwarder {
            host: host.to_string(),
            port,
            ctx: Arc::new(ForwarderContext {
                cache,
                upstream,
                analytics,
            }),
        }
    }

    /// Binds the socket. Failure to bind (e.g. address already in use) is
    /// fatal and surfaces to the caller.
    pub async fn bind(self) -> Result<BoundForwarder, Error> {
        let socket = match UdpSocket::bind((self.host.as_str(), self.port)).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to bind to {}:{} - {}", self.host, self.port, e);
                return Err(e.into());
            }
        };

        info!("Listening on {}", socket.local_addr()?);

        Ok(BoundForwarder {
            socket: Arc::new(socket),
            ctx: self.ctx,
        })
    }

    /// Binds and serves until SIGINT/SIGTERM.
    pub async fn serve(self) -> Result<(), Error> {
        self.bind().await?.run().await
    }
}

/// A forwarder with its socket bound, ready to serve.
pub struct BoundForwarder {
    socket: Arc<UdpSocket>,
    ctx: Arc<ForwarderContext>,
}

impl BoundForwarder {
    /// The address the socket actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives datagrams until SIGINT/SIGTERM, handling each concurrently.
    ///
    /// On shutdown, in-flight datagrams get a bounded drain window before
    /// the socket is dropped.
    pub async fn run(self) -> Result<(), Error> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut buf = [0; MAX_DATAGRAM_SIZE];

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down, draining in-flight queries");
                    break;
                }

                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("Failed to receive datagram: {}", e);
                            continue;
                        }
                    };

                    let datagram = buf[..len].to_vec();
                    let socket = Arc::clone(&self.socket);
                    let ctx = Arc::clone(&self.ctx);

                    let in_flight = Arc::clone(&in_flight);
                    in_flight.fetch_add(1, Ordering::SeqCst);

                    tokio::spawn(async move {
                        handle_datagram(&ctx, &socket, &datagram, peer).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }
        }

        let deadline = Instant::now() + DRAIN_WINDOW;
        while in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Ok(())
    }
}

/// One datagram's journey: decode, resolve, reply, record. All failure paths
/// drop the datagram.
async fn handle_datagram(
    ctx: &ForwarderContext,
    socket: &UdpSocket,
    datagram: &[u8],
    peer: SocketAddr,
) {
    let started = Instant::now();

    let query = match Message::from_slice(datagram) {
        Ok(query) => query,
        Err(e) => {
            warn!("Dropping undecodable datagram from {}: {}", peer, e);
            return;
        }
    };

    let question = match query.questions.first() {
        Some(question) => question.clone(),
        None => {
            warn!("[{}] Dropping question-less query from {}", query.id, peer);
            return;
        }
    };

    info!(
        "[{}] Received query from {} for {} {}",
        query.id, peer, question.name, question.r#type
    );

    let mut response = match resolve(ctx, &query).await {
        Ok(response) => response,
        Err(e) => {
            error!("[{}] Failed to query upstream - {}", query.id, e);
            return;
        }
    };

    // The client matches replies by id, whatever the upstream or the cache
    // said must be rewritten.
    response.id = query.id;

    let delta = started.elapsed().as_secs_f64() * 1000.0;
    info!("[{}] Query took {} ms", query.id, delta as u64);

    let wire = match response.to_vec() {
        Ok(wire) => wire,
        Err(e) => {
            error!("[{}] Failed to encode response - {}", query.id, e);
            return;
        }
    };

    info!(
        "[{}] Sending response to {} - {} {}",
        query.id, peer, question.name, question.r#type
    );

    // Best-effort send; the sample is recorded after the response is out so
    // analytics stay off the critical path.
    if let Err(e) = socket.send_to(&wire, peer).await {
        warn!("[{}] Failed to send response to {}: {}", query.id, peer, e);
        return;
    }

    if let Some(first) = response.answers.first() {
        let ttl = first.ttl;
        ctx.analytics
            .log_resolver(&question.name, question.r#type, delta, ttl)
            .await;
    }
}

/// Cache-or-upstream resolution with per-key single-flight.
async fn resolve(ctx: &ForwarderContext, query: &Message) -> Result<Message, Error> {
    let question = &query.questions[0];
    let key = AnswerCache::key(&question.name, question.r#type);

    if let Some(cached) = ctx.cache.get(&key).await {
        info!("[{}] Cache hit for {} {}", query.id, question.name, question.r#type);
        return Ok(cached);
    }

    // Coalesce concurrent misses: one fetch per key, everyone else re-checks
    // once the lock is theirs.
    let _guard = ctx.cache.lock_key(&key).await;

    if let Some(cached) = ctx.cache.get(&key).await {
        info!("[{}] Cache hit for {} {}", query.id, question.name, question.r#type);
        return Ok(cached);
    }

    let response = ctx.upstream.exchange(query).await?;

    ctx.cache.put(&key, &response).await;

    Ok(response)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
