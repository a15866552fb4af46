pub use self::dot::DotClient;
pub use self::dot::DotServer;
pub use self::json::DohJsonClient;

mod dot;
mod json;

use crate::Error;
use crate::Message;
use async_trait::async_trait;

/// A client able to exchange a DNS query for a response.
///
/// This is the seam between the forwarder and its upstream resolvers, so the
/// upstream can be swapped (DoT, DoH-JSON, or a stub in tests).
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message, Error>;
}
