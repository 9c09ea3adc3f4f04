//! Reachability probing. The schedulers only see the [`Pinger`] trait so
//! they can be exercised with scripted probers in tests; the production
//! implementation sends ICMP echo requests.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use rand::random;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};

use crate::error::ProbeError;

/// A single bounded-timeout reachability check against one address.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Returns the round-trip time on success. Timeouts and transport
    /// failures are both errors; callers decide how to downgrade them.
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// ICMP echo prober. One shared raw-socket client serves every device;
/// each probe gets a fresh identifier.
pub struct IcmpPinger {
    client: Client,
}

impl IcmpPinger {
    /// Fails when the ICMP socket cannot be opened, typically a missing
    /// CAP_NET_RAW on Linux.
    pub fn new() -> Result<Self, ProbeError> {
        let client =
            Client::new(&Config::default()).map_err(|e| ProbeError::ClientUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
        let payload = [0u8; 56];
        let mut pinger = self.client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(timeout);
        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_reply, rtt)) => Ok(rtt),
            Err(SurgeError::Timeout { .. }) => Err(ProbeError::Timeout(timeout)),
            Err(e) => Err(ProbeError::Transport(e.to_string())),
        }
    }
}
