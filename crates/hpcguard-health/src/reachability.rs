//! Reachability gate — wait until a node accepts TCP connections on its
//! management port.
//!
//! Used after a reboot is issued, and as a single-shot liveness check at
//! the start of every check pass.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::BoxFuture;

/// Bound on a single connect attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Decides whether a node is reachable.
pub trait ReachabilityGate: Send + Sync {
    /// One connect attempt.
    fn is_reachable<'a>(&'a self, node: &'a str) -> BoxFuture<'a, bool>;

    /// Poll every `poll_interval` until the node answers or `timeout`
    /// elapses. Dropping the future stops the polling.
    fn wait_reachable<'a>(
        &'a self,
        node: &'a str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> BoxFuture<'a, bool>;
}

/// Production gate: TCP connect to `node:port`.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    port: u16,
    connect_timeout: Duration,
}

impl TcpReachability {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl ReachabilityGate for TcpReachability {
    fn is_reachable<'a>(&'a self, node: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(connect_once(node, self.port, self.connect_timeout))
    }

    fn wait_reachable<'a>(
        &'a self,
        node: &'a str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> BoxFuture<'a, bool> {
        Box::pin(wait_reachable(
            node,
            self.port,
            timeout,
            poll_interval,
            self.connect_timeout,
        ))
    }
}

/// Poll `host:port` until a connection succeeds or `timeout` elapses.
///
/// The whole loop runs under one deadline, so the result is `false` no
/// later than `timeout` even if a connect attempt is still in flight.
pub async fn wait_reachable(
    host: &str,
    port: u16,
    timeout: Duration,
    poll_interval: Duration,
    connect_timeout: Duration,
) -> bool {
    let poll = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if connect_once(host, port, connect_timeout).await {
                debug!(%host, port, attempt, "node reachable");
                return true;
            }
            debug!(%host, port, attempt, "waiting for node to accept connections");
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(reached) => reached,
        Err(_) => {
            debug!(%host, port, ?timeout, "reachability wait timed out");
            false
        }
    }
}

async fn connect_once(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!(%host, port, error = %e, "connect failed");
            false
        }
        Err(_) => {
            debug!(%host, port, "connect timed out");
            false
        }
    }
}
