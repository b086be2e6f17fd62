//! Out-of-band "unblock" notification (§4.1, §5).
//!
//! The only work ever delegated off the owning task is DNS resolution,
//! which in the reference design runs on a worker thread that calls
//! `notify_block(fd)` once `getaddrinfo` returns. `tokio::task::spawn_blocking`
//! plus `.await` on its `JoinHandle` gives the same shape without a
//! hand-rolled self-pipe: the handle *is* the one-shot wakeup, and the
//! runtime's blocking-pool thread *is* the worker thread. [`resolve`]
//! keeps a reference to the session alive for exactly as long as the
//! resolution is in flight, mirroring the refcount bump/drop described
//! in §5.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

/// Resolves `host:port` on a blocking-pool thread and returns every
/// address the origin name has. `_session_guard` is any `Arc` the
/// caller wants kept alive for the duration of the lookup; the session
/// itself is a natural fit so that a client disconnect during
/// resolution doesn't free the session out from under the worker.
pub async fn resolve<T: Send + Sync + 'static>(
    host: String,
    port: u16,
    session_guard: Arc<T>,
) -> Result<Vec<SocketAddr>> {
    let handle = tokio::task::spawn_blocking(move || {
        let _guard = session_guard;
        std::net::ToSocketAddrs::to_socket_addrs(&(host.as_str(), port))
            .map(|it| it.collect::<Vec<_>>())
    });

    handle
        .await
        .context("resolver worker panicked")?
        .context("address resolution failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let guard = Arc::new(());
        let addrs = resolve("localhost".to_string(), 0, guard).await.unwrap();
        assert!(!addrs.is_empty());
    }

    #[tokio::test]
    async fn reports_error_for_bogus_host() {
        let guard = Arc::new(());
        let res = resolve(
            "this-host-does-not-resolve.invalid".to_string(),
            110,
            guard,
        )
        .await;
        assert!(res.is_err());
    }
}
