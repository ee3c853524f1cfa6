//! Top-level loop: instantiate a session, run it to completion, sleep, and
//! reconnect. No exponential backoff, no retry cap, no app-level timeout
//! beyond the fixed reconnect delay. Termination is by an external
//! shutdown signal passed in by the caller.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::session::Session;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct Supervisor {
    addr: SocketAddr,
    metadata: Value,
}

impl Supervisor {
    pub fn new(addr: SocketAddr, metadata: Value) -> Self {
        Self { addr, metadata }
    }

    /// Runs sessions against `self.addr` until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, exiting supervisor loop");
                    return;
                }
                _ = self.run_once() => {}
            }
        }
    }

    async fn run_once(&self) {
        match Session::connect(self.addr, self.metadata.clone()).await {
            Ok(session) => {
                info!("connected to {}", self.addr);
                session.run().await;
                info!("session closed, reconnecting in {:?}", RECONNECT_DELAY);
            }
            Err(err) => {
                warn!("failed to connect to {}: {err}", self.addr);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::net::TcpListener;

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_session_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_count = Arc::new(AtomicUsize::new(0));

        let accept_count_task = accept_count.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                accept_count_task.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let supervisor = Supervisor::new(addr, serde_json::json!({}));
        let shutdown = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
        };

        supervisor.run(shutdown).await;

        assert!(accept_count.load(Ordering::SeqCst) >= 2);
    }
}
