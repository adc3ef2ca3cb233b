//! Connection Prober
//!
//! Opens a short-lived connection, pings it and closes it. Every failure is
//! reported inside the [`ProbeOutcome`]; probing never returns an error.

use crate::database::connection::{release, Connector};
use crate::database::datasource::ConnectTarget;
use crate::error::{QueryHubError, Result};
use crate::query::result::ProbeOutcome;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct ConnectionProber {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl ConnectionProber {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub async fn probe(&self, target: &ConnectTarget) -> ProbeOutcome {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.attempt(target)).await {
            Ok(result) => result,
            Err(_) => Err(QueryHubError::Connectivity(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(data_source = %target.data_source_id, elapsed_ms, "probe succeeded");
                ProbeOutcome {
                    success: true,
                    message: "Connection successful".to_string(),
                    elapsed_ms,
                }
            }
            Err(e) => {
                warn!(data_source = %target.data_source_id, elapsed_ms, error = %e, "probe failed");
                ProbeOutcome {
                    success: false,
                    message: e.to_string(),
                    elapsed_ms,
                }
            }
        }
    }

    async fn attempt(&self, target: &ConnectTarget) -> Result<()> {
        let mut session = self.connector.connect(target, self.timeout).await?;
        let pinged = session.ping().await;
        release(session).await;
        pinged
    }
}
