//! Suspected-hijack warnings.
//!
//! A warning is raised when a renewal secret is redeemed from an IP other than
//! the one stored on the session. Delivery is best-effort: [`dispatch_warning`]
//! spawns the send and logs its outcome, the rotation never waits for it.

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Serialize;
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;
use uuid::Uuid;

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub trait Notifier: Send + Sync {
    fn send_warning<'a>(&'a self, subject_id: Uuid, observed_ip: &'a str) -> NotifyFuture<'a>;
}

/// Writes the warning to the log instead of delivering it anywhere.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_warning<'a>(&'a self, subject_id: Uuid, observed_ip: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            info!(
                subject_id = %subject_id,
                observed_ip = %observed_ip,
                "renewal secret redeemed from a new IP address"
            );
            Ok(())
        })
    }
}

#[derive(Serialize, Debug)]
struct WarningPayload<'a> {
    subject_id: Uuid,
    observed_ip: &'a str,
}

/// POSTs the warning as JSON to a fixed URL.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(request_timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn send_warning<'a>(&'a self, subject_id: Uuid, observed_ip: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            let payload = WarningPayload {
                subject_id,
                observed_ip,
            };
            let response = self
                .client
                .post(self.url.as_str())
                .json(&payload)
                .send()
                .await
                .with_context(|| format!("failed to reach {}", self.url))?;

            if !response.status().is_success() {
                return Err(anyhow!("{} - {}", self.url, response.status()));
            }

            Ok(())
        })
    }
}

/// Send a warning in the background, bounded by `deadline`.
///
/// Failures and timeouts are logged here and go no further.
pub fn dispatch_warning(
    notifier: Arc<dyn Notifier>,
    subject_id: Uuid,
    observed_ip: String,
    deadline: Duration,
) -> JoinHandle<()> {
    let span = info_span!("notify.warning", subject_id = %subject_id);
    tokio::spawn(
        async move {
            match timeout(deadline, notifier.send_warning(subject_id, &observed_ip)).await {
                Ok(Ok(())) => debug!("IP change warning delivered"),
                Ok(Err(err)) => warn!("Failed to deliver IP change warning: {err:#}"),
                Err(_) => warn!("IP change warning timed out after {:?}", deadline),
            }
        }
        .instrument(span),
    )
}
