/**
 * SERVICE ENDPOINT - Joignabilité du service utilisateur d'un backend
 *
 * Le ping est mis en cache (RefreshingCache<bool>, retour à false en cas d'échec).
 * Les transitions vivant <-> mort sont loggées une seule fois.
 */

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use maat_core::{FailurePolicy, RefreshingCache};
use tracing::{info, info_span, warn, Span};

pub struct ServiceEndpoint {
    name: String,
    url: String,
    ping: RefreshingCache<bool>,
    last_seen_up: AtomicBool,
    span: Span,
}

impl ServiceEndpoint {
    /// Service joint par un GET sur `ping_url`: vivant si la réponse est 2xx
    pub fn http(
        name: impl Into<String>,
        url: impl Into<String>,
        ping_url: impl Into<String>,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let ping_url = ping_url.into();
        Ok(Self::from_probe(name, url, interval, move || {
            let client = client.clone();
            let ping_url = ping_url.clone();
            async move {
                let response = client.get(ping_url).send().await?;
                Ok::<_, anyhow::Error>(response.status().is_success())
            }
        }))
    }

    /// Service toujours considéré vivant (agent embarqué, tests)
    pub fn always_available(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::from_probe(name, url, Duration::from_secs(3600), || async { Ok::<_, anyhow::Error>(true) })
    }

    pub fn from_probe<F, Fut>(name: impl Into<String>, url: impl Into<String>, interval: Duration, probe: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let name = name.into();
        let span = info_span!("service", name = %name);
        let ping = RefreshingCache::builder(format!("{name} ping"), false, move |_| probe())
            .interval(interval)
            .on_failure(FailurePolicy::ResetToDefault)
            .pass_previous(false)
            .build();

        Self {
            name,
            url: url.into(),
            ping,
            last_seen_up: AtomicBool::new(true),
            span,
        }
    }

    pub async fn available(&self) -> bool {
        let up = self.ping.get().await;
        let was_up = self.last_seen_up.swap(up, Ordering::SeqCst);
        if was_up && !up {
            warn!(parent: &self.span, url = %self.url, "service is dead");
        } else if !was_up && up {
            info!(parent: &self.span, url = %self.url, "service is alive again");
        }
        up
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
