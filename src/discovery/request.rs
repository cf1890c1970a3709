//! Racing discovery lookups.
//!
//! Both lookups run on one task. The first response that decodes to a fresh
//! simple config wins: its entries are reported through the callback and the
//! other lookup is dropped. Failed responses are logged and ignored.
//!
//! ```text
//!   app lookup ─┐
//!               ├─ select! (biased, app first) ─> SimpleConfig ─> callback * N
//!   dns lookup ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{ConfigError, DcId, DEFAULT_APP_URL, DEFAULT_DNS_URL, DEFAULT_LOOKUP_TIMEOUT};

use super::lookup::{HttpLookup, Lookup, LookupError, LookupKind};
use super::simple_config::{unix_now, SimpleConfig};

/// Endpoint callback: `(dc_id, ip, port)`.
pub type EndpointCallback = Box<dyn FnMut(DcId, &str, u16) + Send>;

type CallbackSlot = Arc<Mutex<Option<EndpointCallback>>>;

/// Discovery configuration.
///
/// The default URLs are `example.net` placeholders and must be overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// App metadata lookup URL.
    pub app_url: String,
    /// DNS-over-HTTPS lookup URL.
    pub dns_url: String,
    /// Per-request timeout used by [`EndpointDiscovery::start_http`].
    pub lookup_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            app_url: DEFAULT_APP_URL.to_string(),
            dns_url: DEFAULT_DNS_URL.to_string(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl DiscoveryConfig {
    /// Configuration with the default lookup URLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the app metadata URL.
    pub fn with_app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = url.into();
        self
    }

    /// Override the DNS-over-HTTPS URL.
    pub fn with_dns_url(mut self, url: impl Into<String>) -> Self {
        self.dns_url = url.into();
        self
    }

    /// Override the per-request timeout.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Check that both URLs are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(LookupKind::AppRequest.name()));
        }
        if self.dns_url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(LookupKind::DnsRequest.name()));
        }
        Ok(())
    }
}

/// Errors starting a discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid configuration.
    #[error("invalid discovery config: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client could not be built.
    #[error("lookup client: {0}")]
    Lookup(#[from] LookupError),

    /// Started outside a tokio runtime.
    #[error("no async runtime available")]
    NoRuntime,
}

/// A running endpoint discovery.
///
/// Dropping the handle cancels both lookups; no callback starts after the
/// drop returns. The callback must not drop its own discovery handle.
pub struct EndpointDiscovery {
    task: JoinHandle<()>,
    callback: CallbackSlot,
}

impl EndpointDiscovery {
    /// Start both lookups using `lookup` as the response source.
    pub fn start<L, F>(config: DiscoveryConfig, lookup: L, callback: F) -> Result<Self, DiscoveryError>
    where
        L: Lookup,
        F: FnMut(DcId, &str, u16) + Send + 'static,
    {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;

        let callback: CallbackSlot = Arc::new(Mutex::new(Some(Box::new(callback))));
        debug!(app_url = %config.app_url, dns_url = %config.dns_url, "starting endpoint discovery");
        let task = runtime.spawn(run(config, lookup, Arc::clone(&callback)));

        Ok(Self { task, callback })
    }

    /// Start both lookups over HTTPS.
    pub fn start_http<F>(config: DiscoveryConfig, callback: F) -> Result<Self, DiscoveryError>
    where
        F: FnMut(DcId, &str, u16) + Send + 'static,
    {
        if config.app_url == DEFAULT_APP_URL || config.dns_url == DEFAULT_DNS_URL {
            warn!("discovery uses placeholder lookup URLs; set app_url and dns_url");
        }
        let lookup = HttpLookup::new(config.lookup_timeout)?;
        Self::start(config, lookup, callback)
    }

    /// Cancel pending lookups. Idempotent.
    pub fn cancel(&self) {
        self.callback.lock().take();
        self.task.abort();
    }

    /// Whether the discovery task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for EndpointDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointDiscovery")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Drop for EndpointDiscovery {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run<L: Lookup>(config: DiscoveryConfig, lookup: L, callback: CallbackSlot) {
    let app = lookup.fetch(LookupKind::AppRequest, &config.app_url);
    let dns = lookup.fetch(LookupKind::DnsRequest, &config.dns_url);
    tokio::pin!(app);
    tokio::pin!(dns);

    let mut app_pending = true;
    let mut dns_pending = true;

    loop {
        let (kind, response) = tokio::select! {
            biased;
            response = &mut app, if app_pending => {
                app_pending = false;
                (LookupKind::AppRequest, response)
            }
            response = &mut dns, if dns_pending => {
                dns_pending = false;
                (LookupKind::DnsRequest, response)
            }
            else => {
                warn!("endpoint discovery failed: no usable response");
                return;
            }
        };

        if let Some(simple) = accept(kind, response) {
            deliver(kind, &simple, &callback);
            return;
        }
    }
}

fn accept(kind: LookupKind, response: Result<Vec<u8>, LookupError>) -> Option<SimpleConfig> {
    let body = match response {
        Ok(body) => body,
        Err(error) => {
            warn!(kind = kind.name(), %error, "discovery lookup failed");
            return None;
        }
    };

    let simple = match SimpleConfig::decode(&body) {
        Ok(simple) => simple,
        Err(error) => {
            warn!(kind = kind.name(), %error, "discovery response rejected");
            return None;
        }
    };

    if let Err(error) = simple.ensure_fresh(unix_now()) {
        warn!(kind = kind.name(), %error, "discovery response rejected");
        return None;
    }

    Some(simple)
}

fn deliver(kind: LookupKind, simple: &SimpleConfig, callback: &CallbackSlot) {
    let mut slot = callback.lock();
    let Some(callback) = slot.as_mut() else {
        return;
    };

    info!(kind = kind.name(), endpoints = simple.entries.len(), "endpoints discovered");
    for entry in &simple.entries {
        callback(entry.dc_id, &entry.ip.to_string(), entry.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SimpleConfigEntry;
    use std::net::Ipv4Addr;
    use tokio::time::{sleep, timeout};

    #[derive(Clone)]
    struct Reply {
        delay: Duration,
        body: Option<Vec<u8>>,
    }

    impl Reply {
        fn ok(body: Vec<u8>) -> Self {
            Self {
                delay: Duration::ZERO,
                body: Some(body),
            }
        }

        fn failed() -> Self {
            Self {
                delay: Duration::ZERO,
                body: None,
            }
        }

        fn after(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    struct MockLookup {
        app: Reply,
        dns: Reply,
        completed: Arc<Mutex<Vec<LookupKind>>>,
    }

    impl MockLookup {
        fn new(app: Reply, dns: Reply) -> Self {
            Self {
                app,
                dns,
                completed: Arc::default(),
            }
        }
    }

    impl Lookup for MockLookup {
        async fn fetch(&self, kind: LookupKind, _url: &str) -> Result<Vec<u8>, LookupError> {
            let reply = match kind {
                LookupKind::AppRequest => self.app.clone(),
                LookupKind::DnsRequest => self.dns.clone(),
            };
            if !reply.delay.is_zero() {
                sleep(reply.delay).await;
            }
            self.completed.lock().push(kind);
            reply.body.ok_or(LookupError::Status(500))
        }
    }

    type Seen = Arc<Mutex<Vec<(DcId, String, u16)>>>;

    fn recorder() -> (Seen, impl FnMut(DcId, &str, u16) + Send + 'static) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        let callback = move |dc_id: DcId, ip: &str, port: u16| {
            sink.lock().push((dc_id, ip.to_string(), port));
        };
        (seen, callback)
    }

    fn blob(entries: &[(DcId, [u8; 4], u16)], expires: u32) -> Vec<u8> {
        let simple = SimpleConfig {
            date: expires.saturating_sub(7200),
            expires,
            entries: entries
                .iter()
                .map(|&(dc_id, ip, port)| SimpleConfigEntry {
                    dc_id,
                    ip: Ipv4Addr::from(ip),
                    port,
                })
                .collect(),
        };
        simple.seal_base64([3u8; 16]).into_bytes()
    }

    fn fresh(entries: &[(DcId, [u8; 4], u16)]) -> Vec<u8> {
        blob(entries, unix_now() + 3600)
    }

    async fn wait_finished(discovery: &EndpointDiscovery) {
        timeout(Duration::from_secs(5), async {
            while !discovery.is_finished() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("discovery did not finish");
    }

    #[tokio::test]
    async fn test_one_success_one_failure() {
        let lookup = MockLookup::new(
            Reply::failed(),
            Reply::ok(fresh(&[(2, [10, 0, 0, 2], 443), (4, [10, 0, 0, 4], 80)]))
                .after(Duration::from_millis(20)),
        );
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        wait_finished(&discovery).await;

        assert_eq!(
            *seen.lock(),
            vec![
                (2, "10.0.0.2".to_string(), 443),
                (4, "10.0.0.4".to_string(), 80)
            ]
        );
    }

    #[tokio::test]
    async fn test_both_fail() {
        let lookup = MockLookup::new(Reply::failed(), Reply::ok(b"garbage!".to_vec()));
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        wait_finished(&discovery).await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_expired_config_ignored() {
        let lookup = MockLookup::new(
            Reply::ok(blob(&[(1, [10, 0, 0, 1], 443)], unix_now() - 60)),
            Reply::ok(fresh(&[(5, [10, 0, 0, 5], 8443)])).after(Duration::from_millis(20)),
        );
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        wait_finished(&discovery).await;

        assert_eq!(*seen.lock(), vec![(5, "10.0.0.5".to_string(), 8443)]);
    }

    #[tokio::test]
    async fn test_first_success_cancels_sibling() {
        let lookup = MockLookup::new(
            Reply::ok(fresh(&[(2, [10, 0, 0, 2], 443)])),
            Reply::ok(fresh(&[(3, [10, 0, 0, 3], 443)])).after(Duration::from_millis(100)),
        );
        let completed = Arc::clone(&lookup.completed);
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        wait_finished(&discovery).await;
        sleep(Duration::from_millis(250)).await;

        assert_eq!(*seen.lock(), vec![(2, "10.0.0.2".to_string(), 443)]);
        assert_eq!(*completed.lock(), vec![LookupKind::AppRequest]);
    }

    #[tokio::test]
    async fn test_simultaneous_responses_prefer_app() {
        let lookup = MockLookup::new(
            Reply::ok(fresh(&[(2, [10, 0, 0, 2], 443)])),
            Reply::ok(fresh(&[(3, [10, 0, 0, 3], 443)])),
        );
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        wait_finished(&discovery).await;

        assert_eq!(*seen.lock(), vec![(2, "10.0.0.2".to_string(), 443)]);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_lookups() {
        let lookup = MockLookup::new(
            Reply::ok(fresh(&[(2, [10, 0, 0, 2], 443)])).after(Duration::from_millis(200)),
            Reply::ok(fresh(&[(3, [10, 0, 0, 3], 443)])).after(Duration::from_millis(200)),
        );
        let completed = Arc::clone(&lookup.completed);
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        sleep(Duration::from_millis(50)).await;
        drop(discovery);
        sleep(Duration::from_millis(400)).await;

        assert!(seen.lock().is_empty());
        assert!(completed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let lookup = MockLookup::new(
            Reply::ok(fresh(&[(2, [10, 0, 0, 2], 443)])).after(Duration::from_millis(200)),
            Reply::failed().after(Duration::from_millis(200)),
        );
        let (seen, callback) = recorder();

        let discovery = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, callback).unwrap();
        discovery.cancel();
        discovery.cancel();
        wait_finished(&discovery).await;
        sleep(Duration::from_millis(300)).await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let lookup = MockLookup::new(Reply::failed(), Reply::failed());
        let err = EndpointDiscovery::start(
            DiscoveryConfig::new().with_dns_url("  "),
            lookup,
            |_: DcId, _: &str, _: u16| {},
        )
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(ConfigError::EmptyUrl("dns"))));
    }

    #[test]
    fn test_start_outside_runtime() {
        let lookup = MockLookup::new(Reply::failed(), Reply::failed());
        let err = EndpointDiscovery::start(DiscoveryConfig::new(), lookup, |_: DcId, _: &str, _: u16| {})
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoRuntime));
    }

    #[test]
    fn test_default_urls_are_placeholders() {
        let config = DiscoveryConfig::default();
        for url in [&config.app_url, &config.dns_url] {
            let host = url
                .trim_start_matches("https://")
                .split(['/', '?'])
                .next()
                .unwrap();
            assert!(host.ends_with(".example.net"), "{url}");
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config = DiscoveryConfig::new()
            .with_app_url("https://example.com/app")
            .with_lookup_timeout(Duration::from_secs(3));
        assert_eq!(config.app_url, "https://example.com/app");
        assert_eq!(config.dns_url, DEFAULT_DNS_URL);
        assert_eq!(config.lookup_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }
}
