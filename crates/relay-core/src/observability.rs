//! Logging, metrics, ops events and health probes, aggregated behind one
//! facade so components take a single `Arc<dyn ObservabilityFacade>`
//! instead of three or four separate handles.
//!
//! Trimmed to what this crate's components actually emit: structured
//! logs, a handful of counters/gauges (buffer pool occupancy, pipe
//! bytes, dial retries), lifecycle ops events, and a readiness snapshot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::Level;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single label/value pair attached to a metric observation.
pub type Attribute<'a> = (&'a str, &'a str);

/// Structured log sink. The default implementation forwards to `tracing`,
/// so anything subscribed to the process's `tracing_subscriber` receives
/// these records for free.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, message: &str, error: Option<&dyn std::error::Error>);

    fn info(&self, message: &str) {
        self.log(Level::INFO, message, None);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message, None);
    }

    fn error(&self, message: &str, error: &dyn std::error::Error) {
        self.log(Level::ERROR, message, Some(error));
    }
}

/// `tracing`-backed [`Logger`]. The production default; tests that need
/// to assert on emitted records use `tracing_test` instead of swapping
/// this out.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, error: Option<&dyn std::error::Error>) {
        match (level, error) {
            (Level::ERROR, Some(e)) => tracing::error!(error = %e, "{message}"),
            (Level::WARN, Some(e)) => tracing::warn!(error = %e, "{message}"),
            (Level::ERROR, None) => tracing::error!("{message}"),
            (Level::WARN, None) => tracing::warn!("{message}"),
            (Level::INFO, _) => tracing::info!("{message}"),
            (Level::DEBUG, _) => tracing::debug!("{message}"),
            (Level::TRACE, _) => tracing::trace!("{message}"),
        }
    }
}

pub trait Counter: Send + Sync {
    fn add(&self, value: u64, attributes: &[Attribute<'_>]);

    fn increment(&self, attributes: &[Attribute<'_>]) {
        self.add(1, attributes);
    }
}

pub trait Gauge: Send + Sync {
    fn set(&self, value: f64, attributes: &[Attribute<'_>]);
}

pub trait MetricsProvider: Send + Sync + 'static {
    fn counter(&self, name: &'static str) -> Arc<dyn Counter>;
    fn gauge(&self, name: &'static str) -> Arc<dyn Gauge>;
}

struct TracingCounter {
    name: &'static str,
}

impl Counter for TracingCounter {
    fn add(&self, value: u64, attributes: &[Attribute<'_>]) {
        tracing::trace!(metric = self.name, value, ?attributes, "counter");
    }
}

struct TracingGauge {
    name: &'static str,
}

impl Gauge for TracingGauge {
    fn set(&self, value: f64, attributes: &[Attribute<'_>]) {
        tracing::trace!(metric = self.name, value, ?attributes, "gauge");
    }
}

/// [`MetricsProvider`] that records observations as `tracing` events
/// rather than exporting to a metrics backend directly; a host wires a
/// `tracing_subscriber::Layer` to bridge these into Prometheus/OTel.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsProvider for TracingMetrics {
    fn counter(&self, name: &'static str) -> Arc<dyn Counter> {
        Arc::new(TracingCounter { name })
    }

    fn gauge(&self, name: &'static str) -> Arc<dyn Gauge> {
        Arc::new(TracingGauge { name })
    }
}

/// Lifecycle and fault events a host might want to react to out of band
/// from regular logging (dashboards, alerting, auto-remediation).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum OpsEvent {
    SessionOpened { session_id: u64, inbound_tag: String },
    SessionClosed { session_id: u64, reason: String },
    DialRetry { destination: String, attempt: u32 },
    FeatureStarted { key: &'static str },
    FeatureCloseFailed { key: &'static str, error: String },
}

pub trait OpsEventBus: Send + Sync + 'static {
    fn broadcast(&self, event: OpsEvent);
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OpsEvent>;
}

/// `tokio::sync::broadcast`-backed bus. A slow or absent subscriber never
/// blocks a publisher; lagging receivers simply skip ahead.
pub struct BroadcastOpsEventBus {
    sender: tokio::sync::broadcast::Sender<OpsEvent>,
}

impl BroadcastOpsEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for BroadcastOpsEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl OpsEventBus for BroadcastOpsEventBus {
    fn broadcast(&self, event: OpsEvent) {
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OpsEvent> {
        self.sender.subscribe()
    }
}

/// Health state of one component, aggregated by a host's `/healthz`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Ready,
    Degraded,
    NotReady,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentHealth {
    pub component: &'static str,
    pub state: ReadyState,
    pub detail: Option<String>,
}

/// A component that can report its own readiness on demand.
pub trait HealthCheckProvider: Send + Sync + 'static {
    fn check_health(&self) -> BoxFuture<'static, ComponentHealth>;
}

/// Shared, append-only collection of health probes consulted when
/// aggregating overall readiness.
#[derive(Clone, Default)]
pub struct HealthChecks {
    providers: Vec<Arc<dyn HealthCheckProvider>>,
}

impl HealthChecks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn HealthCheckProvider>) {
        self.providers.push(provider);
    }

    pub async fn aggregate(&self) -> Vec<ComponentHealth> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            out.push(provider.check_health().await);
        }
        out
    }
}

/// Single injection point bundling every observability capability, so a
/// component takes one `Arc<dyn ObservabilityFacade>` constructor
/// argument instead of three or four.
pub trait ObservabilityFacade: Send + Sync + 'static {
    fn logger(&self) -> Arc<dyn Logger>;
    fn metrics(&self) -> Arc<dyn MetricsProvider>;
    fn ops_bus(&self) -> Arc<dyn OpsEventBus>;
    fn health_checks(&self) -> &HealthChecks;
}

#[derive(Clone)]
pub struct DefaultObservabilityFacade {
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsProvider>,
    ops_bus: Arc<dyn OpsEventBus>,
    health_checks: HealthChecks,
}

impl DefaultObservabilityFacade {
    pub fn new(
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsProvider>,
        ops_bus: Arc<dyn OpsEventBus>,
        health_checks: HealthChecks,
    ) -> Self {
        Self {
            logger,
            metrics,
            ops_bus,
            health_checks,
        }
    }

    /// Wires the `tracing`-backed defaults, with a fresh broadcast ops
    /// bus and no health providers registered yet.
    pub fn with_tracing_defaults() -> Self {
        Self::new(
            Arc::new(TracingLogger),
            Arc::new(TracingMetrics),
            Arc::new(BroadcastOpsEventBus::default()),
            HealthChecks::new(),
        )
    }
}

impl ObservabilityFacade for DefaultObservabilityFacade {
    fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.logger)
    }

    fn metrics(&self) -> Arc<dyn MetricsProvider> {
        Arc::clone(&self.metrics)
    }

    fn ops_bus(&self) -> Arc<dyn OpsEventBus> {
        Arc::clone(&self.ops_bus)
    }

    fn health_checks(&self) -> &HealthChecks {
        &self.health_checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_exposes_independent_arc_clones() {
        let facade = DefaultObservabilityFacade::with_tracing_defaults();
        let logger_a = facade.logger();
        let logger_b = facade.logger();
        logger_a.info("hello");
        logger_b.warn("world");
    }

    #[tokio::test]
    async fn ops_bus_delivers_to_subscriber() {
        let bus = BroadcastOpsEventBus::default();
        let mut rx = bus.subscribe();
        bus.broadcast(OpsEvent::FeatureStarted { key: "relay.test" });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, OpsEvent::FeatureStarted { key: "relay.test" });
    }

    #[tokio::test]
    async fn health_checks_aggregate_all_providers() {
        struct AlwaysReady;
        impl HealthCheckProvider for AlwaysReady {
            fn check_health(&self) -> BoxFuture<'static, ComponentHealth> {
                Box::pin(async {
                    ComponentHealth {
                        component: "probe",
                        state: ReadyState::Ready,
                        detail: None,
                    }
                })
            }
        }

        let mut checks = HealthChecks::new();
        checks.register(Arc::new(AlwaysReady));
        let report = checks.aggregate().await;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].state, ReadyState::Ready);
    }
}
