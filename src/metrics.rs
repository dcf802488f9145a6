//! Prometheus metrics for the relays.
//!
//! Counters live in the relays themselves; the collector reads them at
//! scrape time and renders `pmtud_forwarded_packets_total` labelled by
//! interface and family.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::relay::RelayStats;
use crate::Family;

const NAMESPACE: &str = "pmtud";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("metrics server error: {0}")]
    Serve(std::io::Error),
}

fn forwarded_packets() -> Result<IntCounterVec, prometheus::Error> {
    IntCounterVec::new(
        Opts::new("forwarded_packets_total", "Number of relayed packet-too-big messages")
            .namespace(NAMESPACE),
        &["interface", "family"],
    )
}

/// Exposes relay counters to a Prometheus registry.
pub struct RelayCollector {
    relays: Vec<RelayStats>,
    template: IntCounterVec,
}

impl RelayCollector {
    pub fn new(relays: Vec<RelayStats>) -> Result<Self, MetricsError> {
        Ok(Self {
            relays,
            template: forwarded_packets()?,
        })
    }
}

impl Collector for RelayCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.template.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        // Fresh vector each scrape so the values mirror the relay counters.
        let forwarded = match forwarded_packets() {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to build forwarded packets metric");
                return Vec::new();
            }
        };

        for relay in &self.relays {
            for family in Family::ALL {
                forwarded
                    .with_label_values(&[relay.interface_name(), family.as_str()])
                    .inc_by(relay.packets_forwarded(family));
            }
        }
        forwarded.collect()
    }
}

/// Build a registry holding the relay collector.
pub fn registry(relays: Vec<RelayStats>) -> Result<Registry, MetricsError> {
    let registry = Registry::new();
    registry.register(Box::new(RelayCollector::new(relays)?))?;
    Ok(registry)
}

/// Render every metric of `registry` in Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&registry.gather())?)
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match render(&registry) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
        }
    }
}

/// Create the metrics HTTP router.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serve `/metrics` on `listen` until `shutdown` completes.
pub async fn serve<F>(listen: SocketAddr, registry: Registry, shutdown: F) -> Result<(), MetricsError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|source| MetricsError::Bind {
            addr: listen,
            source,
        })?;

    info!(listen = %listen, "metrics server listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(MetricsError::Serve)?;

    info!("metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use axum::body::to_bytes;

    use super::*;
    use crate::relay::{Pipeline, Relay};
    use crate::error::RelayError;
    use crate::Backends;

    fn idle_relay(interface: &str) -> Relay {
        let backends: Backends = ["203.0.113.9"]
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap())
            .collect();
        Relay::new(interface, Arc::new(backends))
    }

    #[test]
    fn test_render_includes_every_relay_and_family() {
        let relays = [idle_relay("eth0"), idle_relay("eth1")];
        let registry = registry(relays.iter().map(Relay::stats).collect()).unwrap();

        let text = render(&registry).unwrap();
        assert!(text.contains("# TYPE pmtud_forwarded_packets_total counter"));
        for line in [
            r#"pmtud_forwarded_packets_total{family="ipv4",interface="eth0"} 0"#,
            r#"pmtud_forwarded_packets_total{family="ipv6",interface="eth0"} 0"#,
            r#"pmtud_forwarded_packets_total{family="ipv4",interface="eth1"} 0"#,
            r#"pmtud_forwarded_packets_total{family="ipv6",interface="eth1"} 0"#,
        ] {
            assert!(text.contains(line), "missing {line} in:\n{text}");
        }
    }

    #[test]
    fn test_collect_reads_current_values() {
        let relay = idle_relay("eth0");
        let collector = RelayCollector::new(vec![relay.stats()]).unwrap();

        let families = collector.collect();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "pmtud_forwarded_packets_total");
        assert_eq!(families[0].get_metric().len(), 2);
        // Scraping twice does not accumulate.
        let again = collector.collect();
        let total: f64 = again[0]
            .get_metric()
            .iter()
            .map(|m| m.get_counter().get_value())
            .sum();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_failed_relay_still_reports_zero() {
        let mut relay = idle_relay("eth0");
        let _ = relay.start_with(|_, _, _| -> Result<Pipeline, RelayError> {
            Err(RelayError::NoRelays)
        });
        let registry = registry(vec![relay.stats()]).unwrap();
        assert!(render(&registry).unwrap().contains(r#"interface="eth0""#));
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let relay = idle_relay("eth0");
        let registry = registry(vec![relay.stats()]).unwrap();

        let response = metrics_handler(State(registry)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("pmtud_forwarded_packets_total"));
    }
}
