use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub sync_conflicts_total: IntCounter,
    pub verification_failures_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub open_packages: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Status transitions by target status"),
            &["status"],
        )
        .expect("valid transitions_total metric");

        let sync_conflicts_total = IntCounter::new(
            "sync_conflicts_total",
            "Divergent booking/shipment views surfaced for operator review",
        )
        .expect("valid sync_conflicts_total metric");

        let verification_failures_total = IntCounterVec::new(
            Opts::new(
                "verification_failures_total",
                "Failed code/evidence checks by reason",
            ),
            &["reason"],
        )
        .expect("valid verification_failures_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Driver acceptance attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let open_packages = IntGauge::new(
            "open_packages",
            "Packages currently in a non-terminal status",
        )
        .expect("valid open_packages metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(sync_conflicts_total.clone()))
            .expect("register sync_conflicts_total");
        registry
            .register(Box::new(verification_failures_total.clone()))
            .expect("register verification_failures_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(open_packages.clone()))
            .expect("register open_packages");

        Self {
            registry,
            transitions_total,
            sync_conflicts_total,
            verification_failures_total,
            assignments_total,
            open_packages,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
