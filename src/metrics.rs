use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

#[derive(Clone)]
pub struct Metrics {
    pub outbox_pending: IntGauge,
    pub outbox_oldest_pending_age_seconds: IntGauge,
    pub outbox_processed_total: IntCounterVec,
    pub dispatch_total: IntCounterVec,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Self {
        let outbox_pending = IntGauge::with_opts(Opts::new(
            "outbox_pending",
            "Number of outbox entries currently due or pending",
        ))
        .expect("valid metric opts");
        let outbox_oldest_pending_age_seconds = IntGauge::with_opts(Opts::new(
            "outbox_oldest_pending_age_seconds",
            "Age in seconds of the oldest pending outbox entry",
        ))
        .expect("valid metric opts");
        let outbox_processed_total = IntCounterVec::new(
            Opts::new(
                "outbox_processed_total",
                "Outbox entries processed, labeled by outcome",
            ),
            &["outcome"],
        )
        .expect("valid metric opts");
        let dispatch_total = IntCounterVec::new(
            Opts::new(
                "dispatch_total",
                "HTTP dispatch attempts, labeled by outcome",
            ),
            &["outcome"],
        )
        .expect("valid metric opts");

        registry
            .register(Box::new(outbox_pending.clone()))
            .expect("register outbox_pending");
        registry
            .register(Box::new(outbox_oldest_pending_age_seconds.clone()))
            .expect("register outbox_oldest_pending_age_seconds");
        registry
            .register(Box::new(outbox_processed_total.clone()))
            .expect("register outbox_processed_total");
        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");

        Self {
            outbox_pending,
            outbox_oldest_pending_age_seconds,
            outbox_processed_total,
            dispatch_total,
        }
    }
}
