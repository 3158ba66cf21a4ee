use opentelemetry::global;
use opentelemetry::metrics::Counter;

#[derive(Clone, Debug)]
pub(crate) struct GateMetrics {
    pub(crate) acquired: Counter<u64>,
    pub(crate) rejected: Counter<u64>,
    pub(crate) cancelled: Counter<u64>,
    pub(crate) evicted: Counter<u64>,
    pub(crate) misuse: Counter<u64>,
}

impl GateMetrics {
    pub(crate) fn new() -> Self {
        let meter = global::meter("shot_gate");
        Self {
            acquired: meter
                .u64_counter("gate.acquired")
                .with_description("Permits handed out")
                .build(),
            rejected: meter
                .u64_counter("gate.rejected")
                .with_description("Acquires that timed out at the per-identity limit")
                .build(),
            cancelled: meter
                .u64_counter("gate.cancelled")
                .with_description("Acquires abandoned by the caller")
                .build(),
            evicted: meter
                .u64_counter("gate.evicted")
                .with_description("Idle identities removed by the reclaimer")
                .build(),
            misuse: meter
                .u64_counter("gate.misuse")
                .with_description("Releases without a matching acquire")
                .build(),
        }
    }
}
