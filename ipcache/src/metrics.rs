use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    errors: Family<ErrorLabels, Counter>,
    release_enqueued: Family<ReasonLabels, Counter>,
    release_batches: Counter,
    released_prefixes: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorLabels {
    kind: String,
    error: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReasonLabels {
    reason: String,
}

const KIND_RECOVER: &str = "recover";
const ERROR_UNEXPECTED: &str = "unexpected";

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let errors = Family::default();
        prom.register(
            "errors",
            "Count of IP cache inconsistencies, by kind of error",
            errors.clone(),
        );

        let release_enqueued = Family::default();
        prom.register(
            "release_enqueued",
            "Count of prefixes enqueued for deferred release, by reason",
            release_enqueued.clone(),
        );

        let release_batches = Counter::default();
        prom.register(
            "release_batches",
            "Count of deferred release batches processed",
            release_batches.clone(),
        );

        let released_prefixes = Counter::default();
        prom.register(
            "released_prefixes",
            "Count of prefixes removed from the IP cache after their identity was freed",
            released_prefixes.clone(),
        );

        Self {
            errors,
            release_enqueued,
            release_batches,
            released_prefixes,
        }
    }

    /// Records an entry that had to be restored because it was missing while its identity was
    /// still referenced.
    pub(crate) fn inc_unexpected_recovery(&self) {
        self.errors
            .get_or_create(&ErrorLabels {
                kind: KIND_RECOVER.to_string(),
                error: ERROR_UNEXPECTED.to_string(),
            })
            .inc();
    }

    pub(crate) fn inc_enqueued(&self, reason: &str, n: usize) {
        self.release_enqueued
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc_by(n as u64);
    }

    pub(crate) fn inc_released(&self, n: usize) {
        self.release_batches.inc();
        self.released_prefixes.inc_by(n as u64);
    }

    #[cfg(test)]
    pub(crate) fn unexpected_recoveries(&self) -> u64 {
        self.errors
            .get_or_create(&ErrorLabels {
                kind: KIND_RECOVER.to_string(),
                error: ERROR_UNEXPECTED.to_string(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn released_prefixes(&self) -> u64 {
        self.released_prefixes.get()
    }
}
