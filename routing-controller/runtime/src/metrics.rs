use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    writes: Family<WriteLabels, Counter>,
}

/// How a reconcile of a routing instance ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Preparing,
    Failed,
    Requeued,
    Ignored,
    Finalized,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct WriteLabels {
    kind: &'static str,
    op: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Count of routing instance reconciles by outcome",
            reconciles.clone(),
        );

        let writes = Family::<WriteLabels, Counter>::default();
        reg.register(
            "object_writes",
            "Count of writes to routing objects by kind and operation",
            writes.clone(),
        );

        Self { reconciles, writes }
    }

    pub(crate) fn reconciled(&self, outcome: Outcome) {
        self.reconciles
            .get_or_create(&OutcomeLabels {
                outcome: outcome.as_str(),
            })
            .inc();
    }

    pub(crate) fn wrote(&self, kind: &'static str, write: Write) {
        self.writes
            .get_or_create(&WriteLabels {
                kind,
                op: write.as_str(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn reconcile_count(&self, outcome: Outcome) -> u64 {
        self.reconciles
            .get_or_create(&OutcomeLabels {
                outcome: outcome.as_str(),
            })
            .get()
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Preparing => "preparing",
            Self::Failed => "failed",
            Self::Requeued => "requeued",
            Self::Ignored => "ignored",
            Self::Finalized => "finalized",
            Self::Error => "error",
        }
    }
}

// === impl Write ===

impl Write {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}
