use podwright_core::PodwrightError;
use podwright_schema::PodSpec;
use podwright_translate::defaults::DEFAULT_SCHEDULER_NAME;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which built-in readiness check the waiter applies after create/update
///
/// Declared readiness gates are always required on top of the chosen check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadinessPolicy {
    /// `PhaseNotPending` for pods naming a non-default scheduler, `ContainersReady` otherwise
    #[default]
    Auto,
    /// Every container reports ready
    ContainersReady,
    /// The pod left the Pending phase
    PhaseNotPending,
}

impl ReadinessPolicy {
    /// Resolve `Auto` against a concrete pod
    pub fn resolve(self, spec: &PodSpec) -> Self {
        match self {
            Self::Auto => match spec.scheduler_name.as_deref() {
                Some(name) if name != DEFAULT_SCHEDULER_NAME => Self::PhaseNotPending,
                _ => Self::ContainersReady,
            },
            other => other,
        }
    }
}

/// Configuration for the pod reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Interval between readiness polls
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Bound on the wait after a create
    #[serde(with = "duration_secs")]
    pub create_timeout: Duration,
    /// Bound on the wait after an in-place update
    #[serde(with = "duration_secs")]
    pub update_timeout: Duration,
    /// Bound on the wait for a deleted pod to disappear
    #[serde(with = "duration_secs")]
    pub delete_timeout: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            create_timeout: Duration::from_secs(300),
            update_timeout: Duration::from_secs(300),
            delete_timeout: Duration::from_secs(300),
            readiness: ReadinessPolicy::Auto,
        }
    }
}

impl ReconcilerConfig {
    /// Use one bound for every wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self.update_timeout = timeout;
        self.delete_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> podwright_core::Result<()> {
        if self.poll_interval.is_zero() {
            return Err(PodwrightError::validation_failed(
                "pollInterval",
                "must be greater than zero",
                "Set a poll interval such as 2s",
            ));
        }
        for (field, timeout) in [
            ("createTimeout", self.create_timeout),
            ("updateTimeout", self.update_timeout),
            ("deleteTimeout", self.delete_timeout),
        ] {
            if timeout < self.poll_interval {
                return Err(PodwrightError::validation_failed(
                    field,
                    format!("{:?} is shorter than the poll interval {:?}", timeout, self.poll_interval),
                    "A wait must allow at least one poll",
                ));
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
