use std::time::Duration;

/// What to do after a partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackPolicy {
    /// Roll back the failed branch's committed work without asking.
    #[default]
    Automatic,
    /// Leave committed work in place; the operator decides.
    Manual,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Permit plans that replace a resource other resources depend on.
    pub allow_replace: bool,
    /// Describe recorded resources against the live target while planning,
    /// so missing or diverged resources surface as drift.
    pub refresh: bool,
    /// Total attempts per action, counting the first.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Bound on a single provider call reaching a terminal state.
    pub resource_timeout: Duration,
    pub rollback: RollbackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            allow_replace: false,
            refresh: false,
            max_attempts: 4,
            retry_base_delay: Duration::from_millis(200),
            resource_timeout: Duration::from_secs(300),
            rollback: RollbackPolicy::Automatic,
        }
    }
}
