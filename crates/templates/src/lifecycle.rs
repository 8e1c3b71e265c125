use chrono::{DateTime, Utc};

use crate::model::{LifecycleStatus, UsageStats};
use crate::policy::LifecyclePolicy;

/// Outcome of one replay as seen by the lifecycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// `similarity` is the shape similarity against the baseline, when one
    /// could be computed.
    Success { similarity: Option<f64> },
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleStatus,
    pub to: LifecycleStatus,
}

/// Folds one outcome into the usage counters and returns the resulting
/// status plus the transition, if any. Deprecated is terminal.
pub fn apply_outcome(
    status: LifecycleStatus,
    usage: &mut UsageStats,
    outcome: Outcome,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> (LifecycleStatus, Option<Transition>) {
    usage.last_used_at = Some(now);
    let next = match outcome {
        Outcome::Success { similarity } => {
            usage.success_count = usage.success_count.saturating_add(1);
            usage.last_success_at = Some(now);
            usage.consecutive_failures = 0;
            usage.last_similarity = similarity;

            let drifted = similarity
                .map(|s| s < policy.drift_threshold)
                .unwrap_or(false);
            if drifted {
                usage.consecutive_successes = 0;
                usage.consecutive_drifts = usage.consecutive_drifts.saturating_add(1);
                match status {
                    LifecycleStatus::Verified => LifecycleStatus::Draft,
                    LifecycleStatus::Draft
                        if usage.consecutive_drifts >= policy.deprecate_after_failures =>
                    {
                        LifecycleStatus::Deprecated
                    }
                    other => other,
                }
            } else {
                usage.consecutive_drifts = 0;
                usage.consecutive_successes = usage.consecutive_successes.saturating_add(1);
                match status {
                    LifecycleStatus::Draft
                        if usage.consecutive_successes >= policy.verify_after_successes =>
                    {
                        LifecycleStatus::Verified
                    }
                    other => other,
                }
            }
        }
        Outcome::Failure => {
            usage.failure_count = usage.failure_count.saturating_add(1);
            usage.last_failure_at = Some(now);
            usage.consecutive_successes = 0;
            usage.consecutive_failures = usage.consecutive_failures.saturating_add(1);
            if status != LifecycleStatus::Deprecated
                && usage.consecutive_failures >= policy.deprecate_after_failures
            {
                LifecycleStatus::Deprecated
            } else {
                status
            }
        }
    };

    let transition = (next != status).then_some(Transition {
        from: status,
        to: next,
    });
    (next, transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: LifecycleStatus, outcomes: &[Outcome]) -> (LifecycleStatus, UsageStats) {
        let policy = LifecyclePolicy::default();
        let mut usage = UsageStats::default();
        let mut status = status;
        for outcome in outcomes {
            status = apply_outcome(status, &mut usage, *outcome, &policy, Utc::now()).0;
        }
        (status, usage)
    }

    const OK: Outcome = Outcome::Success {
        similarity: Some(1.0),
    };
    const DRIFT: Outcome = Outcome::Success {
        similarity: Some(0.1),
    };

    #[test]
    fn draft_verifies_after_consecutive_stable_successes() {
        let (status, usage) = run(LifecycleStatus::Draft, &[OK, OK]);
        assert_eq!(status, LifecycleStatus::Draft);
        assert_eq!(usage.consecutive_successes, 2);

        let (status, usage) = run(LifecycleStatus::Draft, &[OK, OK, OK]);
        assert_eq!(status, LifecycleStatus::Verified);
        assert_eq!(usage.success_count, 3);
    }

    #[test]
    fn failure_resets_the_success_streak() {
        let (status, _) = run(LifecycleStatus::Draft, &[OK, OK, Outcome::Failure, OK]);
        assert_eq!(status, LifecycleStatus::Draft);
    }

    #[test]
    fn drift_demotes_then_deprecates() {
        let (status, usage) = run(LifecycleStatus::Verified, &[DRIFT]);
        assert_eq!(status, LifecycleStatus::Draft);
        assert_eq!(usage.success_count, 1);
        assert_eq!(usage.consecutive_drifts, 1);

        let (status, _) = run(LifecycleStatus::Verified, &[DRIFT, DRIFT, DRIFT]);
        assert_eq!(status, LifecycleStatus::Deprecated);
    }

    #[test]
    fn consecutive_failures_deprecate_and_stay_deprecated() {
        let fails = [Outcome::Failure; 3];
        let (status, usage) = run(LifecycleStatus::Verified, &fails);
        assert_eq!(status, LifecycleStatus::Deprecated);
        assert_eq!(usage.failure_count, 3);

        let (status, _) = run(LifecycleStatus::Deprecated, &[OK, OK, OK, OK]);
        assert_eq!(status, LifecycleStatus::Deprecated);
    }

    #[test]
    fn transitions_are_reported() {
        let policy = LifecyclePolicy {
            verify_after_successes: 1,
            ..LifecyclePolicy::default()
        };
        let mut usage = UsageStats::default();
        let (next, transition) =
            apply_outcome(LifecycleStatus::Draft, &mut usage, OK, &policy, Utc::now());
        assert_eq!(next, LifecycleStatus::Verified);
        assert_eq!(
            transition,
            Some(Transition {
                from: LifecycleStatus::Draft,
                to: LifecycleStatus::Verified
            })
        );
    }
}
