//! Cluster lifecycle state machine.
//!
//! ```text
//! Creating ──InfraReady──▶ Running ◀──InfraReady── Updating
//!    │                       │  └──SpecChanged/JobRestarting──▲
//!    │                       │                                │
//!    ├──JobFailed/RetriesExhausted──▶ Failed ──SpecChanged────┘
//!    │
//!    └──StopRequested──▶ Stopping ──ResourcesGone──▶ Stopped
//! ```
//!
//! Each pass derives the events that hold, in priority order, and applies
//! the first one the table accepts.

use flinkop_core::ClusterPhase;
use std::fmt;

/// Something observed during a pass that may move the cluster to a new phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// `spec.desiredPhase` is `Stopped`
    StopRequested,
    /// More consecutive failed passes than allowed
    RetriesExhausted,
    JobFailed,
    /// The job succeeded and its restart policy is `Never`
    JobSucceeded,
    /// Every managed resource is gone
    ResourcesGone,
    /// The job was deleted for resubmission
    JobRestarting,
    /// `metadata.generation` moved past `status.observedGeneration`
    SpecChanged,
    /// Deployments are ready and the job, if any, has been submitted
    InfraReady,
}

impl ClusterEvent {
    /// All events, highest priority first
    pub const PRIORITY: [ClusterEvent; 8] = [
        ClusterEvent::StopRequested,
        ClusterEvent::RetriesExhausted,
        ClusterEvent::JobFailed,
        ClusterEvent::JobSucceeded,
        ClusterEvent::ResourcesGone,
        ClusterEvent::JobRestarting,
        ClusterEvent::SpecChanged,
        ClusterEvent::InfraReady,
    ];
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The transition table. `None` means the event does not apply in `phase`.
pub fn transition(phase: ClusterPhase, event: ClusterEvent) -> Option<ClusterPhase> {
    use ClusterEvent as E;
    use ClusterPhase as P;

    match (phase, event) {
        (P::Creating | P::Updating, E::InfraReady) => Some(P::Running),

        (P::Creating | P::Running | P::Updating, E::JobFailed | E::RetriesExhausted) => {
            Some(P::Failed)
        }

        (P::Creating | P::Running | P::Updating | P::Failed, E::StopRequested) => {
            Some(P::Stopping)
        }
        (P::Running | P::Updating, E::JobSucceeded) => Some(P::Stopping),

        (P::Running, E::SpecChanged | E::JobRestarting) => Some(P::Updating),
        (P::Failed, E::SpecChanged) => Some(P::Updating),

        (P::Stopping, E::ResourcesGone) => Some(P::Stopped),

        _ => None,
    }
}

/// Facts about one pass from which the events are derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassFacts {
    pub stop_requested: bool,
    pub retries_exhausted: bool,
    pub job_failed: bool,
    pub job_succeeded_final: bool,
    pub resources_gone: bool,
    pub job_restarting: bool,
    pub spec_changed: bool,
    pub infra_ready: bool,
}

impl PassFacts {
    /// Events that hold, highest priority first
    pub fn events(&self) -> Vec<ClusterEvent> {
        ClusterEvent::PRIORITY
            .into_iter()
            .filter(|event| match event {
                ClusterEvent::StopRequested => self.stop_requested,
                ClusterEvent::RetriesExhausted => self.retries_exhausted,
                ClusterEvent::JobFailed => self.job_failed,
                ClusterEvent::JobSucceeded => self.job_succeeded_final,
                ClusterEvent::ResourcesGone => self.resources_gone,
                ClusterEvent::JobRestarting => self.job_restarting,
                ClusterEvent::SpecChanged => self.spec_changed,
                ClusterEvent::InfraReady => self.infra_ready,
            })
            .collect()
    }
}

/// Apply the highest-priority event that yields a transition
pub fn next_phase(phase: ClusterPhase, facts: &PassFacts) -> Option<(ClusterEvent, ClusterPhase)> {
    facts
        .events()
        .into_iter()
        .find_map(|event| transition(phase, event).map(|next| (event, next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClusterEvent as E;
    use ClusterPhase as P;

    #[test]
    fn test_full_transition_table() {
        let expected = |phase: P, event: E| -> Option<P> {
            match (phase, event) {
                (P::Creating, E::InfraReady) => Some(P::Running),
                (P::Updating, E::InfraReady) => Some(P::Running),
                (P::Creating | P::Running | P::Updating, E::JobFailed) => Some(P::Failed),
                (P::Creating | P::Running | P::Updating, E::RetriesExhausted) => Some(P::Failed),
                (P::Creating | P::Running | P::Updating | P::Failed, E::StopRequested) => {
                    Some(P::Stopping)
                }
                (P::Running | P::Updating, E::JobSucceeded) => Some(P::Stopping),
                (P::Running, E::SpecChanged) => Some(P::Updating),
                (P::Running, E::JobRestarting) => Some(P::Updating),
                (P::Failed, E::SpecChanged) => Some(P::Updating),
                (P::Stopping, E::ResourcesGone) => Some(P::Stopped),
                _ => None,
            }
        };

        let mut accepted = 0;
        for phase in P::ALL {
            for event in E::PRIORITY {
                assert_eq!(
                    transition(phase, event),
                    expected(phase, event),
                    "{} + {}",
                    phase,
                    event
                );
                accepted += usize::from(transition(phase, event).is_some());
            }
        }
        assert_eq!(accepted, 18);
    }

    #[test]
    fn test_stopped_is_terminal() {
        for event in E::PRIORITY {
            assert_eq!(transition(P::Stopped, event), None);
        }
    }

    #[test]
    fn test_failed_is_never_reached_from_stopping() {
        assert_eq!(transition(P::Stopping, E::JobFailed), None);
        assert_eq!(transition(P::Stopping, E::RetriesExhausted), None);
    }

    #[test]
    fn test_priority_stop_beats_failure() {
        let facts = PassFacts {
            stop_requested: true,
            job_failed: true,
            infra_ready: true,
            ..Default::default()
        };
        assert_eq!(
            next_phase(P::Running, &facts),
            Some((E::StopRequested, P::Stopping))
        );
    }

    #[test]
    fn test_inapplicable_events_fall_through() {
        // SpecChanged does nothing while Creating, so InfraReady applies
        let facts = PassFacts {
            spec_changed: true,
            infra_ready: true,
            ..Default::default()
        };
        assert_eq!(
            next_phase(P::Creating, &facts),
            Some((E::InfraReady, P::Running))
        );
        assert_eq!(
            next_phase(P::Running, &facts),
            Some((E::SpecChanged, P::Updating))
        );
    }

    #[test]
    fn test_no_events_no_transition() {
        assert_eq!(next_phase(P::Running, &PassFacts::default()), None);
    }

    #[test]
    fn test_events_are_priority_ordered() {
        let facts = PassFacts {
            stop_requested: true,
            retries_exhausted: true,
            job_failed: true,
            job_succeeded_final: true,
            resources_gone: true,
            job_restarting: true,
            spec_changed: true,
            infra_ready: true,
        };
        assert_eq!(facts.events(), E::PRIORITY.to_vec());
    }
}
