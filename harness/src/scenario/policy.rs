use crate::control::Resource;
use crate::convergence::{Comparison, CountProbe};
use crate::fault::FaultClass;

/// Maps a fault class to the count relation a correct pipeline must produce.
///
/// | Fault class                      | Relation                                  |
/// |----------------------------------|-------------------------------------------|
/// | none                             | `Equal`                                   |
/// | graceful stop + restart          | `Equal` when idle, `AtLeast` mid-workload |
/// | forceful kill + restart          | `AtLeast`                                 |
/// | VM stop with clean shutdown      | `Equal`                                   |
/// | VM stop without clean shutdown   | `AtLeast`                                 |
/// | broker kill under direct writes  | `AtMost`                                  |
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryPolicy;

impl DeliveryPolicy {
    /// `overlaps_workload` tells whether the first disruption lands while rows are still
    /// being written; a graceful stop can only race an offset commit in that case.
    pub fn comparison_for(class: FaultClass, overlaps_workload: bool) -> Comparison {
        match class {
            FaultClass::None => Comparison::Equal,
            FaultClass::GracefulStop if overlaps_workload => Comparison::AtLeast,
            FaultClass::GracefulStop => Comparison::Equal,
            FaultClass::ForcefulKill => Comparison::AtLeast,
            FaultClass::VmStop { clean_shutdown: true } => Comparison::Equal,
            FaultClass::VmStop { clean_shutdown: false } => Comparison::AtLeast,
            FaultClass::ProducerSideKill => Comparison::AtMost,
        }
    }

    pub fn probe_for(
        resource: Resource,
        class: FaultClass,
        expected: u64,
        overlaps_workload: bool,
    ) -> CountProbe {
        CountProbe::new(
            resource,
            expected,
            Self::comparison_for(class, overlaps_workload),
        )
    }

    /// Whether `comparison` asserts more than `class` guarantees, so it can fail on a
    /// correct pipeline.
    pub fn is_flaky(class: FaultClass, comparison: Comparison) -> bool {
        match class {
            FaultClass::ForcefulKill | FaultClass::VmStop { clean_shutdown: false } => {
                comparison == Comparison::Equal
            }
            FaultClass::ProducerSideKill => comparison != Comparison::AtMost,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_free_runs_are_exact() {
        assert_eq!(
            DeliveryPolicy::comparison_for(FaultClass::None, true),
            Comparison::Equal
        );
    }

    #[test]
    fn graceful_stop_depends_on_overlap() {
        assert_eq!(
            DeliveryPolicy::comparison_for(FaultClass::GracefulStop, false),
            Comparison::Equal
        );
        assert_eq!(
            DeliveryPolicy::comparison_for(FaultClass::GracefulStop, true),
            Comparison::AtLeast
        );
    }

    #[test]
    fn non_graceful_faults_allow_duplicates() {
        for class in [
            FaultClass::ForcefulKill,
            FaultClass::VmStop {
                clean_shutdown: false,
            },
        ] {
            assert_eq!(
                DeliveryPolicy::comparison_for(class, false),
                Comparison::AtLeast
            );
            assert!(DeliveryPolicy::is_flaky(class, Comparison::Equal));
            assert!(!DeliveryPolicy::is_flaky(class, Comparison::AtLeast));
        }
    }

    #[test]
    fn producer_side_kill_allows_loss() {
        let probe = DeliveryPolicy::probe_for(
            Resource::Topic("person".into()),
            FaultClass::ProducerSideKill,
            500,
            true,
        );
        assert_eq!(probe.comparison, Comparison::AtMost);
        assert!(DeliveryPolicy::is_flaky(
            FaultClass::ProducerSideKill,
            Comparison::AtLeast
        ));
    }
}
