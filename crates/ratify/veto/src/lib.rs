#![deny(unsafe_code)]
//! Veto control law — a pure, deterministic admit/deny decision over a
//! constraint snapshot.
//!
//! Three domains are evaluated with strict priority short-circuiting:
//!
//! 1. **Override** — a set override flag vetoes unconditionally.
//! 2. **Hard thresholds** — any tripped boolean safety flag vetoes.
//! 3. **Soft aggregate** — `Σ value×weight` over the soft constraints vetoes
//!    when it exceeds the dynamic limit.
//!
//! Evaluation never performs I/O and never blocks; the caller is responsible
//! for persisting the returned trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A weighted soft-constraint reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftConstraint {
    pub value: f64,
    pub weight: f64,
}

impl SoftConstraint {
    pub fn new(value: f64, weight: f64) -> Self {
        Self { value, weight }
    }

    fn is_finite(&self) -> bool {
        self.value.is_finite() && self.weight.is_finite()
    }
}

/// Ephemeral constraint state passed into [`evaluate`].
///
/// Constructed fresh per evaluation and never mutated afterwards. BTreeMaps
/// keep the trace ordering deterministic.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConstraintSnapshot {
    /// Binding override signal; vetoes regardless of all other state.
    pub override_active: bool,
    /// Named, non-negotiable boolean safety flags. `true` means tripped.
    pub hard_thresholds: BTreeMap<String, bool>,
    /// Named weighted risk factors.
    pub soft_constraints: BTreeMap<String, SoftConstraint>,
    /// Dynamic limit the weighted soft aggregate is compared against.
    pub limit: f64,
}

impl ConstraintSnapshot {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_override(mut self, active: bool) -> Self {
        self.override_active = active;
        self
    }

    pub fn with_hard_threshold(mut self, name: impl Into<String>, tripped: bool) -> Self {
        self.hard_thresholds.insert(name.into(), tripped);
        self
    }

    pub fn with_soft_constraint(
        mut self,
        name: impl Into<String>,
        value: f64,
        weight: f64,
    ) -> Self {
        self.soft_constraints
            .insert(name.into(), SoftConstraint::new(value, weight));
        self
    }
}

/// Which domain triggered a veto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VetoDomain {
    Override,
    HardThreshold,
    SoftAggregate,
}

/// Evaluation trace, sufficient to reconstruct the decision.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VetoTrace {
    /// Hard-threshold flags that were tripped (includes non-finite soft
    /// constraints reported as implicit hard vetoes).
    pub tripped: Vec<String>,
    /// Weighted soft aggregate, when the evaluation reached that domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<f64>,
    /// The limit the aggregate was compared against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
}

/// The verdict returned by [`evaluate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VetoVerdict {
    pub vetoed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<VetoDomain>,
    pub trace: VetoTrace,
}

impl VetoVerdict {
    fn admit() -> Self {
        Self {
            vetoed: false,
            domain: None,
            trace: VetoTrace::default(),
        }
    }
}

/// Evaluate the veto control law over a snapshot.
///
/// Deterministic and side-effect-free. Domains short-circuit in priority
/// order: override, hard thresholds, soft aggregate. A non-finite value or
/// weight in any soft constraint is treated as an implicit hard-threshold
/// veto rather than being folded into the aggregate.
pub fn evaluate(snapshot: &ConstraintSnapshot) -> VetoVerdict {
    if snapshot.override_active {
        return VetoVerdict {
            vetoed: true,
            domain: Some(VetoDomain::Override),
            trace: VetoTrace::default(),
        };
    }

    let mut tripped: Vec<String> = snapshot
        .hard_thresholds
        .iter()
        .filter(|(_, &flag)| flag)
        .map(|(name, _)| name.clone())
        .collect();

    // Fail safe: a soft constraint that cannot be aggregated escalates to
    // the hard domain instead of silently dropping out of the sum.
    tripped.extend(
        snapshot
            .soft_constraints
            .iter()
            .filter(|(_, c)| !c.is_finite())
            .map(|(name, _)| format!("non-finite:{name}")),
    );

    if !tripped.is_empty() {
        return VetoVerdict {
            vetoed: true,
            domain: Some(VetoDomain::HardThreshold),
            trace: VetoTrace {
                tripped,
                aggregate: None,
                limit: None,
            },
        };
    }

    let aggregate: f64 = snapshot
        .soft_constraints
        .values()
        .map(|c| c.value * c.weight)
        .sum();

    if aggregate > snapshot.limit {
        return VetoVerdict {
            vetoed: true,
            domain: Some(VetoDomain::SoftAggregate),
            trace: VetoTrace {
                tripped: Vec::new(),
                aggregate: Some(aggregate),
                limit: Some(snapshot.limit),
            },
        };
    }

    let mut verdict = VetoVerdict::admit();
    verdict.trace.aggregate = Some(aggregate);
    verdict.trace.limit = Some(snapshot.limit);
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clean_snapshot_admits() {
        let verdict = evaluate(&ConstraintSnapshot::new(1.0));
        assert!(!verdict.vetoed);
        assert_eq!(verdict.domain, None);
        assert_eq!(verdict.trace.aggregate, Some(0.0));
    }

    #[test]
    fn override_vetoes_unconditionally() {
        let snapshot = ConstraintSnapshot::new(100.0)
            .with_override(true)
            .with_hard_threshold("sec_check", true)
            .with_soft_constraint("latency", 0.9, 0.9);
        let verdict = evaluate(&snapshot);
        assert!(verdict.vetoed);
        assert_eq!(verdict.domain, Some(VetoDomain::Override));
    }

    #[test]
    fn hard_threshold_vetoes_and_names_flags() {
        let snapshot = ConstraintSnapshot::new(1.0)
            .with_hard_threshold("sec_check", true)
            .with_hard_threshold("quiesced", false);
        let verdict = evaluate(&snapshot);
        assert!(verdict.vetoed);
        assert_eq!(verdict.domain, Some(VetoDomain::HardThreshold));
        assert_eq!(verdict.trace.tripped, vec!["sec_check".to_string()]);
    }

    #[test]
    fn soft_aggregate_above_limit_vetoes() {
        // 0.6 * 0.5 = 0.3 > 0.2
        let snapshot = ConstraintSnapshot::new(0.2).with_soft_constraint("latency", 0.6, 0.5);
        let verdict = evaluate(&snapshot);
        assert!(verdict.vetoed);
        assert_eq!(verdict.domain, Some(VetoDomain::SoftAggregate));
        assert_eq!(verdict.trace.aggregate, Some(0.3));
        assert_eq!(verdict.trace.limit, Some(0.2));
    }

    #[test]
    fn soft_aggregate_at_limit_admits() {
        let snapshot = ConstraintSnapshot::new(0.3).with_soft_constraint("latency", 0.6, 0.5);
        assert!(!evaluate(&snapshot).vetoed);
    }

    #[test]
    fn non_finite_soft_constraint_is_an_implicit_hard_veto() {
        let snapshot =
            ConstraintSnapshot::new(f64::MAX).with_soft_constraint("latency", f64::NAN, 0.5);
        let verdict = evaluate(&snapshot);
        assert!(verdict.vetoed);
        assert_eq!(verdict.domain, Some(VetoDomain::HardThreshold));
        assert_eq!(verdict.trace.tripped, vec!["non-finite:latency".to_string()]);

        let snapshot = ConstraintSnapshot::new(f64::MAX).with_soft_constraint(
            "throughput",
            0.5,
            f64::INFINITY,
        );
        assert_eq!(
            evaluate(&snapshot).domain,
            Some(VetoDomain::HardThreshold)
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let snapshot = ConstraintSnapshot::new(0.4)
            .with_soft_constraint("a", 0.3, 0.5)
            .with_soft_constraint("b", 0.2, 0.9);
        assert_eq!(evaluate(&snapshot), evaluate(&snapshot));
    }

    proptest! {
        /// Override always wins, whatever else is in the snapshot.
        #[test]
        fn override_has_priority(
            flag in any::<bool>(),
            value in 0.0f64..10.0,
            weight in 0.0f64..10.0,
            limit in 0.0f64..10.0,
        ) {
            let snapshot = ConstraintSnapshot::new(limit)
                .with_override(true)
                .with_hard_threshold("h", flag)
                .with_soft_constraint("s", value, weight);
            let verdict = evaluate(&snapshot);
            prop_assert!(verdict.vetoed);
            prop_assert_eq!(verdict.domain, Some(VetoDomain::Override));
        }

        /// Increasing a soft-constraint value never turns a veto into an admit.
        #[test]
        fn soft_value_monotonicity(
            value in 0.0f64..10.0,
            bump in 0.0f64..10.0,
            weight in 0.0f64..10.0,
            limit in 0.0f64..10.0,
        ) {
            let base = ConstraintSnapshot::new(limit).with_soft_constraint("s", value, weight);
            let bumped =
                ConstraintSnapshot::new(limit).with_soft_constraint("s", value + bump, weight);
            if evaluate(&base).vetoed {
                prop_assert!(evaluate(&bumped).vetoed);
            }
        }
    }
}
