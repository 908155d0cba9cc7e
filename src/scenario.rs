//! Concurrency-over-time profiles and the fixed registry of named scenarios.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::ScenarioError;

// =============================================================================
// Profiles
// =============================================================================

/// One timed segment of a ramping profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub const fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "executor", rename_all = "snake_case")]
pub enum ScenarioProfile {
    Constant { vus: u32, duration: Duration },
    Ramping { start_vus: u32, stages: Vec<Stage> },
}

impl ScenarioProfile {
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Ramping { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// Target concurrency at `elapsed` since the profile started.
    ///
    /// Inside a ramping stage the value is linearly interpolated from the
    /// previous target and rounded down; at a stage's end it is exactly the
    /// declared target. Past the end the last target is held.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        match self {
            Self::Constant { vus, .. } => *vus,
            Self::Ramping { start_vus, stages } => {
                let mut from = *start_vus;
                let mut stage_start = Duration::ZERO;

                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        return interpolate(
                            from,
                            stage.target,
                            (elapsed - stage_start).as_nanos(),
                            stage.duration.as_nanos(),
                        );
                    }
                    from = stage.target;
                    stage_start = stage_end;
                }

                from
            }
        }
    }

    /// First stage boundary strictly after `elapsed`, or the end of the
    /// profile once the last boundary has passed.
    pub fn next_boundary(&self, elapsed: Duration) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Ramping { stages, .. } => {
                let mut end = Duration::ZERO;
                for stage in stages {
                    end += stage.duration;
                    if end > elapsed {
                        return end;
                    }
                }
                end
            }
        }
    }

    /// Highest concurrency the curve ever asks for.
    pub fn peak_vus(&self) -> u32 {
        match self {
            Self::Constant { vus, .. } => *vus,
            Self::Ramping { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, u32::max),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ScenarioError> {
        match self {
            Self::Constant { duration, .. } => {
                if duration.is_zero() {
                    return Err(ScenarioError::ZeroDuration(name.to_string()));
                }
            }
            Self::Ramping { stages, .. } => {
                if stages.is_empty() {
                    return Err(ScenarioError::NoStages(name.to_string()));
                }
                if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
                    return Err(ScenarioError::ZeroStageDuration {
                        name: name.to_string(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ScenarioProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { vus, duration } => {
                write!(f, "constant {} VUs for {}s", vus, duration.as_secs())
            }
            Self::Ramping { start_vus, stages } => {
                write!(f, "ramping from {}", start_vus)?;
                for stage in stages {
                    write!(f, " -> {} over {}s", stage.target, stage.duration.as_secs())?;
                }
                Ok(())
            }
        }
    }
}

/// Floor of `from + (to - from) * elapsed / span`, in exact integer math.
fn interpolate(from: u32, to: u32, elapsed: u128, span: u128) -> u32 {
    let span = span as i128;
    let delta = i128::from(to) - i128::from(from);
    let scaled = i128::from(from) * span + delta * elapsed as i128;
    scaled.div_euclid(span).max(0) as u32
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedScenario {
    pub name: String,
    pub profile: ScenarioProfile,
}

/// The fixed set of named profiles a run can select from.
#[derive(Debug, Clone)]
pub struct ScenarioRegistry {
    scenarios: Vec<NamedScenario>,
}

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

const fn mins(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

impl ScenarioRegistry {
    pub fn builtin() -> Self {
        let ramping = |stages: &[Stage]| ScenarioProfile::Ramping {
            start_vus: 0,
            stages: stages.to_vec(),
        };

        let scenarios = vec![
            NamedScenario {
                name: "smoke".to_string(),
                profile: ScenarioProfile::Constant {
                    vus: 1,
                    duration: secs(30),
                },
            },
            NamedScenario {
                name: "load".to_string(),
                profile: ramping(&[
                    Stage::new(mins(1), 10),
                    Stage::new(mins(3), 10),
                    Stage::new(mins(1), 0),
                ]),
            },
            NamedScenario {
                name: "stress".to_string(),
                profile: ramping(&[
                    Stage::new(mins(2), 20),
                    Stage::new(mins(5), 20),
                    Stage::new(mins(2), 50),
                    Stage::new(mins(5), 50),
                    Stage::new(mins(2), 0),
                ]),
            },
            NamedScenario {
                name: "spike".to_string(),
                profile: ramping(&[
                    Stage::new(secs(10), 5),
                    Stage::new(secs(30), 50),
                    Stage::new(mins(1), 50),
                    Stage::new(secs(10), 5),
                    Stage::new(secs(30), 0),
                ]),
            },
            NamedScenario {
                name: "soak".to_string(),
                profile: ramping(&[
                    Stage::new(mins(2), 10),
                    Stage::new(mins(30), 10),
                    Stage::new(mins(2), 0),
                ]),
            },
        ];

        Self { scenarios }
    }

    pub fn from_scenarios(scenarios: Vec<NamedScenario>) -> Result<Self, ScenarioError> {
        for scenario in &scenarios {
            scenario.profile.validate(&scenario.name)?;
        }
        Ok(Self { scenarios })
    }

    pub fn get(&self, name: &str) -> Result<&NamedScenario, ScenarioError> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ScenarioError::Unknown(name.to_string()))
    }

    /// Resolves the run's phases: the named scenario alone, or every
    /// registered scenario in declaration order when no name is given.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<NamedScenario>, ScenarioError> {
        match name {
            Some(name) => Ok(vec![self.get(name)?.clone()]),
            None => Ok(self.scenarios.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedScenario> {
        self.scenarios.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up_and_down() -> ScenarioProfile {
        ScenarioProfile::Ramping {
            start_vus: 0,
            stages: vec![Stage::new(mins(2), 10), Stage::new(mins(2), 0)],
        }
    }

    #[test]
    fn ramping_target_interpolates_and_floors() {
        let profile = up_and_down();
        assert_eq!(profile.target_at(Duration::ZERO), 0);
        assert_eq!(profile.target_at(mins(1)), 5);
        assert_eq!(profile.target_at(secs(71)), 5);
        assert_eq!(profile.target_at(secs(72)), 6);
        assert_eq!(profile.target_at(mins(2)), 10);
        // 10 -> 0 over 120s: at 40s in, 10 - 3.33 floors to 6
        assert_eq!(profile.target_at(secs(160)), 6);
        assert_eq!(profile.target_at(mins(4)), 0);
        assert_eq!(profile.target_at(mins(10)), 0);
    }

    #[test]
    fn stage_end_uses_declared_target() {
        let profile = ScenarioProfile::Ramping {
            start_vus: 1,
            stages: vec![Stage::new(secs(3), 4), Stage::new(secs(7), 4)],
        };
        assert_eq!(profile.target_at(secs(3)), 4);
        assert_eq!(profile.target_at(Duration::from_millis(2999)), 3);
        assert_eq!(profile.target_at(secs(8)), 4);
    }

    #[test]
    fn constant_target_is_flat() {
        let profile = ScenarioProfile::Constant {
            vus: 7,
            duration: secs(10),
        };
        assert_eq!(profile.target_at(Duration::ZERO), 7);
        assert_eq!(profile.target_at(secs(9)), 7);
        assert_eq!(profile.total_duration(), secs(10));
        assert_eq!(profile.peak_vus(), 7);
    }

    #[test]
    fn next_boundary_walks_stage_ends() {
        let profile = up_and_down();
        assert_eq!(profile.next_boundary(Duration::ZERO), mins(2));
        assert_eq!(profile.next_boundary(mins(2)), mins(4));
        assert_eq!(profile.next_boundary(secs(200)), mins(4));
        assert_eq!(profile.next_boundary(mins(5)), mins(4));
    }

    #[test]
    fn total_duration_sums_stages() {
        assert_eq!(up_and_down().total_duration(), mins(4));
        assert_eq!(up_and_down().peak_vus(), 10);
    }

    #[test]
    fn validate_rejects_degenerate_profiles() {
        let empty = ScenarioProfile::Ramping {
            start_vus: 0,
            stages: vec![],
        };
        assert_eq!(
            empty.validate("x"),
            Err(ScenarioError::NoStages("x".to_string()))
        );

        let zero_stage = ScenarioProfile::Ramping {
            start_vus: 0,
            stages: vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)],
        };
        assert_eq!(
            zero_stage.validate("y"),
            Err(ScenarioError::ZeroStageDuration {
                name: "y".to_string(),
                index: 1
            })
        );

        let zero_constant = ScenarioProfile::Constant {
            vus: 1,
            duration: Duration::ZERO,
        };
        assert!(zero_constant.validate("z").is_err());
    }

    #[test]
    fn registry_selects_by_name_or_all() {
        let registry = ScenarioRegistry::builtin();
        for scenario in registry.iter() {
            scenario.profile.validate(&scenario.name).unwrap();
        }

        let selected = registry.select(Some("spike")).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "spike");
        assert_eq!(selected[0].profile.peak_vus(), 50);

        assert_eq!(registry.select(None).unwrap().len(), 5);
        assert_eq!(
            registry.select(Some("nope")),
            Err(ScenarioError::Unknown("nope".to_string()))
        );
    }

    #[test]
    fn display_describes_shape() {
        assert_eq!(
            up_and_down().to_string(),
            "ramping from 0 -> 10 over 120s -> 0 over 120s"
        );
    }
}
