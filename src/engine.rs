//! Analysis engine boundary.
//!
//! The lifecycle tracker hands each accepted submission to an
//! [`AnalysisEngine`] and records whatever comes back. Real pose estimation and
//! scoring live outside this service; the engines here stand in for it.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::{seq::IndexedRandom, Rng};
use tokio::time;

use crate::{
    config::{Config, EngineKind},
    error::AnalysisError,
    models::{
        AnalysisResults, FootworkAnalysis, FootworkMetrics, StrategyAnalysis, TechniqueAnalysis,
        TechniqueMetrics, TimeMarker,
    },
};

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub analysis_id: String,
    pub artifact_location: PathBuf,
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, job: &AnalysisJob) -> Result<AnalysisResults, AnalysisError>;
}

pub fn build_engine(config: &Config) -> Arc<dyn AnalysisEngine> {
    match config.engine {
        EngineKind::Simulated => Arc::new(SimulatedEngine::new(config.analysis_delay)),
        EngineKind::Fixture => Arc::new(FixtureEngine::new(config.analysis_delay)),
    }
}

const TECHNIQUE_FEEDBACK: [&str; 5] = [
    "Good racket preparation on the forehand side",
    "Contact point drifts behind the body on backhands",
    "Follow-through finishes early; extend through the shot",
    "Consistent grip changes between strokes",
    "Keep the non-hitting arm up for balance",
];

const FOOTWORK_FEEDBACK: [&str; 5] = [
    "Split step timing is consistent",
    "Recovery to the base position is slow after wide balls",
    "Good use of crossover steps",
    "Stay lower through the ready position",
    "Small adjustment steps before contact would help",
];

const STRATEGY_FEEDBACK: [&str; 4] = [
    "Rallies are built patiently from the baseline",
    "Too many shots return to the middle of the court",
    "Look for the short ball to move forward",
    "Vary pace to break opponent rhythm",
];

const SIMULATED_SCORE_RANGE: std::ops::RangeInclusive<u8> = 60..=100;

/// Waits for a fixed delay and then produces randomized scores in 60..=100.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    delay: Duration,
}

impl SimulatedEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn generate(&self) -> AnalysisResults {
        let mut rng = rand::rng();
        let mut score = || rng.random_range(SIMULATED_SCORE_RANGE);

        let technique_metrics = TechniqueMetrics {
            backswing: score(),
            follow_through: score(),
            contact_point: score(),
            racket_path: score(),
        };
        let footwork_metrics = FootworkMetrics {
            movement_efficiency: score(),
            recovery_speed: score(),
            court_coverage: score(),
        };
        let strategy_score = score();

        let technique_score = mean(&[
            technique_metrics.backswing,
            technique_metrics.follow_through,
            technique_metrics.contact_point,
            technique_metrics.racket_path,
        ]);
        let footwork_score = mean(&[
            footwork_metrics.movement_efficiency,
            footwork_metrics.recovery_speed,
            footwork_metrics.court_coverage,
        ]);

        AnalysisResults {
            technique: TechniqueAnalysis {
                overall_score: technique_score,
                feedback: pick(&mut rng, &TECHNIQUE_FEEDBACK, 3),
                detailed_metrics: technique_metrics,
                time_markers: None,
            },
            footwork: FootworkAnalysis {
                overall_score: footwork_score,
                feedback: pick(&mut rng, &FOOTWORK_FEEDBACK, 3),
                detailed_metrics: footwork_metrics,
                time_markers: None,
            },
            strategy: StrategyAnalysis {
                overall_score: strategy_score,
                feedback: pick(&mut rng, &STRATEGY_FEEDBACK, 2),
                patterns: None,
            },
        }
    }
}

#[async_trait]
impl AnalysisEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn analyze(&self, _job: &AnalysisJob) -> Result<AnalysisResults, AnalysisError> {
        time::sleep(self.delay).await;
        Ok(self.generate())
    }
}

fn mean(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let total: u32 = values.iter().map(|v| u32::from(*v)).sum();
    (total / values.len() as u32) as u8
}

fn pick<R: Rng + ?Sized>(rng: &mut R, pool: &[&str], amount: usize) -> Vec<String> {
    pool.choose_multiple(rng, amount)
        .map(|line| line.to_string())
        .collect()
}

/// Returns the canonical demo payload, including the optional time markers and
/// rally patterns.
#[derive(Debug, Clone)]
pub struct FixtureEngine {
    delay: Duration,
}

impl FixtureEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn payload() -> AnalysisResults {
        AnalysisResults {
            technique: TechniqueAnalysis {
                overall_score: 85,
                feedback: vec![
                    "Good racket preparation".to_string(),
                    "Follow through could be more complete".to_string(),
                    "Contact point is consistent".to_string(),
                ],
                detailed_metrics: TechniqueMetrics {
                    backswing: 88,
                    follow_through: 75,
                    contact_point: 90,
                    racket_path: 85,
                },
                time_markers: Some(vec![
                    TimeMarker {
                        time: 2.5,
                        label: "Forehand preparation".to_string(),
                    },
                    TimeMarker {
                        time: 5.1,
                        label: "Incomplete follow-through".to_string(),
                    },
                ]),
            },
            footwork: FootworkAnalysis {
                overall_score: 78,
                feedback: vec![
                    "Good split step timing".to_string(),
                    "Recovery could be faster".to_string(),
                    "Work on lateral movement".to_string(),
                ],
                detailed_metrics: FootworkMetrics {
                    movement_efficiency: 80,
                    recovery_speed: 72,
                    court_coverage: 82,
                },
                time_markers: Some(vec![TimeMarker {
                    time: 3.8,
                    label: "Late recovery step".to_string(),
                }]),
            },
            strategy: StrategyAnalysis {
                overall_score: 82,
                feedback: vec![
                    "Good shot selection".to_string(),
                    "Consider more cross-court shots".to_string(),
                ],
                patterns: Some(vec![
                    "Cross-court forehand rally".to_string(),
                    "Approach on short backhand".to_string(),
                ]),
            },
        }
    }
}

#[async_trait]
impl AnalysisEngine for FixtureEngine {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn analyze(&self, _job: &AnalysisJob) -> Result<AnalysisResults, AnalysisError> {
        if !self.delay.is_zero() {
            time::sleep(self.delay).await;
        }
        Ok(Self::payload())
    }
}
