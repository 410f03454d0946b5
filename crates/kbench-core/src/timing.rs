//! Steady-state latency measurement.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Tensor;
use crate::toolchain::{ExecError, KernelModel};

/// Untimed invocations before the first timed trial.
pub const WARMUP_TRIALS: u32 = 10;

/// Per-trial latencies in milliseconds reduced to summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub num_trials: u32,
}

impl TimingSample {
    /// Summarize raw samples. Returns `None` for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = samples.iter().map(|s| s.max(0.0)).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        Some(Self {
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[n - 1],
            median,
            num_trials: n as u32,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimingError {
    #[error("num_trials must be at least 1")]
    NoTrials,

    #[error("warmup invocation {warmup} failed: {source}")]
    Warmup { warmup: u32, source: ExecError },

    #[error("timed trial {trial} failed: {source}")]
    Trial { trial: u32, source: ExecError },
}

/// Time `num_trials` invocations of `model` on `inputs`.
///
/// Each timed trial records a start marker, invokes once, records an end
/// marker, then synchronizes the device before reading the elapsed time.
pub async fn measure(
    model: &mut dyn KernelModel,
    inputs: &[Tensor],
    num_trials: u32,
    warmup_trials: u32,
) -> Result<TimingSample, TimingError> {
    if num_trials == 0 {
        return Err(TimingError::NoTrials);
    }

    for warmup in 0..warmup_trials {
        model
            .forward(inputs)
            .await
            .map_err(|source| TimingError::Warmup { warmup, source })?;
    }
    model
        .synchronize()
        .await
        .map_err(|source| TimingError::Warmup {
            warmup: warmup_trials,
            source,
        })?;

    let mut samples = Vec::with_capacity(num_trials as usize);
    for trial in 0..num_trials {
        let elapsed = timed_trial(model, inputs)
            .await
            .map_err(|source| TimingError::Trial { trial, source })?;
        debug!(trial, elapsed_ms = elapsed, "timed trial");
        samples.push(elapsed);
        tokio::task::yield_now().await;
    }

    TimingSample::from_samples(&samples).ok_or(TimingError::NoTrials)
}

async fn timed_trial(model: &mut dyn KernelModel, inputs: &[Tensor]) -> Result<f64, ExecError> {
    let start = model.mark().await?;
    model.forward(inputs).await?;
    let end = model.mark().await?;
    model.synchronize().await?;
    model.elapsed_ms(start, end).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::Marker;
    use async_trait::async_trait;

    #[test]
    fn test_from_samples_statistics() {
        let s = TimingSample::from_samples(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.num_trials, 4);
        assert!((s.std - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_from_samples_odd_and_empty() {
        let s = TimingSample::from_samples(&[5.0, 1.0, 3.0]).unwrap();
        assert_eq!(s.median, 3.0);
        assert!(TimingSample::from_samples(&[]).is_none());
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let s = TimingSample::from_samples(&[0.7]).unwrap();
        assert_eq!(s.std, 0.0);
        assert_eq!(s.min, s.max);
    }

    /// Scripted model: each trial "takes" the next duration in the list.
    struct FakeModel {
        durations: Vec<f64>,
        clock: f64,
        marks: Vec<f64>,
        forwards: u32,
        syncs: u32,
        fail_on_forward: Option<u32>,
    }

    impl FakeModel {
        fn new(durations: Vec<f64>) -> Self {
            Self {
                durations,
                clock: 0.0,
                marks: Vec::new(),
                forwards: 0,
                syncs: 0,
                fail_on_forward: None,
            }
        }
    }

    #[async_trait]
    impl KernelModel for FakeModel {
        async fn forward(&mut self, _inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
            self.forwards += 1;
            if self.fail_on_forward == Some(self.forwards) {
                return Err(ExecError::Worker("device fault".to_string()));
            }
            let idx = (self.forwards as usize - 1) % self.durations.len();
            self.clock += self.durations[idx];
            Ok(vec![])
        }

        async fn mark(&mut self) -> Result<Marker, ExecError> {
            self.marks.push(self.clock);
            Ok(Marker(self.marks.len() as u64 - 1))
        }

        async fn synchronize(&mut self) -> Result<(), ExecError> {
            self.syncs += 1;
            Ok(())
        }

        async fn elapsed_ms(&mut self, start: Marker, end: Marker) -> Result<f64, ExecError> {
            Ok(self.marks[end.0 as usize] - self.marks[start.0 as usize])
        }
    }

    #[tokio::test]
    async fn test_measure_runs_warmups_then_trials() {
        let mut model = FakeModel::new(vec![2.0]);
        let sample = measure(&mut model, &[], 5, 3).await.unwrap();
        assert_eq!(model.forwards, 8);
        assert_eq!(model.syncs, 6);
        assert_eq!(sample.num_trials, 5);
        assert_eq!(sample.mean, 2.0);
        assert!(sample.min <= sample.median && sample.median <= sample.max);
    }

    #[tokio::test]
    async fn test_measure_zero_trials_is_error() {
        let mut model = FakeModel::new(vec![1.0]);
        assert_eq!(measure(&mut model, &[], 0, 0).await, Err(TimingError::NoTrials));
        assert_eq!(model.forwards, 0);
    }

    #[tokio::test]
    async fn test_trial_failure_aborts_pass() {
        let mut model = FakeModel::new(vec![1.0]);
        model.fail_on_forward = Some(4);
        let err = measure(&mut model, &[], 10, 2).await.unwrap_err();
        assert!(matches!(err, TimingError::Trial { trial: 1, .. }));
    }
}
