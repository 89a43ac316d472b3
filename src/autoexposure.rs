//! Auto-exposure: converge integration time and averaging onto a target
//! saturation fraction.
//!
//! The convergence logic is a pure, synchronous state machine
//! ([`ExposureSeeker`]) driven by saturation observations, so termination is
//! testable without any hardware I/O. The async
//! [`AutoExposureController`] wraps it, feeding it estimates from the
//! acquisition engine while holding the session lock for the entire loop —
//! no two auto-exposure runs on one device can overlap, and none can
//! interleave with a primitive capture.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────── in band for N estimates ────────> Converged
//!            │
//! Seeking ───┼──── bound or period budget hit ─────────> BoundsExceeded
//!            │
//!            └──── saturation estimate errored ────────> Failed
//! ```
//!
//! Step sizing is proportional: the next integration time is the current one
//! scaled by `target / observed`, clamped to a factor of [`MAX_STEP`] per
//! iteration so overshoot risk stays bounded on a nonlinear sensor.
//! Averaging is raised (doubled) only when integration time is pinned at its
//! ceiling yet the signal remains below target, trading repeat count for a
//! pseudo-dynamic-range extension.
//!
//! # Tuning knobs
//!
//! The advanced overload accepts the firmware-era knobs `(fck, period, M,
//! N)`. Their policy here: `period` is the iteration budget, `M` is the
//! number of saturation samples averaged into one estimate, `N` is the
//! number of consecutive in-band estimates required before convergence is
//! accepted, and `fck` (firmware clock divisor) is recorded but not
//! interpreted — the transport capability set has no hook for it.

use std::sync::Arc;
use tracing::{debug, info};

use crate::acquisition::estimate_saturation;
use crate::error::SpectroResult;
use crate::registry::DeviceRegistry;
use crate::session::AutoBounds;

/// Largest per-iteration scaling factor for the integration time.
pub const MAX_STEP: f64 = 4.0;

/// Default tolerance band around the target, as a fraction of full scale.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Convergence-policy knobs for noisy sensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tuning {
    /// Firmware clock divisor (recorded, not interpreted)
    pub fck: u32,
    /// Iteration budget (settle periods)
    pub period: u32,
    /// Saturation samples averaged into one estimate
    pub settle_m: u32,
    /// Consecutive in-band estimates required for convergence
    pub settle_n: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            fck: 1,
            period: 16,
            settle_m: 1,
            settle_n: 1,
        }
    }
}

/// Terminal and non-terminal states of the convergence loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekState {
    /// Still adjusting parameters
    Seeking,
    /// Saturation is within the tolerance band of the target
    Converged,
    /// A ceiling or the period budget was hit; the best achieved setting is
    /// still usable (non-fatal)
    BoundsExceeded,
    /// The saturation estimator itself errored
    Failed,
}

/// What the driver should do next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SeekStep {
    /// Estimate saturation at these parameters and feed it back
    Sample {
        /// Integration time to sample at, in milliseconds
        integration_ms: f64,
        /// Averaging count to sample at
        averaging: u32,
    },
    /// The loop has terminated; read the final state off the seeker
    Done,
}

/// Pure saturation-seeking state machine.
///
/// Feed it observations with [`observe`](Self::observe) until it returns
/// [`SeekStep::Done`]; it is guaranteed to do so within the period budget.
#[derive(Clone, Debug)]
pub struct ExposureSeeker {
    target: f64,
    tolerance: f64,
    integration_ms: f64,
    averaging: u32,
    min_integration_ms: f64,
    bounds: AutoBounds,
    periods_left: u32,
    in_band_streak: u32,
    settle_n: u32,
    state: SeekState,
    iterations: u32,
    last_saturation: f64,
}

impl ExposureSeeker {
    /// Start a seek from a seed integration time.
    ///
    /// `target` is the desired saturation fraction in (0, 1]; the seed is
    /// clamped into `[min_integration_ms, bounds.max_integration_ms]`.
    pub fn new(
        seed_ms: f64,
        target: f64,
        tolerance: f64,
        min_integration_ms: f64,
        bounds: AutoBounds,
        tuning: Tuning,
    ) -> Self {
        Self {
            target,
            tolerance,
            integration_ms: seed_ms.clamp(min_integration_ms, bounds.max_integration_ms),
            averaging: 1,
            min_integration_ms,
            bounds,
            periods_left: tuning.period.max(1),
            in_band_streak: 0,
            settle_n: tuning.settle_n.max(1),
            state: SeekState::Seeking,
            iterations: 0,
            last_saturation: 0.0,
        }
    }

    /// The parameters to sample next, or `Done` once terminal.
    pub fn request(&self) -> SeekStep {
        match self.state {
            SeekState::Seeking => SeekStep::Sample {
                integration_ms: self.integration_ms,
                averaging: self.averaging,
            },
            _ => SeekStep::Done,
        }
    }

    /// Feed one saturation observation and advance the machine.
    pub fn observe(&mut self, saturation: f64) -> SeekStep {
        if self.state != SeekState::Seeking {
            return SeekStep::Done;
        }
        self.iterations += 1;
        self.last_saturation = saturation;

        if (saturation - self.target).abs() <= self.tolerance {
            self.in_band_streak += 1;
            if self.in_band_streak >= self.settle_n {
                self.state = SeekState::Converged;
                return SeekStep::Done;
            }
            // Confirm at unchanged parameters until the streak settles.
            return self.spend_period();
        }
        self.in_band_streak = 0;

        let ratio = if saturation > 0.0 {
            (self.target / saturation).clamp(1.0 / MAX_STEP, MAX_STEP)
        } else {
            MAX_STEP
        };
        let next_ms = (self.integration_ms * ratio)
            .clamp(self.min_integration_ms, self.bounds.max_integration_ms);

        if next_ms == self.integration_ms {
            // Integration is pinned against a limit. Below target at the
            // ceiling we can still trade averaging for headroom; otherwise
            // the bounds are genuinely exhausted.
            let below = saturation < self.target - self.tolerance;
            if below && self.averaging < self.bounds.max_averaging {
                self.averaging = (self.averaging * 2).min(self.bounds.max_averaging);
            } else {
                self.state = SeekState::BoundsExceeded;
                return SeekStep::Done;
            }
        } else {
            self.integration_ms = next_ms;
        }
        self.spend_period()
    }

    /// Record an estimator failure and terminate.
    pub fn fail(&mut self) -> SeekStep {
        self.state = SeekState::Failed;
        SeekStep::Done
    }

    fn spend_period(&mut self) -> SeekStep {
        self.periods_left -= 1;
        if self.periods_left == 0 {
            self.state = SeekState::BoundsExceeded;
            return SeekStep::Done;
        }
        SeekStep::Sample {
            integration_ms: self.integration_ms,
            averaging: self.averaging,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> SeekState {
        self.state
    }

    /// Best achieved integration time so far, in milliseconds.
    pub fn integration_ms(&self) -> f64 {
        self.integration_ms
    }

    /// Best achieved averaging count so far.
    pub fn averaging(&self) -> u32 {
        self.averaging
    }

    /// Observations consumed so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// The most recent saturation observation.
    pub fn last_saturation(&self) -> f64 {
        self.last_saturation
    }
}

/// Outcome of an auto-exposure run.
///
/// `BoundsExceeded` is a status, not a failure: the returned parameters are
/// the best achieved setting and the caller may proceed degraded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutoExposureResult {
    /// Selected integration time in milliseconds
    pub integration_ms: f64,
    /// Selected averaging count
    pub averaging: u32,
    /// Terminal state: `Converged` or `BoundsExceeded`
    pub outcome: SeekState,
    /// Observations the loop consumed
    pub iterations: u32,
    /// Saturation at the selected parameters
    pub last_saturation: f64,
}

/// Drives the convergence loop against live hardware.
pub struct AutoExposureController {
    registry: Arc<DeviceRegistry>,
    tolerance: f64,
}

impl AutoExposureController {
    /// Create a controller with the default tolerance band.
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Override the tolerance band (fraction of full scale).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Converge integration/averaging onto `target` with default tuning.
    pub async fn auto_integrate(
        &self,
        index: u32,
        target: f64,
        bounds: AutoBounds,
    ) -> SpectroResult<AutoExposureResult> {
        self.auto_integrate_with_tuning(index, target, bounds, Tuning::default())
            .await
    }

    /// Converge with explicit tuning knobs (advanced overload).
    ///
    /// Holds the session's exclusive lock for the whole loop. On success the
    /// selected parameters are also written back as the session defaults,
    /// invalidating a stored dark frame that no longer matches.
    ///
    /// # Errors
    /// Propagates the transport error if the saturation estimate itself
    /// fails (the `Failed` terminal state); bound and budget exhaustion are
    /// reported in the result, not as errors.
    pub async fn auto_integrate_with_tuning(
        &self,
        index: u32,
        target: f64,
        bounds: AutoBounds,
        tuning: Tuning,
    ) -> SpectroResult<AutoExposureResult> {
        let session = self.registry.session(index).await?;
        let limits = session.limits();
        let bounds = bounds.clamped_to(&limits);

        let transport = session.transport().clone();
        let mut inner = session.lock_active().await?;

        let mut seeker = ExposureSeeker::new(
            inner.integration_ms,
            target,
            self.tolerance,
            limits.min_integration_ms,
            bounds,
            tuning,
        );
        debug!(
            index,
            target,
            seed_ms = seeker.integration_ms(),
            period = tuning.period,
            fck = tuning.fck,
            "auto-exposure started"
        );

        let mut step = seeker.request();
        while let SeekStep::Sample {
            integration_ms,
            averaging: _,
        } = step
        {
            let mut sum = 0.0;
            let samples = tuning.settle_m.max(1);
            for _ in 0..samples {
                match estimate_saturation(&*transport, integration_ms, limits.max_counts).await
                {
                    Ok(sat) => sum += sat,
                    Err(e) => {
                        seeker.fail();
                        return Err(e.into());
                    }
                }
            }
            step = seeker.observe(sum / samples as f64);
        }

        let result = AutoExposureResult {
            integration_ms: seeker.integration_ms(),
            averaging: seeker.averaging(),
            outcome: seeker.state(),
            iterations: seeker.iterations(),
            last_saturation: seeker.last_saturation(),
        };

        // Write the selection back as the session defaults; a dark frame
        // captured under the old parameters is no longer valid in strict mode.
        inner.integration_ms = result.integration_ms;
        inner.averaging = result.averaging;
        if inner
            .dark
            .as_ref()
            .is_some_and(|d| !d.matches(result.integration_ms, result.averaging))
        {
            inner.dark = None;
        }

        info!(
            index,
            outcome = ?result.outcome,
            integration_ms = result.integration_ms,
            averaging = result.averaging,
            iterations = result.iterations,
            saturation = result.last_saturation,
            "auto-exposure finished"
        );
        Ok(result)
    }

    /// Converge against the standard reference profile instead of a live
    /// sample target.
    ///
    /// Same algorithm; the target saturation comes from the session's
    /// calibration (`CalibrationFactors::standard_target`).
    pub async fn auto_integrate_for_standard(
        &self,
        index: u32,
        bounds: AutoBounds,
    ) -> SpectroResult<AutoExposureResult> {
        let target = {
            let session = self.registry.session(index).await?;
            let inner = session.lock_active().await?;
            inner.calibration.standard_target
        };
        self.auto_integrate(index, target, bounds).await
    }
}
