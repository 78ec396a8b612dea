// src/tick_param.rs
//
// Time-varying rate signal (tempo or clock frequency) with scheduled
// automation, integrated to a tick count.

use crate::error::{TimingResult, check_positive, check_time};
use crate::timeline::{Timed, Timeline};

/// How an automation point is approached from the previous point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ramp {
    /// Jump to the value at the point's time.
    #[default]
    Step,

    /// Interpolate linearly from the previous point.
    Linear,

    /// Interpolate exponentially from the previous point.
    Exponential,
}

/// One scheduled value of a [`TickParam`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationPoint {
    pub time: f64,
    pub value: f64,
    pub ramp: Ramp,

    /// Ticks elapsed between time 0 and `time`.
    ticks: f64,
}

impl AutomationPoint {
    #[inline]
    pub fn ticks(&self) -> f64 {
        self.ticks
    }
}

impl Timed for AutomationPoint {
    #[inline]
    fn time(&self) -> f64 {
        self.time
    }
}

/// A rate parameter whose integral over time is a tick count.
///
/// Values are stored in the parameter's own unit (BPM for a transport,
/// Hz for a bare clock); `multiplier` converts one unit to ticks/second.
/// A transport with PPQ 192 uses a multiplier of `192 / 60`.
///
/// All values must be positive, which keeps the tick integral strictly
/// increasing and therefore invertible.
#[derive(Debug, Clone)]
pub struct TickParam {
    points: Timeline<AutomationPoint>,
    initial: f64,
    multiplier: f64,
}

impl TickParam {
    pub fn new(initial: f64, multiplier: f64) -> TimingResult<Self> {
        Ok(Self {
            points: Timeline::new(),
            initial: check_positive("value", initial)?,
            multiplier: check_positive("multiplier", multiplier)?,
        })
    }

    #[inline]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Value in effect before any automation.
    #[inline]
    pub fn initial_value(&self) -> f64 {
        self.initial
    }

    /// Scheduled automation points in time order.
    pub fn points(&self) -> std::slice::Iter<'_, AutomationPoint> {
        self.points.iter()
    }

    // -------------------------------
    // MARK: Automation
    // -------------------------------

    /// Jump to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> TimingResult<()> {
        self.insert(value, time, Ramp::Step)
    }

    /// Ramp linearly from the previous point to `value`, arriving at `end_time`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, end_time: f64) -> TimingResult<()> {
        self.insert(value, end_time, Ramp::Linear)
    }

    /// Ramp exponentially from the previous point to `value`, arriving at `end_time`.
    pub fn exponential_ramp_to_value_at_time(
        &mut self,
        value: f64,
        end_time: f64,
    ) -> TimingResult<()> {
        self.insert(value, end_time, Ramp::Exponential)
    }

    /// Ramp linearly from the value at `start_time` to `value` over `ramp_time`.
    ///
    /// Automation after `start_time` is replaced.
    pub fn linear_ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> TimingResult<()> {
        self.ramp_from(value, ramp_time, start_time, Ramp::Linear)
    }

    /// Ramp exponentially from the value at `start_time` to `value` over `ramp_time`.
    pub fn exponential_ramp_to(
        &mut self,
        value: f64,
        ramp_time: f64,
        start_time: f64,
    ) -> TimingResult<()> {
        self.ramp_from(value, ramp_time, start_time, Ramp::Exponential)
    }

    /// Ramp to `value` over `ramp_time` starting at `start_time`.
    ///
    /// Tempo ramps are linear in BPM; use [`TickParam::exponential_ramp_to`]
    /// for a constant-ratio curve.
    pub fn ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> TimingResult<()> {
        self.linear_ramp_to(value, ramp_time, start_time)
    }

    /// Remove every automation point at or after `after`.
    pub fn cancel_scheduled_values(&mut self, after: f64) -> TimingResult<()> {
        check_time(after)?;
        self.points.cancel(after);
        Ok(())
    }

    /// Remove automation after `time` but hold the value reached at `time`.
    ///
    /// A ramp in progress at `time` is cut short and keeps its curve.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> TimingResult<()> {
        check_time(time)?;
        let value = self.value_at(time);
        let ramp = self
            .points
            .get_after(time)
            .map_or(Ramp::Step, |next| next.ramp);

        self.points.cancel(time);
        self.insert(value, time, ramp)
    }

    fn ramp_from(
        &mut self,
        value: f64,
        ramp_time: f64,
        start_time: f64,
        ramp: Ramp,
    ) -> TimingResult<()> {
        check_time(start_time)?;
        check_positive("ramp time", ramp_time)?;
        check_positive("value", value)?;

        self.cancel_and_hold_at_time(start_time)?;
        self.insert(value, start_time + ramp_time, ramp)
    }

    fn insert(&mut self, value: f64, time: f64, ramp: Ramp) -> TimingResult<()> {
        check_positive("value", value)?;
        check_time(time)?;

        let index = self.points.add(AutomationPoint {
            time,
            value,
            ramp,
            ticks: 0.0,
        });
        self.recompute_ticks_from(index);
        Ok(())
    }

    /// Refresh the cached tick integral of every point from `index` on.
    fn recompute_ticks_from(&mut self, index: usize) {
        let origin = self.origin();
        let multiplier = self.multiplier;
        let points = self.points.as_mut_slice();

        for i in index..points.len() {
            let previous = if i == 0 { origin } else { points[i - 1] };
            let current = points[i];
            points[i].ticks =
                previous.ticks + integrate(multiplier, &previous, Some(&current), current.time);
        }
    }

    // -------------------------------
    // MARK: Queries
    // -------------------------------

    /// Implicit point holding the initial value from time 0.
    #[inline]
    fn origin(&self) -> AutomationPoint {
        AutomationPoint {
            time: 0.0,
            value: self.initial,
            ramp: Ramp::Step,
            ticks: 0.0,
        }
    }

    /// The point governing `time` and the point after it, if any.
    fn segment_at(&self, time: f64) -> (AutomationPoint, Option<AutomationPoint>) {
        let points = self.points.as_slice();
        let index = points.partition_point(|p| p.time <= time);
        let before = match index {
            0 => self.origin(),
            i => points[i - 1],
        };
        (before, points.get(index).copied())
    }

    /// Instantaneous value at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        let (a, next) = self.segment_at(time);
        match next {
            Some(b) if b.time > a.time => {
                let progress = ((time - a.time) / (b.time - a.time)).clamp(0.0, 1.0);
                match b.ramp {
                    Ramp::Step => a.value,
                    Ramp::Linear => a.value + (b.value - a.value) * progress,
                    Ramp::Exponential => a.value * (b.value / a.value).powf(progress),
                }
            }
            _ => a.value,
        }
    }

    /// Ticks elapsed between time 0 and `time`.
    pub fn ticks_at(&self, time: f64) -> f64 {
        let (a, next) = self.segment_at(time);
        a.ticks + integrate(self.multiplier, &a, next.as_ref(), time)
    }

    /// The time at which the tick integral reaches `ticks`.
    ///
    /// Exact inverse of [`TickParam::ticks_at`].
    pub fn time_of_tick(&self, ticks: f64) -> f64 {
        let points = self.points.as_slice();
        let index = points.partition_point(|p| p.ticks <= ticks);
        let a = match index {
            0 => self.origin(),
            i => points[i - 1],
        };
        let next = points.get(index);
        a.time + solve(self.multiplier, &a, next, ticks - a.ticks)
    }

    /// Seconds needed to advance `ticks` ticks starting at `time`.
    pub fn duration_of_ticks(&self, ticks: f64, time: f64) -> f64 {
        self.time_of_tick(self.ticks_at(time) + ticks) - time
    }

    /// Ticks elapsed during `duration` seconds starting at `time`.
    pub fn ticks_in_duration(&self, duration: f64, time: f64) -> f64 {
        self.ticks_at(time + duration) - self.ticks_at(time)
    }
}

/// Ticks accumulated between `a.time` and `t` on the segment `a -> next`.
fn integrate(multiplier: f64, a: &AutomationPoint, next: Option<&AutomationPoint>, t: f64) -> f64 {
    let dt = t - a.time;
    if dt <= 0.0 {
        return a.value * multiplier * dt;
    }

    match next {
        Some(b) if b.time > a.time => {
            let span = b.time - a.time;
            match b.ramp {
                Ramp::Step => a.value * multiplier * dt,
                Ramp::Linear => {
                    let slope = (b.value - a.value) / span;
                    (a.value * dt + 0.5 * slope * dt * dt) * multiplier
                }
                Ramp::Exponential => {
                    let ratio = b.value / a.value;
                    if (ratio - 1.0).abs() < 1e-12 {
                        a.value * multiplier * dt
                    } else {
                        let ln_ratio = ratio.ln();
                        a.value * span / ln_ratio * (ratio.powf(dt / span) - 1.0) * multiplier
                    }
                }
            }
        }
        _ => a.value * multiplier * dt,
    }
}

/// Seconds after `a.time` at which `delta` ticks have accumulated.
fn solve(multiplier: f64, a: &AutomationPoint, next: Option<&AutomationPoint>, delta: f64) -> f64 {
    let rate = a.value * multiplier;
    if delta <= 0.0 {
        return delta / rate;
    }

    match next {
        Some(b) if b.time > a.time => {
            let span = b.time - a.time;
            match b.ramp {
                Ramp::Step => delta / rate,
                Ramp::Linear => {
                    let slope = (b.value - a.value) * multiplier / span;
                    if slope.abs() < 1e-12 {
                        delta / rate
                    } else {
                        let root = (rate * rate + 2.0 * slope * delta).max(0.0).sqrt();
                        2.0 * delta / (rate + root)
                    }
                }
                Ramp::Exponential => {
                    let ratio = b.value / a.value;
                    if (ratio - 1.0).abs() < 1e-12 {
                        delta / rate
                    } else {
                        let ln_ratio = ratio.ln();
                        span * (1.0 + delta * ln_ratio / (rate * span)).ln() / ln_ratio
                    }
                }
            }
        }
        _ => delta / rate,
    }
}
