/// Wave dynamics.
///
/// A memory's retrieval strength is a damped oscillation of its age:
///
/// ```text
/// S(t) = A · cos(2πf·τ + φ) · e^(−λ·τ)
/// ```
///
/// where `τ` is the age measured in wave time units. These functions are pure
/// and the strength is never cached; every caller recomputes it at the time
/// it cares about.
use crate::config::WaveConfig;
use crate::memory::Memory;
use chrono::{DateTime, Utc};
use std::f64::consts::PI;

/// Age of `created_at` at `now` in wave time units, never negative.
pub fn age_units(created_at: DateTime<Utc>, now: DateTime<Utc>, config: &WaveConfig) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0) as f64;
    millis / 1_000.0 / config.time_unit_secs
}

/// Core formula for raw oscillator parameters at age `tau`.
pub fn strength(amplitude: f32, frequency: f32, phase: f32, decay_rate: f32, tau: f64) -> f32 {
    let wave = (2.0 * PI * frequency as f64 * tau + phase as f64).cos();
    (amplitude as f64 * wave * envelope_factor(decay_rate, tau)) as f32
}

/// `e^(−λτ)`, clamped so a negative rate cannot grow the envelope.
fn envelope_factor(decay_rate: f32, tau: f64) -> f64 {
    (-(decay_rate.max(0.0) as f64) * tau).exp()
}

/// Effective retrieval strength of a memory at `now`.
pub fn effective_strength(memory: &Memory, now: DateTime<Utc>, config: &WaveConfig) -> f32 {
    let tau = age_units(memory.created_at, now, config);
    strength(
        memory.amplitude,
        memory.frequency,
        memory.phase,
        memory.decay_rate,
        tau,
    )
}

/// Decay envelope `A · e^(−λτ)`: the oscillation's upper bound, non-increasing in time.
pub fn decay_envelope(memory: &Memory, now: DateTime<Utc>, config: &WaveConfig) -> f32 {
    let tau = age_units(memory.created_at, now, config);
    (memory.amplitude as f64 * envelope_factor(memory.decay_rate, tau)) as f32
}

/// Wrap an angle to `(−π, π]`.
pub fn wrap_phase(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = angle.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

/// Absolute phase difference normalized to `[0, π]`.
pub fn phase_difference(a: f32, b: f32) -> f32 {
    wrap_phase(a - b).abs()
}
