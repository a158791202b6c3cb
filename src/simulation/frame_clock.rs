use std::time::Instant;

use crate::{floating_type_mod::FT, simulation_parameters::SimulationParams};

/**
 * Converts wall-clock time between frames into simulation time steps.
 *
 * One frame of `frame_duration_ms` is a time step of `1.0`. A step larger
 * than `max_time_step` (the process was suspended, a breakpoint was hit, ...)
 * is replaced by `fallback_time_step`. The default advances one frame; a
 * fallback of `0.0` drops the step instead, which freezes the particles for
 * that frame.
 */
pub struct FrameClock {
    frame_duration_ms: FT,
    max_time_step: FT,
    fallback_time_step: FT,
    last_tick: Option<Instant>,
}

impl FrameClock {
    pub fn new(params: &SimulationParams) -> Self {
        FrameClock {
            frame_duration_ms: params.frame_duration_ms,
            max_time_step: params.max_time_step,
            fallback_time_step: params.fallback_time_step,
            last_tick: None,
        }
    }

    pub fn time_step_from_elapsed(&self, elapsed_ms: FT) -> FT {
        let dt = FT::max(elapsed_ms, 0.) / self.frame_duration_ms;
        if dt > self.max_time_step || !dt.is_finite() {
            self.fallback_time_step
        } else {
            dt
        }
    }

    /// Time step since the previous call. The first call returns the
    /// fallback step.
    pub fn tick(&mut self) -> FT {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(last) => self.time_step_from_elapsed((now - last).as_secs_f64() as FT * 1000.),
            None => self.fallback_time_step,
        };
        self.last_tick = Some(now);
        dt
    }
}

#[test]
fn one_frame_is_one_time_step() {
    let clock = FrameClock::new(&SimulationParams::default());
    assert_eq!(clock.time_step_from_elapsed(16.), 1.);
    assert_eq!(clock.time_step_from_elapsed(8.), 0.5);
    assert_eq!(clock.time_step_from_elapsed(0.), 0.);
}

#[test]
fn suspended_process_gets_fallback_step() {
    let params = SimulationParams {
        max_time_step: 30.,
        fallback_time_step: 1.,
        ..Default::default()
    };
    let clock = FrameClock::new(&params);
    assert_eq!(clock.time_step_from_elapsed(16. * 30.), 30.);
    assert_eq!(clock.time_step_from_elapsed(16. * 31.), 1.);
    assert_eq!(clock.time_step_from_elapsed(60_000.), 1.);
}

#[test]
fn first_tick_uses_fallback_step() {
    let mut clock = FrameClock::new(&SimulationParams::default());
    assert_eq!(clock.tick(), 1.);
    let dt = clock.tick();
    assert!(dt >= 0. && dt <= 30.);
}

#[test]
fn zero_fallback_drops_the_suspended_step() {
    let params = SimulationParams {
        fallback_time_step: 0.,
        ..Default::default()
    };
    assert_eq!(params.validate(), Ok(()));
    let clock = FrameClock::new(&params);
    assert_eq!(clock.time_step_from_elapsed(16. * 31.), 0.);
    assert_eq!(clock.time_step_from_elapsed(16.), 1.);
}
