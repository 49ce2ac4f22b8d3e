//! Simulation Driver
//!
//! Advances a [`Simulator`] on a fixed cadence.
//!
//! The driver owns its schedule: `start` arms it, `stop` disarms it, and a
//! disarmed driver never ticks no matter how often it is polled. The caller
//! decides when to poll (a tokio timer in production, explicit clock advances
//! in tests).

use std::time::{Duration, Instant};

use lockstep_proto::Frame;

use crate::{
    env::Environment,
    error::HistoryError,
    game::Game,
    simulator::{Retention, Simulator},
};

/// Default tick cadence (about 30 frames per second).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(33);

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Simulation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Time between two ticks.
    pub tick_interval: Duration,
    /// History retention policy.
    pub retention: Retention,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { tick_interval: DEFAULT_TICK_INTERVAL, retention: Retention::Unbounded }
    }
}

/// Fixed-cadence driver owning the history store.
pub struct SimulationDriver<G: Game, E: Environment> {
    simulator: Simulator<G>,
    env: E,
    tick_interval: Duration,
    /// Deadline of the next tick. `None` while stopped.
    next_tick: Option<Instant>,
}

impl<G: Game, E: Environment> SimulationDriver<G, E> {
    /// Create a stopped driver around a fresh simulator.
    pub fn new(game: G, env: E, config: SimulationConfig) -> Self {
        Self::with_simulator(Simulator::new(game, config.retention), env, config.tick_interval)
    }

    /// Create a stopped driver around an existing simulator.
    pub fn with_simulator(simulator: Simulator<G>, env: E, tick_interval: Duration) -> Self {
        Self {
            simulator,
            env,
            tick_interval: tick_interval.max(MIN_TICK_INTERVAL),
            next_tick: None,
        }
    }

    /// Arm the timer. The first tick is due one interval from now.
    pub fn start(&mut self) {
        if self.next_tick.is_none() {
            self.next_tick = Some(self.env.now() + self.tick_interval);
            tracing::info!(
                frame = self.simulator.current_frame(),
                interval_ms = self.tick_interval.as_millis(),
                "simulation started"
            );
        }
    }

    /// Disarm the timer. No tick happens until `start` is called again.
    pub fn stop(&mut self) {
        if self.next_tick.take().is_some() {
            tracing::info!(frame = self.simulator.current_frame(), "simulation stopped");
        }
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Time between two ticks.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Time left until the next tick is due, or `None` while stopped.
    pub fn time_until_next_tick(&self) -> Option<Duration> {
        self.next_tick.map(|deadline| deadline.saturating_duration_since(self.env.now()))
    }

    /// Run every tick whose deadline has passed. Returns the number of ticks.
    pub fn poll(&mut self) -> Result<u64, HistoryError> {
        let Some(mut deadline) = self.next_tick else {
            return Ok(0);
        };

        let now = self.env.now();
        let mut ticks = 0;
        while deadline <= now {
            self.simulator.advance_one_tick()?;
            deadline += self.tick_interval;
            self.next_tick = Some(deadline);
            ticks += 1;
        }

        if ticks > 1 {
            tracing::debug!(ticks, frame = self.simulator.current_frame(), "caught up on ticks");
        }
        Ok(ticks)
    }

    /// Tick until the simulator reaches `target`.
    pub fn fast_forward(&mut self, target: Frame) -> Result<(), HistoryError> {
        self.simulator.fast_forward(target)
    }

    /// The history store.
    pub fn simulator(&self) -> &Simulator<G> {
        &self.simulator
    }

    /// The history store, mutably.
    pub fn simulator_mut(&mut self) -> &mut Simulator<G> {
        &mut self.simulator
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }
}

impl<G: Game, E: Environment> std::fmt::Debug for SimulationDriver<G, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationDriver")
            .field("simulator", &self.simulator)
            .field("tick_interval", &self.tick_interval)
            .field("running", &self.is_running())
            .finish()
    }
}
