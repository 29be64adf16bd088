//! Tick clock task.
//!
//! The clock task owns the `World`. Everything else talks to it through a
//! cloneable `WorldHandle`, so top-level commands from any number of sessions
//! are serialized: each runs to completion before the next is received.
//!
//! While the clock runs, the task wakes every `clock_interval_ms`, ticks the
//! world, and keeps ticking immediately while the tick left deferred reactions
//! behind (up to `max_pending_drain` extra ticks per wake). The rate and the
//! running flag live on the world, so `@clock` changes them at runtime.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

use log::{debug, info, warn};

use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::reaction::{SchedulerStats, TickOutcome};
use crate::world::types::ThingId;

#[derive(Debug, Clone)]
pub struct ClockConfig {
    pub enabled: bool,
    /// Extra ticks run back to back while reactions stay pending.
    pub max_pending_drain: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending_drain: 16,
        }
    }
}

type WorldJob = Box<dyn FnOnce(&mut World) + Send>;

pub enum WorldCommand {
    /// A line typed by `actor`.
    Execute {
        actor: ThingId,
        line: String,
        reply: oneshot::Sender<Result<(), WorldError>>,
    },
    /// Arbitrary access to the world on the clock task.
    Run(WorldJob),
    /// Stop the task and hand the world back.
    Shutdown(oneshot::Sender<World>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockStats {
    pub running: bool,
    pub interval_ms: u64,
    pub tick: u64,
    /// World version; changes whenever an update ran.
    pub version: u64,
    pub pending: usize,
    pub scheduler: SchedulerStats,
}

#[derive(Clone, Debug)]
pub struct WorldHandle {
    tx: mpsc::UnboundedSender<WorldCommand>,
}

impl WorldHandle {
    /// Run `line` for `actor` and wait for it to finish.
    pub async fn command(&self, actor: ThingId, line: &str) -> Result<(), WorldError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorldCommand::Execute {
                actor,
                line: line.to_string(),
                reply,
            })
            .map_err(|_| WorldError::ClockStopped)?;
        rx.await.map_err(|_| WorldError::ClockStopped)?
    }

    /// Run `f` against the world on the clock task and return its result.
    pub async fn with<T, F>(&self, f: F) -> Result<T, WorldError>
    where
        T: Send + 'static,
        F: FnOnce(&mut World) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: WorldJob = Box::new(move |world: &mut World| {
            let _ = reply.send(f(world));
        });
        self.tx
            .send(WorldCommand::Run(job))
            .map_err(|_| WorldError::ClockStopped)?;
        rx.await.map_err(|_| WorldError::ClockStopped)
    }

    pub async fn start(&self) -> Result<(), WorldError> {
        self.with(|w| w.set_clock_running(true)).await
    }

    pub async fn stop(&self) -> Result<(), WorldError> {
        self.with(|w| w.set_clock_running(false)).await
    }

    pub async fn set_interval(&self, ms: u64) -> Result<(), WorldError> {
        self.with(move |w| {
            w.set_clock_interval_ms(ms);
            w.flush().map(|_| ())
        })
        .await?
    }

    /// Tick once now, regardless of the clock state.
    pub async fn tick(&self) -> Result<TickOutcome, WorldError> {
        self.with(|w| w.tick()).await?
    }

    pub async fn stats(&self) -> Result<ClockStats, WorldError> {
        self.with(|w| w.clock_stats()).await
    }

    /// Stop the clock task, flushing the world, and take the world back.
    pub async fn shutdown(&self) -> Result<World, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorldCommand::Shutdown(reply))
            .map_err(|_| WorldError::ClockStopped)?;
        rx.await.map_err(|_| WorldError::ClockStopped)
    }
}

impl World {
    pub fn clock_stats(&self) -> ClockStats {
        ClockStats {
            running: self.clock_running(),
            interval_ms: self.clock_interval_ms(),
            tick: self.scheduler().current_tick(),
            version: self.version(),
            pending: self.scheduler().pending_count(),
            scheduler: self.scheduler().stats(),
        }
    }
}

fn interval_of(world: &World) -> Duration {
    Duration::from_millis(world.clock_interval_ms().max(1))
}

/// Tick, then keep ticking while reactions are left pending.
fn run_ticks(world: &mut World, max_pending_drain: usize) {
    for round in 0..=max_pending_drain {
        match world.tick() {
            Ok(outcome) if outcome.pending == 0 => return,
            Ok(outcome) => debug!(
                "tick {} left {} pending reaction(s) (drain round {})",
                outcome.tick, outcome.pending, round
            ),
            Err(e) => {
                warn!("tick failed: {}", e);
                return;
            }
        }
    }
    debug!("pending reactions remain after {} drain rounds", max_pending_drain);
}

/// Move `world` onto a new clock task.
pub fn start_clock(mut world: World, cfg: ClockConfig) -> WorldHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorldCommand>();
    let handle = WorldHandle { tx };

    tokio::spawn(async move {
        world.set_clock_running(cfg.enabled);
        info!(
            "clock for '{}' {} at {} ms",
            world.name(),
            if cfg.enabled { "started" } else { "stopped" },
            world.clock_interval_ms()
        );
        let mut interval_ms = world.clock_interval_ms();
        let mut next_tick = Instant::now() + interval_of(&world);
        let mut commands: u64 = 0;
        let mut shutdown = None;

        loop {
            let running = world.clock_running();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(WorldCommand::Execute { actor, line, reply }) => {
                        commands += 1;
                        let _ = reply.send(world.command(actor, &line));
                    }
                    Some(WorldCommand::Run(job)) => job(&mut world),
                    Some(WorldCommand::Shutdown(reply)) => {
                        shutdown = Some(reply);
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(next_tick), if running => {
                    run_ticks(&mut world, cfg.max_pending_drain);
                    next_tick = Instant::now() + interval_of(&world);
                }
            }
            if world.clock_interval_ms() != interval_ms {
                interval_ms = world.clock_interval_ms();
                next_tick = Instant::now() + interval_of(&world);
                debug!("clock rate now {} ms", interval_ms);
            }
            if !running && world.clock_running() {
                next_tick = Instant::now() + interval_of(&world);
            }
        }

        if let Err(e) = world.flush() {
            warn!("final flush failed: {}", e);
        }
        info!(
            "clock for '{}' stopped after {} ticks and {} commands",
            world.name(),
            world.scheduler().current_tick(),
            commands
        );
        if let Some(reply) = shutdown {
            let _ = reply.send(world);
        }
    });

    handle
}
