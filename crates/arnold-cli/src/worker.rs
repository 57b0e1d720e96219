//! Session worker: a task that exclusively owns one engine and serves
//! requests from a command channel, writing every reply and pushed event
//! to a single event channel.

use std::time::{Duration, Instant};

use arnold_core::{ArnoldError, DiffusionEngine, MassVector};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{Request, Response};

/// Self-clock driving `advance` while the session is started.
struct Clock {
    interval: Interval,
    last: tokio::time::Instant,
}

async fn next_tick(clock: &mut Option<Clock>) -> f64 {
    match clock {
        Some(clock) => {
            let now = clock.interval.tick().await;
            let dt = now.saturating_duration_since(clock.last);
            clock.last = now;
            dt.as_secs_f64() * 1000.0
        }
        None => std::future::pending().await,
    }
}

/// Run a session until `stop`, cancellation, or the command channel closes.
///
/// `init` builds the engine on a blocking thread; until it returns, every
/// command except `stop` is answered with `notInitialized`.
pub async fn run<F>(
    init: F,
    mut commands: mpsc::Receiver<Request>,
    events: mpsc::Sender<Response>,
    cancel: CancellationToken,
) where
    F: FnOnce() -> arnold_core::Result<DiffusionEngine> + Send + 'static,
{
    let session = Uuid::new_v4();
    let started = Instant::now();
    let mut init = tokio::task::spawn_blocking(init);

    let engine = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                init.abort();
                return;
            }
            result = &mut init => match result {
                Ok(Ok(engine)) => break engine,
                Ok(Err(e)) => {
                    tracing::error!("session {session}: init failed: {e}");
                    let _ = events.send(Response::from(&e)).await;
                    cancel.cancel();
                    return;
                }
                Err(e) => {
                    tracing::error!("session {session}: init task failed: {e}");
                    let _ = events.send(Response::error("internal", e.to_string())).await;
                    cancel.cancel();
                    return;
                }
            },
            cmd = commands.recv() => match cmd {
                None => return,
                Some(Request::Stop) => {
                    let _ = events.send(Response::Ack).await;
                    cancel.cancel();
                    return;
                }
                Some(cmd) => {
                    tracing::warn!("session {session}: {cmd:?} before ready");
                    let reply = Response::from(&ArnoldError::NotInitialized);
                    if events.send(reply).await.is_err() {
                        return;
                    }
                }
            },
        }
    };

    let mut session_state = Session {
        engine,
        clock: None,
        ticks: 0,
        tick_time: Duration::ZERO,
    };
    let ready = match session_state.ready(session, started) {
        Ok(ready) => ready,
        Err(e) => Response::from(&e),
    };
    if events.send(ready).await.is_err() {
        return;
    }

    loop {
        let reply = tokio::select! {
            _ = cancel.cancelled() => break,
            dt_ms = next_tick(&mut session_state.clock) => session_state.tick(dt_ms),
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                tracing::debug!("session {session}: {cmd:?}");
                if cmd == Request::Stop {
                    let _ = events.send(Response::Ack).await;
                    cancel.cancel();
                    break;
                }
                session_state.handle(cmd)
            }
        };
        if let Response::Error { kind, message } = &reply {
            tracing::warn!("session {session}: {kind}: {message}");
        }
        if events.send(reply).await.is_err() {
            break;
        }
    }
    tracing::info!("session {session} stopped");
}

struct Session {
    engine: DiffusionEngine,
    clock: Option<Clock>,
    ticks: u64,
    tick_time: Duration,
}

impl Session {
    fn ready(&self, session: Uuid, started: Instant) -> arnold_core::Result<Response> {
        let description = self.engine.description()?;
        let init_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "session {session} ready: {} points, common period {}, init {init_ms}ms",
            self.engine.len(),
            description.common_period
        );
        Ok(Response::Ready {
            session: session.to_string(),
            lattice: serde_json::to_value(&description)?,
            init_ms,
        })
    }

    fn tick(&mut self, dt_ms: f64) -> Response {
        let started = Instant::now();
        match self.engine.advance(dt_ms) {
            Ok(mass) => {
                let mass = mass.likes().to_vec();
                self.ticks += 1;
                self.tick_time += started.elapsed();
                Response::Mass { mass }
            }
            Err(e) => {
                tracing::error!("tick of {dt_ms}ms failed: {e}");
                Response::from(&e)
            }
        }
    }

    fn handle(&mut self, cmd: Request) -> Response {
        let result = match cmd {
            Request::Tick { dt_ms } => return self.tick(dt_ms),
            Request::Impulse { index, amount } => {
                self.engine.add_impulse(index, amount).map(|_| Response::Ack)
            }
            Request::Strike { time_ms, gain } => {
                self.engine.strike(time_ms, gain).map(|_| Response::Ack)
            }
            Request::StrikeAtPitch {
                time_ms,
                pitch,
                gain,
            } => self
                .engine
                .strike_at_pitch(time_ms, pitch, gain)
                .map(|_| Response::Ack),
            Request::GridImpulse { grid, gain } => {
                self.engine.impulse_at_grid(grid, gain).map(|_| Response::Ack)
            }
            Request::Event { index } => self.engine.event(index).map(|_| Response::Ack),
            Request::PriorMarginals { envelope } => self
                .engine
                .prior_marginals(envelope.as_deref())
                .map(|m| Response::PriorMarginals {
                    pitch: m.pitch.into_vec(),
                    grid: m.grid.into_vec(),
                }),
            Request::CommonPeriod => self
                .engine
                .common_period()
                .map(|period| Response::CommonPeriod { period }),
            Request::Energy { mass } => MassVector::new(mass)
                .and_then(|mass| self.engine.energy(&mass))
                .map(|energy| Response::Energy { energy }),
            Request::Snapshot => self.engine.snapshot().and_then(|snapshot| {
                Ok(Response::Snapshot {
                    snapshot: serde_json::to_value(&snapshot)?,
                })
            }),
            Request::Start { rate_hz } => self.start(rate_hz).map(|_| Response::Ack),
            Request::Pause => {
                self.clock = None;
                self.engine.pause();
                Ok(Response::Ack)
            }
            Request::Resume => {
                self.engine.resume();
                Ok(Response::Ack)
            }
            Request::Profile => Ok(self.profile()),
            // handled by the run loop
            Request::Stop => Ok(Response::Ack),
        };
        result.unwrap_or_else(|e| Response::from(&e))
    }

    fn profile(&self) -> Response {
        let mean_ms = if self.ticks == 0 {
            0.0
        } else {
            self.tick_time.as_secs_f64() * 1000.0 / self.ticks as f64
        };
        Response::Profile {
            ticks: self.ticks,
            mean_ms,
        }
    }

    fn start(&mut self, rate_hz: f64) -> arnold_core::Result<()> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(ArnoldError::Domain(format!(
                "rate must be finite and positive, got {rate_hz}"
            )));
        }
        // the period must fit a Duration and be at least one nanosecond
        let period = Duration::try_from_secs_f64(1.0 / rate_hz)
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                ArnoldError::Domain(format!("rate {rate_hz}Hz has no usable tick period"))
            })?;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.clock = Some(Clock {
            interval,
            last: tokio::time::Instant::now(),
        });
        self.engine.start();
        Ok(())
    }
}
