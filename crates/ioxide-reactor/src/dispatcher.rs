use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{ReactorError, Result};
use crate::handle::Registry;
use crate::reason::{Interest, Reason};
use crate::sys::{self, PollFd};
use crate::watch::{Callback, Watch, WatchId, WatchKind, WatchState};

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Convert a script-supplied number of seconds into a duration.
///
/// Negative, NaN and infinite values are argument errors.
pub fn duration_from_secs(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ReactorError::InvalidArgument(format!("invalid interval {seconds}")))
}

struct State {
    watches: Registry<Watch>,
    next_sequence: u64,
    idle_clock: u64,
    destroyed: bool,
}

struct Core {
    serial: u32,
    state: RefCell<State>,
    monitoring: Cell<bool>,
}

impl Drop for Core {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.destroyed && !state.watches.is_empty() {
            warn!(
                target: "iox",
                "Dispatcher {} dropped with {} watch(es) still registered",
                self.serial,
                state.watches.len()
            );
        }
    }
}

/// Resets the re-entry flag however `monitor` exits
struct MonitorGuard<'a>(&'a Cell<bool>);

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// What one loop iteration waits on
struct WaitPlan {
    io: Vec<(WatchId, PollFd)>,
    timeout: Option<Duration>,
}

/// Single-threaded I/O event dispatcher.
///
/// Cloning is cheap and yields another handle to the same dispatcher. Every
/// method takes `&self` and never holds internal borrows while a callback
/// runs, so callbacks are free to register and cancel watches (including
/// their own) on the dispatcher that invoked them.
///
/// Callbacks receive the dispatcher as an argument; capturing a clone inside a
/// callback creates a reference cycle that only [`Dispatcher::destroy`] breaks.
#[derive(Clone)]
pub struct Dispatcher {
    core: Rc<Core>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        debug!(target: "iox", "Created dispatcher {}", serial);
        Self {
            core: Rc::new(Core {
                serial,
                state: RefCell::new(State {
                    watches: Registry::new(),
                    next_sequence: 0,
                    idle_clock: 0,
                    destroyed: false,
                }),
                monitoring: Cell::new(false),
            }),
        }
    }

    /// Process-unique serial number, also carried by every [`WatchId`] it issues
    pub fn serial(&self) -> u32 {
        self.core.serial
    }

    /// True if both handles refer to the same dispatcher
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Register a single-shot timer that fires once after `delay`.
    ///
    /// After the `Fire` callback returns, the watch cancels itself and the
    /// callback is invoked one last time with `Cancel`.
    pub fn after<F>(&self, delay: Duration, callback: F) -> Result<WatchId>
    where
        F: Fn(&Dispatcher, WatchId, Reason) -> anyhow::Result<()> + 'static,
    {
        let fire_at = Instant::now() + delay;
        self.register(WatchKind::OneShot { fire_at }, Rc::new(callback))
    }

    /// Register a periodic timer: first after `delay`, then every `interval`
    pub fn every<F>(&self, delay: Duration, interval: Duration, callback: F) -> Result<WatchId>
    where
        F: Fn(&Dispatcher, WatchId, Reason) -> anyhow::Result<()> + 'static,
    {
        if interval.is_zero() {
            return Err(ReactorError::InvalidArgument(
                "periodic interval must be greater than zero".to_string(),
            ));
        }
        let next_fire = Instant::now() + delay;
        self.register(WatchKind::Periodic { next_fire, interval }, Rc::new(callback))
    }

    /// Register an I/O source
    pub fn on_io<F>(&self, fd: RawFd, interest: Interest, callback: F) -> Result<WatchId>
    where
        F: Fn(&Dispatcher, WatchId, Reason) -> anyhow::Result<()> + 'static,
    {
        if fd < 0 {
            return Err(ReactorError::InvalidArgument(format!(
                "invalid file descriptor {fd}"
            )));
        }
        if interest.is_empty() || !Interest::IO.contains(interest) {
            return Err(ReactorError::InvalidArgument(format!(
                "invalid I/O interest mask {:#x}",
                interest.bits()
            )));
        }
        self.register(WatchKind::Io { fd, interest }, Rc::new(callback))
    }

    /// Register an idle task, run whenever an iteration has nothing else to fire
    pub fn when_idle<F>(&self, callback: F) -> Result<WatchId>
    where
        F: Fn(&Dispatcher, WatchId, Reason) -> anyhow::Result<()> + 'static,
    {
        self.register(WatchKind::Idle { last_run: 0 }, Rc::new(callback))
    }

    fn register(&self, kind: WatchKind, callback: Callback) -> Result<WatchId> {
        let mut state = self.core.state.borrow_mut();
        if state.destroyed {
            return Err(ReactorError::Destroyed);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let label = kind.label();
        let raw = state.watches.insert(Watch {
            kind,
            state: WatchState::Registered,
            sequence,
            callback,
        });
        let id = WatchId {
            owner: self.core.serial,
            raw,
        };

        debug!(target: "iox", "Registered {} watch {}", label, id);
        Ok(id)
    }

    /// Cancel a watch.
    ///
    /// The watch is removed first and its callback then receives `Cancel`
    /// before this returns, so it can never fire again. Canceling a watch that
    /// is not registered is an error.
    pub fn cancel(&self, id: WatchId) -> Result<()> {
        let watch = {
            let mut state = self.core.state.borrow_mut();
            if id.owner != self.core.serial {
                return Err(ReactorError::InvalidWatch(id));
            }
            let mut watch = state
                .watches
                .remove(id.raw)
                .ok_or(ReactorError::InvalidWatch(id))?;
            watch.state = watch.state.cancel();
            watch
        };

        debug!(target: "iox", "Canceling {} watch {}", watch.kind.label(), id);
        (watch.callback)(self, id, Reason::Cancel)
            .map_err(|source| ReactorError::CancelFailed { watch: id, source })
    }

    /// True if `id` is a live watch of this dispatcher
    pub fn contains(&self, id: WatchId) -> bool {
        id.owner == self.core.serial && self.core.state.borrow().watches.contains(id.raw)
    }

    /// Lifecycle state of a live watch
    pub fn watch_state(&self, id: WatchId) -> Option<WatchState> {
        if id.owner != self.core.serial {
            return None;
        }
        self.core
            .state
            .borrow()
            .watches
            .get(id.raw)
            .map(|watch| watch.state)
    }

    pub fn watch_count(&self) -> usize {
        self.core.state.borrow().watches.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.state.borrow().destroyed
    }

    /// Wait for and dispatch events.
    ///
    /// With `None` this loops until an error occurs, typically
    /// [`ReactorError::Exhausted`] once no watches remain. With a timeout it
    /// returns `Ok(())` after that much time has passed.
    pub fn monitor(&self, timeout: Option<Duration>) -> Result<()> {
        if self.core.monitoring.replace(true) {
            return Err(ReactorError::Reentrant);
        }
        let _guard = MonitorGuard(&self.core.monitoring);

        {
            let state = self.core.state.borrow();
            if state.destroyed {
                return Err(ReactorError::Destroyed);
            }
            if state.watches.is_empty() {
                return Err(ReactorError::Exhausted);
            }
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        trace!(target: "iox", "Monitoring dispatcher {} for {:?}", self.core.serial, timeout);

        loop {
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Ok(());
            }

            let mut plan = self.plan(now, deadline)?;
            let mut fds: Vec<PollFd> = plan.io.iter().map(|(_, fd)| *fd).collect();
            sys::poll(&mut fds, plan.timeout)?;
            for ((_, entry), polled) in plan.io.iter_mut().zip(fds) {
                *entry = polled;
            }

            let mut fired = self.fire_timers(Instant::now());
            fired += self.fire_io(&plan.io);
            if fired == 0 {
                self.fire_idle();
            }
        }
    }

    fn plan(&self, now: Instant, deadline: Option<Instant>) -> Result<WaitPlan> {
        let state = self.core.state.borrow();
        if state.destroyed {
            return Err(ReactorError::Destroyed);
        }

        let mut io = Vec::new();
        let mut earliest: Option<Instant> = None;
        let mut has_idle = false;
        for (raw, watch) in state.watches.iter() {
            let id = WatchId {
                owner: self.core.serial,
                raw,
            };
            match &watch.kind {
                WatchKind::Io { fd, interest } => io.push((id, PollFd::new(*fd, *interest))),
                WatchKind::Idle { .. } => has_idle = true,
                kind => {
                    if let Some(at) = kind.deadline() {
                        earliest = Some(earliest.map_or(at, |current| current.min(at)));
                    }
                }
            }
        }

        if io.is_empty() && earliest.is_none() && !has_idle && deadline.is_none() {
            return Err(ReactorError::Exhausted);
        }

        let mut timeout = deadline.map(|deadline| deadline.saturating_duration_since(now));
        if let Some(at) = earliest {
            let until = at.saturating_duration_since(now);
            timeout = Some(timeout.map_or(until, |current| current.min(until)));
        }
        if has_idle {
            timeout = Some(Duration::ZERO);
        }

        Ok(WaitPlan { io, timeout })
    }

    /// Fire every due timer, earliest deadline first, ties in registration order
    fn fire_timers(&self, now: Instant) -> usize {
        let mut due: Vec<(Instant, u64, WatchId)> = {
            let state = self.core.state.borrow();
            state
                .watches
                .iter()
                .filter_map(|(raw, watch)| {
                    watch.kind.deadline().filter(|at| *at <= now).map(|at| {
                        (
                            at,
                            watch.sequence,
                            WatchId {
                                owner: self.core.serial,
                                raw,
                            },
                        )
                    })
                })
                .collect()
        };
        due.sort();

        let mut fired = 0;
        for (_, _, id) in due {
            if self.fire(id, Reason::Fire, now) {
                fired += 1;
            }
        }
        fired
    }

    fn fire_io(&self, io: &[(WatchId, PollFd)]) -> usize {
        let now = Instant::now();
        let mut fired = 0;
        for (id, entry) in io {
            for reason in [Reason::Read, Reason::Write, Reason::Except] {
                let ready = reason
                    .interest()
                    .is_some_and(|interest| entry.ready.contains(interest));
                if ready && self.fire(*id, reason, now) {
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Run the least-recently-run idle task, if any
    fn fire_idle(&self) {
        let next = {
            let state = self.core.state.borrow();
            state
                .watches
                .iter()
                .filter_map(|(raw, watch)| match watch.kind {
                    WatchKind::Idle { last_run } => Some((last_run, watch.sequence, raw)),
                    _ => None,
                })
                .min()
        };

        if let Some((_, _, raw)) = next {
            let id = WatchId {
                owner: self.core.serial,
                raw,
            };
            self.fire(id, Reason::Idle, Instant::now());
        }
    }

    /// Invoke one watch's callback. Returns false if the watch was not live.
    fn fire(&self, id: WatchId, reason: Reason, now: Instant) -> bool {
        let callback = {
            let mut state = self.core.state.borrow_mut();
            state.idle_clock += 1;
            let clock = state.idle_clock;

            let Some(watch) = state.watches.get_mut(id.raw) else {
                return false;
            };
            let Some(firing) = watch.state.fire() else {
                return false;
            };
            watch.state = firing;

            match &mut watch.kind {
                WatchKind::Periodic {
                    next_fire,
                    interval,
                } => {
                    *next_fire += *interval;
                    if *next_fire <= now {
                        // Skip missed periods instead of firing a burst
                        let behind = now.duration_since(*next_fire).as_secs_f64();
                        let missed = (behind / interval.as_secs_f64()).floor() as u32 + 1;
                        *next_fire += *interval * missed;
                    }
                }
                WatchKind::Idle { last_run } => *last_run = clock,
                _ => {}
            }

            watch.callback.clone()
        };

        trace!(target: "iox", "Firing watch {} ({})", id, reason);
        if let Err(err) = callback(self, id, reason) {
            debug!(target: "iox", "Watch {} callback failed ({}): {:#}", id, reason, err);
        }

        let expired = {
            let mut state = self.core.state.borrow_mut();
            let finished = match state.watches.get_mut(id.raw) {
                // Canceled from inside its own callback
                None => false,
                Some(watch) => {
                    watch.state = watch.state.settle(watch.kind.is_one_shot());
                    watch.state == WatchState::Canceled
                }
            };
            if finished {
                state.watches.remove(id.raw)
            } else {
                None
            }
        };

        if let Some(watch) = expired {
            debug!(target: "iox", "Single-shot watch {} expired", id);
            if let Err(err) = (watch.callback)(self, id, Reason::Cancel) {
                debug!(target: "iox", "Watch {} cancel callback failed: {:#}", id, err);
            }
        }

        true
    }

    /// Cancel every remaining watch and retire the dispatcher.
    ///
    /// Every watch receives `Cancel` even if an earlier one fails; the first
    /// failure is returned.
    pub fn destroy(&self) -> Result<()> {
        let drained = {
            let mut state = self.core.state.borrow_mut();
            if state.destroyed {
                return Err(ReactorError::Destroyed);
            }
            state.destroyed = true;
            state.watches.drain()
        };

        debug!(
            target: "iox",
            "Destroying dispatcher {} with {} watch(es)",
            self.core.serial,
            drained.len()
        );

        let mut first_error = None;
        for (raw, watch) in drained {
            let id = WatchId {
                owner: self.core.serial,
                raw,
            };
            if let Err(source) = (watch.callback)(self, id, Reason::Cancel) {
                warn!(target: "iox", "Cancel of watch {} failed during destroy: {:#}", id, source);
                if first_error.is_none() {
                    first_error = Some(ReactorError::CancelFailed { watch: id, source });
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("serial", &self.core.serial)
            .field("watches", &self.watch_count())
            .finish()
    }
}
