use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::handle::RawHandle;
use crate::reason::{Interest, Reason};

/// Callback invoked for every reason a watch fires, including its final `Cancel`.
///
/// The returned status is informational: the dispatcher logs failures but never
/// acts on them, except that a failing `Cancel` is reported by `cancel`/`destroy`.
pub type Callback = Rc<dyn Fn(&Dispatcher, WatchId, Reason) -> anyhow::Result<()>>;

/// Handle for a registered watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId {
    pub(crate) owner: u32,
    pub(crate) raw: RawHandle,
}

impl WatchId {
    /// Serial number of the dispatcher that owns this watch
    pub fn owner(&self) -> u32 {
        self.owner
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.raw)
    }
}

/// What a watch waits for
#[derive(Debug, Clone)]
pub enum WatchKind {
    /// Fires once at `fire_at`, then cancels itself
    OneShot { fire_at: Instant },
    /// Fires at `next_fire`, then every `interval`
    Periodic { next_fire: Instant, interval: Duration },
    /// Fires whenever `fd` reports one of the `interest` conditions
    Io { fd: RawFd, interest: Interest },
    /// Fires when nothing else did; `last_run` orders idle tasks fairly
    Idle { last_run: u64 },
}

impl WatchKind {
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WatchKind::OneShot { fire_at } => Some(*fire_at),
            WatchKind::Periodic { next_fire, .. } => Some(*next_fire),
            _ => None,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, WatchKind::OneShot { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            WatchKind::OneShot { .. } => "timer",
            WatchKind::Periodic { .. } => "periodic",
            WatchKind::Io { .. } => "io",
            WatchKind::Idle { .. } => "idle",
        }
    }
}

/// Lifecycle of a watch: `Registered -> Firing -> {Rearmed | Canceled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Registered,
    Firing,
    Rearmed,
    Canceled,
}

impl WatchState {
    /// Enter `Firing`; `None` if the watch cannot fire from this state
    pub fn fire(self) -> Option<WatchState> {
        match self {
            WatchState::Registered | WatchState::Rearmed => Some(WatchState::Firing),
            WatchState::Firing | WatchState::Canceled => None,
        }
    }

    /// Leave `Firing` once the callback has returned
    pub fn settle(self, one_shot: bool) -> WatchState {
        match self {
            WatchState::Firing if one_shot => WatchState::Canceled,
            WatchState::Firing => WatchState::Rearmed,
            other => other,
        }
    }

    pub fn cancel(self) -> WatchState {
        WatchState::Canceled
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, WatchState::Canceled)
    }
}

pub(crate) struct Watch {
    pub kind: WatchKind,
    pub state: WatchState,
    /// Registration order, used to break deadline ties
    pub sequence: u64,
    pub callback: Callback,
}
