//! The single-threaded I/O reactor under which `chain`, `mempool`, and
//! `pool` cooperate (§4.5): `node` spawns each peer connection, the RPC
//! server, and periodic maintenance as tasks on one [`Reactor`], and every
//! callback into the component services ends up running there.
//!
//! A thin wrapper around a single-threaded `tokio::runtime::Runtime` plus a
//! `LocalSet`, with `addHandle`/`addTimer`/`defer` expressed as
//! `spawn_local` tasks, and a generation counter implementing ยง5's
//! cancellation model: in-flight worker results are discarded after
//! `stop()` without needing every task to observe a shutdown flag itself.

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    runtime::Builder,
    sync::Notify,
    task::{JoinHandle, LocalSet},
};

/// A handle to a task registered with [`add_handle`] or [`add_timer`],
/// returned so the caller can later cancel it.
///
/// Mirrors §4.5's opaque timer/handle ids; unlike the C original this one
/// carries the actual `JoinHandle` rather than an index into a table, since
/// Tokio already gives us that for free.
pub struct Handle(JoinHandle<()>);

/// A stamped snapshot of the reactor's generation counter (§5
/// "Cancellation"): a worker task captures the generation current when it
/// was dispatched, and checks it again when its result is ready. If `stop()`
/// bumped the counter in between, the result is stale and must be dropped
/// rather than applied to `Chain`/`Mempool`/`Pool` state.
#[derive(Clone)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    /// Returns whether `tag` (captured from an earlier [`ReactorHandle::generation`])
    /// is still the reactor's current generation.
    pub fn is_current(&self, tag: u64) -> bool {
        self.0.load(Ordering::Acquire) == tag
    }
}

/// A `Send + Sync` handle to a running [`Reactor`]'s shutdown and generation
/// state, cheap to clone and hand to every component that might need to
/// request a stop (the `rpc` crate's `stop` method chief among them) without
/// handing out the reactor itself, which owns a non-`Send` `LocalSet`.
#[derive(Clone)]
pub struct ReactorHandle {
    generation: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ReactorHandle {
    /// Returns the reactor's current generation tag, for pairing with
    /// [`ReactorHandle::spawn_worker`]'s result.
    pub fn generation(&self) -> Generation {
        Generation(self.generation.clone())
    }

    /// True once [`ReactorHandle::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Requests the reactor stop: sets the flag, bumps the generation so any
    /// in-flight worker result is discarded on arrival, and wakes
    /// [`Reactor::start`] so it can return. Safe to call from any task
    /// running on the reactor, any number of times.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Offloads `task` to Tokio's blocking thread pool (§5's "worker pool"),
    /// tagging it with the reactor's current generation. The returned
    /// future resolves to `None` rather than the computed value if `stop()`
    /// ran before the task finished, so a script-verification result that
    /// arrives after shutdown is silently discarded instead of being
    /// applied to state that's already torn down.
    pub fn spawn_worker<F, T>(&self, task: F) -> Pin<Box<dyn Future<Output = Option<T>> + Send>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let tag = self.generation.load(Ordering::Acquire);
        let generation = self.generation.clone();
        Box::pin(async move {
            let result = tokio::task::spawn_blocking(task).await.ok()?;
            if generation.load(Ordering::Acquire) == tag {
                Some(result)
            } else {
                None
            }
        })
    }
}

/// The single-threaded reactor: one current-thread Tokio runtime driving a
/// [`LocalSet`], so every task it runs executes on the same OS thread (§5
/// "Scheduling model" — "one cooperative loop thread owns all network,
/// chain, and mempool mutation").
pub struct Reactor {
    runtime: tokio::runtime::Runtime,
    local: LocalSet,
    handle: ReactorHandle,
}

impl Reactor {
    /// Builds a new, not-yet-running reactor.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Reactor {
            runtime,
            local: LocalSet::new(),
            handle: ReactorHandle {
                generation: Arc::new(AtomicU64::new(0)),
                stopped: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            },
        })
    }

    /// Returns a cloneable, `Send` handle for requesting shutdown or
    /// checking the generation counter from elsewhere in the node.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// The only blocking call in the node (§5 "Suspension points"): spawns
    /// `setup` (which should register its own handles/timers via
    /// [`add_handle`]/[`add_timer`]/[`defer`]) and blocks until
    /// [`ReactorHandle::stop`] is called.
    pub fn start<F>(self, setup: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let notify = self.handle.notify.clone();
        self.local.spawn_local(setup);
        self.runtime.block_on(self.local.run_until(async move {
            notify.notified().await;
        }));
    }
}

/// Registers a long-running task (a peer connection's read/write loop, the
/// RPC HTTP server) with the reactor, returning a [`Handle`] that
/// [`remove_handle`] can later cancel.
///
/// Must be called from within [`Reactor::start`]'s `setup` future or a task
/// it spawned; like `tokio::task::spawn_local`, it panics otherwise.
pub fn add_handle<F>(task: F) -> Handle
where
    F: Future<Output = ()> + 'static,
{
    Handle(tokio::task::spawn_local(task))
}

/// Cancels a task registered with [`add_handle`]. The task is aborted at
/// its next await point; it does not run to completion.
pub fn remove_handle(handle: Handle) {
    handle.0.abort();
}

/// Registers a periodic (or one-shot) timer, firing `callback` every
/// `period` if `repeat` is set, or once after `period` otherwise.
///
/// Matches §4.5's `addTimer(ms, repeat, cb)`; realized as a `spawn_local`
/// task looping on a `tokio::time::interval` rather than a callback queued
/// into a hand-rolled readiness loop.
pub fn add_timer<F>(period: Duration, repeat: bool, mut callback: F) -> Handle
where
    F: FnMut() + 'static,
{
    Handle(tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(period);
        // `interval`'s first tick fires immediately; skip it so the timer's
        // first callback happens after `period`, not at registration time.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            callback();
            if !repeat {
                return;
            }
        }
    }))
}

/// Cancels a timer registered with [`add_timer`].
pub fn cancel_timer(handle: Handle) {
    handle.0.abort();
}

/// Queues `callback` to run on the reactor thread before its next I/O poll
/// (§4.5's `defer`), realized as a `spawn_local` task: Tokio drains locally
/// spawned tasks before parking on the next `poll`, so a deferred callback
/// always runs ahead of whatever I/O the loop would otherwise wait on next.
pub fn defer<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    tokio::task::spawn_local(async move { callback() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn stop_wakes_start() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        reactor.start(async move {
            defer(move || handle.stop());
        });
    }

    #[test]
    fn defer_runs_before_shutdown() {
        let reactor = Reactor::new().unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran_clone = ran.clone();
        let handle = reactor.handle();
        reactor.start(async move {
            defer(move || {
                *ran_clone.borrow_mut() = true;
                handle.stop();
            });
        });
        assert!(*ran.borrow());
    }

    #[test]
    fn stale_worker_result_is_discarded_after_stop() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let saw_result = Rc::new(RefCell::new(None));
        let saw_result_clone = saw_result.clone();

        reactor.start(async move {
            let worker_handle = handle.clone();
            let fut = worker_handle.spawn_worker(|| 42);
            handle.stop();
            let result = fut.await;
            *saw_result_clone.borrow_mut() = Some(result);
        });

        assert_eq!(*saw_result.borrow(), Some(None));
    }
}
