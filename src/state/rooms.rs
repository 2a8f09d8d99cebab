use std::{
    future::Future,
    ops::Deref,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, MutexGuard},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    state::round_machine::{Plan, RoundEvent, RoundPhase, RoundStateMachine, Snapshot},
};

/// Proof that the caller holds a room's write gate.
pub struct RoomGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// In-process coordination state for one room.
///
/// The gate serialises read-modify-write cycles against the store so concurrent
/// joins or answers never overwrite each other. Lock order is gate first, then
/// the round machine.
pub struct RoomRuntime {
    room_id: Uuid,
    gate: Mutex<()>,
    rounds: Mutex<RoundStateMachine>,
    clock: StdMutex<Option<JoinHandle<()>>>,
    advance: StdMutex<Option<JoinHandle<()>>>,
    transition_timeout: Option<Duration>,
    retired: AtomicBool,
}

impl RoomRuntime {
    pub fn new(room_id: Uuid, transition_timeout: Option<Duration>) -> Self {
        Self {
            room_id,
            gate: Mutex::new(()),
            rounds: Mutex::new(RoundStateMachine::new()),
            clock: StdMutex::new(None),
            advance: StdMutex::new(None),
            transition_timeout,
            retired: AtomicBool::new(false),
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Acquire the room's write gate.
    pub async fn lock(&self) -> RoomGuard<'_> {
        RoomGuard {
            _guard: self.gate.lock().await,
        }
    }

    pub async fn phase(&self) -> RoundPhase {
        self.rounds.lock().await.phase()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.rounds.lock().await.snapshot()
    }

    /// Plan `event`, run `work` (typically the store writes for the new phase),
    /// then commit the transition. The plan is aborted when `work` fails or
    /// exceeds the transition timeout, leaving the phase unchanged.
    pub async fn run_transition<F, Fut, T>(
        &self,
        _gate: &RoomGuard<'_>,
        event: RoundEvent,
        work: F,
    ) -> Result<(T, RoundPhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let Plan { id: plan_id, .. } = self.rounds.lock().await.plan(event)?;

        let work_future = work();
        let outcome = match self.transition_timeout {
            Some(limit) => match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    self.abort(plan_id, event, "timeout").await;
                    return Err(ServiceError::Timeout);
                }
            },
            None => work_future.await,
        };

        match outcome {
            Ok(value) => {
                let next = self.rounds.lock().await.apply(plan_id)?;
                Ok((value, next))
            }
            Err(err) => {
                self.abort(plan_id, event, "work error").await;
                Err(err)
            }
        }
    }

    async fn abort(&self, plan_id: Uuid, event: RoundEvent, cause: &'static str) {
        if let Err(abort_err) = self.rounds.lock().await.abort(plan_id) {
            warn!(
                room_id = %self.room_id,
                event = ?event,
                plan_id = %plan_id,
                cause,
                error = ?abort_err,
                "failed to abort round transition"
            );
        }
    }

    /// Install the task counting down the open round, cancelling the previous one.
    pub fn arm_clock(&self, handle: JoinHandle<()>) {
        replace_task(&self.clock, Some(handle));
    }

    pub fn cancel_clock(&self) {
        replace_task(&self.clock, None);
    }

    /// Install the task that advances the room once the grace window elapses.
    pub fn arm_advance(&self, handle: JoinHandle<()>) {
        replace_task(&self.advance, Some(handle));
    }

    /// Cancel every pending timer; used when the room goes away.
    pub fn shutdown(&self) {
        replace_task(&self.clock, None);
        replace_task(&self.advance, None);
    }

    /// Mark the room as gone or finished and cancel its timers. The registry
    /// drops the runtime once the last lease on it is released.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.shutdown();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Swap the task in `slot`, aborting the previous one unless it is the caller itself.
fn replace_task(slot: &StdMutex<Option<JoinHandle<()>>>, next: Option<JoinHandle<()>>) {
    let previous = {
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    };

    if let Some(handle) = previous {
        if tokio::task::try_id() != Some(handle.id()) {
            handle.abort();
        }
    }
}

/// Borrowed runtime handed out by [`RoomRegistry`].
///
/// Dropping the last lease of a retired runtime removes it from the registry.
pub struct RoomLease<'a> {
    // Field order matters: the runtime reference is released before the
    // registry looks at the remaining holders.
    runtime: Arc<RoomRuntime>,
    _release: Release<'a>,
}

impl Deref for RoomLease<'_> {
    type Target = RoomRuntime;

    fn deref(&self) -> &RoomRuntime {
        &self.runtime
    }
}

struct Release<'a> {
    registry: &'a RoomRegistry,
    room_id: Uuid,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.registry.release(self.room_id);
    }
}

/// Runtime state for every room this process is coordinating.
pub struct RoomRegistry {
    rooms: DashMap<Uuid, Arc<RoomRuntime>>,
    transition_timeout: Option<Duration>,
}

impl RoomRegistry {
    pub fn new(transition_timeout: Option<Duration>) -> Self {
        Self {
            rooms: DashMap::new(),
            transition_timeout,
        }
    }

    /// Runtime for `room_id`, created on first use.
    ///
    /// Callers that find the room missing or finished must [`retire`](RoomRuntime::retire)
    /// it so the entry does not outlive the room.
    pub fn runtime(&self, room_id: Uuid) -> RoomLease<'_> {
        let runtime = self
            .rooms
            .entry(room_id)
            .or_insert_with(|| Arc::new(RoomRuntime::new(room_id, self.transition_timeout)))
            .clone();
        self.lease(runtime)
    }

    /// Runtime for `room_id` if this process is already coordinating it.
    pub fn get(&self, room_id: Uuid) -> Option<RoomLease<'_>> {
        let runtime = self.rooms.get(&room_id).map(|entry| entry.value().clone())?;
        Some(self.lease(runtime))
    }

    fn lease(&self, runtime: Arc<RoomRuntime>) -> RoomLease<'_> {
        let room_id = runtime.room_id();
        RoomLease {
            runtime,
            _release: Release {
                registry: self,
                room_id,
            },
        }
    }

    fn release(&self, room_id: Uuid) {
        let removed = self.rooms.remove_if(&room_id, |_, runtime| {
            runtime.is_retired() && Arc::strong_count(runtime) == 1
        });
        if removed.is_some() {
            debug!(room_id = %room_id, "room runtime released");
        }
    }

    /// Forget a room, cancelling its timers.
    pub fn remove(&self, room_id: Uuid) {
        if let Some((_, runtime)) = self.rooms.remove(&room_id) {
            runtime.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_work_aborts_the_transition() {
        let runtime = RoomRuntime::new(Uuid::new_v4(), None);
        let guard = runtime.lock().await;

        let result = runtime
            .run_transition(&guard, RoundEvent::Start, || async {
                Err::<(), _>(ServiceError::InvalidState("boom".into()))
            })
            .await;

        assert!(result.is_err());
        let snapshot = runtime.snapshot().await;
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        assert!(snapshot.pending.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_times_out_and_aborts() {
        let runtime = RoomRuntime::new(Uuid::new_v4(), Some(Duration::from_secs(1)));
        let guard = runtime.lock().await;

        let result = runtime
            .run_transition(&guard, RoundEvent::Start, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(runtime.phase().await, RoundPhase::Idle);
    }

    #[tokio::test]
    async fn successful_work_commits_the_transition() {
        let runtime = RoomRuntime::new(Uuid::new_v4(), None);
        let guard = runtime.lock().await;

        let (value, phase) = runtime
            .run_transition(&guard, RoundEvent::Start, || async { Ok(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(phase, RoundPhase::RoundOpen { round: 1 });
    }

    #[test]
    fn retired_runtime_leaves_with_its_last_lease() {
        let registry = RoomRegistry::new(None);
        let room_id = Uuid::new_v4();

        let first = registry.runtime(room_id);
        let second = registry.runtime(room_id);
        first.retire();
        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());

        drop(registry.runtime(room_id));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(room_id).is_some_and(|runtime| !runtime.is_retired()));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_room_cancels_its_timers() {
        let registry = RoomRegistry::new(None);
        let room_id = Uuid::new_v4();
        let runtime = registry.runtime(room_id);

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let probe = handle.abort_handle();
        runtime.arm_clock(handle);

        registry.remove(room_id);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        assert!(probe.is_finished());
        assert!(registry.is_empty());
    }
}
