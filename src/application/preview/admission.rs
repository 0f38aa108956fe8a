use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque reservation handed to a preview request. Tokens are totally
/// ordered by issuance: only the most recently issued one is admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationToken(Uuid);

impl ReservationToken {
    fn issue() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Identifies one admitted build so completion events can be deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BuildId(Uuid);

#[derive(Debug)]
enum AdmissionState {
    /// No reservation, no build.
    Idle,
    /// A reservation has been issued; no build is running.
    Reserved { token: ReservationToken },
    /// An external build is in flight. `pending` carries the latest
    /// reservation issued while it runs, so a request that out-waits the
    /// build can still be admitted afterwards.
    Building {
        build: BuildId,
        pid: Option<u32>,
        pending: Option<ReservationToken>,
    },
}

/// Single-slot admission gate for external preview builds.
///
/// At most one build process is in flight at any time. Rapid successive
/// requests coalesce: each one reserves a token, waits out the debounce
/// delay, and is admitted only if its token is still the current reservation
/// and no build is running — "latest request after a quiet period wins".
/// Superseded requests are dropped, never queued.
///
/// All state lives behind one mutex that is never held across an await, so
/// each operation is atomic with respect to the others; [`Self::admit`]
/// fuses the acceptance check and the transition to `Building` into one
/// critical section.
#[derive(Debug, Clone)]
pub struct BuildAdmission {
    state: Arc<Mutex<AdmissionState>>,
    debounce: Duration,
}

impl BuildAdmission {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(AdmissionState::Idle)),
            debounce,
        }
    }

    /// Issue a fresh reservation and store it as the current one. Has no
    /// effect on an in-flight build.
    pub fn reserve(&self) -> ReservationToken {
        let token = ReservationToken::issue();
        let mut state = lock(&self.state);
        match &mut *state {
            AdmissionState::Building { pending, .. } => *pending = Some(token),
            other => *other = AdmissionState::Reserved { token },
        }
        token
    }

    /// Pace the caller so bursts of requests coalesce. Other reservations
    /// are free to be issued while this one sleeps.
    pub async fn debounce(&self) {
        tokio::time::sleep(self.debounce).await;
    }

    /// Admit the holder of `token` iff it is still the current reservation
    /// and no build is in flight; the machine transitions to `Building` in
    /// the same critical section. `None` means the request was superseded by
    /// a newer reservation or a build is already running.
    pub fn admit(&self, token: ReservationToken) -> Option<BuildSlot> {
        let mut state = lock(&self.state);
        match *state {
            AdmissionState::Reserved { token: current } if current == token => {
                let build = BuildId(Uuid::new_v4());
                *state = AdmissionState::Building {
                    build,
                    pid: None,
                    pending: None,
                };
                Some(BuildSlot {
                    state: Arc::clone(&self.state),
                    build,
                    completed: false,
                })
            }
            _ => {
                counter!("anteprima_preview_superseded_total").increment(1);
                debug!(
                    target = "application::preview::admission",
                    "reservation superseded or build slot occupied"
                );
                None
            }
        }
    }

    /// True while an external build process occupies the slot.
    pub fn is_building(&self) -> bool {
        matches!(*lock(&self.state), AdmissionState::Building { .. })
    }
}

/// Exclusive hold on the build slot, returned by [`BuildAdmission::admit`].
///
/// Completion is signalled either explicitly through [`BuildSlot::complete`]
/// or implicitly when the slot is dropped on an early-exit path; whichever
/// arrives first wins and the other is a no-op.
#[derive(Debug)]
pub struct BuildSlot {
    state: Arc<Mutex<AdmissionState>>,
    build: BuildId,
    completed: bool,
}

impl BuildSlot {
    /// Record the spawned child's process id on the slot.
    pub fn record_pid(&self, child_pid: u32) {
        let mut state = lock(&self.state);
        if let AdmissionState::Building {
            build: current,
            pid,
            ..
        } = &mut *state
            && *current == self.build
        {
            *pid = Some(child_pid);
        }
    }

    /// Release the slot. Idempotent with the drop path.
    pub fn complete(mut self) {
        self.finish_once();
    }

    fn finish_once(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        finish(&self.state, self.build);
    }
}

impl Drop for BuildSlot {
    fn drop(&mut self) {
        self.finish_once();
    }
}

/// Idempotent completion: only the build currently occupying the slot may
/// clear it; stale or duplicate completions are no-ops. A reservation issued
/// mid-build is restored so its holder can still be admitted.
fn finish(state: &Mutex<AdmissionState>, build: BuildId) {
    let mut state = lock(state);
    let next = match &mut *state {
        AdmissionState::Building {
            build: current,
            pending,
            ..
        } if *current == build => match pending.take() {
            Some(token) => AdmissionState::Reserved { token },
            None => AdmissionState::Idle,
        },
        _ => return,
    };
    *state = next;
}

fn lock(state: &Mutex<AdmissionState>) -> MutexGuard<'_, AdmissionState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            // State transitions cannot panic mid-write; recover rather than
            // wedging every future preview.
            warn!(
                target = "application::preview::admission",
                "admission state mutex poisoned; recovering"
            );
            poisoned.into_inner()
        }
    }
}
