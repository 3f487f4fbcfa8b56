//! # Idle Supervisor
//!
//! Timer a due stadi per sessione:
//! 1. `Armed`: dopo la finestra di inattività emette `IdleEvent::Warning`
//! 2. `Warned`: dopo la seconda finestra (più breve) emette `IdleEvent::Expired`
//!
//! Qualsiasi attività (`touch`) annulla entrambi gli stadi e riparte dal primo.
//! Ogni timer è un task tokio posseduto dal supervisor; un contatore di
//! generazione scarta i risvegli di timer già sostituiti.

use crate::session::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    Warning(SessionId),
    Expired(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Armed,
    Warned,
}

#[derive(Debug)]
struct Timer {
    generation: u64,
    state: TimerState,
    handle: JoinHandle<()>,
}

type TimerMap = Arc<Mutex<HashMap<SessionId, Timer>>>;

pub struct IdleSupervisor {
    warn_after: Duration,
    close_after: Duration,
    timers: TimerMap,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<IdleEvent>,
}

impl IdleSupervisor {
    pub fn new(warn_after: Duration, close_after: Duration) -> (Self, mpsc::UnboundedReceiver<IdleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let supervisor = Self {
            warn_after,
            close_after,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            events,
        };
        (supervisor, receiver)
    }

    /// Activity on `id`: restart from the first stage
    pub async fn touch(&self, id: &str) {
        let warn_at = Instant::now() + self.warn_after;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.remove(id) {
            previous.handle.abort();
        }

        let handle = tokio::spawn(run_timer(
            id.to_string(),
            generation,
            warn_at,
            self.close_after,
            self.timers.clone(),
            self.events.clone(),
        ));
        timers.insert(
            id.to_string(),
            Timer {
                generation,
                state: TimerState::Armed,
                handle,
            },
        );
    }

    /// Stop both stages for `id`
    pub async fn cancel(&self, id: &str) {
        if let Some(timer) = self.timers.lock().await.remove(id) {
            timer.handle.abort();
            debug!(session = %id, "Idle timers cancelled");
        }
    }

    pub async fn state(&self, id: &str) -> Option<TimerState> {
        self.timers.lock().await.get(id).map(|t| t.state)
    }

    pub async fn active(&self) -> usize {
        self.timers.lock().await.len()
    }
}

impl Drop for IdleSupervisor {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.try_lock() {
            for (_, timer) in timers.drain() {
                timer.handle.abort();
            }
        }
    }
}

async fn run_timer(
    id: SessionId,
    generation: u64,
    warn_at: Instant,
    close_after: Duration,
    timers: TimerMap,
    events: mpsc::UnboundedSender<IdleEvent>,
) {
    // Deadlines count from the activity, not from when this task is first polled
    tokio::time::sleep_until(warn_at).await;
    {
        let mut map = timers.lock().await;
        match map.get_mut(&id) {
            Some(timer) if timer.generation == generation => timer.state = TimerState::Warned,
            _ => return,
        }
    }
    warn!(session = %id, "⏰ Session idle, closing in {}s", close_after.as_secs());
    let _ = events.send(IdleEvent::Warning(id.clone()));

    tokio::time::sleep_until(warn_at + close_after).await;
    {
        let mut map = timers.lock().await;
        match map.get(&id) {
            Some(timer) if timer.generation == generation => {
                map.remove(&id);
            }
            _ => return,
        }
    }
    warn!(session = %id, "Session expired");
    let _ = events.send(IdleEvent::Expired(id));
}
