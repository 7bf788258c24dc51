//! In-memory activity store for tests, with failure injection and per-call
//! gates to control response ordering.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use super::{ActivityStore, RemoteError};
use crate::activity::{Activity, ActivityMetrics, ActivityPatch, NewActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Create,
  Update,
  Complete,
  Delete,
  List,
  Metrics,
}

#[derive(Default)]
struct MemoryState {
  activities: Vec<Activity>,
  next_id: u64,
  failures: HashMap<Op, usize>,
  gates: HashMap<Op, VecDeque<oneshot::Receiver<()>>>,
  calls: Vec<Op>,
}

#[derive(Default)]
pub struct MemoryActivityStore {
  state: Mutex<MemoryState>,
}

impl MemoryActivityStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_activities(activities: Vec<Activity>) -> Self {
    let store = Self::new();
    store.lock().activities = activities;
    store
  }

  fn lock(&self) -> MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Make the next `count` calls of `op` fail.
  pub fn fail_next(&self, op: Op, count: usize) {
    *self.lock().failures.entry(op).or_default() += count;
  }

  /// Hold the response of the next `op` call until the returned sender fires.
  /// The store state is changed when the call arrives, not when it returns.
  pub fn gate(&self, op: Op) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    self.lock().gates.entry(op).or_default().push_back(rx);
    tx
  }

  pub fn activities(&self) -> Vec<Activity> {
    self.lock().activities.clone()
  }

  pub fn calls(&self, op: Op) -> usize {
    self.lock().calls.iter().filter(|c| **c == op).count()
  }

  /// Record the call and decide whether it fails. Returns the gate to await.
  ///
  /// A failing call still waits on its gate first, so tests can observe the
  /// cache while the doomed request is in flight.
  async fn enter(&self, op: Op) -> Result<Option<oneshot::Receiver<()>>, RemoteError> {
    let (gate, fails) = {
      let mut state = self.lock();
      state.calls.push(op);
      let gate = state.gates.get_mut(&op).and_then(VecDeque::pop_front);
      let fails = match state.failures.get_mut(&op).filter(|n| **n > 0) {
        Some(remaining) => {
          *remaining -= 1;
          true
        }
        None => false,
      };
      (gate, fails)
    };
    if fails {
      Self::respond(gate, ()).await;
      return Err(RemoteError::Unavailable(format!("{:?} rejected", op)));
    }
    Ok(gate)
  }

  async fn respond<T>(gate: Option<oneshot::Receiver<()>>, value: T) -> T {
    if let Some(gate) = gate {
      let _ = gate.await;
    }
    value
  }

  fn not_found(id: &str) -> RemoteError {
    RemoteError::Status {
      status: 404,
      body: format!("activity {} not found", id),
    }
  }
}

impl ActivityStore for MemoryActivityStore {
  async fn create(&self, activity: &NewActivity) -> Result<Activity, RemoteError> {
    let gate = self.enter(Op::Create).await?;
    let created = {
      let mut state = self.lock();
      state.next_id += 1;
      let created = activity.to_optimistic(format!("act-{}", state.next_id), Utc::now());
      state.activities.insert(0, created.clone());
      created
    };
    Ok(Self::respond(gate, created).await)
  }

  async fn update(&self, id: &str, patch: &ActivityPatch) -> Result<Activity, RemoteError> {
    let gate = self.enter(Op::Update).await?;
    let updated = {
      let mut state = self.lock();
      let activity = state
        .activities
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| Self::not_found(id))?;
      activity.apply(patch);
      activity.clone()
    };
    Ok(Self::respond(gate, updated).await)
  }

  async fn complete(&self, id: &str) -> Result<Activity, RemoteError> {
    let gate = self.enter(Op::Complete).await?;
    let completed = {
      let mut state = self.lock();
      let activity = state
        .activities
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| Self::not_found(id))?;
      activity.complete(Utc::now());
      activity.clone()
    };
    Ok(Self::respond(gate, completed).await)
  }

  async fn delete(&self, id: &str) -> Result<(), RemoteError> {
    let gate = self.enter(Op::Delete).await?;
    {
      let mut state = self.lock();
      let before = state.activities.len();
      state.activities.retain(|a| a.id != id);
      if state.activities.len() == before {
        return Err(Self::not_found(id));
      }
    }
    Self::respond(gate, ()).await;
    Ok(())
  }

  async fn list(&self) -> Result<Vec<Activity>, RemoteError> {
    let gate = self.enter(Op::List).await?;
    let activities = self.activities();
    Ok(Self::respond(gate, activities).await)
  }

  async fn metrics(&self) -> Result<ActivityMetrics, RemoteError> {
    let gate = self.enter(Op::Metrics).await?;
    let metrics = ActivityMetrics::from_activities(&self.activities(), Utc::now());
    Ok(Self::respond(gate, metrics).await)
  }
}
