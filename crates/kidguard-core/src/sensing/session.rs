use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use super::{RawSample, SensorKind};

/// Errors from the session lifecycle
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A recording session is already active (session {0})")]
    AlreadyActive(Uuid),

    #[error("Owner identity must not be empty")]
    EmptyOwner,
}

/// Identifies one started session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: Uuid,
    owner: String,
}

impl SessionHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Ordered samples, one sequence per sensor kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplesByKind {
    linear_acceleration: Vec<RawSample>,
    rotation_vector: Vec<RawSample>,
}

impl SamplesByKind {
    /// Group samples by kind, keeping the relative order within each kind.
    pub fn from_samples(samples: impl IntoIterator<Item = RawSample>) -> Self {
        let mut grouped = Self::default();
        for sample in samples {
            grouped.slot_mut(sample.kind()).push(sample);
        }
        grouped
    }

    #[must_use]
    pub fn get(&self, kind: SensorKind) -> &[RawSample] {
        match kind {
            SensorKind::LinearAcceleration => &self.linear_acceleration,
            SensorKind::RotationVector => &self.rotation_vector,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.linear_acceleration.len() + self.rotation_vector.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All samples, kind by kind in [`SensorKind::ALL`] order
    pub fn iter(&self) -> impl Iterator<Item = &RawSample> {
        self.linear_acceleration.iter().chain(&self.rotation_vector)
    }

    fn slot_mut(&mut self, kind: SensorKind) -> &mut Vec<RawSample> {
        match kind {
            SensorKind::LinearAcceleration => &mut self.linear_acceleration,
            SensorKind::RotationVector => &mut self.rotation_vector,
        }
    }
}

/// A sealed session, shared read-only with the aggregator and telemetry
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub samples: SamplesByKind,
    /// Samples discarded because a buffer hit its cap
    pub dropped: u64,
}

struct ActiveSession {
    id: Uuid,
    owner: String,
    started_at: DateTime<Utc>,
    started: Instant,
    linear_acceleration: VecDeque<RawSample>,
    rotation_vector: VecDeque<RawSample>,
    dropped: u64,
}

impl ActiveSession {
    fn buffer(&self, kind: SensorKind) -> &VecDeque<RawSample> {
        match kind {
            SensorKind::LinearAcceleration => &self.linear_acceleration,
            SensorKind::RotationVector => &self.rotation_vector,
        }
    }

    fn buffer_mut(&mut self, kind: SensorKind) -> &mut VecDeque<RawSample> {
        match kind {
            SensorKind::LinearAcceleration => &mut self.linear_acceleration,
            SensorKind::RotationVector => &mut self.rotation_vector,
        }
    }

    fn seal(self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            owner: self.owner,
            started_at: self.started_at,
            ended_at: Utc::now(),
            samples: SamplesByKind {
                linear_acceleration: self.linear_acceleration.into(),
                rotation_vector: self.rotation_vector.into(),
            },
            dropped: self.dropped,
        }
    }
}

/// Process-wide recording session buffer
///
/// At most one session is active at a time. Sensor callbacks call
/// [`SessionRecorder::push`], which only appends under a short lock and never
/// performs I/O.
pub struct SessionRecorder {
    active: Mutex<Option<ActiveSession>>,
    max_samples_per_kind: usize,
}

impl SessionRecorder {
    #[must_use]
    pub fn new(max_samples_per_kind: usize) -> Self {
        Self {
            active: Mutex::new(None),
            max_samples_per_kind: max_samples_per_kind.max(1),
        }
    }

    /// Begin a new session for `owner`
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyOwner`] for a blank owner and
    /// [`SessionError::AlreadyActive`] if a session is running; neither
    /// touches existing state.
    pub fn start(&self, owner: &str) -> Result<SessionHandle, SessionError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(SessionError::EmptyOwner);
        }

        let mut active = self.lock();
        if let Some(session) = active.as_ref() {
            return Err(SessionError::AlreadyActive(session.id));
        }

        let session = ActiveSession {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            linear_acceleration: VecDeque::new(),
            rotation_vector: VecDeque::new(),
            dropped: 0,
        };
        let handle = SessionHandle {
            id: session.id,
            owner: session.owner.clone(),
        };
        *active = Some(session);
        drop(active);

        log::info!("Started recording session {} for '{}'", handle.id, handle.owner);
        Ok(handle)
    }

    /// Append one sensor reading to the active session
    ///
    /// Returns `false` when no session is active (the reading is discarded).
    pub fn push(&self, kind: SensorKind, components: [f32; 3]) -> bool {
        let mut active = self.lock();
        let Some(session) = active.as_mut() else {
            return false;
        };

        let sample = RawSample::new(kind, components, session.started.elapsed(), Utc::now());
        let cap = self.max_samples_per_kind;
        let buffer = session.buffer_mut(kind);
        let overflow = buffer.len() >= cap;
        if overflow {
            buffer.pop_front();
        }
        buffer.push_back(sample);
        if overflow {
            session.dropped += 1;
        }
        true
    }

    /// Seal the session identified by `handle`
    ///
    /// Returns `None` if that session was already stopped, so stopping twice
    /// is a no-op.
    pub fn stop(&self, handle: &SessionHandle) -> Option<SessionSnapshot> {
        let mut active = self.lock();
        if active.as_ref().map(|s| s.id) != Some(handle.id) {
            log::debug!("Session {} already stopped", handle.id);
            return None;
        }
        let snapshot = active.take().map(ActiveSession::seal);
        drop(active);
        snapshot.inspect(log_sealed)
    }

    /// Seal whichever session is active, if any
    pub fn stop_active(&self) -> Option<SessionSnapshot> {
        let snapshot = self.lock().take().map(ActiveSession::seal);
        snapshot.inspect(log_sealed)
    }

    #[must_use]
    pub fn active_handle(&self) -> Option<SessionHandle> {
        self.lock().as_ref().map(|s| SessionHandle {
            id: s.id,
            owner: s.owner.clone(),
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Buffered sample count for `kind` in the active session
    #[must_use]
    pub fn sample_count(&self, kind: SensorKind) -> usize {
        self.lock()
            .as_ref()
            .map_or(0, |session| session.buffer(kind).len())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // A panic while holding the lock cannot leave a half-written sample,
        // so the buffer is still usable.
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn log_sealed(snapshot: &SessionSnapshot) {
    log::info!(
        "Sealed session {} for '{}': {} linear acceleration, {} rotation vector samples ({} dropped)",
        snapshot.id,
        snapshot.owner,
        snapshot.samples.get(SensorKind::LinearAcceleration).len(),
        snapshot.samples.get(SensorKind::RotationVector).len(),
        snapshot.dropped
    );
}
