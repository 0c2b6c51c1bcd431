//! Motion sensor capture: sample types, the session buffer, sensor providers
//! and the controller that ties a session to its hand-off.

pub mod controller;
pub mod provider;
pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use controller::{SessionController, SessionSummary};
pub use provider::{create_provider, NullProvider, ReplayProvider, SensorEvent, SensorProvider};
pub use session::{SamplesByKind, SessionError, SessionHandle, SessionRecorder, SessionSnapshot};

/// Motion sensors the pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    LinearAcceleration,
    RotationVector,
}

impl SensorKind {
    /// Every supported kind, in feature-vector order
    pub const ALL: [Self; 2] = [Self::LinearAcceleration, Self::RotationVector];

    /// Name used in telemetry records
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::LinearAcceleration => "Linear Acceleration",
            Self::RotationVector => "Rotation Vector",
        }
    }
}

/// One reading from one sensor
///
/// `captured_at` is monotonic time since the owning session started;
/// `wall_time` is only used for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    kind: SensorKind,
    components: [f32; 3],
    captured_at: Duration,
    wall_time: DateTime<Utc>,
}

impl RawSample {
    #[must_use]
    pub const fn new(
        kind: SensorKind,
        components: [f32; 3],
        captured_at: Duration,
        wall_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            components,
            captured_at,
            wall_time,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> SensorKind {
        self.kind
    }

    #[must_use]
    pub const fn components(&self) -> [f32; 3] {
        self.components
    }

    #[must_use]
    pub const fn captured_at(&self) -> Duration {
        self.captured_at
    }

    #[must_use]
    pub const fn wall_time(&self) -> DateTime<Utc> {
        self.wall_time
    }
}
