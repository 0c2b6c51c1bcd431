pub mod classifier;
pub mod config;
pub mod daemon;
pub mod daemon_control;
pub mod features;
pub mod ipc;
pub mod monitor;
pub mod pipeline;
pub mod policy;
pub mod sensing;
pub mod telemetry;

pub use classifier::{ClassifierAdapter, ClassifierError};
pub use config::Config;
pub use daemon::Daemon;
pub use daemon_control::DaemonControl;
pub use features::{aggregate, Axis, FeatureVector, FEATURE_LEN};
pub use pipeline::{ClassificationPipeline, FeatureMessage, SENSOR_VALUES_TOPIC};
pub use policy::{BlockList, PolicyState, PolicyStore};
pub use sensing::{SensorKind, SessionController, SessionError, SessionRecorder};
