//! Racket sensor telemetry server
//!
//! Receives accelerometer, gyroscope and magnetometer packets over UDP,
//! keeps a bounded history of raw samples and publishes a Gaussian-fitted
//! approximation of the latest window of every channel.

pub mod buffer;
pub mod config;
pub mod error;
pub mod fit;
pub mod listener;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod status;
pub mod types;

pub use buffer::{FittedBuffer, RawBuffer, SharedRawBuffer};
pub use config::ServerConfig;
pub use error::{BindError, ConfigError, DecodeError, IngestError, ParseError};
pub use fit::{FitConfig, FitEngine, FitParams, ModelKind, WindowFit};
pub use listener::{Listener, ListenerHandle};
pub use notify::{notification_channel, DataEvent, Notification, NotificationSink, NotificationStream, StateEvent, StateKind};
pub use parser::{PacketParser, WireGrammar};
pub use pipeline::{pipeline, FitCycle, FitWorker, Ingest};
pub use status::{ServerStatus, SharedStatus};
pub use types::{Channel, SensorPacket, Vector3};
