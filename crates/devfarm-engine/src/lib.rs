//! # devfarm-engine
//!
//! The device-mirroring engine behind DevFarm: it starts Android emulators
//! and iOS simulators, streams their screens, and injects input, with at most
//! one live stream per device.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//!             ┌──────────────────── StreamingEngine ────────────────────┐
//! browser ──▶ │ attach_connection ─▶ orchestrator (video ⇄ input race) │
//!             │        │                                                │
//!             │        ▼                                                │
//!             │  AndroidDeviceManager          IosDeviceManager         │
//!             │   └ SessionRegistry             └ SessionRegistry       │
//!             │      └ ScrcpyClient                └ ScreenCapture      │
//!             └────────┬──────────────────────────────┬─────────────────┘
//!                      ▼                              ▼
//!              adb / emulator                  xcrun simctl / idb
//! ```
//!
//! - **`domain`**: configuration with defaults and the handles the engine
//!   returns.
//! - **`application`**: device managers, the session and log registries, and
//!   the connection orchestrator.  These depend only on traits.
//! - **`infrastructure`**: the code that actually runs tools, opens sockets,
//!   and transcodes screenshots.
//!
//! Every external program is reached through
//! [`infrastructure::tools::ToolRunner`], so the whole application layer can
//! be exercised with [`infrastructure::tools::mock::MockToolRunner`].

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::device_stream::{DeviceStream, FrameSink, InputSource};
pub use application::engine::{StartupReport, StreamingEngine};
pub use application::orchestrator::{run_connection, ConnectionOutcome, Direction};
pub use application::session_registry::{SessionHandle, SessionRegistry};
pub use domain::config::EngineConfig;
pub use error::EngineError;
pub use infrastructure::storage::config::{load_config, save_config, ConfigError};
pub use infrastructure::tools::{SharedRunner, SystemToolRunner, ToolRunner};
