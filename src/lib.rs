//! Pub/sub fan-in relay for traffic sensor event streams
//!
//! Sensor producers (cameras, inductive loops, GPS probes) each publish
//! topic-prefixed frames on their own endpoint. The relay subscribes to all
//! of them and republishes every frame, byte for byte, on one endpoint for
//! downstream consumers.
//!
//! ```no_run
//! use traffic_relay::{Relay, RelayConfig, RelayMode, Shutdown};
//!
//! let shutdown = Shutdown::new();
//! let relay = Relay::new(RelayMode::FanIn, RelayConfig::default(), shutdown.clone());
//!
//! let handle = std::thread::spawn(move || relay.run());
//! // ... later, from a signal handler or another thread
//! shutdown.request_stop();
//! handle.join().unwrap().unwrap();
//! ```

pub mod channel;
pub mod error;
pub mod frame;
pub mod relay;
pub mod shutdown;
pub mod stats;

pub use channel::{ChannelConfig, Publisher, Subscriber};
pub use error::{Error, Result};
pub use frame::{Frame, Topic, TopicFilter};
pub use relay::{FanInRelay, ProducerEndpoint, Relay, RelayConfig, RelayMode, SequentialRelay};
pub use shutdown::Shutdown;
pub use stats::{RelayStats, StatsSnapshot};
