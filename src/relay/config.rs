//! Relay configuration

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::frame::{Topic, TopicFilter};

/// Port names in the deployment config, per sensor topic
const SENSOR_PORTS: [(Topic, &str, &str); 3] = [
    (Topic::Camera, "camera", "sensor_camera_pub"),
    (Topic::Inductive, "inductive", "sensor_inductive_pub"),
    (Topic::Gps, "gps", "sensor_gps_pub"),
];

/// Port name of the relay's own publish endpoint
const RELAY_PORT: &str = "broker_pub";

/// One upstream producer the relay subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerEndpoint {
    /// Name used for logs and worker threads
    pub name: String,
    /// Endpoint of the producer's publisher
    pub endpoint: String,
    /// Topic accepted from this producer
    pub filter: TopicFilter,
}

impl ProducerEndpoint {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        filter: impl Into<TopicFilter>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            filter: filter.into(),
        }
    }
}

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Endpoint the downstream publisher binds
    pub bind_addr: String,

    /// Upstream producers, one subscription each
    pub producers: Vec<ProducerEndpoint>,

    /// Upper bound on any single wait, and thus on stop latency
    pub poll_timeout: Duration,

    /// How long shutdown waits for each relay thread
    pub join_timeout: Duration,

    /// Transport settings for every channel the relay opens
    pub channel: ChannelConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5560".into(),
            producers: vec![
                ProducerEndpoint::new("camera", "127.0.0.1:5555", Topic::Camera),
                ProducerEndpoint::new("inductive", "127.0.0.1:5556", Topic::Inductive),
                ProducerEndpoint::new("gps", "127.0.0.1:5557", Topic::Gps),
            ],
            poll_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(3),
            channel: ChannelConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Create a config with a custom bind endpoint and no producers
    pub fn with_bind(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            producers: Vec::new(),
            ..Default::default()
        }
    }

    /// Set the bind endpoint
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Add an upstream producer
    pub fn producer(mut self, producer: ProducerEndpoint) -> Self {
        self.producers.push(producer);
        self
    }

    /// Set the poll timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the join timeout
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the transport config
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Load from a city config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Parse the `network` and `zmq_ports` sections of a city config
    ///
    /// Producers are reached on `network.pc1_host`; the relay binds every
    /// interface on `broker_pub`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: CityConfigFile =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;

        let host = file
            .network
            .and_then(|n| n.pc1_host)
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = |name: &str| {
            file.zmq_ports
                .get(name)
                .copied()
                .ok_or_else(|| Error::Config(format!("missing zmq_ports.{}", name)))
        };

        let mut config = Self::with_bind(format!("0.0.0.0:{}", port(RELAY_PORT)?));
        for (topic, name, port_name) in SENSOR_PORTS {
            config = config.producer(ProducerEndpoint::new(
                name,
                format!("{}:{}", host, port(port_name)?),
                topic,
            ));
        }
        Ok(config)
    }

    /// Upper bound on how long a stopped relay takes to tear down
    ///
    /// Covers one poll interval, one stalled downstream send, the fan-in
    /// worker and collector joins, and the publisher's close grace.
    pub fn teardown_timeout(&self) -> Duration {
        self.poll_timeout
            + self.channel.send_timeout
            + self.join_timeout * 2
            + self.channel.linger
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.producers.is_empty() {
            return Err(Error::Config("no producers configured".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CityConfigFile {
    #[serde(default)]
    network: Option<NetworkSection>,
    #[serde(default)]
    zmq_ports: HashMap<String, u16>,
}

#[derive(Debug, Deserialize)]
struct NetworkSection {
    #[serde(default)]
    pc1_host: Option<String>,
}
