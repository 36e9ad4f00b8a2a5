//! Frame and topic types
//!
//! A frame is one topic-prefixed message: `<topic><space><body>`. The relay
//! never looks past the topic token, and frames are carried as `Bytes` so a
//! forward is a reference-count bump rather than a copy.

pub mod codec;

use std::borrow::Cow;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

/// Byte separating the topic token from the body
pub const TOPIC_SEPARATOR: u8 = b' ';

/// Sensor categories published by the traffic network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Traffic cameras
    Camera,
    /// Inductive loop counters
    Inductive,
    /// GPS probe vehicles
    Gps,
}

impl Topic {
    /// Every sensor topic, in deployment order
    pub const ALL: [Topic; 3] = [Topic::Camera, Topic::Inductive, Topic::Gps];

    /// Wire token used as the frame prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Camera => "camara",
            Topic::Inductive => "espira",
            Topic::Gps => "gps",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camara" | "camera" => Ok(Topic::Camera),
            "espira" | "inductive" => Ok(Topic::Inductive),
            "gps" => Ok(Topic::Gps),
            other => Err(format!("unknown topic: {}", other)),
        }
    }
}

/// One opaque pub/sub message
///
/// Cheap to clone; the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Build a frame from a topic token and a body
    pub fn new(topic: &str, body: impl AsRef<[u8]>) -> Self {
        let body = body.as_ref();
        let mut buf = BytesMut::with_capacity(topic.len() + 1 + body.len());
        buf.put_slice(topic.as_bytes());
        buf.put_u8(TOPIC_SEPARATOR);
        buf.put_slice(body);
        Self { data: buf.freeze() }
    }

    /// Wrap already-encoded frame bytes without inspecting them
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Topic token: bytes up to the first separator, or the whole frame
    pub fn topic(&self) -> &[u8] {
        match self.separator_index() {
            Some(idx) => &self.data[..idx],
            None => &self.data,
        }
    }

    /// Topic token for logging
    pub fn topic_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.topic())
    }

    /// Bytes after the separator (empty if there is none)
    pub fn body(&self) -> &[u8] {
        match self.separator_index() {
            Some(idx) => &self.data[idx + 1..],
            None => &[],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn separator_index(&self) -> Option<usize> {
        self.data.iter().position(|b| *b == TOPIC_SEPARATOR)
    }
}

/// Subscription filter on the topic token
///
/// An empty filter matches everything; otherwise the frame's topic token
/// must equal the filter exactly, so `gps` never matches `gpsx ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilter {
    token: Option<Bytes>,
}

impl TopicFilter {
    /// Filter that accepts every frame
    pub fn all() -> Self {
        Self { token: None }
    }

    /// Filter that accepts a single topic token
    pub fn topic(token: impl Into<Bytes>) -> Self {
        let token = token.into();
        if token.is_empty() {
            Self::all()
        } else {
            Self { token: Some(token) }
        }
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        match &self.token {
            None => true,
            Some(token) => frame.topic() == token.as_ref(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.token.is_none()
    }
}

impl From<Topic> for TopicFilter {
    fn from(topic: Topic) -> Self {
        Self::topic(topic.as_str())
    }
}

impl From<&str> for TopicFilter {
    fn from(token: &str) -> Self {
        Self::topic(Bytes::copy_from_slice(token.as_bytes()))
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.token {
            None => f.write_str("*"),
            Some(token) => f.write_str(&String::from_utf8_lossy(token)),
        }
    }
}
