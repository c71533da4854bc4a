// src/nat/ice/transport.rs
//! The ICE transport capability consumed by gathering sessions
//!
//! Sessions never touch sockets. They ask a [`TransportFactory`] for a
//! transport configured with a server list, trigger gathering through
//! [`IceTransport::generate_offer`], and read candidate notifications from the
//! channel handed back alongside the transport.

use std::fmt;
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;

use crate::nat::error::{NatError, NatResult};

/// One candidate notification: a raw description, or `None` once gathering
/// has finished
pub type CandidateNotification = Option<String>;

/// Gathering state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Nothing requested yet
    New,
    /// Candidates are being discovered
    Gathering,
    /// Transport considers gathering finished
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Gathering => "gathering",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// STUN/TURN server descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs, e.g. `stun:stun.l.google.com:19302`. Accepts a single
    /// string or a list when deserialized.
    #[serde(default, deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Server with a single URL and no credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// At least one non-blank URL
    pub fn has_urls(&self) -> bool {
        self.urls.iter().any(|u| !u.trim().is_empty())
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Reject an empty list, or any entry without a usable `urls` value
pub fn validate_servers(servers: &[IceServer]) -> NatResult<()> {
    if servers.is_empty() {
        return Err(NatError::InvalidArgument("server list is empty".to_string()));
    }

    if let Some(idx) = servers.iter().position(|s| !s.has_urls()) {
        return Err(NatError::InvalidArgument(format!(
            "server entry {} has no urls",
            idx
        )));
    }

    Ok(())
}

/// A local transport endpoint that gathers candidates
pub trait IceTransport: Send {
    /// Generate the local description, which starts candidate gathering.
    /// Candidates and the terminal marker arrive on the handle's channel.
    fn generate_offer(&mut self) -> BoxFuture<'_, NatResult<()>>;

    /// Current gathering state
    fn gathering_state(&self) -> IceGatheringState;
}

/// A freshly created transport and its notification stream
pub struct TransportHandle {
    /// The transport endpoint
    pub transport: Box<dyn IceTransport>,
    /// Candidate notifications, ending with `None`
    pub candidates: mpsc::UnboundedReceiver<CandidateNotification>,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("state", &self.transport.gathering_state())
            .finish_non_exhaustive()
    }
}

/// Creates transports configured with a server list
pub trait TransportFactory: Send + Sync {
    /// Create a transport endpoint for `servers`. Implementations set up
    /// whatever the underlying stack needs for gathering to have something
    /// to negotiate over.
    fn create(&self, servers: &[IceServer]) -> NatResult<TransportHandle>;
}
