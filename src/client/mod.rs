//! Participant side: relay connection, admission state, and the peer connection mesh.

mod admission;
mod connection;
mod media;
mod orchestrator;
mod session;

pub use self::admission::{Admission, AdmissionState, PendingParticipant};
pub use self::connection::{ClientConfig, ClientError, ClientEvent, JoinParams, SignalingClient, SignalingHandle};
pub use self::media::{LocalMedia, LocalTrack, MediaEngine, MediaError, MediaEvent, PeerLink, TrackKind};
pub use self::orchestrator::{should_initiate, LinkState, Orchestrator, PeerUpdate};
pub use self::session::{Session, SessionUpdate};
