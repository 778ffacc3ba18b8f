//! # percept-session
//!
//! The session coordinator for one robot perception session.
//!
//! A session fuses the speech stream, the snapshot stream and intention
//! analysis into one ordered, cancelable pipeline:
//!
//! - **Mailboxes**: bounded queues that never block a producer and end with a
//!   sentinel after being sealed
//! - **Utterance scope**: a replaceable cancellation token, tagged with a
//!   generation, that bounds intention analysis
//! - **Component tasks**: speech pump, transcript aggregator, capture
//!   scheduler and intention dispatcher
//! - **Coordinator loop**: the single owner of lifecycle state, running the
//!   shutdown protocol
//!
//! The transport holds a [`SessionHandle`] and drains the outbound queue
//! returned by [`SessionCoordinator::start`].

#![deny(unsafe_code)]

pub mod aggregator;
pub mod capture;
pub mod channels;
pub mod coordinator;
pub mod dispatcher;
pub mod errors;
pub mod lifecycle;
pub mod mailbox;
pub mod metrics;
pub mod outbound;
pub mod scope;
mod speech_pump;

#[cfg(test)]
mod test_support;

pub use aggregator::{Fragment, TranscriptBuffer};
pub use capture::{CaptureScheduler, LatestFrame};
pub use coordinator::{Collaborators, SessionCoordinator, SessionHandle, SessionOptions};
pub use errors::SessionError;
pub use lifecycle::{Lifecycle, StopReason};
pub use mailbox::{Mailbox, MailboxReceiver, Offer, mailbox};
pub use scope::{ScopeTicket, UtteranceScope};
