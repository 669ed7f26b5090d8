//! External collaborator interfaces.
//!
//! The campaign core talks to the outside world through two narrow seams:
//! a [`Mailer`] that sends one message, and a [`Mailbox`] that lists recent
//! inbound mail for the reply and bounce sweeps. Both are REST-backed in
//! production and stubbed in tests.

mod mailbox;
mod mailer;

pub use mailbox::{InboundMessage, Mailbox, RestMailbox};
pub use mailer::{Mailer, OutgoingMessage, RestMailer};
