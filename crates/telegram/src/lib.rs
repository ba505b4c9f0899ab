//! Upstream messenger access: authenticated sessions with cool-down
//! tracking, a pluggable selection strategy, and the router that keeps the
//! session pool healthy.

mod client;
mod error;
mod grammers;
mod router;
mod strategy;
mod transport;

pub use client::UpstreamClient;
pub use error::TelegramError;
pub use grammers::GrammersSession;
pub use router::{ClientRouter, RoutedClient};
pub use strategy::{RoundRobinStrategy, SelectionStrategy};
pub use transport::{CredentialPrompt, FullProfile, MessengerSession, Peer, PeerRef, TerminalPrompt};
