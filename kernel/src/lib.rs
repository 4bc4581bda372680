//! Reusable server substrate shared by every protocol this codebase
//! speaks: receivers, buffer operators, the channel, listeners and the
//! TCP server. See `SPEC_FULL.md` module A for the crate split this
//! belongs to.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod listener;
pub mod receiver;
pub mod session;
pub mod tcp_server;

pub use buffer::{AddOutcome, Adder, ConsumeOutcome, Consumer, LockingBuffer, PumpError, PumpResult, ReadyNotifier};
pub use channel::{Channel, ChannelError, ProgressNotifier};
pub use error::KernelError;
pub use listener::{AddressInfo, AllowAll, Listener, ListenerStatus, PeerAllowanceChecker};
pub use receiver::{HandlerHandle, ReceiverHandle};
pub use session::{Session, SessionFactory, SessionId, SessionInfo};
pub use tcp_server::TcpServer;
