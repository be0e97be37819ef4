//! Remote session management
//!
//! Targets, the transport seam, live sessions, and the keyed pool.

pub mod mock;
pub mod pool;
pub mod session;
pub mod target;
pub mod transport;

pub use mock::MockTransport;
pub use pool::{PooledSession, PoolStats, SessionPool};
pub use session::RemoteSession;
pub use target::{ConnectionTarget, Secret, TargetKey};
pub use transport::{CommandOutput, CommandTransport, RemoteChannel, SshTransport};
