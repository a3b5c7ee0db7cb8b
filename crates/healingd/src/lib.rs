//! healingd - privileged side of the Luminous healing executor

pub mod executor;
pub mod server;

pub use executor::PrivilegedExecutor;
pub use server::SocketServer;
