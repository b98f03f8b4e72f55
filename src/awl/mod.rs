//! AWL protocol core: transaction table, session client, reconnect supervisor

pub mod client;
pub mod payload;
pub mod supervisor;
pub mod transaction;

pub use client::{AwlClient, ClientConfig};
pub use payload::{GatewayView, LoginPayload, ZoneView};
pub use supervisor::{
    BackoffPolicy, LogObserver, ReconnectSupervisor, RetryDetails, SharedClient,
    SupervisorConfig, SupervisorObserver,
};
pub use transaction::{PendingTransaction, TransactionTable, MAX_LIVE_TRANSACTIONS};
