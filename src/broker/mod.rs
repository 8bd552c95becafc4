pub mod protocol;
pub mod session;

pub use protocol::{BrokerEvent, ContractSnapshot};
pub use session::{broker_session, BrokerHandle, BrokerSession};
