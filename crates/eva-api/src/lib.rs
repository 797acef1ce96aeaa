// eva-api: Async transport for EVA ICS HMI servers (JSON-RPC gateway + push channel)

pub mod bulk;
pub mod error;
pub mod push;
pub mod rpc;
pub mod transport;

pub use bulk::{BulkPart, BulkRequest, BulkResponse};
pub use error::Error;
pub use push::{ChannelEvent, PushChannel};
pub use rpc::{RpcClient, RpcRequest};
pub use transport::{TlsMode, TransportConfig};
