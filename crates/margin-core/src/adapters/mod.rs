//! Platform seams of the sync queue.
//!
//! The queue only talks to storage, connectivity and the remote API through
//! these traits; hosts pick concrete backends at startup.

mod api;
mod network;
mod persistence;

pub use api::{
    resolve_route, ApiAdapter, ApiOutcome, ApiRequest, ApiResult, DisconnectedApi, HttpApiAdapter,
    HttpMethod, CONFLICT_STATUS,
};
pub use network::{
    check_reachable, probe_reachable, ManualNetwork, NetworkAdapter, OnlineCallback, ProbeNetwork,
    Subscription,
};
pub use persistence::{JsonFileActionStore, PersistenceAdapter};
