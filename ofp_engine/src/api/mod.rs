mod order_flow_api;

pub use order_flow_api::{CycleStats, Fulfilment, FulfilmentConfig, OrderFlowApi, RelayOutcome};
