use ofp_common::Money;
use ofp_engine::db_types::NewOrder;
use serde::{Deserialize, Serialize};

/// The payload for `POST /orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateRequest {
    pub client: String,
    pub product: String,
    pub value: Money,
}

impl From<OrderCreateRequest> for NewOrder {
    fn from(req: OrderCreateRequest) -> Self {
        NewOrder::new(req.client, req.product, req.value)
    }
}
