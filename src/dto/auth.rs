use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JWT claims issued by the identity provider.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}
