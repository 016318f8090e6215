use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_code_grants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_code_id: String,
    pub device_code_hash: String,
    pub user_code_hash: String,
    pub client_id: String,
    pub tenant_id: String,
    pub scope: String,
    pub status: DeviceAuthorizationStatus,
    pub user_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_poll_at: Option<i64>,
    pub poll_interval: i64,
}

/// Device authorization state machine. `Consumed` is the claimed-after-approval
/// terminal state: tokens are minted on the Approved -> Consumed transition and
/// never again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DeviceAuthorizationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "denied")]
    Denied,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "consumed")]
    Consumed,
}

impl DeviceAuthorizationStatus {
    /// Legal transitions; everything else is rejected at the store layer.
    pub fn can_transition_to(self, next: Self) -> bool {
        use DeviceAuthorizationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Denied) | (Pending, Expired) | (Approved, Consumed)
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::DeviceAuthorizationStatus::*;

    #[test]
    fn approved_can_only_be_consumed() {
        assert!(Approved.can_transition_to(Consumed));
        assert!(!Approved.can_transition_to(Denied));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Denied, Expired, Consumed] {
            for next in [Pending, Approved, Denied, Expired, Consumed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
