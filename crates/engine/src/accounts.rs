//! Accounts held at a linked item.

use chrono::{DateTime, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::aggregator::AccountSnapshot;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i32,
    pub item_id: i32,
    pub external_account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    /// Aggregator account type: `depository`, `credit`, `loan`, ...
    pub kind: String,
    pub subtype: Option<String>,
    pub current_balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<Model> for Account {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            item_id: model.item_id,
            external_account_id: model.external_account_id,
            name: model.name,
            official_name: model.official_name,
            mask: model.mask,
            kind: model.kind,
            subtype: model.subtype,
            current_balance: model.current_balance,
            available_balance: model.available_balance,
            created_at: model.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub item_id: i32,
    pub external_account_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub mask: Option<String>,
    pub kind: String,
    pub subtype: Option<String>,
    pub current_balance: Option<f64>,
    pub available_balance: Option<f64>,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Whether the upstream balances differ from the stored ones.
    pub fn balances_differ(&self, snapshot: &AccountSnapshot) -> bool {
        self.current_balance != snapshot.balances.current
            || self.available_balance != snapshot.balances.available
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::items::Entity",
        from = "Column::ItemId",
        to = "super::items::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Items,
    #[sea_orm(has_many = "super::transactions::Entity")]
    Transactions,
}

impl Related<super::items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::transactions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// New row for `item_id` built from an upstream snapshot.
    pub fn from_snapshot(item_id: i32, snapshot: &AccountSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            id: ActiveValue::NotSet,
            item_id: ActiveValue::Set(item_id),
            external_account_id: ActiveValue::Set(snapshot.account_id.clone()),
            name: ActiveValue::Set(snapshot.name.clone()),
            official_name: ActiveValue::Set(snapshot.official_name.clone()),
            mask: ActiveValue::Set(snapshot.mask.clone()),
            kind: ActiveValue::Set(snapshot.kind.clone()),
            subtype: ActiveValue::Set(snapshot.subtype.clone()),
            current_balance: ActiveValue::Set(snapshot.balances.current),
            available_balance: ActiveValue::Set(snapshot.balances.available),
            created_at: ActiveValue::Set(now),
        }
    }
}
