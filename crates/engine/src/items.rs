//! Linked aggregator connections.
//!
//! An item is one login at one institution. It owns the access token used
//! against the aggregator and the sync cursor of the transaction feed.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Public view of an item. The access token never leaves the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i32,
    pub user_id: i32,
    pub external_item_id: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub has_cursor: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for Item {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            external_item_id: model.external_item_id,
            institution_id: model.institution_id,
            institution_name: model.institution_name,
            has_cursor: model.sync_cursor.is_some_and(|cursor| !cursor.is_empty()),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    #[sea_orm(unique)]
    pub external_item_id: String,
    pub access_token: String,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    /// `None` or empty means the next sync starts from the full history.
    pub sync_cursor: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn cursor(&self) -> &str {
        self.sync_cursor.as_deref().unwrap_or("")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
    #[sea_orm(has_many = "super::accounts::Entity")]
    Accounts,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
