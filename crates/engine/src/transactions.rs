//! Mirrored transactions.
//!
//! Rows are keyed upstream by `external_transaction_id`, unique across the
//! whole table. `expense` and `income` are derived by
//! [`crate::classifier::classify`] on every write that touches the amount,
//! the category or the owning account, and are never both set.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::{ActiveValue, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    aggregator::TransactionRecord,
    classifier::{Classification, classify},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i32,
    pub account_id: i32,
    pub external_transaction_id: String,
    /// Positive means money leaving the account.
    pub amount: f64,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub primary_category: Option<String>,
    pub detailed_category: Option<String>,
    pub payment_channel: Option<String>,
    pub currency: Option<String>,
    pub pending: bool,
    pub expense: bool,
    pub income: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Model> for Transaction {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            external_transaction_id: model.external_transaction_id,
            amount: model.amount,
            date: model.date,
            name: model.name,
            merchant_name: model.merchant_name,
            primary_category: model.primary_category,
            detailed_category: model.detailed_category,
            payment_channel: model.payment_channel,
            currency: model.currency,
            pending: model.pending,
            expense: model.expense,
            income: model.income,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub account_id: i32,
    #[sea_orm(unique)]
    pub external_transaction_id: String,
    pub amount: f64,
    pub date: Date,
    pub name: String,
    pub merchant_name: Option<String>,
    pub primary_category: Option<String>,
    pub detailed_category: Option<String>,
    pub payment_channel: Option<String>,
    pub currency: Option<String>,
    pub pending: bool,
    pub expense: bool,
    pub income: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn classification(&self) -> Classification {
        Classification {
            expense: self.expense,
            income: self.income,
        }
    }

    /// Classification the row should carry when owned by an account of
    /// `account_kind`.
    pub fn classify_for(&self, account_kind: &str) -> Classification {
        classify(
            account_kind,
            self.amount,
            self.primary_category.as_deref().unwrap_or(""),
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::AccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Accounts,
}

impl Related<super::accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    /// New row for an added upstream record.
    pub fn from_record(
        account_id: i32,
        account_kind: &str,
        record: &TransactionRecord,
        now: DateTime<Utc>,
    ) -> Self {
        let mut model = Self {
            id: ActiveValue::NotSet,
            external_transaction_id: ActiveValue::Set(record.transaction_id.clone()),
            created_at: ActiveValue::Set(now),
            ..Default::default()
        };
        model.apply_record(account_id, account_kind, record, now);
        model
    }

    /// Overwrites every upstream-owned column with `record` and re-derives
    /// the expense/income flags.
    pub fn apply_record(
        &mut self,
        account_id: i32,
        account_kind: &str,
        record: &TransactionRecord,
        now: DateTime<Utc>,
    ) {
        let flags = classify(
            account_kind,
            record.amount,
            record.primary_category().unwrap_or(""),
        );
        self.account_id = ActiveValue::Set(account_id);
        self.amount = ActiveValue::Set(record.amount);
        self.date = ActiveValue::Set(record.date);
        self.name = ActiveValue::Set(record.name.clone());
        self.merchant_name = ActiveValue::Set(record.merchant_name.clone());
        self.primary_category = ActiveValue::Set(record.primary_category().map(str::to_string));
        self.detailed_category =
            ActiveValue::Set(record.detailed_category().map(str::to_string));
        self.payment_channel = ActiveValue::Set(record.payment_channel.clone());
        self.currency = ActiveValue::Set(record.iso_currency_code.clone());
        self.pending = ActiveValue::Set(record.pending);
        self.set_classification(flags);
        self.updated_at = ActiveValue::Set(now);
    }

    pub fn set_classification(&mut self, flags: Classification) {
        self.expense = ActiveValue::Set(flags.expense);
        self.income = ActiveValue::Set(flags.income);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::aggregator::PersonalFinanceCategory;

    fn record(amount: f64, category: &str) -> TransactionRecord {
        TransactionRecord {
            transaction_id: "T1".to_string(),
            account_id: "A1".to_string(),
            amount,
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            name: "Coffee".to_string(),
            merchant_name: None,
            personal_finance_category: Some(PersonalFinanceCategory {
                primary: category.to_string(),
                detailed: None,
            }),
            payment_channel: None,
            pending: false,
            iso_currency_code: Some("USD".to_string()),
        }
    }

    #[test]
    fn from_record_classifies() {
        let now = Utc.timestamp_opt(0, 0).unwrap();
        let model = ActiveModel::from_record(7, "depository", &record(50.0, "FOOD_AND_DRINK"), now);
        assert_eq!(model.expense, ActiveValue::Set(true));
        assert_eq!(model.income, ActiveValue::Set(false));
        assert_eq!(model.account_id, ActiveValue::Set(7));
        assert_eq!(
            model.primary_category,
            ActiveValue::Set(Some("FOOD_AND_DRINK".to_string()))
        );
    }

    #[test]
    fn apply_record_reclassifies() {
        let now = Utc.timestamp_opt(0, 0).unwrap();
        let mut model =
            ActiveModel::from_record(7, "depository", &record(50.0, "FOOD_AND_DRINK"), now);
        model.apply_record(7, "depository", &record(50.0, "TRANSFER_OUT"), now);
        assert_eq!(model.expense, ActiveValue::Set(false));
        assert_eq!(model.income, ActiveValue::Set(false));
    }
}
