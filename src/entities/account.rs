use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::common::{MetaData, ReferenceType};
use crate::entities::entity::TypedEntity;
use crate::registry::EntityType;

/// Account types in the chart of accounts
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountType {
    Bank,
    #[serde(rename = "Other Current Asset")]
    OtherCurrentAsset,
    #[serde(rename = "Fixed Asset")]
    FixedAsset,
    #[serde(rename = "Other Asset")]
    OtherAsset,
    #[serde(rename = "Accounts Receivable")]
    AccountsReceivable,
    Equity,
    Expense,
    #[serde(rename = "Other Expense")]
    OtherExpense,
    #[serde(rename = "Cost of Goods Sold")]
    CostOfGoodsSold,
    #[serde(rename = "Accounts Payable")]
    AccountsPayable,
    #[serde(rename = "Credit Card")]
    CreditCard,
    #[serde(rename = "Long Term Liability")]
    LongTermLiability,
    #[serde(rename = "Other Current Liability")]
    OtherCurrentLiability,
    Income,
    #[serde(rename = "Other Income")]
    OtherIncome,
}

/// Account classification (read-only, derived from the account type)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountClassification {
    Asset,
    Equity,
    Expense,
    Liability,
    Revenue,
}

/// Represents an account in the chart of accounts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaData>,

    /// User recognizable name for the account (max 100 chars, unique)
    pub name: String,

    /// User-defined account number (max 20 chars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acct_num: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,

    /// Detailed account type, e.g. `CashOnHand`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_sub_type: Option<String>,

    /// Account classification (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<AccountClassification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<ReferenceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_ref: Option<ReferenceType>,

    /// Balance including sub accounts (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<Decimal>,

    /// Fully qualified name including parents (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
}

impl Account {
    #[must_use]
    pub fn new(name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            name: name.into(),
            account_type: Some(account_type),
            ..Self::default()
        }
    }

    /// Set the account number
    #[must_use]
    pub fn with_acct_num(mut self, acct_num: impl Into<String>) -> Self {
        self.acct_num = Some(acct_num.into());
        self
    }

    /// Set the detailed account type
    #[must_use]
    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.account_sub_type = Some(sub_type.into());
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl TypedEntity for Account {
    const ENTITY_TYPE: EntityType = EntityType::Account;
}
