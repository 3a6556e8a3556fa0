//! Transaction lines.
//!
//! A line is tagged by its `DetailType` and carries a detail object whose
//! field name depends on that tag:
//!
//! ```json
//! {
//!   "Amount": 100.0,
//!   "DetailType": "SalesItemLineDetail",
//!   "SalesItemLineDetail": {"ItemRef": {"value": "1"}, "Qty": 1, "UnitPrice": 100}
//! }
//! ```
//!
//! Fields this crate does not model are kept in the `extra` maps so that a
//! line read from the service serializes back to the same JSON.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::Date;

use crate::entities::common::{LinkedTxn, ReferenceType};
use crate::registry::DetailType;
use crate::utils::date_format::qbo_date_format_option;

/// Fields shared by every line variant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LineFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_txn: Vec<LinkedTxn>,
}

impl LineFields {
    #[must_use]
    pub fn amount(amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "DetailType")]
pub enum Line {
    #[serde(rename = "SalesItemLineDetail")]
    SalesItem(SalesItemLine),
    #[serde(rename = "GroupLineDetail")]
    Group(GroupLine),
    #[serde(rename = "DescriptionOnly")]
    DescriptionOnly(DescriptionLine),
    #[serde(rename = "DiscountLineDetail")]
    Discount(DiscountLine),
    #[serde(rename = "SubTotalLineDetail")]
    SubTotal(SubTotalLine),
    #[serde(rename = "AccountBasedExpenseLineDetail")]
    AccountBasedExpense(AccountBasedExpenseLine),
    #[serde(rename = "ItemBasedExpenseLineDetail")]
    ItemBasedExpense(ItemBasedExpenseLine),
    #[serde(rename = "JournalEntryLineDetail")]
    JournalEntry(JournalEntryLine),
    #[serde(rename = "DepositLineDetail")]
    Deposit(DepositLine),
}

impl Line {
    #[must_use]
    pub fn detail_type(&self) -> DetailType {
        match self {
            Self::SalesItem(_) => DetailType::SalesItem,
            Self::Group(_) => DetailType::Group,
            Self::DescriptionOnly(_) => DetailType::DescriptionOnly,
            Self::Discount(_) => DetailType::Discount,
            Self::SubTotal(_) => DetailType::SubTotal,
            Self::AccountBasedExpense(_) => DetailType::AccountBasedExpense,
            Self::ItemBasedExpense(_) => DetailType::ItemBasedExpense,
            Self::JournalEntry(_) => DetailType::JournalEntry,
            Self::Deposit(_) => DetailType::Deposit,
        }
    }

    #[must_use]
    pub fn fields(&self) -> &LineFields {
        match self {
            Self::SalesItem(l) => &l.fields,
            Self::Group(l) => &l.fields,
            Self::DescriptionOnly(l) => &l.fields,
            Self::Discount(l) => &l.fields,
            Self::SubTotal(l) => &l.fields,
            Self::AccountBasedExpense(l) => &l.fields,
            Self::ItemBasedExpense(l) => &l.fields,
            Self::JournalEntry(l) => &l.fields,
            Self::Deposit(l) => &l.fields,
        }
    }

    #[must_use]
    pub fn amount(&self) -> Option<Decimal> {
        self.fields().amount
    }

    /// A sales line for `qty` units of `item` at `unit_price`.
    #[must_use]
    pub fn sales_item(item: ReferenceType, qty: Decimal, unit_price: Decimal) -> Self {
        Self::SalesItem(SalesItemLine {
            fields: LineFields::amount(qty * unit_price),
            detail: SalesItemLineDetail {
                item_ref: Some(item),
                qty: Some(qty),
                unit_price: Some(unit_price),
                ..SalesItemLineDetail::default()
            },
            extra: Map::new(),
        })
    }

    /// An expense line booked directly against `account`.
    #[must_use]
    pub fn account_expense(account: ReferenceType, amount: Decimal) -> Self {
        Self::AccountBasedExpense(AccountBasedExpenseLine {
            fields: LineFields::amount(amount),
            detail: AccountBasedExpenseLineDetail {
                account_ref: Some(account),
                ..AccountBasedExpenseLineDetail::default()
            },
            extra: Map::new(),
        })
    }

    #[must_use]
    pub fn description_only(description: impl Into<String>) -> Self {
        Self::DescriptionOnly(DescriptionLine {
            fields: LineFields::default().with_description(description),
            detail: None,
            extra: Map::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesItemLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "SalesItemLineDetail")]
    pub detail: SalesItemLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SalesItemLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_account_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    #[serde(
        default,
        with = "qbo_date_format_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_rate: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "GroupLineDetail")]
    pub detail: GroupLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bundle of lines sold as one group item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_item_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<Line>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Text-only line. The detail object is optional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescriptionLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(
        rename = "DescriptionLineDetail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub detail: Option<DescriptionLineDetail>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptionLineDetail {
    #[serde(
        default,
        with = "qbo_date_format_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "DiscountLineDetail")]
    pub detail: DiscountLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscountLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_based: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_account_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubTotalLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "SubTotalLineDetail")]
    pub detail: SubTotalLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubTotalLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ReferenceType>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountBasedExpenseLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "AccountBasedExpenseLineDetail")]
    pub detail: AccountBasedExpenseLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountBasedExpenseLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    /// `Billable`, `NotBillable` or `HasBeenBilled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemBasedExpenseLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "ItemBasedExpenseLineDetail")]
    pub detail: ItemBasedExpenseLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemBasedExpenseLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable_status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "JournalEntryLineDetail")]
    pub detail: JournalEntryLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingType {
    Debit,
    Credit,
}

/// The customer, vendor or employee a journal line is booked against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JournalEntryEntity {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ref: Option<ReferenceType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JournalEntryLineDetail {
    pub posting_type: PostingType,
    pub account_ref: ReferenceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<JournalEntryEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositLine {
    #[serde(flatten)]
    pub fields: LineFields,
    #[serde(rename = "DepositLineDetail")]
    pub detail: DepositLineDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositLineDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method_ref: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_num: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "Id": "1",
            "LineNum": 1,
            "Amount": 150.0,
            "DetailType": "SalesItemLineDetail",
            "CustomField": "kept",
            "SalesItemLineDetail": {
                "ItemRef": {"value": "5", "name": "Rock Fountain"},
                "Qty": 1,
                "UnitPrice": 150,
                "ServiceDate": "2024-03-01",
                "MarkupInfo": {"PercentBased": false}
            }
        });
        let line: Line = serde_json::from_value(raw).unwrap();
        assert_eq!(line.detail_type(), DetailType::SalesItem);
        assert_eq!(line.amount(), Some(dec!(150)));

        let Line::SalesItem(sales) = &line else {
            panic!("expected a sales line");
        };
        assert_eq!(sales.extra.get("CustomField"), Some(&json!("kept")));
        assert!(sales.detail.extra.contains_key("MarkupInfo"));

        let again: Line = serde_json::from_value(serde_json::to_value(&line).unwrap()).unwrap();
        assert_eq!(again, line);
    }

    #[test]
    fn test_description_only_without_detail() {
        let line: Line = serde_json::from_value(json!({
            "DetailType": "DescriptionOnly",
            "Description": "Thanks for your business"
        }))
        .unwrap();
        let Line::DescriptionOnly(desc) = line else {
            panic!("expected a description line");
        };
        assert!(desc.detail.is_none());
    }
}
