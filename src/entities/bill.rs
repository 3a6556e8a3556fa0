use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::entities::common::{MetaData, ReferenceType};
use crate::entities::entity::TypedEntity;
use crate::entities::line::Line;
use crate::registry::EntityType;
use crate::utils::date_format::qbo_date_format_option;

/// An accounts payable transaction from a vendor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bill {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaData>,

    pub vendor_ref: ReferenceType,

    #[serde(default)]
    pub line: Vec<Line>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,

    #[serde(
        default,
        with = "qbo_date_format_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub txn_date: Option<Date>,

    #[serde(
        default,
        with = "qbo_date_format_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Date>,

    /// Payables account the bill is credited to
    #[serde(
        rename = "APAccountRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ap_account_ref: Option<ReferenceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_term_ref: Option<ReferenceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_ref: Option<ReferenceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_note: Option<String>,

    /// Total of all lines (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amt: Option<Decimal>,

    /// Amount still to be paid (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

impl Bill {
    #[must_use]
    pub fn new(vendor: ReferenceType, line: Vec<Line>) -> Self {
        Self {
            vendor_ref: vendor,
            line,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_due_date(mut self, due_date: Date) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

impl TypedEntity for Bill {
    const ENTITY_TYPE: EntityType = EntityType::Bill;
}
