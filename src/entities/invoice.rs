use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::entities::common::{EmailAddress, MemoRef, MetaData, ReferenceType};
use crate::entities::entity::TypedEntity;
use crate::entities::line::Line;
use crate::registry::EntityType;
use crate::utils::date_format::qbo_date_format_option;

/// Email delivery state of an invoice
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmailStatus {
    NotSet,
    NeedToSend,
    EmailSent,
}

/// A sales form where the customer pays later.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<MetaData>,

    /// Reference number (max 21 chars)
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

    pub customer_ref: ReferenceType,

    #[serde(default)]
    pub line: Vec<Line>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_memo: Option<MemoRef>,

    /// Note for internal use (max 4000 chars)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_email: Option<EmailAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_status: Option<EmailStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_term_ref: Option<ReferenceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_ref: Option<ReferenceType>,

    /// Total including tax (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amt: Option<Decimal>,

    /// Amount still owed (read-only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

impl Invoice {
    #[must_use]
    pub fn new(customer: ReferenceType, line: Vec<Line>) -> Self {
        Self {
            customer_ref: customer,
            line,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_doc_number(mut self, doc_number: impl Into<String>) -> Self {
        self.doc_number = Some(doc_number.into());
        self
    }

    #[must_use]
    pub fn with_due_date(mut self, due_date: Date) -> Self {
        self.due_date = Some(due_date);
        self
    }

    #[must_use]
    pub fn with_bill_email(mut self, address: impl Into<String>) -> Self {
        self.bill_email = Some(EmailAddress {
            address: address.into(),
        });
        self
    }
}

impl TypedEntity for Invoice {
    const ENTITY_TYPE: EntityType = EntityType::Invoice;
}
