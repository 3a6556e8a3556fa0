//! Static schema table for every entity type the service exposes.
//!
//! The request engine never special-cases an entity type: required fields,
//! read-only fields, length limits, permitted line variants and supported
//! operations all come from the [`EntitySchema`] looked up here.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Fields the service assigns itself and that never appear in a create body.
pub const SERVER_ASSIGNED: &[&str] = &["Id", "SyncToken", "MetaData"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    SparseUpdate,
    Delete,
    Void,
    Query,
    Send,
    Pdf,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::SparseUpdate => "sparse update",
            Self::Delete => "delete",
            Self::Void => "void",
            Self::Query => "query",
            Self::Send => "send",
            Self::Pdf => "pdf",
        })
    }
}

/// The `DetailType` discriminator of a transaction line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailType {
    SalesItem,
    Group,
    DescriptionOnly,
    Discount,
    SubTotal,
    AccountBasedExpense,
    ItemBasedExpense,
    JournalEntry,
    Deposit,
}

impl DetailType {
    pub const ALL: [Self; 9] = [
        Self::SalesItem,
        Self::Group,
        Self::DescriptionOnly,
        Self::Discount,
        Self::SubTotal,
        Self::AccountBasedExpense,
        Self::ItemBasedExpense,
        Self::JournalEntry,
        Self::Deposit,
    ];

    /// Value of the `DetailType` field.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::SalesItem => "SalesItemLineDetail",
            Self::Group => "GroupLineDetail",
            Self::DescriptionOnly => "DescriptionOnly",
            Self::Discount => "DiscountLineDetail",
            Self::SubTotal => "SubTotalLineDetail",
            Self::AccountBasedExpense => "AccountBasedExpenseLineDetail",
            Self::ItemBasedExpense => "ItemBasedExpenseLineDetail",
            Self::JournalEntry => "JournalEntryLineDetail",
            Self::Deposit => "DepositLineDetail",
        }
    }

    /// Name of the field holding the variant's detail object.
    #[must_use]
    pub fn detail_field(self) -> &'static str {
        match self {
            Self::DescriptionOnly => "DescriptionLineDetail",
            other => other.tag(),
        }
    }

    /// Whether a line of this type is invalid without its detail object.
    #[must_use]
    pub fn detail_required(self) -> bool {
        !matches!(self, Self::DescriptionOnly)
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.tag() == tag)
    }
}

impl fmt::Display for DetailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Field(&'static str),
    /// At least one of the fields must be present.
    AnyOf(&'static [&'static str]),
}

#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    /// Path segment under `/v3/company/{realmId}/`.
    pub resource: &'static str,
    pub requirements: &'static [Requirement],
    /// Server-computed fields, rejected on create and dropped from updates.
    pub read_only: &'static [&'static str],
    pub max_lengths: &'static [(&'static str, usize)],
    /// Empty for entities whose lines are kept as raw JSON.
    pub line_variants: &'static [DetailType],
    pub operations: &'static [Operation],
}

impl EntitySchema {
    #[must_use]
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    #[must_use]
    pub fn permits(&self, detail_type: DetailType) -> bool {
        self.line_variants.contains(&detail_type)
    }

    #[must_use]
    pub fn has_line_variants(&self) -> bool {
        !self.line_variants.is_empty()
    }

    #[must_use]
    pub fn is_read_only(&self, field: &str) -> bool {
        self.read_only.contains(&field)
    }

    #[must_use]
    pub fn max_length(&self, field: &str) -> Option<usize> {
        self.max_lengths
            .iter()
            .find_map(|(name, max)| (*name == field).then_some(*max))
    }
}

/// Line variants allowed inside a `GroupLineDetail`.
pub const GROUP_LINE_VARIANTS: &[DetailType] =
    &[DetailType::SalesItem, DetailType::DescriptionOnly];

const SALES_LINES: &[DetailType] = &[
    DetailType::SalesItem,
    DetailType::Group,
    DetailType::DescriptionOnly,
    DetailType::Discount,
    DetailType::SubTotal,
];
const EXPENSE_LINES: &[DetailType] = &[
    DetailType::AccountBasedExpense,
    DetailType::ItemBasedExpense,
];
const NO_LINES: &[DetailType] = &[];

use Operation as Op;

const TRANSACTION_OPS: &[Operation] = &[
    Op::Create,
    Op::Read,
    Op::Update,
    Op::SparseUpdate,
    Op::Delete,
    Op::Query,
];
const NAME_LIST_OPS: &[Operation] = &[
    Op::Create,
    Op::Read,
    Op::Update,
    Op::SparseUpdate,
    Op::Query,
];
const READ_ONLY_OPS: &[Operation] = &[Op::Read, Op::Query];

const DOC_NUMBER: (&str, usize) = ("DocNumber", 21);
const PRIVATE_NOTE: (&str, usize) = ("PrivateNote", 4000);
const PERSON_NAME_REQUIREMENT: Requirement = Requirement::AnyOf(&[
    "DisplayName",
    "GivenName",
    "MiddleName",
    "FamilyName",
    "Title",
    "Suffix",
]);
const PERSON_NAME_LENGTHS: &[(&str, usize)] = &[
    ("DisplayName", 500),
    ("GivenName", 100),
    ("MiddleName", 100),
    ("FamilyName", 100),
    ("Title", 16),
    ("Suffix", 16),
    ("CompanyName", 100),
    ("PrintOnCheckName", 110),
    ("Notes", 2000),
];

macro_rules! schema {
    ($name:literal, $resource:literal, req: $req:expr, ro: $ro:expr, max: $max:expr, lines: $lines:expr, ops: $ops:expr $(,)?) => {
        EntitySchema {
            name: $name,
            resource: $resource,
            requirements: $req,
            read_only: $ro,
            max_lengths: $max,
            line_variants: $lines,
            operations: $ops,
        }
    };
}

use Requirement::{AnyOf, Field};

static ACCOUNT: EntitySchema = schema!("Account", "account",
    req: &[Field("Name"), AnyOf(&["AccountType", "AccountSubType"])],
    ro: &["CurrentBalance", "CurrentBalanceWithSubAccounts", "FullyQualifiedName", "Classification"],
    max: &[("Name", 100), ("AcctNum", 20), ("Description", 100)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static ATTACHABLE: EntitySchema = schema!("Attachable", "attachable",
    req: &[AnyOf(&["Note", "FileName"])],
    ro: &["FileAccessUri", "TempDownloadUri", "Size"],
    max: &[("Note", 2000), ("FileName", 1000)],
    lines: NO_LINES,
    ops: TRANSACTION_OPS,
);
static BILL: EntitySchema = schema!("Bill", "bill",
    req: &[Field("VendorRef"), Field("Line")],
    ro: &["Balance", "TotalAmt", "HomeBalance"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: EXPENSE_LINES,
    ops: TRANSACTION_OPS,
);
static BILL_PAYMENT: EntitySchema = schema!("BillPayment", "billpayment",
    req: &[Field("VendorRef"), Field("PayType"), Field("TotalAmt"), Field("Line")],
    ro: &[],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: NO_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Void, Op::Query],
);
static BUDGET: EntitySchema = schema!("Budget", "budget",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: READ_ONLY_OPS,
);
static CLASS: EntitySchema = schema!("Class", "class",
    req: &[Field("Name")],
    ro: &["FullyQualifiedName"],
    max: &[("Name", 100)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static COMPANY_CURRENCY: EntitySchema = schema!("CompanyCurrency", "companycurrency",
    req: &[Field("Code")],
    ro: &["Name"],
    max: &[("Code", 3)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static COMPANY_INFO: EntitySchema = schema!("CompanyInfo", "companyinfo",
    req: &[Field("CompanyName"), Field("CompanyAddr")],
    ro: &[],
    max: &[("CompanyName", 1024), ("LegalName", 1024)],
    lines: NO_LINES,
    ops: &[Op::Read, Op::Update, Op::SparseUpdate, Op::Query],
);
static CREDIT_MEMO: EntitySchema = schema!("CreditMemo", "creditmemo",
    req: &[Field("CustomerRef"), Field("Line")],
    ro: &["TotalAmt", "Balance", "HomeBalance", "RemainingCredit"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: SALES_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Query, Op::Send, Op::Pdf],
);
static CUSTOMER: EntitySchema = schema!("Customer", "customer",
    req: &[PERSON_NAME_REQUIREMENT],
    ro: &["Balance", "BalanceWithJobs", "FullyQualifiedName", "Level"],
    max: PERSON_NAME_LENGTHS,
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static DEPARTMENT: EntitySchema = schema!("Department", "department",
    req: &[Field("Name")],
    ro: &["FullyQualifiedName"],
    max: &[("Name", 100)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static DEPOSIT: EntitySchema = schema!("Deposit", "deposit",
    req: &[Field("DepositToAccountRef"), Field("Line")],
    ro: &["TotalAmt", "HomeTotalAmt"],
    max: &[PRIVATE_NOTE],
    lines: &[DetailType::Deposit],
    ops: TRANSACTION_OPS,
);
static EMPLOYEE: EntitySchema = schema!("Employee", "employee",
    req: &[AnyOf(&["GivenName", "FamilyName"])],
    ro: &[],
    max: &[("GivenName", 100), ("FamilyName", 100), ("DisplayName", 100), ("PrintOnCheckName", 100)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static ESTIMATE: EntitySchema = schema!("Estimate", "estimate",
    req: &[Field("CustomerRef"), Field("Line")],
    ro: &["TotalAmt", "HomeTotalAmt"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: SALES_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Query, Op::Send, Op::Pdf],
);
static EXCHANGE_RATE: EntitySchema = schema!("Exchangerate", "exchangerate",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: &[Op::Query],
);
static INVOICE: EntitySchema = schema!("Invoice", "invoice",
    req: &[Field("CustomerRef"), Field("Line")],
    ro: &["TotalAmt", "Balance", "HomeBalance", "HomeTotalAmt", "InvoiceLink"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: SALES_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Void, Op::Query, Op::Send, Op::Pdf],
);
static ITEM: EntitySchema = schema!("Item", "item",
    req: &[Field("Name")],
    ro: &["FullyQualifiedName", "Level"],
    max: &[("Name", 100), ("Description", 4000), ("PurchaseDesc", 1000), ("Sku", 100)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static JOURNAL_CODE: EntitySchema = schema!("JournalCode", "journalcode",
    req: &[Field("Name")],
    ro: &[],
    max: &[("Name", 20)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static JOURNAL_ENTRY: EntitySchema = schema!("JournalEntry", "journalentry",
    req: &[Field("Line")],
    ro: &["TotalAmt", "HomeTotalAmt"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: &[DetailType::JournalEntry],
    ops: TRANSACTION_OPS,
);
static PAYMENT: EntitySchema = schema!("Payment", "payment",
    req: &[Field("TotalAmt"), Field("CustomerRef")],
    ro: &["UnappliedAmt"],
    max: &[PRIVATE_NOTE],
    lines: NO_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Void, Op::Query, Op::Send, Op::Pdf],
);
static PAYMENT_METHOD: EntitySchema = schema!("PaymentMethod", "paymentmethod",
    req: &[Field("Name")],
    ro: &[],
    max: &[("Name", 31)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static PREFERENCES: EntitySchema = schema!("Preferences", "preferences",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: &[Op::Update, Op::SparseUpdate, Op::Query],
);
static PURCHASE: EntitySchema = schema!("Purchase", "purchase",
    req: &[Field("PaymentType"), Field("AccountRef"), Field("Line")],
    ro: &["TotalAmt"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: EXPENSE_LINES,
    ops: TRANSACTION_OPS,
);
static PURCHASE_ORDER: EntitySchema = schema!("PurchaseOrder", "purchaseorder",
    req: &[Field("VendorRef"), Field("Line")],
    ro: &["TotalAmt"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: EXPENSE_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Query, Op::Send, Op::Pdf],
);
static REFUND_RECEIPT: EntitySchema = schema!("RefundReceipt", "refundreceipt",
    req: &[Field("DepositToAccountRef"), Field("Line")],
    ro: &["TotalAmt", "Balance", "HomeBalance"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: SALES_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Query, Op::Pdf],
);
static REIMBURSE_CHARGE: EntitySchema = schema!("ReimburseCharge", "reimbursecharge",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: READ_ONLY_OPS,
);
static SALES_RECEIPT: EntitySchema = schema!("SalesReceipt", "salesreceipt",
    req: &[Field("Line")],
    ro: &["TotalAmt", "Balance", "HomeBalance", "HomeTotalAmt"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: SALES_LINES,
    ops: &[Op::Create, Op::Read, Op::Update, Op::SparseUpdate, Op::Delete, Op::Void, Op::Query, Op::Send, Op::Pdf],
);
static TAX_AGENCY: EntitySchema = schema!("TaxAgency", "taxagency",
    req: &[Field("DisplayName")],
    ro: &[],
    max: &[("DisplayName", 100)],
    lines: NO_LINES,
    ops: &[Op::Create, Op::Read, Op::Query],
);
static TAX_CODE: EntitySchema = schema!("TaxCode", "taxcode",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: READ_ONLY_OPS,
);
static TAX_RATE: EntitySchema = schema!("TaxRate", "taxrate",
    req: &[], ro: &[], max: &[], lines: NO_LINES, ops: READ_ONLY_OPS,
);
static TERM: EntitySchema = schema!("Term", "term",
    req: &[Field("Name")],
    ro: &[],
    max: &[("Name", 31)],
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static TIME_ACTIVITY: EntitySchema = schema!("TimeActivity", "timeactivity",
    req: &[Field("NameOf"), AnyOf(&["EmployeeRef", "VendorRef"])],
    ro: &[],
    max: &[("Description", 4000)],
    lines: NO_LINES,
    ops: TRANSACTION_OPS,
);
static TRANSFER: EntitySchema = schema!("Transfer", "transfer",
    req: &[Field("FromAccountRef"), Field("ToAccountRef"), Field("Amount")],
    ro: &[],
    max: &[PRIVATE_NOTE],
    lines: NO_LINES,
    ops: TRANSACTION_OPS,
);
static VENDOR: EntitySchema = schema!("Vendor", "vendor",
    req: &[PERSON_NAME_REQUIREMENT],
    ro: &["Balance"],
    max: PERSON_NAME_LENGTHS,
    lines: NO_LINES,
    ops: NAME_LIST_OPS,
);
static VENDOR_CREDIT: EntitySchema = schema!("VendorCredit", "vendorcredit",
    req: &[Field("VendorRef"), Field("Line")],
    ro: &["TotalAmt", "Balance"],
    max: &[DOC_NUMBER, PRIVATE_NOTE],
    lines: EXPENSE_LINES,
    ops: TRANSACTION_OPS,
);

/// Every entity type the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Account,
    Attachable,
    Bill,
    BillPayment,
    Budget,
    Class,
    CompanyCurrency,
    CompanyInfo,
    CreditMemo,
    Customer,
    Department,
    Deposit,
    Employee,
    Estimate,
    Exchangerate,
    Invoice,
    Item,
    JournalCode,
    JournalEntry,
    Payment,
    PaymentMethod,
    Preferences,
    Purchase,
    PurchaseOrder,
    RefundReceipt,
    ReimburseCharge,
    SalesReceipt,
    TaxAgency,
    TaxCode,
    TaxRate,
    Term,
    TimeActivity,
    Transfer,
    Vendor,
    VendorCredit,
}

impl EntityType {
    pub const ALL: [Self; 35] = [
        Self::Account,
        Self::Attachable,
        Self::Bill,
        Self::BillPayment,
        Self::Budget,
        Self::Class,
        Self::CompanyCurrency,
        Self::CompanyInfo,
        Self::CreditMemo,
        Self::Customer,
        Self::Department,
        Self::Deposit,
        Self::Employee,
        Self::Estimate,
        Self::Exchangerate,
        Self::Invoice,
        Self::Item,
        Self::JournalCode,
        Self::JournalEntry,
        Self::Payment,
        Self::PaymentMethod,
        Self::Preferences,
        Self::Purchase,
        Self::PurchaseOrder,
        Self::RefundReceipt,
        Self::ReimburseCharge,
        Self::SalesReceipt,
        Self::TaxAgency,
        Self::TaxCode,
        Self::TaxRate,
        Self::Term,
        Self::TimeActivity,
        Self::Transfer,
        Self::Vendor,
        Self::VendorCredit,
    ];

    #[must_use]
    pub fn schema(self) -> &'static EntitySchema {
        match self {
            Self::Account => &ACCOUNT,
            Self::Attachable => &ATTACHABLE,
            Self::Bill => &BILL,
            Self::BillPayment => &BILL_PAYMENT,
            Self::Budget => &BUDGET,
            Self::Class => &CLASS,
            Self::CompanyCurrency => &COMPANY_CURRENCY,
            Self::CompanyInfo => &COMPANY_INFO,
            Self::CreditMemo => &CREDIT_MEMO,
            Self::Customer => &CUSTOMER,
            Self::Department => &DEPARTMENT,
            Self::Deposit => &DEPOSIT,
            Self::Employee => &EMPLOYEE,
            Self::Estimate => &ESTIMATE,
            Self::Exchangerate => &EXCHANGE_RATE,
            Self::Invoice => &INVOICE,
            Self::Item => &ITEM,
            Self::JournalCode => &JOURNAL_CODE,
            Self::JournalEntry => &JOURNAL_ENTRY,
            Self::Payment => &PAYMENT,
            Self::PaymentMethod => &PAYMENT_METHOD,
            Self::Preferences => &PREFERENCES,
            Self::Purchase => &PURCHASE,
            Self::PurchaseOrder => &PURCHASE_ORDER,
            Self::RefundReceipt => &REFUND_RECEIPT,
            Self::ReimburseCharge => &REIMBURSE_CHARGE,
            Self::SalesReceipt => &SALES_RECEIPT,
            Self::TaxAgency => &TAX_AGENCY,
            Self::TaxCode => &TAX_CODE,
            Self::TaxRate => &TAX_RATE,
            Self::Term => &TERM,
            Self::TimeActivity => &TIME_ACTIVITY,
            Self::Transfer => &TRANSFER,
            Self::Vendor => &VENDOR,
            Self::VendorCredit => &VENDOR_CREDIT,
        }
    }

    /// Name used in payload envelopes and query statements.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.schema().name
    }

    /// Fails with [`Error::UnsupportedOperation`] unless the type supports `operation`.
    pub fn ensure_supports(self, operation: Operation) -> Result<(), Error> {
        if self.schema().supports(operation) {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation {
                entity: self,
                operation,
            })
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error when parsing an entity type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityTypeError(String);

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unknown entity type: {}", self.0)
    }
}

impl std::error::Error for ParseEntityTypeError {}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    /// Accepts the service's entity names case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEntityTypeError(s.to_string()))
    }
}
