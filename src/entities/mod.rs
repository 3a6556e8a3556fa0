pub mod account;
pub mod bill;
pub mod common;
pub mod customer;
pub mod entity;
pub mod invoice;
pub mod line;

pub use self::{
    account::{Account, AccountClassification, AccountType},
    bill::Bill,
    common::{MetaData, ReferenceType},
    customer::Customer,
    entity::{Deleted, Entity, EntityState, QueryResult, TypedEntity},
    invoice::Invoice,
    line::{Line, LineFields},
};
