pub mod battle;
pub mod ledger;
pub mod persona;
pub mod tier;
