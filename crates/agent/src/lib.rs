//! Battle runtime for the closer arena.
//!
//! Everything that talks to the metered completion service lives here:
//! - `gateway`, `messages_api` and `scripted` define and implement the service boundary
//! - `accountant` prices every call and appends it to the cost ledger
//! - `governor` derives today's budget state from that ledger
//! - `orchestrator` drives a single battle, `referee` grades it
//! - `scheduler` runs batches of battles under global stop conditions
//!
//! Every completion call is ledgered before its result is used, and a ledger
//! write that cannot be completed stops execution instead of running unmetered.

pub mod accountant;
pub mod gateway;
pub mod governor;
pub mod messages_api;
pub mod notify;
pub mod orchestrator;
pub mod prompts;
pub mod referee;
pub mod scheduler;
pub mod scripted;

pub use accountant::{retry_with_backoff, CostAccountant, LedgerWriteError};
pub use gateway::{CompletionGateway, GatewayError};
pub use governor::BudgetGovernor;
pub use messages_api::MessagesApiGateway;
pub use notify::{KillSwitchAlert, LogNotifier, Notifier, WebhookNotifier};
pub use orchestrator::{BattleError, BattleRunner, BattleSettings};
pub use referee::{Referee, RefereeError};
pub use scheduler::{BatchOptions, BatchScheduler, BatchSummary, SchedulerError, StopReason};
pub use scripted::{Script, ScriptedGateway};
