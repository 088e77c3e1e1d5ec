#![forbid(unsafe_code)]

//! # rankwatch
//!
//! Track where a company shows up when the same probe questions are asked of
//! several language-model providers, over time.
//!
//! A refresh fans a company's questions out to every model registered for one
//! provider, reads a rank for the company out of each answer, and appends the
//! observation to a SQLite store. The ranking table reads the newest
//! observation per question and model back out, keeping "never observed"
//! apart from "observed, company not found".
//!
//! ```text
//! Refresher ─► run_refresh_batch (per model)
//!           ─► ProviderAdapter::ask_in_refresh (per question)
//!           ─► RankExtractor ─► ResultStore::append_rank
//!
//! build_ranking_table ◄── ResultStore::latest_two_for
//! ```

pub mod adapter;
pub mod batch;
pub mod config;
pub mod extract;
pub mod gateway;
pub mod prompts;
pub mod providers;
pub mod ranking;
pub mod refresh;
pub mod store;

pub use adapter::{GatewayAdapter, ProbeError, ProviderAdapter};
pub use batch::{run_batch, run_refresh_batch, ProbeResult};
pub use config::{ConfigError, RankwatchConfig};
pub use extract::{extract_rank, ExtractionPolicy, RankExtractor};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use providers::{ProviderLabel, ProviderRegistry};
pub use ranking::{build_ranking_table, CellValue, RankCell, RankingTable};
pub use refresh::{FailureKind, RefreshError, RefreshSummary, Refresher};
pub use store::{Company, Question, RankRecord, ResultStore, SqliteResultStore, StoreError};
