//! Ranking table: the latest observation per question (row) and model (column)
//! for one company and one provider.
//!
//! A cell distinguishes three states. `Ranked(n)` is a detected position,
//! `Unranked` is an observation where the company was not detected, and
//! `NotAvailable` means the pair has never been observed.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::providers::{ProviderLabel, ProviderRegistry};
use crate::store::{Company, RankRecord, ResultStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "rank", rename_all = "snake_case")]
pub enum CellValue {
    Ranked(i64),
    Unranked,
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankCell {
    pub value: CellValue,
    /// `previous - current` when the two latest observations are both ranked.
    /// Positive means the company moved up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RankCell {
    pub fn not_available() -> Self {
        Self {
            value: CellValue::NotAvailable,
            change: None,
            observed_at: None,
        }
    }

    /// Build a cell from up to two records, newest first.
    pub fn from_recent(recent: &[RankRecord]) -> Self {
        let Some(latest) = recent.first() else {
            return Self::not_available();
        };
        let value = match latest.rank {
            Some(n) => CellValue::Ranked(n),
            None => CellValue::Unranked,
        };
        let change = match (recent.get(1).and_then(|r| r.rank), latest.rank) {
            (Some(previous), Some(current)) => Some(previous.saturating_sub(current)),
            _ => None,
        };
        Self {
            value,
            change,
            observed_at: Some(latest.observed_at),
        }
    }

    fn render(&self) -> String {
        match (self.value, self.change) {
            (CellValue::Ranked(n), Some(delta)) if delta != 0 => format!("{n} ({delta:+})"),
            (CellValue::Ranked(n), _) => n.to_string(),
            (CellValue::Unranked, _) => "—".to_string(),
            (CellValue::NotAvailable, _) => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumn {
    pub model_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub question_id: i64,
    pub question_text: String,
    /// One cell per column, in column order.
    pub cells: Vec<RankCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingTable {
    pub company: Company,
    pub provider: ProviderLabel,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

impl RankingTable {
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("| Question |");
        for col in &self.columns {
            let _ = write!(out, " {} |", escape_cell(&col.display_name));
        }
        out.push_str("\n|---|");
        for _ in &self.columns {
            out.push_str("---|");
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "| {} |", escape_cell(&row.question_text));
            for cell in &row.cells {
                let _ = write!(out, " {} |", cell.render());
            }
            out.push('\n');
        }
        out
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Build the current ranking table for `company_id` under `label`.
///
/// Reads only; never calls a provider and never creates model rows. Models
/// that have no stored row yet render as a column of `NotAvailable`.
pub async fn build_ranking_table(
    store: &dyn ResultStore,
    registry: &ProviderRegistry,
    company_id: i64,
    label: ProviderLabel,
) -> Result<RankingTable, StoreError> {
    let company = store.get_company(company_id).await?;
    let questions = store.questions_for(company_id).await?;
    let spec = registry.get(label);

    let mut columns = Vec::with_capacity(spec.models.len());
    let mut model_ids = Vec::with_capacity(spec.models.len());
    for model in &spec.models {
        columns.push(TableColumn {
            model_name: model.name.clone(),
            display_name: model.display_name.clone(),
        });
        model_ids.push(store.find_model(&model.name).await?.map(|m| m.id));
    }

    let mut rows = Vec::with_capacity(questions.len());
    for question in questions {
        let mut cells = Vec::with_capacity(model_ids.len());
        for model_id in &model_ids {
            let cell = match model_id {
                Some(model_id) => {
                    RankCell::from_recent(&store.latest_two_for(question.id, *model_id).await?)
                }
                None => RankCell::not_available(),
            };
            cells.push(cell);
        }
        rows.push(TableRow {
            question_id: question.id,
            question_text: question.text,
            cells,
        });
    }

    Ok(RankingTable {
        company,
        provider: label,
        columns,
        rows,
    })
}
