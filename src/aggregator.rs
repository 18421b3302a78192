// =============================================================================
// Profit Aggregator — rolls up profit reports per symbol and in aggregate (§4.7)
// =============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::bus::{schema, MessageBus, ProfitReport};
use crate::config::{profit_path_under, utc_today, Config};
use crate::error::BusError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rollup {
    pub total: Decimal,
    pub unrealized: Decimal,
    pub realized: Decimal,
    pub converted: Decimal,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ProfitReport> for Rollup {
    fn from(report: &ProfitReport) -> Self {
        Self {
            total: report.total,
            unrealized: report.unrealized,
            realized: report.realized,
            converted: report.converted.unwrap_or(dec!(0)),
            timestamp: report.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfitFile {
    pub aggregate: Rollup,
    #[serde(flatten)]
    pub symbols: HashMap<String, Rollup>,
}

pub struct ProfitAggregator {
    bus: std::sync::Arc<MessageBus>,
    data_root: PathBuf,
    file: ProfitFile,
    current_day: chrono::NaiveDate,
}

impl ProfitAggregator {
    pub fn new(bus: std::sync::Arc<MessageBus>, config: &Config) -> Self {
        Self {
            bus,
            data_root: config.data_root.clone(),
            file: ProfitFile::default(),
            current_day: utc_today(),
        }
    }

    pub async fn run(mut self) -> Result<(), BusError> {
        let mut rx = self.bus.subscribe(schema::PROFIT_REPORT).await;
        while let Some(envelope) = rx.recv().await {
            let report: ProfitReport = match serde_json::from_value(envelope.data) {
                Ok(report) => report,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed profit report");
                    continue;
                }
            };
            self.roll_over_if_needed();
            self.apply(&report).await?;
        }
        Ok(())
    }

    fn roll_over_if_needed(&mut self) {
        let today = utc_today();
        if today != self.current_day {
            tracing::info!(previous = %self.current_day, next = %today, "rolling over profit aggregator for new UTC day");
            self.current_day = today;
            self.file = ProfitFile::default();
        }
    }

    async fn apply(&mut self, report: &ProfitReport) -> Result<(), BusError> {
        let rollup = Rollup::from(report);
        self.file.symbols.insert(report.symbol.clone(), rollup.clone());

        let aggregate = &mut self.file.aggregate;
        aggregate.total = self.file.symbols.values().map(|r| r.total).sum();
        aggregate.unrealized = self.file.symbols.values().map(|r| r.unrealized).sum();
        aggregate.realized = self.file.symbols.values().map(|r| r.realized).sum();
        aggregate.converted = self.file.symbols.values().map(|r| r.converted).sum();
        aggregate.timestamp = report.timestamp;

        self.bus
            .publish(&schema::performance_channel(&report.symbol), rollup)
            .await?;
        self.bus
            .publish(schema::PERFORMANCE_AGGREGATE, self.file.aggregate.clone())
            .await?;

        self.persist()?;
        Ok(())
    }

    fn persist(&self) -> Result<(), BusError> {
        let path = profit_path_under(&self.data_root, self.current_day);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| BusError::SchemaViolation {
                channel: schema::PROFIT_REPORT.to_string(),
                reason: "failed to create profit directory".to_string(),
            })?;
        }

        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        let body = serde_json::to_vec_pretty(&self.file)?;
        fs::write(&tmp_path, body).map_err(|_| BusError::SchemaViolation {
            channel: schema::PROFIT_REPORT.to_string(),
            reason: "failed to write profit file".to_string(),
        })?;
        fs::rename(&tmp_path, &path).map_err(|_| BusError::SchemaViolation {
            channel: schema::PROFIT_REPORT.to_string(),
            reason: "failed to finalize profit file".to_string(),
        })?;
        Ok(())
    }
}
