//! Offline conntrack translation.

use std::sync::Arc;

use async_trait::async_trait;

use apguard_api::ConntrackRecord;
use apguard_config::Config;
use apguard_core::{ConnLog, ConnLogSink, ConntrackTranslator, CoreError, MemoryDirectory};

use crate::cli::{ConntrackArgs, ConntrackCommand};
use crate::error::CliError;

/// One JSON object per line on stdout.
struct StdoutSink;

#[async_trait]
impl ConnLogSink for StdoutSink {
    async fn write(&self, log: &ConnLog) -> Result<(), CoreError> {
        println!("{}", serde_json::to_string(log)?);
        Ok(())
    }
}

pub async fn handle(args: &ConntrackArgs, config: &Config) -> Result<(), CliError> {
    match &args.command {
        ConntrackCommand::Translate { file, inventory } => {
            let raw = tokio::fs::read_to_string(file).await?;
            let batch: Vec<ConntrackRecord> = serde_json::from_str(&raw)?;

            let path = inventory.as_ref().unwrap_or(&config.inventory.path);
            let directory = Arc::new(MemoryDirectory::open(path).await?);
            directory.extend_local_addresses(config.conntrack.local_addresses.iter().copied());

            let translator = ConntrackTranslator::new(directory, Arc::new(StdoutSink));
            let report = translator.ingest(&batch).await;
            eprintln!(
                "{} emitted, {} dropped, {} failed",
                report.emitted, report.dropped, report.failed
            );
            Ok(())
        }
    }
}
