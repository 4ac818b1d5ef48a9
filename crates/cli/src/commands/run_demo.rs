// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `runicorn run-demo`: exercise `init`/`log`/`set_primary_metric`/
//! `finish` end to end against a real storage root,
//! so an operator can watch the write path produce real files without
//! writing a training script.

use runicorn_core::{StorageRoot, SystemClock};
use runicorn_storage::writer::{FieldValue, FinishStatus, MetricMode};
use runicorn_storage::{RunWriter, RunWriterConfig};

use crate::exit_error::ExitError;
use crate::output::{print_value, OutputFormat};

pub fn handle(root: &StorageRoot, format: OutputFormat, path: &str) -> Result<(), ExitError> {
    let writer = RunWriter::new(RunWriterConfig::new(root.clone()));
    let handle = writer
        .init(&SystemClock, path, None, None)
        .map_err(ExitError::from)?;

    handle.set_primary_metric("acc", MetricMode::Max);
    for (step, (loss, acc)) in [(0.91, 0.60), (0.55, 0.78), (0.31, 0.88), (0.22, 0.91)].iter().enumerate() {
        let mut data = std::collections::BTreeMap::new();
        data.insert("loss".to_string(), FieldValue::Number(*loss));
        data.insert("acc".to_string(), FieldValue::Number(*acc));
        handle
            .log(data, Some(step as i64 + 1), Some("train"))
            .map_err(ExitError::from)?;
    }
    handle.log_text("demo run complete").map_err(ExitError::from)?;
    handle.finish(FinishStatus::Finished).map_err(ExitError::from)?;

    print_value(
        format,
        &serde_json::json!({
            "run_id": handle.run_id().as_str(),
            "run_dir": handle.run_dir().display().to_string(),
        }),
    );
    Ok(())
}
