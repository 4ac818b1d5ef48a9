// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Output formatting shared by every command: `--format table` prints
//! a flat `key: value` listing for interactive use, `--format json`
//! prints pretty JSON for scripting.

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Print a JSON-serializable value, respecting `format`. Table mode
/// renders a JSON object as `key: value` lines; anything else (arrays,
/// scalars) falls back to pretty JSON, since there's no generic
/// tabular shape for those.
pub fn print_value<T: Serialize>(format: OutputFormat, value: &T) {
    let as_value = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(_) => return,
    };
    match (format, &as_value) {
        (OutputFormat::Table, serde_json::Value::Object(map)) => {
            let width = map.keys().map(|k| k.len()).max().unwrap_or(0);
            for (key, val) in map {
                println!("{:width$}  {}", key, render_scalar(val), width = width);
            }
        }
        _ => {
            if let Ok(s) = serde_json::to_string_pretty(&as_value) {
                println!("{s}");
            }
        }
    }
}

fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
