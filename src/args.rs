//! Flag lookup shared by the command entry points: `--name=value` or
//! `--name value`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;

pub fn cli_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

pub fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    let bare = format!("--{name}");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if *arg == bare
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    let bare = format!("--{name}");
    args.iter().any(|a| *a == bare)
}

pub fn path_arg(args: &[String], name: &str) -> Option<PathBuf> {
    arg_value(args, name).map(PathBuf::from)
}

pub fn date_arg(args: &[String], name: &str) -> Result<Option<NaiveDate>> {
    arg_value(args, name)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .with_context(|| format!("--{name} expects YYYY-MM-DD, got {raw}"))
        })
        .transpose()
}
