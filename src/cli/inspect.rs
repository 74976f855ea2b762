// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Read-mostly commands: listing, get, explorer, reject and index.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::workspace::Workspace;
use crate::db::{ColumnType, DbValue, Filter, IndexEntry, IndexQuery, Row, Table};
use crate::errors::DbError;
use crate::files::FileKind;
use crate::trigger::RawScanner;

/// Split `column=value` into its parts.
pub fn parse_condition(text: &str) -> Result<(String, String)> {
    match text.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("filter '{text}' is not of the form column=value"),
    }
}

/// Interpret a command-line value as the column's type. Values that do not
/// parse stay text so the schema check reports them.
fn typed_value(table: &Table, column: &str, raw: &str) -> Result<DbValue, DbError> {
    if column == "rowid" {
        return Ok(raw.parse::<i64>().map_or_else(|_| raw.into(), DbValue::Int));
    }
    let ctype = table.schema().column(column)?.ctype;
    let text = || DbValue::Text(raw.to_string());
    Ok(match ctype {
        ColumnType::Int => raw.parse::<i64>().map_or_else(|_| text(), DbValue::Int),
        ColumnType::Float | ColumnType::Mjd => {
            raw.parse::<f64>().map_or_else(|_| text(), DbValue::Float)
        }
        ColumnType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => DbValue::Bool(true),
            "false" | "0" | "no" => DbValue::Bool(false),
            _ => text(),
        },
        ColumnType::String | ColumnType::IsoDatetime | ColumnType::Path => text(),
    })
}

/// Rows of `table` matching every `column=value` condition, in rowid order.
pub fn explore(
    table: &Table,
    conditions: &[(String, String)],
    limit: Option<usize>,
) -> Result<Vec<Row>, DbError> {
    let mut filter = Filter::new();
    for (column, raw) in conditions {
        filter = filter.eq(column, typed_value(table, column, raw)?);
    }
    filter = filter.order_by("rowid", true);
    if let Some(limit) = limit {
        filter = filter.limit(limit);
    }
    table.get(&filter)
}

pub fn render_rows(table: &Table, rows: &[Row]) -> String {
    let mut columns = vec!["rowid"];
    columns.extend(table.schema().columns.iter().map(|c| c.name));
    let mut out = columns.join("\t");
    out.push('\n');
    for row in rows {
        let cells: Vec<String> = columns.iter().map(|c| row.get(c).to_string()).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// `apero explorer <table> [--where column=value]... [--limit n]`
pub fn explorer(
    ws: &Workspace,
    table: &str,
    conditions: &[String],
    limit: Option<usize>,
) -> Result<()> {
    let Some(table) = ws.databases.table(table) else {
        let names: Vec<&str> = ws.databases.tables().iter().map(|t| t.name()).collect();
        bail!("unknown table '{table}', expected one of {}", names.join(", "));
    };
    let conditions = conditions
        .iter()
        .map(|c| parse_condition(c))
        .collect::<Result<Vec<_>>>()?;
    let rows = explore(table, &conditions, limit)?;
    print!("{}", render_rows(table, &rows));
    println!("({} row(s))", rows.len());
    Ok(())
}

fn parse_kind(kind: Option<&str>) -> Result<Option<FileKind>> {
    kind.map(|k| FileKind::parse(k).with_context(|| format!("unknown file kind '{k}'")))
        .transpose()
}

/// `apero listing [--night n] [--kind k]`
pub fn listing(ws: &Workspace, night: Option<&str>, kind: Option<&str>) -> Result<()> {
    let kind = parse_kind(kind)?;
    let nights = match night {
        Some(night) => vec![night.to_string()],
        None => ws.databases.index.nights(kind)?,
    };
    for night in nights {
        let entries = ws.databases.index.query(&IndexQuery {
            night: Some(night.clone()),
            kind,
            ..IndexQuery::default()
        })?;
        println!("== {night} ({} file(s))", entries.len());
        for entry in entries {
            println!(
                "  {:<32} {:<13} {:<20} {:<16} {}",
                entry.filename,
                entry.output_kind.as_str(),
                entry.dprtype,
                entry.objname.as_deref().unwrap_or("-"),
                entry.produced_by_pid.as_deref().unwrap_or("raw"),
            );
        }
    }
    Ok(())
}

/// Copy the files of `entries` into `outdir`, or only report them when
/// `dry_run` is set. Returns the destination paths.
pub fn export(entries: &[IndexEntry], outdir: &Path, dry_run: bool) -> Result<Vec<PathBuf>> {
    if !dry_run {
        fs::create_dir_all(outdir)
            .with_context(|| format!("cannot create {}", outdir.display()))?;
    }
    let mut copied = Vec::with_capacity(entries.len());
    for entry in entries {
        let target = outdir.join(&entry.filename);
        if !dry_run {
            fs::copy(&entry.path, &target).with_context(|| {
                format!("cannot copy {} to {}", entry.path.display(), target.display())
            })?;
        }
        copied.push(target);
    }
    Ok(copied)
}

/// Filters of `apero get`.
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    pub night: Option<String>,
    pub dprtypes: Vec<String>,
    pub kind: Option<String>,
    pub object: Option<String>,
    pub outdir: PathBuf,
    pub dry_run: bool,
}

pub fn get(ws: &Workspace, request: &GetRequest) -> Result<()> {
    let query = IndexQuery {
        night: request.night.clone(),
        kind: parse_kind(request.kind.as_deref())?,
        dprtypes: request.dprtypes.clone(),
        objname: request.object.clone(),
        produced_by_pid: None,
    };
    let entries = ws.databases.index.query(&query)?;
    let copied = export(&entries, &request.outdir, request.dry_run)?;
    let verb = if request.dry_run { "would copy" } else { "copied" };
    for (entry, target) in entries.iter().zip(&copied) {
        println!("{verb} {} -> {}", entry.path.display(), target.display());
    }
    println!("{} file(s) {verb}", copied.len());
    Ok(())
}

/// Sub-actions of `apero reject`.
#[derive(Debug, Clone)]
pub enum RejectAction {
    Add {
        night: String,
        filename: String,
        reason: String,
    },
    Remove {
        night: String,
        filename: String,
    },
    List {
        night: Option<String>,
    },
}

pub fn reject(ws: &Workspace, action: &RejectAction) -> Result<()> {
    let db = &ws.databases.reject;
    match action {
        RejectAction::Add {
            night,
            filename,
            reason,
        } => {
            db.reject(night, filename, reason)?;
            println!("rejected {night}/{filename}");
        }
        RejectAction::Remove { night, filename } => {
            if db.unreject(night, filename)? {
                println!("restored {night}/{filename}");
            } else {
                println!("{night}/{filename} was not rejected");
            }
        }
        RejectAction::List { night } => {
            for entry in db.list(night.as_deref())? {
                println!(
                    "{} {:<32} {} ({})",
                    entry.night, entry.filename, entry.reason, entry.timestamp
                );
            }
        }
    }
    Ok(())
}

/// `apero index [night]`: one scan of the raw tree.
pub fn index(ws: &Workspace, night: Option<&str>) -> Result<()> {
    let mut scanner = RawScanner::new(
        ws.instrument.clone(),
        ws.databases.index.clone(),
        ws.paths.raw.clone(),
    );
    let reports = match night {
        Some(night) => vec![scanner.scan_night(night)?],
        None => scanner.scan_all()?,
    };
    for report in reports {
        println!(
            "{}: {} indexed, {} unchanged, {} ignored",
            report.night, report.indexed, report.unchanged, report.ignored
        );
    }
    let pruned = ws.databases.index.prune_missing()?;
    if pruned > 0 {
        println!("{pruned} missing product(s) removed from the index");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::db::now_iso;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn workspace(dir: &TempDir) -> Workspace {
        Workspace::open(Profile::new("SPIROU", dir.path())).unwrap()
    }

    fn raw_entry(ws: &Workspace, night: &str, filename: &str, dprtype: &str) -> IndexEntry {
        let path = ws.paths.raw.join(night).join(filename);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"payload").unwrap();
        IndexEntry {
            night: night.to_string(),
            filename: filename.to_string(),
            path,
            dprtype: dprtype.to_string(),
            output_kind: FileKind::Raw,
            produced_by_pid: None,
            timestamp: now_iso(),
            size: 7,
            mtime: 1.0,
            objname: Some("Gl699".to_string()),
            mid_obs_time: Some(59396.3),
            fiber: None,
            header_subset: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_condition() {
        assert_eq!(
            parse_condition("night = 2021-07-01").unwrap(),
            ("night".to_string(), "2021-07-01".to_string())
        );
        assert!(parse_condition("night").is_err());
        assert!(parse_condition("=x").is_err());
    }

    #[test]
    fn test_explore_filters_by_typed_columns() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        ws.databases
            .index
            .upsert(&raw_entry(&ws, "2021-07-01", "a001d.fits", "DARK_DARK_INT"))
            .unwrap();
        ws.databases
            .index
            .upsert(&raw_entry(&ws, "2021-07-02", "b001o.fits", "OBJ_FP"))
            .unwrap();

        let table = ws.databases.table("file_index").unwrap();
        let rows = explore(table, &[("night".into(), "2021-07-02".into())], None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("filename").as_str(), Some("b001o.fits"));

        let rows = explore(table, &[("size".into(), "7".into())], Some(1)).unwrap();
        assert_eq!(rows.len(), 1);

        let rendered = render_rows(table, &rows);
        assert!(rendered.starts_with("rowid\t"));
        assert!(rendered.contains("a001d.fits"));

        assert!(matches!(
            explore(table, &[("nope".into(), "1".into())], None),
            Err(DbError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_export_copies_or_dry_runs() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let entry = raw_entry(&ws, "2021-07-01", "a001d.fits", "DARK_DARK_INT");
        let outdir = dir.path().join("export");

        let planned = export(std::slice::from_ref(&entry), &outdir, true).unwrap();
        assert_eq!(planned, vec![outdir.join("a001d.fits")]);
        assert!(!outdir.exists());

        export(std::slice::from_ref(&entry), &outdir, false).unwrap();
        assert_eq!(fs::read(outdir.join("a001d.fits")).unwrap(), b"payload");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(parse_kind(Some("bogus")).is_err());
        assert_eq!(parse_kind(Some("raw")).unwrap(), Some(FileKind::Raw));
        assert_eq!(parse_kind(None).unwrap(), None);
    }
}
