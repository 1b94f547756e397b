//! Offset-resumable JSONL parser for coding-agent session logs.
//!
//! Logs are append-only and may be read mid-write, so every line is an
//! independent JSON envelope and anything unparseable is skipped. A parse
//! call consumes only complete lines: the returned offset stops at the end
//! of the last line terminated by a newline, and a dangling partial line is
//! re-read from its own start on the next call once its newline exists.

use crate::types::{Record, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Session log JSONL line structure (assistant turns with usage)
#[derive(Deserialize)]
struct SessionLogLine<'a> {
    #[serde(rename = "type")]
    line_type: Option<&'a str>,
    timestamp: Option<&'a str>,
    uuid: Option<&'a str>,
    #[serde(rename = "sessionId")]
    session_id: Option<&'a str>,
    message: Option<TurnMessage<'a>>,
}

#[derive(Deserialize)]
struct TurnMessage<'a> {
    id: Option<&'a str>,
    model: Option<&'a str>,
    stop_reason: Option<&'a str>,
    usage: Option<TurnUsage>,
    content: Option<Vec<ContentBlock>>,
}

#[derive(Deserialize)]
struct TurnUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

/// Content blocks carry tool invocations; anything non-string in the tool
/// payload is ignored rather than failing the line.
#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    name: Option<String>,
    input: Option<ToolInput>,
}

#[derive(Deserialize, Default)]
struct ToolInput {
    old_string: Option<Value>,
    new_string: Option<Value>,
    content: Option<Value>,
}

/// Result of one parse call.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Deduplicated records in first-seen order.
    pub records: Vec<Record>,
    /// Absolute byte offset of the last complete line's end; resume here.
    pub new_offset: u64,
}

/// Count lines by `\n` occurrences. A final unterminated line does not
/// count as an extra line: `"a\nb"` is 1.
fn newline_count(text: &str) -> u64 {
    text.bytes().filter(|&b| b == b'\n').count() as u64
}

fn string_lines(value: &Option<Value>) -> u64 {
    value
        .as_ref()
        .and_then(|v| v.as_str())
        .map(newline_count)
        .unwrap_or(0)
}

/// Parser for session log files under a Claude-Code-style data directory
/// (`~/.claude/projects/<munged-cwd>/<session>.jsonl`).
pub struct SessionLogParser {
    data_dir: PathBuf,
    /// Munged home-directory prefix stripped from log directory names when
    /// deriving project names (e.g. `-Users-alice`).
    home_prefix: String,
}

fn munge_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '.' { '-' } else { c })
        .collect()
}

impl SessionLogParser {
    /// Create a parser rooted at the default data directory
    /// (`~/.claude/projects/`).
    pub fn new() -> Self {
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .unwrap_or_else(|| {
                eprintln!("[tokroll] Warning: could not determine home directory");
                PathBuf::from(".")
            });
        Self {
            data_dir: home.join(".claude").join("projects"),
            home_prefix: munge_path(&home),
        }
    }

    /// Create a parser with a custom data directory (for testing).
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let home_prefix = directories::BaseDirs::new()
            .map(|d| munge_path(d.home_dir()))
            .unwrap_or_default();
        Self {
            data_dir,
            home_prefix,
        }
    }

    /// Override the munged home prefix used for project derivation.
    pub fn home_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.home_prefix = prefix.into();
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Derive a project name from a log directory name: strip the munged
    /// home prefix, denormalize separators to `/`. An empty result means
    /// the session ran in the home directory itself.
    pub fn project_from_dir_name(&self, dir_name: &str) -> String {
        let stripped = if !self.home_prefix.is_empty() {
            dir_name.strip_prefix(&self.home_prefix).unwrap_or(dir_name)
        } else {
            dir_name
        };
        let project = stripped.trim_start_matches('-').replace('-', "/");
        if project.is_empty() {
            "home".to_string()
        } else {
            project
        }
    }

    /// Project name for a log file path (from its containing directory).
    pub fn project_for_path(&self, path: &Path) -> String {
        path.parent()
            .and_then(|dir| dir.file_name())
            .map(|name| self.project_from_dir_name(&name.to_string_lossy()))
            .unwrap_or_else(|| "home".to_string())
    }

    /// Parse the byte range `[from_offset, file_bytes.len())` of one log
    /// file. Records sharing an `id` within the range are merged
    /// last-write-wins with tool-set union, preserving first-seen order.
    pub fn parse_slice(&self, file_bytes: &[u8], from_offset: usize, project: &str) -> ParseOutcome {
        let slice = file_bytes.get(from_offset..).unwrap_or(&[]);
        let (records, consumed) = self.parse_bytes(slice, project);
        ParseOutcome {
            records,
            new_offset: (from_offset + consumed) as u64,
        }
    }

    /// Read one file from `from_offset` to EOF and parse the new bytes.
    /// The returned offset is absolute within the file.
    pub fn parse_file(&self, path: &Path, from_offset: u64) -> Result<ParseOutcome> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(from_offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let project = self.project_for_path(path);
        let (records, consumed) = self.parse_bytes(&buf, &project);
        Ok(ParseOutcome {
            records,
            new_offset: from_offset + consumed as u64,
        })
    }

    /// Full parse of many files in parallel, merged by `id` across files.
    /// Used by full-history loaders rebuilding a tenant from scratch.
    pub fn parse_files(&self, paths: &[PathBuf]) -> Vec<Record> {
        let per_file: Vec<Vec<Record>> = paths
            .par_iter()
            .map(|path| match self.parse_file(path, 0) {
                Ok(outcome) => outcome.records,
                Err(e) => {
                    eprintln!("[tokroll] Warning: failed to parse {:?}: {}", path, e);
                    Vec::new()
                }
            })
            .collect();

        let mut records: Vec<Record> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for file_records in per_file {
            for record in file_records {
                match index.entry(record.id.clone()) {
                    Entry::Occupied(slot) => records[*slot.get()].merge_from(record),
                    Entry::Vacant(slot) => {
                        slot.insert(records.len());
                        records.push(record);
                    }
                }
            }
        }
        records
    }

    /// All session log files under the data directory.
    pub fn discover_logs(&self) -> Vec<PathBuf> {
        let pattern = self.data_dir.join("*/*.jsonl");
        glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|e| e.ok()).collect())
            .unwrap_or_default()
    }

    /// Scan complete lines only; `consumed` stops at the last newline so a
    /// partial trailing line is re-read by the next call.
    fn parse_bytes(&self, bytes: &[u8], project: &str) -> (Vec<Record>, usize) {
        let mut records: Vec<Record> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut consumed = 0usize;
        let mut line_start = 0usize;

        for (pos, &byte) in bytes.iter().enumerate() {
            if byte != b'\n' {
                continue;
            }
            let mut line = &bytes[line_start..pos];
            consumed = pos + 1;
            line_start = pos + 1;
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                continue;
            }
            // simd-json needs a mutable buffer
            let mut owned = line.to_vec();
            if let Some(record) = self.parse_line(&mut owned, project) {
                match index.entry(record.id.clone()) {
                    Entry::Occupied(slot) => records[*slot.get()].merge_from(record),
                    Entry::Vacant(slot) => {
                        slot.insert(records.len());
                        records.push(record);
                    }
                }
            }
        }

        (records, consumed)
    }

    /// Parse a single JSONL line (zero-copy with borrowed strings).
    /// Anything that is not an assistant turn with a usage block — or that
    /// fails to decode — yields `None`; bad lines are never fatal.
    fn parse_line(&self, line: &mut [u8], project: &str) -> Option<Record> {
        if line.is_empty() {
            return None;
        }

        let data: SessionLogLine = simd_json::from_slice(line).ok()?;

        if data.line_type != Some("assistant") {
            return None;
        }
        let message = data.message.as_ref()?;
        let usage = message.usage.as_ref()?;

        // Message identity: embedded message id, falling back to the
        // envelope's own unique id. Neither means no dedup key.
        let id = message.id.or(data.uuid)?.to_string();

        // An unparseable timestamp is treated the same as an absent one.
        let timestamp = data
            .timestamp
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut tools: HashSet<String> = HashSet::new();
        let mut lines_added = 0u64;
        let mut lines_removed = 0u64;
        let mut lines_written = 0u64;

        if let Some(blocks) = &message.content {
            for block in blocks {
                if block.block_type.as_deref() != Some("tool_use") {
                    continue;
                }
                let Some(name) = &block.name else { continue };
                tools.insert(name.clone());

                let input = block.input.as_ref();
                match name.as_str() {
                    "Edit" => {
                        if let Some(input) = input {
                            lines_added += string_lines(&input.new_string);
                            lines_removed += string_lines(&input.old_string);
                        }
                    }
                    "Write" => {
                        if let Some(input) = input {
                            lines_written += string_lines(&input.content);
                        }
                    }
                    _ => {}
                }
            }
        }

        Some(Record {
            id,
            timestamp,
            model: message.model.unwrap_or("unknown").to_string(),
            session_id: data.session_id.unwrap_or_default().to_string(),
            project: project.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            tools,
            stop_reason: message.stop_reason.map(String::from),
            lines_added,
            lines_removed,
            lines_written,
        })
    }
}

impl Default for SessionLogParser {
    fn default() -> Self {
        Self::new()
    }
}
