//! Raw telemetry rows and their loaders (CSV and JSON).
//!
//! Column names follow the tick-sampled export format (`@timestamp`,
//! `Room_in`, `victim_0_in_FOV`, ...). Cells are read leniently: timestamps
//! may be numeric seconds or RFC 3339 strings, flags may be booleans, 0/1,
//! or yes/no, and empty or `nan` cells count as missing.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use sartrace_logic::constants::{columns, triage_results};
use sartrace_logic::victims::{Fov, VictimColor};

/// Errors raised while loading telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("bad row at line {line}: {source}")]
    Row {
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required column {0}")]
    MissingColumn(String),

    #[error("unsupported telemetry format {0:?} (expected .csv or .json)")]
    UnsupportedFormat(String),
}

/// One tick sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    /// Seconds since the epoch (or since mission start for relative logs).
    #[serde(rename = "@timestamp", deserialize_with = "de_timestamp")]
    pub timestamp: f64,
    #[serde(rename = "player_ID", default, deserialize_with = "de_text_or_empty")]
    pub player_id: String,
    #[serde(rename = "Room_in", default, deserialize_with = "de_text")]
    pub room: Option<String>,
    #[serde(default, deserialize_with = "de_count")]
    pub num_victims: Option<u32>,
    #[serde(default, deserialize_with = "de_text")]
    pub victim_0_id: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub victim_0_color: Option<String>,
    #[serde(rename = "victim_0_in_FOV", default, deserialize_with = "de_flag")]
    pub victim_0_in_fov: bool,
    #[serde(default, deserialize_with = "de_text")]
    pub victim_1_id: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub victim_1_color: Option<String>,
    #[serde(rename = "victim_1_in_FOV", default, deserialize_with = "de_flag")]
    pub victim_1_in_fov: bool,
    #[serde(rename = "isAVicInFOV", default, deserialize_with = "de_flag")]
    pub is_a_vic_in_fov: bool,
    #[serde(default, deserialize_with = "de_text")]
    pub event_triage_victim_id: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub triage_in_progress: bool,
    #[serde(default, deserialize_with = "de_text")]
    pub triage_result: Option<String>,
}

/// A victim slot that is currently in view.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleVictim {
    pub id: Option<String>,
    pub color: VictimColor,
}

impl TelemetryRow {
    pub fn new(timestamp: f64, player_id: &str, room: &str) -> Self {
        Self {
            timestamp,
            player_id: player_id.to_string(),
            room: Some(room.to_string()),
            ..Default::default()
        }
    }

    /// Put a victim in view in slot 0 or 1.
    pub fn seeing(mut self, slot: usize, id: &str, color: VictimColor) -> Self {
        let (vid, vcolor, in_fov) = match slot {
            0 => (
                &mut self.victim_0_id,
                &mut self.victim_0_color,
                &mut self.victim_0_in_fov,
            ),
            _ => (
                &mut self.victim_1_id,
                &mut self.victim_1_color,
                &mut self.victim_1_in_fov,
            ),
        };
        *vid = Some(id.to_string());
        *vcolor = Some(color.to_string());
        *in_fov = true;
        self.is_a_vic_in_fov = true;
        self.num_victims = Some(self.visible().len() as u32);
        self
    }

    /// Mark a triage of victim `id` in progress.
    pub fn triaging(mut self, id: &str) -> Self {
        self.triage_in_progress = true;
        self.event_triage_victim_id = Some(id.to_string());
        self.triage_result = Some(triage_results::IN_PROGRESS.to_string());
        self
    }

    /// Report a final triage result for victim `id`.
    pub fn with_result(mut self, id: &str, result: &str) -> Self {
        self.event_triage_victim_id = Some(id.to_string());
        self.triage_result = Some(result.to_string());
        self
    }

    /// Victim slots flagged in view whose color parses, in slot order.
    pub fn visible(&self) -> Vec<VisibleVictim> {
        [
            (self.victim_0_in_fov, &self.victim_0_id, &self.victim_0_color),
            (self.victim_1_in_fov, &self.victim_1_id, &self.victim_1_color),
        ]
        .into_iter()
        .filter(|(in_fov, _, _)| *in_fov)
        .filter_map(|(_, id, color)| {
            let color = color.as_deref()?.parse().ok()?;
            Some(VisibleVictim {
                id: id.clone(),
                color,
            })
        })
        .collect()
    }

    /// What the agent sees: the first victim in view, or nothing.
    pub fn fov(&self) -> Fov {
        self.visible()
            .first()
            .map_or(Fov::Nothing, |v| Fov::Victim(v.color))
    }

    /// Whether the row still reports an unfinished triage.
    pub fn result_in_progress(&self) -> bool {
        self.triage_result.as_deref() == Some(triage_results::IN_PROGRESS)
    }

    /// A final triage result, if the row carries one.
    pub fn final_result(&self) -> Option<&str> {
        self.triage_result
            .as_deref()
            .filter(|r| triage_results::FINAL.contains(r))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Cell {
    Bool(bool),
    Num(f64),
    Text(String),
}

fn missing(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("null")
}

fn de_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Cell>::deserialize(d)? {
        None => None,
        Some(Cell::Bool(b)) => Some(b.to_string()),
        Some(Cell::Num(n)) if n.fract() == 0.0 => Some(format!("{}", n as i64)),
        Some(Cell::Num(n)) => Some(n.to_string()),
        Some(Cell::Text(s)) if missing(&s) => None,
        Some(Cell::Text(s)) => Some(s.trim().to_string()),
    })
}

fn de_text_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(de_text(d)?.unwrap_or_default())
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Option::<Cell>::deserialize(d)? {
        None => Ok(false),
        Some(Cell::Bool(b)) => Ok(b),
        Some(Cell::Num(n)) => Ok(n != 0.0),
        Some(Cell::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "0" | "" | "nan" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid flag {:?}", other))),
        },
    }
}

fn de_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    match Option::<Cell>::deserialize(d)? {
        Some(Cell::Num(n)) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as u32)),
        Some(Cell::Text(s)) if !missing(&s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Cell::deserialize(d)? {
        Cell::Num(n) => Ok(n),
        Cell::Text(s) => parse_timestamp(&s).map_err(serde::de::Error::custom),
        Cell::Bool(_) => Err(serde::de::Error::custom("boolean timestamp")),
    }
}

/// Parse a timestamp cell into seconds: plain numbers, RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<f64, String> {
    let t = s.trim();
    if let Ok(n) = t.parse::<f64>() {
        return Ok(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.timestamp_millis() as f64 / 1000.0);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis() as f64 / 1000.0);
        }
    }
    Err(format!("unrecognized timestamp {:?}", s))
}

/// Read rows from CSV. Every required column must be present in the header.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<TelemetryRow>, TelemetryError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    if let Some(col) = columns::REQUIRED
        .iter()
        .find(|col| !headers.iter().any(|h| h == **col))
    {
        return Err(TelemetryError::MissingColumn(col.to_string()));
    }
    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| row.map_err(|source| TelemetryError::Row { line: i + 2, source }))
        .collect()
}

/// Read rows from a JSON array of objects.
pub fn read_json<R: Read>(reader: R) -> Result<Vec<TelemetryRow>, TelemetryError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Load a telemetry file, choosing the reader by extension.
pub fn load_rows(path: &Path) -> Result<Vec<TelemetryRow>, TelemetryError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|source| TelemetryError::Io {
                path: path.to_path_buf(),
                source,
            })
    };
    match ext.as_str() {
        "csv" => read_csv(open()?),
        "json" => read_json(open()?),
        _ => Err(TelemetryError::UnsupportedFormat(ext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "@timestamp,player_ID,Room_in,num_victims,victim_0_id,victim_0_color,victim_0_in_FOV,victim_1_id,victim_1_color,victim_1_in_FOV,isAVicInFOV,event_triage_victim_id,triage_in_progress,triage_result";

    #[test]
    fn test_read_csv() {
        let data = format!(
            "{}\n\
             2020-03-19T17:00:00.000Z,p1,R1,0,,,False,,,False,False,,False,\n\
             2020-03-19T17:00:03.500Z,p1,R2,1,v3,Green,True,,,False,True,v3,1,IN_PROGRESS\n",
            HEADER
        );
        let rows = read_csv(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].room.as_deref(), Some("R1"));
        assert_eq!(rows[0].victim_0_id, None);
        assert!(!rows[0].victim_0_in_fov);
        assert!((rows[1].timestamp - rows[0].timestamp - 3.5).abs() < 1e-9);
        assert_eq!(rows[1].fov(), Fov::Victim(VictimColor::Green));
        assert!(rows[1].triage_in_progress);
        assert!(rows[1].result_in_progress());
        assert_eq!(rows[1].num_victims, Some(1));
    }

    #[test]
    fn test_read_csv_missing_column() {
        let data = "@timestamp,player_ID,Room_in\n1,p1,R1\n";
        match read_csv(data.as_bytes()) {
            Err(TelemetryError::MissingColumn(col)) => assert_eq!(col, "num_victims"),
            other => panic!("expected missing column, got {:?}", other),
        }
    }

    #[test]
    fn test_read_csv_bad_flag() {
        let data = format!("{}\n1,p1,R1,0,,,maybe,,,0,0,,0,\n", HEADER);
        assert!(matches!(
            read_csv(data.as_bytes()),
            Err(TelemetryError::Row { line: 2, .. })
        ));
    }

    #[test]
    fn test_read_json() {
        let json = r#"[
            {"@timestamp": 0, "player_ID": "p1", "Room_in": "R1"},
            {"@timestamp": "2.5", "player_ID": "p1", "Room_in": null,
             "victim_1_color": "Yellow", "victim_1_in_FOV": "yes"}
        ]"#;
        let rows = read_json(json.as_bytes()).unwrap();
        assert_eq!(rows[0].timestamp, 0.0);
        assert_eq!(rows[1].timestamp, 2.5);
        assert_eq!(rows[1].room, None);
        assert_eq!(rows[1].fov(), Fov::Victim(VictimColor::Gold));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("12.25").unwrap(), 12.25);
        let a = parse_timestamp("2020-03-19T17:00:00Z").unwrap();
        let b = parse_timestamp("2020-03-19 17:00:01.5").unwrap();
        assert!((b - a - 1.5).abs() < 1e-9);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_row_builders() {
        let row = TelemetryRow::new(1.0, "p1", "R2")
            .seeing(1, "v9", VictimColor::Gold)
            .triaging("v9");
        assert_eq!(row.fov(), Fov::Victim(VictimColor::Gold));
        assert_eq!(row.visible().len(), 1);
        assert!(row.triage_in_progress);
        let done = TelemetryRow::new(2.0, "p1", "R2").with_result("v9", triage_results::SUCCESSFUL);
        assert_eq!(done.final_result(), Some("SUCCESSFUL"));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_rows(Path::new("trial.xlsx")),
            Err(TelemetryError::UnsupportedFormat(ext)) if ext == "xlsx"
        ));
    }
}
