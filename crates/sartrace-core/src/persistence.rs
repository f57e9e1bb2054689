//! Save/Load functionality for replay trajectories
//!
//! Uses bincode for compact binary storage, preceded by a format version.
//! JSON export is provided for downstream consumers that do not read bincode.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::replay::Trajectory;

/// Version number for trajectory files (increment when the format changes)
pub const TRAJECTORY_VERSION: u32 = 1;

/// Errors that can occur during save/load
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Trajectory version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Save a trajectory to a writer
pub fn save_trajectory<W: Write>(mut writer: W, trajectory: &Trajectory) -> Result<(), SaveError> {
    bincode::serialize_into(&mut writer, &TRAJECTORY_VERSION)?;
    bincode::serialize_into(&mut writer, trajectory)?;
    writer.flush()?;
    Ok(())
}

/// Load a trajectory from a reader
pub fn load_trajectory<R: Read>(mut reader: R) -> Result<Trajectory, SaveError> {
    let version: u32 = bincode::deserialize_from(&mut reader)?;
    if version != TRAJECTORY_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: TRAJECTORY_VERSION,
            found: version,
        });
    }
    Ok(bincode::deserialize_from(reader)?)
}

pub fn save_trajectory_file(path: &Path, trajectory: &Trajectory) -> Result<(), SaveError> {
    save_trajectory(BufWriter::new(File::create(path)?), trajectory)
}

pub fn load_trajectory_file(path: &Path) -> Result<Trajectory, SaveError> {
    load_trajectory(BufReader::new(File::open(path)?))
}

/// Write a trajectory as pretty-printed JSON
pub fn write_trajectory_json<W: Write>(writer: W, trajectory: &Trajectory) -> Result<(), SaveError> {
    serde_json::to_writer_pretty(writer, trajectory)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::TrajectoryStep;
    use crate::trace::{EventKind, TraceEvent};
    use crate::world::{Snapshot, Value};
    use sartrace_logic::graph::{Direction, Location};
    use sartrace_logic::victims::Fov;
    use std::collections::BTreeMap;

    fn sample_trajectory() -> Trajectory {
        let snapshot = Snapshot {
            clock: 3,
            values: BTreeMap::from([(
                "p1".to_string(),
                BTreeMap::from([
                    ("location".to_string(), Value::from("R1")),
                    ("visits_R1".to_string(), Value::Int(1)),
                    ("triage_in_progress".to_string(), Value::Bool(false)),
                ]),
            )]),
        };
        Trajectory {
            steps: vec![TrajectoryStep {
                index: 1,
                snapshot: snapshot.clone(),
                event: TraceEvent {
                    timestamp: 3.5,
                    duration: 3.5,
                    attempt: 0,
                    agent: "p1".to_string(),
                    sample: 1,
                    kind: EventKind::Move {
                        direction: Some(Direction::East),
                        destination: Location::from("R2"),
                        observed_fov: Some(Fov::Nothing),
                    },
                },
            }],
            final_state: Some(snapshot),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let trajectory = sample_trajectory();
        let mut buffer = Vec::new();
        save_trajectory(&mut buffer, &trajectory).expect("Save failed");
        let loaded = load_trajectory(&buffer[..]).expect("Load failed");
        assert_eq!(loaded, trajectory);
    }

    #[test]
    fn test_version_mismatch() {
        let mut buffer = Vec::new();
        bincode::serialize_into(&mut buffer, &(TRAJECTORY_VERSION + 1)).unwrap();
        match load_trajectory(&buffer[..]) {
            Err(SaveError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, TRAJECTORY_VERSION);
                assert_eq!(found, TRAJECTORY_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_json_export() {
        let mut out = Vec::new();
        write_trajectory_json(&mut out, &sample_trajectory()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["steps"][0]["snapshot"]["clock"], 3);
        assert_eq!(json["steps"][0]["event"]["agent"], "p1");
    }
}
