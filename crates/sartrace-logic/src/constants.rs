//! Column names, state variable names, and telemetry vocabularies.
//!
//! Plain `&str` constants shared by the parser, the world builder, and the
//! harness.

pub mod columns {
    pub const TIMESTAMP: &str = "@timestamp";
    pub const PLAYER_ID: &str = "player_ID";
    pub const ROOM_IN: &str = "Room_in";
    pub const NUM_VICTIMS: &str = "num_victims";
    pub const VICTIM_0_ID: &str = "victim_0_id";
    pub const VICTIM_0_COLOR: &str = "victim_0_color";
    pub const VICTIM_0_IN_FOV: &str = "victim_0_in_FOV";
    pub const VICTIM_1_ID: &str = "victim_1_id";
    pub const VICTIM_1_COLOR: &str = "victim_1_color";
    pub const VICTIM_1_IN_FOV: &str = "victim_1_in_FOV";
    pub const IS_A_VIC_IN_FOV: &str = "isAVicInFOV";
    pub const EVENT_TRIAGE_VICTIM_ID: &str = "event_triage_victim_id";
    pub const TRIAGE_IN_PROGRESS: &str = "triage_in_progress";
    pub const TRIAGE_RESULT: &str = "triage_result";

    /// Columns every telemetry file must carry.
    pub const REQUIRED: [&str; 14] = [
        TIMESTAMP,
        PLAYER_ID,
        ROOM_IN,
        NUM_VICTIMS,
        VICTIM_0_ID,
        VICTIM_0_COLOR,
        VICTIM_0_IN_FOV,
        VICTIM_1_ID,
        VICTIM_1_COLOR,
        VICTIM_1_IN_FOV,
        IS_A_VIC_IN_FOV,
        EVENT_TRIAGE_VICTIM_ID,
        TRIAGE_IN_PROGRESS,
        TRIAGE_RESULT,
    ];
}

pub mod triage_results {
    pub const IN_PROGRESS: &str = "IN_PROGRESS";
    pub const SUCCESSFUL: &str = "SUCCESSFUL";
    pub const UNSUCCESSFUL: &str = "UNSUCCESSFUL";

    /// Final results a triage attempt can report.
    pub const FINAL: [&str; 2] = [SUCCESSFUL, UNSUCCESSFUL];
}

pub mod variables {
    /// Owner of world-global variables.
    pub const WORLD: &str = "world";

    pub const PHASE: &str = "phase";
    pub const LOCATION: &str = "location";
    pub const FOV: &str = "fov";
    pub const TRIAGE_IN_PROGRESS: &str = "triage_in_progress";
    pub const TRIAGE_RESULT: &str = "triage_result";
    /// Value of `triage_result` before any attempt has reported.
    pub const NO_RESULT: &str = "none";

    /// Per-location victim count variable for a color, e.g. `victims_Green`.
    pub fn victims(color: crate::victims::VictimColor) -> String {
        format!("victims_{}", color)
    }

    /// Per-agent visit counter for a location, e.g. `visits_R1`.
    pub fn visits(location: &crate::graph::Location) -> String {
        format!("visits_{}", location)
    }
}
