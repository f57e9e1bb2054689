//! Property tests for trace reconstruction.
//!
//! Exercises: duplicate collapsing is idempotent, event durations account
//! for the whole log, and replaying a parsed trace visits the same rooms
//! the telemetry did.

use proptest::prelude::*;
use sartrace_core::parser::{collapse_duplicates, parse, ParseWarning, ParserConfig, Sample};
use sartrace_core::prelude::*;
use sartrace_core::scenario::ScenarioConfig;
use sartrace_core::telemetry::VisibleVictim;
use sartrace_logic::graph::Location;
use sartrace_logic::victims::VictimColor;

// ── Helpers ────────────────────────────────────────────────────────────

/// 3x3 grid, rows joined south, columns joined east.
fn grid_scenario() -> Scenario {
    let mut triples = Vec::new();
    for r in 0..3 {
        for c in 0..3 {
            if c < 2 {
                triples.push(format!(r#"["R{r}{c}", "E", "R{r}{}"]"#, c + 1));
            }
            if r < 2 {
                triples.push(format!(r#"["R{r}{c}", "S", "R{}{c}"]"#, r + 1));
            }
        }
    }
    let json = format!(r#"{{"adjacency": [{}], "agents": ["p1"]}}"#, triples.join(","));
    ScenarioConfig::from_json_str(&json).unwrap().build().unwrap()
}

fn room(i: usize) -> String {
    format!("R{}{}", i / 3, i % 3)
}

fn walk_strategy() -> impl Strategy<Value = Vec<(usize, f64)>> {
    prop::collection::vec((0..9usize, 0.1f64..5.0), 1..25)
}

fn rows_for(walk: &[(usize, f64)]) -> Vec<TelemetryRow> {
    let mut t = 0.0;
    walk.iter()
        .map(|&(r, dt)| {
            let row = TelemetryRow::new(t, "p1", &room(r));
            t += dt;
            row
        })
        .collect()
}

fn dedup_rooms(samples: &[Sample]) -> Vec<Location> {
    let mut rooms: Vec<Location> = samples.iter().map(|s| s.room.clone()).collect();
    rooms.dedup();
    rooms
}

fn sample_strategy() -> impl Strategy<Value = Vec<Sample>> {
    prop::collection::vec((0..2usize, any::<bool>(), any::<bool>(), 0.0f64..3.0), 0..30).prop_map(
        |fields| {
            let mut t = 0.0;
            fields
                .into_iter()
                .map(|(r, triaging, seeing, dt)| {
                    t += dt;
                    Sample {
                        timestamp: t,
                        duration: 0.0,
                        room: Location::from(["A", "B"][r]),
                        visible: if seeing {
                            vec![VisibleVictim {
                                id: Some("v1".to_string()),
                                color: VictimColor::Green,
                            }]
                        } else {
                            Vec::new()
                        },
                        triage_in_progress: triaging,
                        triage_victim: triaging.then(|| "v1".to_string()),
                        triage_result: None,
                        rows: 1,
                    }
                })
                .collect()
        },
    )
}

// ── Properties ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn collapse_is_idempotent(samples in sample_strategy()) {
        let once = collapse_duplicates(&samples);
        let twice = collapse_duplicates(&once);
        prop_assert_eq!(&once, &twice);
        let rows: usize = once.iter().map(|s| s.rows).sum();
        prop_assert_eq!(rows, samples.len());
        for pair in once.windows(2) {
            prop_assert!(!pair[0].same_fields(&pair[1]));
        }
    }

    #[test]
    fn durations_cover_the_log(walk in walk_strategy()) {
        let scenario = grid_scenario();
        let rows = rows_for(&walk);
        let report = parse(&rows, &scenario.graph, &ParserConfig::for_agent("p1")).unwrap();

        let total: f64 = report.events.iter().map(|e| e.duration).sum();
        let first = report.samples.first().map_or(0.0, |s| s.timestamp);
        let last = report.samples.last().map_or(0.0, |s| s.timestamp);
        prop_assert!((total - (last - first)).abs() < 1e-6);
        // Jumps beyond two hops warn but never drop rows.
        let only_unreachable = report
            .warnings
            .iter()
            .all(|w| matches!(w, ParseWarning::UnreachableMove { .. }));
        prop_assert!(only_unreachable);
    }

    #[test]
    fn replay_visits_the_logged_rooms(walk in walk_strategy(), seed in any::<u64>()) {
        let scenario = grid_scenario();
        let rows = rows_for(&walk);
        let report = parse(&rows, &scenario.graph, &ParserConfig::for_agent("p1")).unwrap();

        let mut world = scenario.world(&scenario.agents).unwrap();
        let out = ReplayEngine::seeded(seed).run(&mut world, &report.events, 0, report.events.len());
        prop_assert!(out.is_complete(), "{:?}", out.halted);
        prop_assert_eq!(room_sequence(&out.trajectory, "p1"), dedup_rooms(&report.samples));
    }
}
