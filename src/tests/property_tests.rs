//! Property-based tests using proptest.
//!
//! These tests verify invariants that must hold for *any* input, catching
//! edge cases that hand-written tests miss.

use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;

use crate::blocks::{self, HELLO};
use crate::config::EngineConfig;
use crate::core::port::{Payload, PORT_STOP};
use crate::core::{BlockId, BlockState};
use crate::runtime::{ManualClock, Manager};
use crate::tests::example_blocks::{event_log, events_of, probe_factory, Event};

// ---------------------------------------------------------------------------
// Registry model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(i32),
    Start(i32),
    Stop(i32),
    Del(i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let id = 1..=4i32;
    prop_oneof![
        id.clone().prop_map(Op::Add),
        id.clone().prop_map(Op::Start),
        id.clone().prop_map(Op::Stop),
        id.prop_map(Op::Del),
    ]
}

proptest! {
    /// Any add/start/stop/del sequence leaves the registry exactly as a
    /// simple map of id -> started would, and every call succeeds or fails
    /// as that model predicts.
    #[test]
    fn registry_matches_model(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut manager = Manager::new();
        blocks::register_builtin(manager.factories_mut());
        let mut model: HashMap<i32, bool> = HashMap::new();

        for op in ops {
            match op {
                Op::Add(id) => {
                    let expected = !model.contains_key(&id);
                    prop_assert_eq!(manager.block_add(BlockId(id), HELLO).is_ok(), expected);
                    model.entry(id).or_insert(false);
                }
                Op::Start(id) => {
                    prop_assert_eq!(manager.block_start(BlockId(id)).is_ok(), model.contains_key(&id));
                    if let Some(started) = model.get_mut(&id) {
                        *started = true;
                    }
                }
                Op::Stop(id) => {
                    prop_assert_eq!(manager.block_stop(BlockId(id)).is_ok(), model.contains_key(&id));
                    if let Some(started) = model.get_mut(&id) {
                        *started = false;
                    }
                }
                Op::Del(id) => {
                    let expected = model.get(&id) == Some(&false);
                    prop_assert_eq!(manager.block_del(BlockId(id)).is_ok(), expected);
                    if expected {
                        model.remove(&id);
                    }
                }
            }

            prop_assert_eq!(manager.block_count(), model.len());
            for (id, started) in &model {
                let state = manager.block_get(BlockId(*id)).map(|entry| entry.state());
                let want = if *started { BlockState::Started } else { BlockState::Stopped };
                prop_assert_eq!(state, Some(want));
            }
        }
    }

    /// The dump always lists live blocks in ascending id order.
    #[test]
    fn dump_is_ordered(ids in prop::collection::hash_set(-50..50i32, 0..20)) {
        let mut manager = Manager::new();
        blocks::register_builtin(manager.factories_mut());
        for id in ids.iter().filter(|id| **id != 0) {
            manager.block_add(BlockId(*id), HELLO).unwrap();
        }

        let dump = manager.conf_dump();
        let listed: Vec<i32> = dump
            .split(';')
            .filter(|record| !record.is_empty())
            .map(|record| record.split(' ').next().unwrap().parse().unwrap())
            .collect();
        let mut sorted = listed.clone();
        sorted.sort();
        prop_assert_eq!(listed, sorted);
    }
}

// ---------------------------------------------------------------------------
// Timer ordering
// ---------------------------------------------------------------------------

proptest! {
    /// Timers fire in ascending expiration, ties in arming order.
    #[test]
    fn timers_fire_in_order(delays in prop::collection::vec(0..50u64, 1..40)) {
        let clock = ManualClock::new();
        let log = event_log();
        let mut manager = Manager::with_clock(EngineConfig::default(), clock.clone());
        manager.block_factory_register("probe", probe_factory(&log, PORT_STOP));
        manager.block_add(BlockId(1), "probe").unwrap();

        for (tid, delay) in delays.iter().enumerate() {
            manager
                .timer_add(BlockId(1), tid as i32, Duration::from_millis(*delay), Payload::Empty)
                .unwrap();
        }
        clock.advance(Duration::from_millis(50));
        prop_assert_eq!(manager.timer_check_exp(), delays.len());

        let fired: Vec<i32> = events_of(&log, 1)
            .into_iter()
            .filter_map(|event| match event {
                Event::Timer(tid, _) => Some(tid),
                _ => None,
            })
            .collect();
        let mut expected: Vec<i32> = (0..delays.len() as i32).collect();
        expected.sort_by_key(|tid| delays[*tid as usize]);
        prop_assert_eq!(fired, expected);
    }
}
