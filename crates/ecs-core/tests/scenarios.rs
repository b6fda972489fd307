//! End-to-end replays of the S5/S6 scenarios (§8) that are fully
//! expressible against this crate's own public API alone -- entity
//! allocation, the archetype graph, checkpoint history, and scheduling all
//! have to cooperate for these to pass, so they live here rather than as a
//! unit test local to one module. The remaining scenarios (S1-S4) need
//! `ecs-replication`'s wire/transaction types and live in that crate's own
//! `tests/` directory instead.

use ecs_core::{ComponentSerde, ComponentValue, Entity, Schedule, System, World, WorldConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Counter(i32);

fn counter_serde() -> ComponentSerde {
    ComponentSerde {
        bytes_per_element: Some(4),
        encode: |v, w| {
            w.write_i32(v.as_any().downcast_ref::<Counter>().unwrap().0);
            Ok(())
        },
        decode: |r| Ok(Box::new(Counter(r.read_i32()?)) as Box<dyn ComponentValue>),
    }
}

/// Round-trip invariant behind S5: a checkpoint taken at a tick, followed
/// immediately by a rollback to that same tick, must restore every live
/// component value exactly, with the schedule then free to re-simulate
/// forward from that point.
#[test]
fn checkpoint_then_rollback_restores_prior_values_then_resimulates() {
    let mut world = World::new(WorldConfig::builder(1).checkpoint_interval(1).build());
    let counter = world.components_mut().register("Counter", counter_serde()).unwrap();
    let e = world.spawn(vec![(counter, Some(Box::new(Counter(0))))]);
    world.commit_transaction();
    world.advance_tick();

    let mut schedule = Schedule::new();
    schedule.add_system(System::new("increment", move |w: &mut World| {
        let current = w
            .get_component_value(e, counter)
            .and_then(|v| v.as_any().downcast_ref::<Counter>().copied())
            .map_or(0, |c| c.0);
        w.force_set_component_value(e, counter, Box::new(Counter(current + 1)));
    }));

    for _ in 0..3 {
        schedule.run(&mut world);
        world.advance_tick();
    }
    assert_eq!(world.tick(), 4);
    let value_at_tick_4 = world.get_component_value(e, counter).unwrap().as_any().downcast_ref::<Counter>().unwrap().0;
    assert_eq!(value_at_tick_4, 3);

    world.rollback_to_tick(1).unwrap();
    assert_eq!(world.tick(), 1);
    let restored = world.get_component_value(e, counter).unwrap().as_any().downcast_ref::<Counter>().unwrap().0;
    assert_eq!(restored, 0, "rollback to tick 1 must restore the value as of that tick");

    schedule.run(&mut world);
    world.advance_tick();
    let resimulated = world.get_component_value(e, counter).unwrap().as_any().downcast_ref::<Counter>().unwrap().0;
    assert_eq!(resimulated, 1, "the system must be free to re-simulate forward from the restored state");
}

/// S6: firing repeatedly for more than `ghost_cleanup_window` ticks spawns
/// and destroys predicted entities in a cycle; ghost cleanup must never
/// despawn a still-live entity, and a reclaimed causal key's transient
/// registry entry must be gone by the time its ID could be reused.
#[test]
fn ghost_cleanup_never_despawns_a_live_entity_across_many_cycles() {
    let mut world = World::new(WorldConfig::builder(1).ghost_cleanup_window(2).build());

    for _ in 0..5 {
        let (predicted, key) = world.spawn_predicted(vec![]);
        assert!(world.is_live(predicted));

        for _ in 0..5 {
            world.advance_tick();
        }
        let despawned = world.ghost_cleanup();

        assert_eq!(despawned, vec![predicted]);
        assert!(!world.is_live(predicted));
        assert!(world.transient().get(key).is_none());
        assert!(!world.rebind_predicted(key, Entity::new(0, 999)));
    }
}

/// The entity graph invariant behind S5/S6's bookkeeping: every live
/// entity's graph membership exactly matches its current component set
/// across a spawn/add/remove/despawn cycle.
#[test]
fn graph_membership_tracks_component_set_through_a_full_entity_lifecycle() {
    let mut world = World::new(WorldConfig::builder(1).build());
    let health = world.components_mut().register("Health", counter_serde()).unwrap();
    let shield = world.components_mut().register("Shield", counter_serde()).unwrap();

    let e = world.spawn(vec![(health, Some(Box::new(Counter(100))))]);
    assert!(world.has_component(e, health));
    assert!(!world.has_component(e, shield));

    world.add_component(e, shield, Some(Box::new(Counter(50))));
    assert!(world.has_component(e, shield));

    world.remove_component(e, health);
    assert!(!world.has_component(e, health));
    assert!(world.has_component(e, shield));

    world.despawn(e);
    assert!(!world.is_live(e));
}
