//! Integration tests for engine steps
//!
//! Tests the complete flow from loading through agent evaluation to the
//! atomic commit, plus journal and snapshot persistence.

use asmstep::interpreter::builder::{
    NodeSpec, add_to, binary, block, boolean, call, element, forall, func, ident, if_then, int, let_in,
    not, remove_from, set, skip, update,
};
use asmstep::interpreter::value::Value;
use asmstep::runtime::error::EngineError;
use asmstep::runtime::loader::Specification;
use asmstep::runtime::step::StepNumber;
use asmstep::runtime::{AgentId, Location, SchedulePolicy};
use asmstep::{Engine, EngineConfig};
use tempfile::TempDir;

fn engine() -> Engine {
    Engine::standard(EngineConfig {
        seed: Some(1),
        ..EngineConfig::default()
    })
    .unwrap()
}

fn read(engine: &Engine, name: &str) -> Value {
    engine.state().read(&Location::nullary(name))
}

#[test]
fn test_agents_read_the_pre_step_state() {
    let spec = Specification::new("swap")
        .agent("a", update(ident("x"), ident("y")))
        .agent("b", update(ident("y"), ident("x")))
        .initially(Location::nullary("x"), Value::Integer(1))
        .initially(Location::nullary("y"), Value::Integer(2));

    for schedule in [SchedulePolicy::Sequential, SchedulePolicy::Interleaved] {
        let mut engine = Engine::standard(EngineConfig {
            schedule,
            ..EngineConfig::default()
        })
        .unwrap();
        engine.load(&spec).unwrap();

        let record = engine.step().unwrap();
        assert_eq!(record.agents, vec![AgentId::new("a"), AgentId::new("b")]);
        assert_eq!(read(&engine, "x"), Value::Integer(2));
        assert_eq!(read(&engine, "y"), Value::Integer(1));
    }
}

#[test]
fn test_conflicting_agents_reject_the_step() {
    let spec = Specification::new("clash")
        .agent("a", update(ident("x"), int(1)))
        .agent("b", update(ident("x"), int(2)))
        .initially(Location::nullary("x"), Value::Integer(0));
    let mut engine = engine();
    engine.load(&spec).unwrap();

    match engine.step() {
        Err(EngineError::Inconsistent(err)) => {
            assert_eq!(err.location, Location::nullary("x"));
            assert_eq!(err.conflicts.len(), 2);
            let message = err.to_string();
            assert!(message.contains("agent a") && message.contains("agent b"));
        }
        other => panic!("expected inconsistency, got {:?}", other.map(|r| r.step)),
    }
    assert_eq!(read(&engine, "x"), Value::Integer(0));
    assert_eq!(engine.step_number(), StepNumber::zero());
}

#[test]
fn test_agreeing_agents_commit_once() {
    let spec = Specification::new("agree")
        .agent("a", update(ident("x"), int(7)))
        .agent("b", update(ident("x"), int(7)));
    let mut engine = engine();
    engine.load(&spec).unwrap();

    let record = engine.step().unwrap();
    assert_eq!(record.updates.len(), 2);
    assert_eq!(read(&engine, "x"), Value::Integer(7));
    assert_eq!(engine.state().len(), 1);
}

#[test]
fn test_self_denotes_the_agent() {
    let spec = Specification::new("self")
        .agent("a", update(func("owner", vec![ident("self")]), int(1)))
        .agent("b", update(func("owner", vec![ident("self")]), int(2)));
    let mut engine = engine();
    engine.load(&spec).unwrap();
    engine.step().unwrap();

    let owner = |name: &str| Location::new("owner", vec![Value::element(name)]);
    assert_eq!(engine.state().read(&owner("a")), Value::Integer(1));
    assert_eq!(engine.state().read(&owner("b")), Value::Integer(2));
}

#[test]
fn test_failed_agent_does_not_block_others() {
    let spec = Specification::new("partial")
        .agent("a", update(ident("x"), binary("+", int(1), element("e"))))
        .agent("b", update(ident("y"), int(1)));
    let mut engine = engine();
    engine.load(&spec).unwrap();

    let record = engine.step().unwrap();
    assert!(!record.is_clean());
    assert_eq!(record.failures[0].agent, AgentId::new("a"));
    assert!(record.failures[0].message.contains("not applicable"));
    assert_eq!(record.agents, vec![AgentId::new("b")]);
    assert_eq!(read(&engine, "y"), Value::Integer(1));
    assert_eq!(read(&engine, "x"), Value::Undef);

    let again = engine.step().unwrap();
    assert_eq!(again.failures[0].agent, AgentId::new("a"));
    assert_ne!(again.failures[0].invocation, record.failures[0].invocation);
}

#[test]
fn test_set_updates_aggregate_across_agents() {
    let spec = Specification::new("sets")
        .agent("a", add_to(int(3), ident("s")))
        .agent("b", add_to(int(4), ident("s")))
        .agent("c", remove_from(int(1), ident("s")))
        .initially(
            Location::nullary("s"),
            Value::set([Value::Integer(1), Value::Integer(2)]),
        );
    let mut engine = engine();
    engine.load(&spec).unwrap();
    engine.step().unwrap();

    assert_eq!(
        read(&engine, "s"),
        Value::set([2, 3, 4].map(Value::Integer))
    );
}

#[test]
fn test_add_and_remove_same_element_conflicts() {
    let spec = Specification::new("sets")
        .agent("a", add_to(int(3), ident("s")))
        .agent("b", remove_from(int(3), ident("s")));
    let mut engine = engine();
    engine.load(&spec).unwrap();
    assert!(matches!(engine.step(), Err(EngineError::Inconsistent(_))));
}

#[test]
fn test_rules_take_arguments_by_value() {
    let countdown = if_then(
        binary(">", ident("n"), int(0)),
        block(vec![
            update(func("visited", vec![ident("n")]), not(boolean(false))),
            call("Countdown", vec![binary("-", ident("n"), int(1))]),
        ]),
        None,
    );
    let spec = Specification::new("rules")
        .rule("Countdown", &["n"], countdown)
        .agent("a", call("Countdown", vec![int(3)]));
    let mut engine = engine();
    engine.load(&spec).unwrap();
    engine.step().unwrap();

    for n in 1..=3 {
        let location = Location::new("visited", vec![Value::Integer(n)]);
        assert_eq!(engine.state().read(&location), Value::Boolean(true));
    }
    assert_eq!(engine.state().len(), 3);
}

#[test]
fn test_unbounded_recursion_hits_the_budget() {
    let spec = Specification::new("loop")
        .rule("Forever", &[], call("Forever", vec![]))
        .agent("a", call("Forever", vec![]))
        .agent("b", update(ident("alive"), int(1)));
    let mut engine = Engine::standard(EngineConfig {
        max_micro_steps: 500,
        ..EngineConfig::default()
    })
    .unwrap();
    engine.load(&spec).unwrap();

    let record = engine.step().unwrap();
    assert_eq!(record.failures.len(), 1);
    assert!(record.failures[0].message.contains("micro-steps"));
    assert_eq!(read(&engine, "alive"), Value::Integer(1));
}

#[test]
fn test_undefined_rule_fails_the_agent() {
    let spec = Specification::new("missing").agent("a", call("Nope", vec![]));
    let mut engine = engine();
    engine.load(&spec).unwrap();

    let record = engine.step().unwrap();
    assert!(record.failures[0].message.contains("Undefined rule 'Nope'"));
}

#[test]
fn test_forall_and_let() {
    let spec = Specification::new("forall").agent(
        "a",
        forall(
            "i",
            set(vec![int(1), int(2), int(3), int(4)]),
            Some(binary(">", ident("i"), int(2))),
            let_in(
                "d",
                binary("*", ident("i"), int(10)),
                update(func("scaled", vec![ident("i")]), ident("d")),
            ),
            Some(update(ident("none"), int(1))),
        ),
    );
    let mut engine = engine();
    engine.load(&spec).unwrap();
    engine.step().unwrap();

    let scaled = |i: i64| engine.state().read(&Location::new("scaled", vec![Value::Integer(i)]));
    assert_eq!(scaled(3), Value::Integer(30));
    assert_eq!(scaled(4), Value::Integer(40));
    assert_eq!(scaled(1), Value::Undef);
    assert_eq!(read(&engine, "none"), Value::Undef);
}

#[test]
fn test_forall_without_matches_runs_ifnone() {
    let spec = Specification::new("forall").agent(
        "a",
        forall(
            "i",
            set(vec![int(1)]),
            Some(binary(">", ident("i"), int(5))),
            update(ident("hit"), ident("i")),
            Some(update(ident("none"), int(1))),
        ),
    );
    let mut engine = engine();
    engine.load(&spec).unwrap();
    engine.step().unwrap();
    assert_eq!(read(&engine, "none"), Value::Integer(1));
    assert_eq!(read(&engine, "hit"), Value::Undef);
}

#[test]
fn test_each_step_starts_from_a_fresh_tree() {
    let spec = Specification::new("toggle")
        .agent(
            "a",
            if_then(
                binary("=", ident("on"), boolean(true)),
                update(ident("on"), boolean(false)),
                Some(update(ident("on"), boolean(true))),
            ),
        );
    let mut engine = engine();
    engine.load(&spec).unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        engine.step().unwrap();
        seen.push(read(&engine, "on"));
    }
    assert_eq!(
        seen,
        [true, false, true, false].map(Value::Boolean).to_vec()
    );
}

#[test]
fn test_journal_and_snapshots_are_persisted() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("run");
    let spec = Specification::new("counter")
        .agent("a", update(ident("x"), binary("+", ident("x"), int(1))))
        .initially(Location::nullary("x"), Value::Integer(0));

    {
        let mut engine = Engine::standard(EngineConfig {
            root: Some(root.clone()),
            snapshot_interval: 2,
            seed: Some(3),
            ..EngineConfig::default()
        })
        .unwrap();
        engine.load(&spec).unwrap();
        engine.run(5).unwrap();

        let storage = engine.storage().unwrap();
        let records = storage.read_journal().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].step, StepNumber(5));
        assert_eq!(
            storage.snapshot_steps().unwrap(),
            vec![StepNumber(2), StepNumber(4)]
        );
    }

    let mut reopened = Engine::open(root).unwrap();
    assert_eq!(reopened.config().snapshot_interval, 2);
    reopened.load(&spec).unwrap();
    assert_eq!(reopened.restore_latest().unwrap(), Some(StepNumber(4)));
    assert_eq!(read(&reopened, "x"), Value::Integer(4));

    reopened.step().unwrap();
    assert_eq!(reopened.step_number(), StepNumber(5));
    assert_eq!(read(&reopened, "x"), Value::Integer(5));
}

#[test]
fn test_restore_rewinds_the_journal() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("run");
    let spec = Specification::new("counter")
        .agent("a", update(ident("x"), binary("+", ident("x"), int(1))))
        .initially(Location::nullary("x"), Value::Integer(0));
    let config = EngineConfig {
        root: Some(root.clone()),
        snapshot_interval: 2,
        seed: Some(3),
        ..EngineConfig::default()
    };

    {
        let mut engine = Engine::standard(config.clone()).unwrap();
        engine.load(&spec).unwrap();
        engine.run(3).unwrap();
    }

    let err = Engine::standard(config).err().unwrap();
    assert!(err.to_string().contains("already journals 3 steps"));

    let mut reopened = Engine::open(root).unwrap();
    reopened.load(&spec).unwrap();
    assert!(matches!(
        reopened.step(),
        Err(EngineError::UnrestoredJournal(StepNumber(3)))
    ));

    assert_eq!(reopened.restore_latest().unwrap(), Some(StepNumber(2)));
    reopened.run(2).unwrap();
    assert_eq!(read(&reopened, "x"), Value::Integer(4));

    let steps: Vec<u64> = reopened
        .storage()
        .unwrap()
        .read_journal()
        .unwrap()
        .iter()
        .map(|record| record.step.0)
        .collect();
    assert_eq!(steps, vec![1, 2, 3, 4]);
}

#[test]
fn test_skip_only_program_commits_nothing() {
    let spec = Specification::new("idle").agent("a", skip());
    let mut engine = engine();
    engine.load(&spec).unwrap();
    let record = engine.step().unwrap();
    assert!(record.updates.is_empty());
    assert!(record.is_clean());
    assert_eq!(record.state_digest, engine.state().digest());
}

#[test]
fn test_specification_from_json() {
    let spec = Specification::new("json")
        .agent("a", update(ident("x"), NodeSpec::term("NumberTerm").token("41")));
    let text = spec.to_json().unwrap();
    let parsed = Specification::from_json_str(&text).unwrap();

    let mut engine = engine();
    engine.load(&parsed).unwrap();
    engine.step().unwrap();
    assert_eq!(read(&engine, "x"), Value::Integer(41));
}
