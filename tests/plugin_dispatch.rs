//! Tests for plugin registration, dispatch snapshots and the lexicon

use std::sync::Arc;

use asmstep::interpreter::NodeId;
use asmstep::interpreter::builder::{NodeSpec, block, ident, int, update};
use asmstep::interpreter::context::{Evaluation, value_of};
use asmstep::interpreter::value::Value;
use asmstep::runtime::error::{EngineError, EvalResult, RegistryError};
use asmstep::runtime::loader::Specification;
use asmstep::runtime::registry::{NodeHandler, Plugin, PluginCatalog};
use asmstep::runtime::state::{Update, UpdateMultiset};
use asmstep::runtime::Location;
use asmstep::{Engine, EngineConfig};

/// `double e` evaluates to twice the integer value of `e`.
struct DoubleTerm;

impl NodeHandler for DoubleTerm {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let Some(operand) = eval.unnamed_children(pos).first().copied() else {
            eval.set_result(pos, Some(Value::Undef), None);
            return Ok(pos);
        };
        if !eval.is_evaluated(operand) {
            return Ok(operand);
        }
        let doubled = match value_of(eval, operand) {
            Value::Integer(n) => Value::Integer(n * 2),
            _ => Value::Undef,
        };
        eval.set_result(pos, Some(doubled), None);
        Ok(pos)
    }
}

/// `mark` writes `true` to `marked(self)`.
fn mark(eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
    let agent = eval.agent().clone();
    let location = Location::new("marked", vec![Value::element(agent.as_str())]);
    let updates = UpdateMultiset::single(Update::set(location, Value::Boolean(true), agent));
    eval.set_result(pos, None, Some(updates));
    Ok(pos)
}

struct ArithmeticPlugin;

impl Plugin for ArithmeticPlugin {
    fn name(&self) -> &'static str {
        "ArithmeticPlugin"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &["double"]
    }

    fn operators(&self) -> &'static [&'static str] {
        &["+"]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![("DoubleTerm", Arc::new(DoubleTerm) as Arc<dyn NodeHandler>)]
    }
}

fn double(operand: NodeSpec) -> NodeSpec {
    NodeSpec::term("DoubleTerm").child(operand)
}

#[test]
fn test_custom_plugin_kinds_evaluate() {
    let catalog = PluginCatalog::standard();
    catalog.register_plugin(&ArithmeticPlugin).unwrap();
    catalog.register_handler("Marks", "MarkRule", mark).unwrap();

    let mut engine = Engine::new(EngineConfig::default(), &catalog).unwrap();
    let spec = Specification::new("custom").agent(
        "a",
        block(vec![
            update(ident("x"), double(double(int(5)))),
            NodeSpec::rule("MarkRule"),
        ]),
    );
    engine.load(&spec).unwrap();
    engine.step().unwrap();

    assert_eq!(
        engine.state().read(&Location::nullary("x")),
        Value::Integer(20)
    );
    let marked = Location::new("marked", vec![Value::element("a")]);
    assert_eq!(engine.state().read(&marked), Value::Boolean(true));
}

#[test]
fn test_unregistered_kind_is_rejected_at_load() {
    let mut engine = Engine::standard(EngineConfig::default()).unwrap();
    let spec = Specification::new("unknown").agent(
        "a",
        block(vec![update(ident("x"), int(1)), double(int(1))]),
    );

    match engine.load(&spec) {
        Err(EngineError::UnregisteredNodeKind { kind, .. }) => assert_eq!(kind, "DoubleTerm"),
        other => panic!("expected unregistered kind, got {:?}", other.err()),
    }
}

#[test]
fn test_duplicate_kind_is_rejected() {
    let catalog = PluginCatalog::standard();
    catalog.register_plugin(&ArithmeticPlugin).unwrap();

    let err = catalog.register_plugin(&ArithmeticPlugin).unwrap_err();
    assert_eq!(
        err,
        RegistryError::DuplicateKind {
            kind: "DoubleTerm".to_string(),
            existing_plugin: "ArithmeticPlugin".to_string(),
            plugin: "ArithmeticPlugin".to_string(),
        }
    );

    let err = catalog
        .register_handler("Shadow", "UpdateRule", mark)
        .unwrap_err();
    assert!(err.to_string().contains("Kernel"));
}

#[test]
fn test_snapshot_ignores_later_registrations() {
    let catalog = PluginCatalog::standard();
    let before = catalog.snapshot();
    catalog.register_plugin(&ArithmeticPlugin).unwrap();
    let after = catalog.snapshot();

    assert!(before.resolve("DoubleTerm").is_none());
    assert!(after.resolve("DoubleTerm").is_some());
    assert!(catalog.has_kind("DoubleTerm"));
    assert_eq!(before.kinds().len() + 1, after.kinds().len());
    assert!(!before.lexicon().keywords.contains_key("double"));
}

#[test]
fn test_lexicon_lists_contributors() {
    let catalog = PluginCatalog::standard();
    catalog.register_plugin(&ArithmeticPlugin).unwrap();
    let table = catalog.snapshot();
    let lexicon = table.lexicon();

    let owners = |word: &str| -> Vec<String> {
        lexicon
            .keywords
            .get(word)
            .map(|plugins| plugins.iter().cloned().collect())
            .unwrap_or_default()
    };
    assert_eq!(owners("choose"), vec!["ChooseRulePlugin"]);
    assert_eq!(owners("seq"), vec!["TurboASMPlugin"]);
    assert_eq!(
        owners("in"),
        vec!["ChooseRulePlugin", "ForallRulePlugin", "Kernel"]
    );

    let plus: Vec<&String> = lexicon.operators["+"].iter().collect();
    assert_eq!(plus, vec!["ArithmeticPlugin", "Kernel"]);

    assert_eq!(table.plugin_of("ChooseRule"), Some("ChooseRulePlugin"));
    assert_eq!(table.plugin_of("DoubleTerm"), Some("ArithmeticPlugin"));
    assert_eq!(table.plugin_of("NoSuchRule"), None);
}

#[test]
fn test_keywords_cannot_be_declared() {
    let mut engine = Engine::standard(EngineConfig::default()).unwrap();
    let spec = Specification::new("clash")
        .rule("choose", &[], NodeSpec::rule("SkipRule"))
        .agent("a", NodeSpec::rule("SkipRule"));

    match engine.load(&spec) {
        Err(EngineError::NameConflict(err)) => {
            assert_eq!(err.name, "choose");
            assert!(err.existing.contains("ChooseRulePlugin"));
        }
        other => panic!("expected name conflict, got {:?}", other.err()),
    }
}
