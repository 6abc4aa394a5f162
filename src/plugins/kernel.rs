//! Kernel node kinds: literals, locations, operators and the basic rules.

use std::sync::Arc;

use crate::interpreter::ast::NodeId;
use crate::interpreter::context::{Evaluation, first_unevaluated, spec_error, updates_of, value_of};
use crate::interpreter::environment::ScopeHandle;
use crate::interpreter::value::Value;
use crate::runtime::error::EvalResult;
use crate::runtime::registry::{NodeHandler, Plugin};
use crate::runtime::state::{Location, Update, UpdateMultiset};

/// Integer literal.
pub const NUMBER_TERM: &str = "NumberTerm";
/// Boolean literal.
pub const BOOLEAN_TERM: &str = "BooleanTerm";
/// String literal.
pub const STRING_TERM: &str = "StringTerm";
/// `undef`.
pub const UNDEF_TERM: &str = "UndefTerm";
/// Named element literal.
pub const ELEMENT_TERM: &str = "ElementTerm";
/// Identifier or function application.
pub const FUNCTION_RULE_TERM: &str = "FunctionRuleTerm";
/// Binary operator application.
pub const BINARY_EXPRESSION: &str = "BinaryExpression";
/// Boolean negation.
pub const NOT_EXPRESSION: &str = "NotExpression";
/// `skip`.
pub const SKIP_RULE: &str = "SkipRule";
/// `f(a..) := t`.
pub const UPDATE_RULE: &str = "UpdateRule";
/// Parallel block.
pub const BLOCK_RULE: &str = "BlockRule";
/// `if .. then .. else`.
pub const CONDITIONAL_RULE: &str = "ConditionalRule";
/// `let x = t in R`.
pub const LET_RULE: &str = "LetRule";
/// Invocation of a declared rule.
pub const RULE_CALL: &str = "RuleCall";

/// Update target.
pub const LHS_SLOT: &str = "lhs";
/// Update value.
pub const RHS_SLOT: &str = "rhs";
/// Condition.
pub const GUARD_SLOT: &str = "guard";
/// Branch taken on true.
pub const THEN_SLOT: &str = "then";
/// Branch taken on false.
pub const ELSE_SLOT: &str = "else";
/// Bound value of a `let`.
pub const VALUE_SLOT: &str = "value";
/// Body of a `let`, or the instantiated body of a rule call.
pub const BODY_SLOT: &str = "body";

/// The `self` identifier.
pub const SELF_NAME: &str = "self";

/// Kernel plugin.
pub struct KernelPlugin;

impl Plugin for KernelPlugin {
    fn name(&self) -> &'static str {
        "Kernel"
    }

    fn keywords(&self) -> &'static [&'static str] {
        &[
            "skip", "if", "then", "else", "endif", "let", "in", "endlet", "par", "endpar",
            "true", "false", "undef", "self", "rule", "function", "universe", "derived",
        ]
    }

    fn operators(&self) -> &'static [&'static str] {
        &[":=", "=", "!=", "<", "<=", ">", ">=", "+", "-", "*", "and", "or", "not"]
    }

    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
        vec![
            (NUMBER_TERM, Arc::new(Literal::Number) as Arc<dyn NodeHandler>),
            (BOOLEAN_TERM, Arc::new(Literal::Boolean)),
            (STRING_TERM, Arc::new(Literal::String)),
            (UNDEF_TERM, Arc::new(Literal::Undef)),
            (ELEMENT_TERM, Arc::new(Literal::Element)),
            (FUNCTION_RULE_TERM, Arc::new(FunctionTerm)),
            (BINARY_EXPRESSION, Arc::new(BinaryExpression)),
            (NOT_EXPRESSION, Arc::new(NotExpression)),
            (SKIP_RULE, Arc::new(SkipRule)),
            (UPDATE_RULE, Arc::new(UpdateRule)),
            (BLOCK_RULE, Arc::new(BlockRule)),
            (CONDITIONAL_RULE, Arc::new(ConditionalRule)),
            (LET_RULE, Arc::new(LetRule)),
            (RULE_CALL, Arc::new(RuleCall)),
        ]
    }
}

enum Literal {
    Number,
    Boolean,
    String,
    Undef,
    Element,
}

impl NodeHandler for Literal {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let token = eval.token(pos).unwrap_or_default();
        let value = match self {
            Literal::Number => token
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| spec_error(eval, pos, format!("Invalid number literal '{}'.", token)))?,
            Literal::Boolean => match token {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                other => {
                    return Err(spec_error(
                        eval,
                        pos,
                        format!("Invalid boolean literal '{}'.", other),
                    ));
                }
            },
            Literal::String => Value::String(token.to_string()),
            Literal::Undef => Value::Undef,
            Literal::Element => Value::Element(token.to_string()),
        };
        eval.set_result(pos, Some(value), None);
        Ok(pos)
    }
}

/// Arguments of a function term, evaluated left to right.
fn argument_values(eval: &dyn Evaluation, args: &[NodeId]) -> Vec<Value> {
    args.iter().map(|arg| value_of(eval, *arg)).collect()
}

fn function_name(eval: &dyn Evaluation, pos: NodeId) -> EvalResult<String> {
    eval.token(pos)
        .map(str::to_string)
        .ok_or_else(|| spec_error(eval, pos, "Missing function name."))
}

struct FunctionTerm;

impl NodeHandler for FunctionTerm {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let args = eval.unnamed_children(pos);
        if let Some(next) = first_unevaluated(eval, &args) {
            return Ok(next);
        }
        let name = function_name(eval, pos)?;
        let value = if args.is_empty() {
            if let Some(bound) = eval.lookup(&name) {
                bound.clone()
            } else if name == SELF_NAME {
                Value::Element(eval.agent().to_string())
            } else {
                eval.read(&Location::nullary(name))
            }
        } else {
            let values = argument_values(eval, &args);
            eval.read(&Location::new(name, values))
        };
        eval.set_result(pos, Some(value), None);
        Ok(pos)
    }
}

struct BinaryExpression;

impl NodeHandler for BinaryExpression {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let operands = eval.unnamed_children(pos);
        let [left, right] = operands[..] else {
            return Err(spec_error(eval, pos, "Binary operator needs two operands."));
        };
        if let Some(next) = first_unevaluated(eval, &operands) {
            return Ok(next);
        }
        let op = eval.token(pos).unwrap_or_default().to_string();
        let left = value_of(eval, left);
        let right = value_of(eval, right);
        let value = apply_binary(&op, &left, &right).map_err(|message| spec_error(eval, pos, message))?;
        eval.set_result(pos, Some(value), None);
        Ok(pos)
    }
}

/// Evaluate a binary operator on two values.
///
/// Arithmetic and ordering on UNDEF yield UNDEF.
pub fn apply_binary(op: &str, left: &Value, right: &Value) -> Result<Value, String> {
    let not_applicable = || {
        format!(
            "Operator '{}' is not applicable to {} and {}.",
            op,
            left.denotation(),
            right.denotation()
        )
    };
    match op {
        "=" => return Ok(Value::Boolean(left == right)),
        "!=" => return Ok(Value::Boolean(left != right)),
        "in" => {
            return match right.as_enumerable() {
                Some(domain) => Ok(Value::Boolean(domain.contains(left))),
                None if right.is_undef() => Ok(Value::Undef),
                None => Err(not_applicable()),
            };
        }
        "and" | "or" => {
            let (Some(a), Some(b)) = (left.as_boolean(), right.as_boolean()) else {
                return Err(not_applicable());
            };
            return Ok(Value::Boolean(if op == "and" { a && b } else { a || b }));
        }
        _ => {}
    }

    if left.is_undef() || right.is_undef() {
        return Ok(Value::Undef);
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            "+" => Ok(Value::String(format!("{}{}", a, b))),
            "<" => Ok(Value::Boolean(a < b)),
            "<=" => Ok(Value::Boolean(a <= b)),
            ">" => Ok(Value::Boolean(a > b)),
            ">=" => Ok(Value::Boolean(a >= b)),
            _ => Err(not_applicable()),
        };
    }
    let (Some(a), Some(b)) = (left.as_integer(), right.as_integer()) else {
        return Err(not_applicable());
    };
    let overflow = || format!("Integer overflow in {} {} {}.", a, op, b);
    match op {
        "+" => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
        "-" => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
        "*" => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
        "<" => Ok(Value::Boolean(a < b)),
        "<=" => Ok(Value::Boolean(a <= b)),
        ">" => Ok(Value::Boolean(a > b)),
        ">=" => Ok(Value::Boolean(a >= b)),
        _ => Err(format!("Unknown operator '{}'.", op)),
    }
}

struct NotExpression;

impl NodeHandler for NotExpression {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let Some(operand) = eval.unnamed_children(pos).first().copied() else {
            return Err(spec_error(eval, pos, "Missing operand of 'not'."));
        };
        if !eval.is_evaluated(operand) {
            return Ok(operand);
        }
        let value = match value_of(eval, operand) {
            Value::Boolean(flag) => Value::Boolean(!flag),
            Value::Undef => Value::Undef,
            other => {
                return Err(spec_error(
                    eval,
                    pos,
                    format!("Operator 'not' is not applicable to {}.", other.denotation()),
                ));
            }
        };
        eval.set_result(pos, Some(value), None);
        Ok(pos)
    }
}

struct SkipRule;

impl NodeHandler for SkipRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        eval.set_result(pos, None, Some(UpdateMultiset::new()));
        Ok(pos)
    }
}

/// Location denoted by a function term whose arguments are evaluated.
///
/// Returns `Ok(Err(next))` while an argument still needs evaluating.
pub fn target_location(
    eval: &mut dyn Evaluation,
    target: NodeId,
) -> EvalResult<Result<Location, NodeId>> {
    if eval.kind(target) != FUNCTION_RULE_TERM {
        return Err(spec_error(
            eval,
            target,
            "Update target must be a function term.",
        ));
    }
    let args = eval.unnamed_children(target);
    if let Some(next) = first_unevaluated(eval, &args) {
        return Ok(Err(next));
    }
    let name = function_name(eval, target)?;
    if args.is_empty() && (eval.lookup(&name).is_some() || name == SELF_NAME) {
        return Err(spec_error(
            eval,
            target,
            format!("Cannot update '{}'; it is not a location.", name),
        ));
    }
    let values = argument_values(eval, &args);
    Ok(Ok(Location::new(name, values)))
}

struct UpdateRule;

impl NodeHandler for UpdateRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let (Some(lhs), Some(rhs)) = (eval.child(pos, LHS_SLOT), eval.child(pos, RHS_SLOT)) else {
            return Err(spec_error(eval, pos, "Update rule needs a target and a value."));
        };
        let location = match target_location(eval, lhs)? {
            Ok(location) => location,
            Err(next) => return Ok(next),
        };
        if !eval.is_evaluated(rhs) {
            return Ok(rhs);
        }
        let value = value_of(eval, rhs);
        let update = Update::set(location, value, eval.agent().clone());
        eval.set_result(pos, None, Some(UpdateMultiset::single(update)));
        Ok(pos)
    }
}

struct BlockRule;

impl NodeHandler for BlockRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let rules = eval.unnamed_children(pos);
        if let Some(next) = first_unevaluated(eval, &rules) {
            return Ok(next);
        }
        let mut updates = UpdateMultiset::new();
        for rule in rules {
            updates.absorb(updates_of(eval, rule));
        }
        eval.set_result(pos, None, Some(updates));
        Ok(pos)
    }
}

struct ConditionalRule;

impl NodeHandler for ConditionalRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let (Some(guard), Some(then)) = (eval.child(pos, GUARD_SLOT), eval.child(pos, THEN_SLOT))
        else {
            return Err(spec_error(eval, pos, "Conditional rule needs a guard and a branch."));
        };
        if !eval.is_evaluated(guard) {
            return Ok(guard);
        }
        let flag = value_of(eval, guard)
            .as_boolean()
            .ok_or_else(|| spec_error(eval, guard, "Value of if condition is not Boolean."))?;
        let branch = if flag { Some(then) } else { eval.child(pos, ELSE_SLOT) };
        match branch {
            Some(branch) if !eval.is_evaluated(branch) => Ok(branch),
            Some(branch) => {
                let value = eval.value(branch).cloned();
                let updates = updates_of(eval, branch);
                eval.set_result(pos, value, Some(updates));
                Ok(pos)
            }
            None => {
                eval.set_result(pos, None, Some(UpdateMultiset::new()));
                Ok(pos)
            }
        }
    }
}

struct LetRule;

impl NodeHandler for LetRule {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let (Some(value), Some(body)) = (eval.child(pos, VALUE_SLOT), eval.child(pos, BODY_SLOT))
        else {
            return Err(spec_error(eval, pos, "Let rule needs a value and a body."));
        };
        let Some(var) = eval.token(pos).map(str::to_string) else {
            return Err(spec_error(eval, pos, "Missing variable name."));
        };
        if !eval.is_evaluated(value) {
            return Ok(value);
        }
        if !eval.is_evaluated(body) {
            if eval.scratch().get_mut::<ScopeHandle>(pos).is_none() {
                let bound = value_of(eval, value);
                let handle = eval.bind(&var, bound);
                eval.scratch().insert(pos, handle);
            }
            return Ok(body);
        }
        if let Some(handle) = eval.scratch().take::<ScopeHandle>(pos) {
            eval.unbind(handle)?;
        }
        let result = eval.value(body).cloned();
        let updates = updates_of(eval, body);
        eval.set_result(pos, result, Some(updates));
        Ok(pos)
    }
}

/// Scopes of the parameters bound by an in-flight rule call.
struct CallFrame {
    scopes: Vec<ScopeHandle>,
}

struct RuleCall;

impl NodeHandler for RuleCall {
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        let Some(rule) = eval.token(pos).map(str::to_string) else {
            return Err(spec_error(eval, pos, "Missing rule name."));
        };
        let args = eval.unnamed_children(pos);
        if let Some(next) = first_unevaluated(eval, &args) {
            return Ok(next);
        }
        let params = eval
            .rule_parameters(&rule)
            .ok_or_else(|| spec_error(eval, pos, format!("Undefined rule '{}'.", rule)))?;
        if params.len() != args.len() {
            return Err(spec_error(
                eval,
                pos,
                format!(
                    "Rule '{}' expects {} arguments but got {}.",
                    rule,
                    params.len(),
                    args.len()
                ),
            ));
        }

        let body = match eval.child(pos, BODY_SLOT) {
            Some(body) => body,
            None => eval
                .instantiate_rule(pos, BODY_SLOT, &rule)
                .ok_or_else(|| spec_error(eval, pos, format!("Undefined rule '{}'.", rule)))?,
        };
        if !eval.is_evaluated(body) {
            if eval.scratch().get_mut::<CallFrame>(pos).is_none() {
                let values = argument_values(eval, &args);
                let scopes = params
                    .iter()
                    .zip(values)
                    .map(|(param, value)| eval.bind(param, value))
                    .collect();
                eval.scratch().insert(pos, CallFrame { scopes });
            }
            return Ok(body);
        }

        if let Some(frame) = eval.scratch().take::<CallFrame>(pos) {
            for handle in frame.scopes.into_iter().rev() {
                eval.unbind(handle)?;
            }
        }
        let value = eval.value(body).cloned();
        let updates = updates_of(eval, body);
        eval.set_result(pos, value, Some(updates));
        Ok(pos)
    }
}
