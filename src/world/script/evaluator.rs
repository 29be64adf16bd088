/// Evaluator for script ASTs
///
/// Runs against the live world with an action budget. Reads happen
/// immediately; `set` writes immediately; `cmd` and `output` are collected
/// and handed back so the command engine can dispatch them once the script
/// has finished.
use log::trace;
use rand::Rng;

use super::parser::{AstNode, BinaryOperator};
use crate::world::arena::World;
use crate::world::resolver::{ResolutionContext, ResolveResult};
use crate::world::types::{PropValue, ThingId};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(i64),
    Boolean(bool),
    Thing(ThingId),
    Null,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0,
            Value::String(s) => !s.is_empty() && s != "false",
            Value::Thing(_) => true,
            Value::Null => false,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Thing(id) => format!("%{}", id),
            Value::Null => String::new(),
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

}

impl From<&PropValue> for Value {
    fn from(value: &PropValue) -> Self {
        match value {
            PropValue::Text(s) => Value::String(s.clone()),
            PropValue::Number(n) => Value::Number(*n),
            PropValue::Bool(b) => Value::Boolean(*b),
            PropValue::List(items) => Value::String(items.join(", ")),
        }
    }
}

impl From<Value> for PropValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => PropValue::Text(s),
            Value::Number(n) => PropValue::Number(n),
            Value::Boolean(b) => PropValue::Bool(b),
            Value::Thing(id) => PropValue::Text(format!("%{}", id)),
            Value::Null => PropValue::Text(String::new()),
        }
    }
}

/// Who is running a script and what it may touch.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    /// Thing whose template holds the script.
    pub this: ThingId,
    /// Thing executing the command chain.
    pub me: ThingId,
    /// Source of the triggering event, or `me` outside reactions.
    pub actor: ThingId,
    pub event: Option<String>,
    /// Positional arguments; `$0` is the command word.
    pub args: Vec<String>,
    pub admin: bool,
    pub max_actions: u16,
    actions: u16,
}

impl ScriptContext {
    pub fn new(this: ThingId, me: ThingId, max_actions: u16) -> Self {
        Self {
            this,
            me,
            actor: me,
            event: None,
            args: Vec::new(),
            admin: false,
            max_actions,
            actions: 0,
        }
    }

    pub fn can_execute_action(&self) -> bool {
        self.actions < self.max_actions
    }

    pub fn actions_used(&self) -> u16 {
        self.actions
    }

    fn resolution(&self) -> ResolutionContext {
        ResolutionContext {
            actor: self.me,
            this: self.this,
            event_source: Some(self.actor),
        }
    }
}

pub struct Evaluator<'a> {
    world: &'a mut World,
    context: &'a mut ScriptContext,
    commands: Vec<String>,
    outputs: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(world: &'a mut World, context: &'a mut ScriptContext) -> Self {
        Self {
            world,
            context,
            commands: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, node: &AstNode) -> Result<Value, String> {
        match node {
            AstNode::StringLiteral(s) => Ok(Value::String(s.clone())),
            AstNode::NumberLiteral(n) => Ok(Value::Number(*n)),
            AstNode::BooleanLiteral(b) => Ok(Value::Boolean(*b)),
            AstNode::Variable(name) => Ok(self.evaluate_variable(name)),
            AstNode::Call { name, args } => self.evaluate_call(name, args),
            AstNode::Not(inner) => Ok(Value::Boolean(!self.evaluate(inner)?.is_truthy())),
            AstNode::BinaryOp { op, left, right } => self.evaluate_binary_op(*op, left, right),
            AstNode::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
            AstNode::Sequence(nodes) => {
                let mut last_value = Value::Null;
                for node in nodes {
                    last_value = self.evaluate(node)?;
                }
                Ok(last_value)
            }
        }
    }

    fn evaluate_variable(&self, name: &str) -> Value {
        if let Ok(index) = name.parse::<usize>() {
            return self
                .context
                .args
                .get(index)
                .map(|a| Value::String(a.clone()))
                .unwrap_or(Value::Null);
        }
        match name {
            "this" => Value::Thing(self.context.this),
            "me" => Value::Thing(self.context.me),
            "actor" => Value::Thing(self.context.actor),
            "here" => self
                .world
                .location(self.context.me)
                .map(Value::Thing)
                .unwrap_or(Value::Null),
            "event" => self
                .context
                .event
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "args" => Value::String(self.context.args.iter().skip(1).cloned().collect::<Vec<_>>().join(" ")),
            _ => Value::Null,
        }
    }

    fn evaluate_binary_op(
        &mut self,
        op: BinaryOperator,
        left: &AstNode,
        right: &AstNode,
    ) -> Result<Value, String> {
        match op {
            BinaryOperator::And => {
                if !self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            BinaryOperator::Or => {
                if self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            _ => {
                let l = self.evaluate(left)?;
                let r = self.evaluate(right)?;
                binary(op, l, r)
            }
        }
    }

    fn evaluate_call(&mut self, name: &str, args: &[AstNode]) -> Result<Value, String> {
        if !self.context.can_execute_action() {
            return Err(format!(
                "Action limit reached ({} max)",
                self.context.max_actions
            ));
        }
        self.context.actions += 1;
        trace!("script call {}({} args)", name, args.len());

        match name {
            "cmd" => {
                let line = self.single_arg(name, args)?.as_string();
                self.commands.push(line);
                Ok(Value::Boolean(true))
            }
            "output" => {
                let text = self.single_arg(name, args)?.as_string();
                self.outputs.push(text);
                Ok(Value::Boolean(true))
            }
            "prop" => {
                let [thing, prop] = self.args::<2>(name, args)?;
                let Some(id) = self.thing_of(&thing) else {
                    return Ok(Value::Null);
                };
                Ok(self
                    .world
                    .choose(id, &[prop.as_string().as_str()])
                    .map(Value::from)
                    .unwrap_or(Value::Null))
            }
            "set" => {
                let [thing, prop, value] = self.args::<3>(name, args)?;
                let id = self
                    .thing_of(&thing)
                    .ok_or_else(|| format!("set(): no thing '{}'", thing.as_string()))?;
                if !self.context.admin && id != self.context.this {
                    return Err(format!("set(): may not change %{}", id));
                }
                let prop = prop.as_string();
                self.world
                    .set_prop(id, &prop, PropValue::from(value.clone()))
                    .map_err(|e| e.to_string())?;
                Ok(value)
            }
            "find" => {
                let reference = self.single_arg(name, args)?;
                Ok(self.thing_of(&reference).map(Value::Thing).unwrap_or(Value::Null))
            }
            "location" => {
                let thing = self.single_arg(name, args)?;
                Ok(self
                    .thing_of(&thing)
                    .and_then(|id| self.world.location(id))
                    .map(Value::Thing)
                    .unwrap_or(Value::Null))
            }
            "has" => {
                let [holder, item] = self.args::<2>(name, args)?;
                let Some(holder) = self.thing_of(&holder) else {
                    return Ok(Value::Boolean(false));
                };
                let contents = self.world.contents(holder);
                let found = match item {
                    Value::Thing(id) => contents.contains(&id),
                    other => matches!(
                        self.world.match_among(&contents, &other.as_string()),
                        ResolveResult::Found(_) | ResolveResult::Ambiguous(_)
                    ),
                };
                Ok(Value::Boolean(found))
            }
            "is_closed" => {
                let thing = self.single_arg(name, args)?;
                Ok(Value::Boolean(
                    self.thing_of(&thing)
                        .map(|id| self.world.is_closed(id))
                        .unwrap_or(false),
                ))
            }
            "name" => {
                let thing = self.single_arg(name, args)?;
                Ok(self
                    .thing_of(&thing)
                    .map(|id| Value::String(self.world.display_name(id)))
                    .unwrap_or(Value::Null))
            }
            "chance" => {
                let percent = self.single_arg(name, args)?;
                match percent.as_number() {
                    Some(n) if (0..=100).contains(&n) => {
                        let roll = rand::thread_rng().gen_range(1..=100);
                        Ok(Value::Boolean(roll <= n))
                    }
                    _ => Err("chance() expects a number 0-100".to_string()),
                }
            }
            _ => Err(format!("Unknown function: {}", name)),
        }
    }

    fn single_arg(&mut self, name: &str, args: &[AstNode]) -> Result<Value, String> {
        let [value] = self.args::<1>(name, args)?;
        Ok(value)
    }

    fn args<const N: usize>(&mut self, name: &str, args: &[AstNode]) -> Result<[Value; N], String> {
        if args.len() != N {
            return Err(format!(
                "{}() expects {} argument(s), got {}",
                name,
                N,
                args.len()
            ));
        }
        let mut values = Vec::with_capacity(N);
        for arg in args {
            values.push(self.evaluate(arg)?);
        }
        values
            .try_into()
            .map_err(|_| format!("{}(): argument count changed", name))
    }

    /// Interpret a value as a thing: a thing value, a numeric id, or a
    /// reference resolved from the script's point of view.
    fn thing_of(&self, value: &Value) -> Option<ThingId> {
        match value {
            Value::Thing(id) => Some(*id).filter(|id| self.world.contains(*id)),
            Value::Number(n) => u64::try_from(*n).ok().filter(|id| self.world.contains(*id)),
            Value::String(s) => match self.world.resolve(&self.context.resolution(), s) {
                ResolveResult::Found(id) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<String>) {
        (self.commands, self.outputs)
    }
}

fn binary(op: BinaryOperator, l: Value, r: Value) -> Result<Value, String> {
    let numbers = l.as_number().zip(r.as_number());
    match op {
        BinaryOperator::Equal => Ok(Value::Boolean(loosely_equal(&l, &r))),
        BinaryOperator::NotEqual => Ok(Value::Boolean(!loosely_equal(&l, &r))),
        BinaryOperator::Add => match (&l, &r, numbers) {
            (Value::String(_), _, _) | (_, Value::String(_), _) | (_, _, None) => {
                Ok(Value::String(format!("{}{}", l.as_string(), r.as_string())))
            }
            (_, _, Some((a, b))) => Ok(Value::Number(a.saturating_add(b))),
        },
        BinaryOperator::Subtract => numbers
            .map(|(a, b)| Value::Number(a.saturating_sub(b)))
            .ok_or_else(|| "'-' requires numbers".to_string()),
        BinaryOperator::Greater
        | BinaryOperator::Less
        | BinaryOperator::GreaterEqual
        | BinaryOperator::LessEqual => {
            let (a, b) = numbers.ok_or_else(|| format!("'{}' requires numbers", op))?;
            let result = match op {
                BinaryOperator::Greater => a > b,
                BinaryOperator::Less => a < b,
                BinaryOperator::GreaterEqual => a >= b,
                _ => a <= b,
            };
            Ok(Value::Boolean(result))
        }
        BinaryOperator::And | BinaryOperator::Or => {
            Err(format!("'{}' is evaluated lazily", op))
        }
    }
}

fn loosely_equal(l: &Value, r: &Value) -> bool {
    l == r || (l != &Value::Null && r != &Value::Null && l.as_string() == r.as_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::script::parser::parse_script;

    fn eval(world: &mut World, ctx: &mut ScriptContext, src: &str) -> Result<Value, String> {
        let ast = parse_script(src)?;
        Evaluator::new(world, ctx).evaluate(&ast)
    }

    #[test]
    fn literals_and_arithmetic() {
        let mut world = World::in_memory("script").unwrap();
        let mut ctx = ScriptContext::new(world.lobby(), world.lobby(), 32);
        assert_eq!(eval(&mut world, &mut ctx, "1 + 2 - 5").unwrap(), Value::Number(-2));
        assert_eq!(
            eval(&mut world, &mut ctx, "\"a\" + 1").unwrap(),
            Value::String("a1".into())
        );
        assert_eq!(eval(&mut world, &mut ctx, "\"3\" == 3").unwrap(), Value::Boolean(true));
        assert!(eval(&mut world, &mut ctx, "\"x\" > 1").is_err());
    }

    #[test]
    fn set_is_limited_to_this_unless_admin() {
        let mut world = World::in_memory("script").unwrap();
        let lamp = world.create("lamp", "").unwrap();
        let other = world.create("box", "").unwrap();
        let mut ctx = ScriptContext::new(lamp, lamp, 32);
        eval(&mut world, &mut ctx, "set($this, \"lit\", true)").unwrap();
        assert!(world.flag(lamp, "lit"));
        let script = format!("set(find(\"%{}\"), \"lit\", true)", other);
        assert!(eval(&mut world, &mut ctx, &script).is_err());
        ctx.admin = true;
        eval(&mut world, &mut ctx, &script).unwrap();
        assert!(world.flag(other, "lit"));
    }

    #[test]
    fn commands_and_outputs_are_collected() {
        let mut world = World::in_memory("script").unwrap();
        let mut ctx = ScriptContext::new(world.lobby(), world.lobby(), 32);
        ctx.args = vec!["wave".into(), "hello".into()];
        let ast = parse_script("cmd(\"say \" + $1); output(\"done\")").unwrap();
        let mut evaluator = Evaluator::new(&mut world, &mut ctx);
        evaluator.evaluate(&ast).unwrap();
        let (commands, outputs) = evaluator.into_parts();
        assert_eq!(commands, vec!["say hello".to_string()]);
        assert_eq!(outputs, vec!["done".to_string()]);
    }

    #[test]
    fn action_limit_is_enforced() {
        let mut world = World::in_memory("script").unwrap();
        let mut ctx = ScriptContext::new(world.lobby(), world.lobby(), 3);
        let result = eval(
            &mut world,
            &mut ctx,
            "output(\"1\"); output(\"2\"); output(\"3\"); output(\"4\")",
        );
        assert!(result.unwrap_err().contains("Action limit"));
        assert_eq!(ctx.actions_used(), 3);
    }

    #[test]
    fn has_checks_contents_by_name() {
        let mut world = World::in_memory("script").unwrap();
        let person = world.create("alice", "").unwrap();
        let key = world.create("brass key", "").unwrap();
        world.set_location(key, person).unwrap();
        let mut ctx = ScriptContext::new(person, person, 32);
        assert_eq!(eval(&mut world, &mut ctx, "has($me, \"key\")").unwrap(), Value::Boolean(true));
        assert_eq!(eval(&mut world, &mut ctx, "has($me, \"lamp\")").unwrap(), Value::Boolean(false));
    }
}
