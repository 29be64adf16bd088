//! Sandboxed script language for callable command templates.
//!
//! A template whose text starts with `!` is a script rather than a list of
//! command lines. Scripts cannot reach anything outside the world: they read
//! properties, set properties on their own thing (or anywhere, for admins),
//! and queue command lines and output.
//!
//! **Limits:** script length and the number of calls per run are configured
//! through `EngineLimits`; expression nesting is capped by the parser.

pub mod evaluator;
pub mod parser;

use log::debug;

pub use evaluator::{Evaluator, ScriptContext, Value};
pub use parser::{parse_script, AstNode, BinaryOperator};

use crate::logutil::escape_log;
use crate::world::arena::World;
use crate::world::errors::WorldError;
use crate::world::types::EngineLimits;

/// What a finished script produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    pub value: Value,
    /// Lines queued with `cmd()`, dispatched in order by the caller.
    pub commands: Vec<String>,
    pub outputs: Vec<String>,
}

/// Parse without running, so bad scripts are refused when they are stored.
pub fn validate_script(source: &str, limits: &EngineLimits) -> Result<AstNode, WorldError> {
    if source.chars().count() > limits.max_script_length {
        return Err(WorldError::Script(format!(
            "script longer than {} characters",
            limits.max_script_length
        )));
    }
    parse_script(source).map_err(WorldError::Script)
}

pub fn run_script(
    world: &mut World,
    context: &mut ScriptContext,
    source: &str,
) -> Result<ScriptOutcome, WorldError> {
    let ast = validate_script(source, &world.limits())?;
    let mut evaluator = Evaluator::new(world, context);
    let value = evaluator.evaluate(&ast).map_err(WorldError::Script)?;
    let (commands, outputs) = evaluator.into_parts();
    debug!(
        "script on %{} -> {:?} ({} command(s)): {}",
        context.this,
        value,
        commands.len(),
        escape_log(source)
    );
    Ok(ScriptOutcome {
        value,
        commands,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_scripts_are_refused() {
        let limits = EngineLimits {
            max_script_length: 10,
            ..EngineLimits::default()
        };
        assert!(validate_script("output(\"far too long\")", &limits).is_err());
        assert!(validate_script("1 + 1", &limits).is_ok());
    }

    #[test]
    fn run_script_returns_value_and_queued_lines() {
        let mut world = World::in_memory("script").unwrap();
        let lobby = world.lobby();
        let mut ctx = ScriptContext::new(lobby, lobby, 8);
        let outcome = run_script(&mut world, &mut ctx, "cmd(\"look\"); name($this)").unwrap();
        assert_eq!(outcome.value, Value::String("the lobby".into()));
        assert_eq!(outcome.commands, vec!["look".to_string()]);
        assert!(outcome.outputs.is_empty());
    }
}
