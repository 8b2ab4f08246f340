//! Loop bodies, parsed once and replayed.

use super::ScriptContext;
use super::directive::{Directive, Iterations};
use crate::error::ScriptError;
use std::time::Duration;

/// One step of a loop body.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopAction {
    SendCommand(String),
    Sleep(Duration),
}

/// The body of a `loopbegin` .. `loopend` block and how often to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopPlan {
    pub actions: Vec<LoopAction>,
    pub iterations: Iterations,
}

impl LoopPlan {
    /// Read the loop body from `ctx`, which must be positioned just after
    /// the `loopbegin` on line `begin_line`.
    ///
    /// Only commands and `sleep` may appear in a body. On any other directive
    /// the rest of the body is still consumed through `loopend`, so none of
    /// it runs, and the first offending line is reported. A nested
    /// `loopbegin` is rejected the same way, and its own `loopend` does not
    /// close this loop. Reaching the end of the script first is a
    /// [`ScriptError::MalformedLoop`].
    pub fn build(
        ctx: &mut ScriptContext,
        iterations: Iterations,
        begin_line: usize,
    ) -> Result<Self, ScriptError> {
        let mut actions = Vec::new();
        let mut invalid = None;
        let mut nested: usize = 0;

        while let Some(line) = ctx.next_line() {
            let directive = Directive::parse(&line.text);
            let opens_loop = match &directive {
                Directive::LoopBegin(_) => true,
                Directive::Invalid { keyword, .. } => *keyword == Directive::LOOP_BEGIN,
                _ => false,
            };
            if opens_loop {
                nested += 1;
            }
            let action = match directive {
                Directive::LoopEnd if nested > 0 => {
                    nested -= 1;
                    continue;
                }
                Directive::LoopEnd => {
                    return match invalid {
                        Some(err) => Err(err),
                        None => Ok(Self {
                            actions,
                            iterations,
                        }),
                    };
                }
                Directive::Command(text) => LoopAction::SendCommand(text),
                Directive::Sleep(duration) => LoopAction::Sleep(duration),
                Directive::Invalid { reason, .. } => {
                    invalid.get_or_insert(ScriptError::InvalidDirective {
                        script: ctx.name().to_string(),
                        line: line.number,
                        text: line.text,
                        reason,
                    });
                    continue;
                }
                _ => {
                    invalid.get_or_insert(ScriptError::InvalidDirective {
                        script: ctx.name().to_string(),
                        line: line.number,
                        text: line.text,
                        reason: "only commands and sleep are allowed inside a loop".into(),
                    });
                    continue;
                }
            };
            actions.push(action);
        }

        Err(ScriptError::MalformedLoop {
            script: ctx.name().to_string(),
            line: begin_line,
        })
    }

    /// True if the plan would run forever.
    pub fn is_unbounded(&self) -> bool {
        self.iterations == Iterations::Unbounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(body: &str, iterations: Iterations) -> (Result<LoopPlan, ScriptError>, ScriptContext) {
        let mut ctx = ScriptContext::from_source("loop.scom", body);
        let plan = LoopPlan::build(&mut ctx, iterations, 1);
        (plan, ctx)
    }

    #[test]
    fn test_build_collects_commands_and_sleeps() {
        let (plan, mut ctx) = build(
            "AT+CSQ\n# poll\nsleep 0.5\nAT+CREG?\nloopend\nATI\n",
            Iterations::Count(3),
        );
        let plan = plan.unwrap();
        assert_eq!(
            plan.actions,
            vec![
                LoopAction::SendCommand("AT+CSQ".into()),
                LoopAction::Sleep(Duration::from_millis(500)),
                LoopAction::SendCommand("AT+CREG?".into()),
            ]
        );
        assert_eq!(plan.iterations, Iterations::Count(3));
        assert!(!plan.is_unbounded());
        // The script continues after loopend.
        assert_eq!(ctx.next_line().unwrap().text, "ATI");
    }

    #[test]
    fn test_missing_loopend() {
        let (plan, ctx) = build("AT\nATI\n", Iterations::Unbounded);
        assert!(matches!(
            plan,
            Err(ScriptError::MalformedLoop { line: 1, .. })
        ));
        let mut ctx = ctx;
        assert_eq!(ctx.next_line(), None);
    }

    #[test]
    fn test_nested_directive_rejects_whole_loop() {
        let (plan, mut ctx) = build(
            "AT\nenscom other.scom\nATI\nsleep nope\nloopend\nAT+CSQ\n",
            Iterations::Count(2),
        );
        match plan {
            Err(ScriptError::InvalidDirective { line, text, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(text, "enscom other.scom");
            }
            other => panic!("unexpected {other:?}"),
        }
        // The body was consumed; the next line is the one after loopend.
        assert_eq!(ctx.next_line().unwrap().text, "AT+CSQ");
    }

    #[test]
    fn test_nested_loop_consumed_through_outer_loopend() {
        let (plan, mut ctx) = build(
            "AT\nloopbegin iter 2\nATI\nloopend\nAT+X\nloopend\nAT+CSQ\n",
            Iterations::Count(3),
        );
        match plan {
            Err(ScriptError::InvalidDirective { line, text, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(text, "loopbegin iter 2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ctx.next_line().unwrap().text, "AT+CSQ");
    }

    #[test]
    fn test_nested_loop_without_outer_loopend() {
        let (plan, _) = build("loopbegin\nAT\nloopend\nATI\n", Iterations::Count(1));
        assert!(matches!(
            plan,
            Err(ScriptError::MalformedLoop { line: 1, .. })
        ));
    }

    #[test]
    fn test_empty_body() {
        let (plan, _) = build("loopend\n", Iterations::Count(1));
        assert!(plan.unwrap().actions.is_empty());
    }
}
