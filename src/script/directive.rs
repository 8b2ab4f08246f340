//! Classification of script lines into [`Directive`]s.
//!
//! The first whitespace-separated word of a line selects the directive. A
//! line whose first word is not a directive keyword is an ordinary command
//! and is sent to the device verbatim.
//!
//! | Line | Meaning |
//! |------|---------|
//! | `loopbegin` | Start a loop that repeats until the session stops |
//! | `loopbegin iter 3` | Start a loop that runs three times |
//! | `loopend` | End of the loop body |
//! | `sleep 1.5` | Pause; also `sleep 500ms`, `sleep 2s` |
//! | `break` | Leave the current script |
//! | `enman` | Switch to interactive mode |
//! | `enscom other.scom` | Run another script, then come back |
//! | `# text` | Comment |

use anyhow::{Context as _, Result, anyhow, bail};
use std::path::PathBuf;
use std::time::Duration;

/// How often a loop body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iterations {
    Count(u32),
    /// Runs until the session is stopped from outside.
    Unbounded,
}

/// One classified script line.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Command(String),
    LoopBegin(Iterations),
    LoopEnd,
    Sleep(Duration),
    Break,
    Enman,
    /// `None` only comes from a bare `enscom`, which resumes a suspended
    /// script when typed interactively.
    Enscom(Option<PathBuf>),
    /// A directive keyword with arguments that do not parse.
    Invalid {
        keyword: &'static str,
        reason: String,
    },
}

impl Directive {
    pub const LOOP_BEGIN: &'static str = "loopbegin";
    pub const LOOP_END: &'static str = "loopend";
    pub const SLEEP: &'static str = "sleep";
    pub const BREAK: &'static str = "break";
    pub const ENMAN: &'static str = "enman";
    pub const ENSCOM: &'static str = "enscom";

    /// Classify a trimmed, non-comment line.
    ///
    /// ```
    /// use sercom::script::{Directive, Iterations};
    ///
    /// assert_eq!(Directive::parse("loopbegin iter 2"), Directive::LoopBegin(Iterations::Count(2)));
    /// assert_eq!(Directive::parse("AT+CSQ"), Directive::Command("AT+CSQ".into()));
    /// ```
    pub fn parse(line: &str) -> Directive {
        let line = line.trim();
        let (keyword, args) = line
            .split_once(char::is_whitespace)
            .map(|(k, a)| (k, a.trim()))
            .unwrap_or((line, ""));
        match REGISTRY.iter().find(|(name, _)| *name == keyword) {
            Some((name, parse)) => parse(args).unwrap_or_else(|e| Directive::Invalid {
                keyword: *name,
                reason: format!("{e:#}"),
            }),
            None => Directive::Command(line.to_string()),
        }
    }
}

type ParseFn = fn(&str) -> Result<Directive>;

static REGISTRY: &[(&str, ParseFn)] = &[
    (Directive::LOOP_BEGIN, parse_loop_begin),
    (Directive::LOOP_END, parse_loop_end),
    (Directive::SLEEP, parse_sleep),
    (Directive::BREAK, parse_break),
    (Directive::ENMAN, parse_enman),
    (Directive::ENSCOM, parse_enscom),
];

fn no_args(args: &str, directive: Directive) -> Result<Directive> {
    if args.is_empty() {
        Ok(directive)
    } else {
        Err(anyhow!("takes no arguments, got '{args}'"))
    }
}

fn parse_loop_begin(args: &str) -> Result<Directive> {
    if args.is_empty() {
        return Ok(Directive::LoopBegin(Iterations::Unbounded));
    }
    let count = args
        .strip_prefix("iter")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .ok_or_else(|| anyhow!("expected 'iter <count>', got '{args}'"))?
        .trim();
    let count: u32 = count
        .parse()
        .with_context(|| format!("invalid iteration count '{count}'"))?;
    if count == 0 {
        bail!("iteration count must be at least 1");
    }
    Ok(Directive::LoopBegin(Iterations::Count(count)))
}

fn parse_loop_end(args: &str) -> Result<Directive> {
    no_args(args, Directive::LoopEnd)
}

fn parse_sleep(args: &str) -> Result<Directive> {
    Ok(Directive::Sleep(parse_duration(args)?))
}

fn parse_break(args: &str) -> Result<Directive> {
    no_args(args, Directive::Break)
}

fn parse_enman(args: &str) -> Result<Directive> {
    no_args(args, Directive::Enman)
}

fn parse_enscom(args: &str) -> Result<Directive> {
    if args.is_empty() {
        Ok(Directive::Enscom(None))
    } else {
        Ok(Directive::Enscom(Some(PathBuf::from(args))))
    }
}

/// Parse a duration: bare seconds (`1.5`), `1.5s` or `500ms`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("missing duration");
    }
    let secs: f64 = if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: f64 = ms_str
            .trim()
            .parse()
            .context("Invalid milliseconds value")?;
        ms / 1000.0
    } else {
        s.strip_suffix('s')
            .unwrap_or(s)
            .trim()
            .parse()
            .context("Invalid seconds value")?
    };
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid duration '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("0.25").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(
            parse_duration("1.5s").unwrap(),
            Duration::from_secs_f64(1.5)
        );
        assert!(parse_duration("5minutes").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_loop_begin() {
        assert_eq!(
            Directive::parse("loopbegin"),
            Directive::LoopBegin(Iterations::Unbounded)
        );
        assert_eq!(
            Directive::parse("loopbegin   iter  10"),
            Directive::LoopBegin(Iterations::Count(10))
        );
        for bad in ["loopbegin iter", "loopbegin iter 0", "loopbegin iter x", "loopbegin 3", "loopbegin iterate 3"] {
            assert!(
                matches!(
                    Directive::parse(bad),
                    Directive::Invalid {
                        keyword: Directive::LOOP_BEGIN,
                        ..
                    }
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_parse_simple_directives() {
        assert_eq!(Directive::parse("loopend"), Directive::LoopEnd);
        assert_eq!(Directive::parse("break"), Directive::Break);
        assert_eq!(Directive::parse("enman"), Directive::Enman);
        assert_eq!(
            Directive::parse("sleep 0.5"),
            Directive::Sleep(Duration::from_millis(500))
        );
        assert_eq!(
            Directive::parse("enscom  scripts/attach.scom "),
            Directive::Enscom(Some(PathBuf::from("scripts/attach.scom")))
        );
        assert_eq!(Directive::parse("enscom"), Directive::Enscom(None));
    }

    #[test]
    fn test_parse_invalid_arguments() {
        assert!(matches!(
            Directive::parse("sleep soon"),
            Directive::Invalid { keyword: "sleep", .. }
        ));
        assert!(matches!(
            Directive::parse("break now"),
            Directive::Invalid { keyword: "break", .. }
        ));
    }

    #[test]
    fn test_commands_pass_through() {
        assert_eq!(
            Directive::parse("AT+CGDCONT=1,\"IP\",\"internet\""),
            Directive::Command("AT+CGDCONT=1,\"IP\",\"internet\"".into())
        );
        // `#` inside a command is data, not a comment.
        assert_eq!(
            Directive::parse("AT#SIMDET?"),
            Directive::Command("AT#SIMDET?".into())
        );
        // Keywords match whole words only.
        assert_eq!(
            Directive::parse("sleepy"),
            Directive::Command("sleepy".into())
        );
    }
}
