//! Command routing
//!
//! Commands are variable-length word sequences ("status", "channel set 5").
//! Resolution picks the longest token prefix present in the command table and
//! passes the remaining tokens to the handler as arguments:
//!
//! ```text
//! ["channel", "set", "5"]
//!   try "channel set 5"  -> no entry
//!   try "channel set"    -> ChannelSet, args = ["5"]
//! ```
//!
//! Every entry has a distinct token sequence, so the longest match is unique.
//!
//! | Command | Args | Effect |
//! |---------|------|--------|
//! | `turn on` / `turn off` | - | power toggle |
//! | `status` | - | report power state |
//! | `channel total` | - | channel count (requires power) |
//! | `channel active` | - | active channel (requires power) |
//! | `channel set <int>` | integer | tune (requires power, range-checked) |
//! | `channel down` / `channel up` | - | step, bounds-checked |
//! | `quit` | - | close the session |

use crate::device::{DeviceReply, SmartTv};
use crate::protocol::tokenize;
use std::num::IntErrorKind;
use std::panic::{self, AssertUnwindSafe};

pub const UNSUPPORTED: &str = "Unsupported command received";
pub const INVALID: &str = "Invalid command";
pub const INTERNAL_ERROR: &str = "Internal error while handling command";
pub const NOT_AN_INTEGER: &str = "Channel set value must be an integer";
pub const GOODBYE: &str = "Connection closed by client request";

/// Handler selected by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    TurnOn,
    TurnOff,
    Status,
    ChannelTotal,
    ChannelActive,
    ChannelSet,
    ChannelDown,
    ChannelUp,
    Quit,
}

/// Trailing argument expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Extra tokens are ignored
    None,
    /// Exactly one integer is required
    Integer,
}

/// One command table entry
#[derive(Debug)]
pub struct CommandSpec {
    pub words: &'static [&'static str],
    pub kind: CommandKind,
    pub arity: Arity,
    pub usage: &'static str,
}

const fn cmd(
    words: &'static [&'static str],
    kind: CommandKind,
    arity: Arity,
    usage: &'static str,
) -> CommandSpec {
    CommandSpec {
        words,
        kind,
        arity,
        usage,
    }
}

/// Static command table
pub static COMMANDS: &[CommandSpec] = &[
    cmd(&["turn", "on"], CommandKind::TurnOn, Arity::None, "turn on"),
    cmd(&["turn", "off"], CommandKind::TurnOff, Arity::None, "turn off"),
    cmd(&["status"], CommandKind::Status, Arity::None, "status"),
    cmd(&["channel", "total"], CommandKind::ChannelTotal, Arity::None, "channel total"),
    cmd(&["channel", "active"], CommandKind::ChannelActive, Arity::None, "channel active"),
    cmd(&["channel", "set"], CommandKind::ChannelSet, Arity::Integer, "channel set <#int>"),
    cmd(&["channel", "down"], CommandKind::ChannelDown, Arity::None, "channel down"),
    cmd(&["channel", "up"], CommandKind::ChannelUp, Arity::None, "channel up"),
    cmd(&["quit"], CommandKind::Quit, Arity::None, "quit"),
];

/// Usage replies for partially typed multi-word commands
static GROUP_USAGE: &[(&str, &str)] = &[
    ("turn", "Usage: turn <on|off>"),
    ("channel", "Usage: channel <total|active|set <#int>|down|up>"),
];

/// Result of routing one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Text sent back to the issuing client
    pub reply: String,
    pub success: bool,
    /// Active channel to broadcast, set only on a successful channel change
    pub notify: Option<u32>,
    /// Issuing session should be closed after the reply
    pub close: bool,
}

impl Outcome {
    fn reply(success: bool, reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            success,
            notify: None,
            close: false,
        }
    }

    fn error(reply: impl Into<String>) -> Self {
        Self::reply(false, reply)
    }
}

impl From<DeviceReply> for Outcome {
    fn from(r: DeviceReply) -> Self {
        Self {
            reply: r.message,
            success: r.success,
            notify: r.channel_changed,
            close: false,
        }
    }
}

/// Longest-prefix command router over a static table
pub struct Router {
    table: &'static [CommandSpec],
}

impl Router {
    pub fn new() -> Self {
        Self { table: COMMANDS }
    }

    /// Find the longest table entry that prefixes `tokens`
    ///
    /// Returns the entry and the remaining argument tokens.
    pub fn resolve<'t, S: AsRef<str>>(
        &self,
        tokens: &'t [S],
    ) -> Option<(&'static CommandSpec, &'t [S])> {
        (1..=tokens.len()).rev().find_map(|len| {
            let prefix = &tokens[..len];
            self.table
                .iter()
                .find(|spec| {
                    spec.words.len() == len
                        && spec.words.iter().zip(prefix).all(|(w, t)| *w == t.as_ref())
                })
                .map(|spec| (spec, &tokens[len..]))
        })
    }

    /// Route a raw command line against `tv`
    ///
    /// Handler panics are caught here and reported as an internal error.
    pub fn dispatch(&self, tv: &SmartTv, line: &str) -> Outcome {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return Outcome::error(INVALID);
        }

        let Some((spec, args)) = self.resolve(tokens.as_slice()) else {
            return self.unmatched(&tokens);
        };

        guarded(|| execute(tv, spec, args))
    }

    fn unmatched(&self, tokens: &[String]) -> Outcome {
        GROUP_USAGE
            .iter()
            .find(|(group, _)| *group == tokens[0])
            .map(|(_, usage)| Outcome::error(*usage))
            .unwrap_or_else(|| Outcome::error(UNSUPPORTED))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated trailing argument
#[derive(Debug, Clone, PartialEq, Eq)]
enum Argument {
    None,
    Integer(i64),
    /// Numeric, but beyond `i64`; holds the normalized digits
    OversizedInteger(String),
}

/// Check `args` against the entry's arity
fn parse_argument(spec: &CommandSpec, args: &[String]) -> Result<Argument, Outcome> {
    match spec.arity {
        Arity::None => Ok(Argument::None),
        Arity::Integer => {
            let Some(raw) = args.first() else {
                return Err(Outcome::error(format!(
                    "{} is missing a value | Usage: {}",
                    capitalize(&spec.words.join(" ")),
                    spec.usage
                )));
            };
            match raw.parse::<i64>() {
                Ok(value) => Ok(Argument::Integer(value)),
                Err(e) => match e.kind() {
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                        Ok(Argument::OversizedInteger(normalize_integer(raw)))
                    }
                    _ => Err(Outcome::error(NOT_AN_INTEGER)),
                },
            }
        }
    }
}

/// Strip a leading `+` and redundant zeros from a valid integer literal
fn normalize_integer(raw: &str) -> String {
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", raw.strip_prefix('+').unwrap_or(raw)),
    };
    format!("{}{}", sign, digits.trim_start_matches('0'))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn execute(tv: &SmartTv, spec: &CommandSpec, args: &[String]) -> Outcome {
    let argument = match parse_argument(spec, args) {
        Ok(argument) => argument,
        Err(outcome) => return outcome,
    };

    match spec.kind {
        CommandKind::TurnOn => tv.turn_on().into(),
        CommandKind::TurnOff => tv.turn_off().into(),
        CommandKind::Status => tv.status().into(),
        CommandKind::ChannelTotal => tv.total_channels_report().into(),
        CommandKind::ChannelActive => tv.active_channel_report().into(),
        CommandKind::ChannelSet => match argument {
            Argument::Integer(channel) => tv.set_channel(channel).into(),
            Argument::OversizedInteger(channel) => tv.reject_channel(&channel).into(),
            Argument::None => {
                log::error!("'{}' resolved without an integer argument", spec.usage);
                Outcome::error(INTERNAL_ERROR)
            }
        },
        CommandKind::ChannelDown => tv.channel_down().into(),
        CommandKind::ChannelUp => tv.channel_up().into(),
        CommandKind::Quit => Outcome {
            close: true,
            ..Outcome::reply(true, GOODBYE)
        },
    }
}

/// Run a handler, converting a panic into a generic error reply
fn guarded<F: FnOnce() -> Outcome>(handler: F) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Command handler panicked: {}", detail);
            Outcome::error(INTERNAL_ERROR)
        }
    }
}
