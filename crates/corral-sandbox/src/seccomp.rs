//! Syscall filter language and BPF compilation.
//!
//! Filter text is a comma-separated rule list:
//!
//! ```text
//! FILTER  := RULE | FILTER ',' RULE
//! RULE    := NAME ARGS? ACTION?
//! ARGS    := '[' ARG (',' ARG)* ']'
//! ARG     := LETTER OP NUMBER | LETTER '&' NUMBER ('='|'==') NUMBER
//! LETTER  := 'a'..'f'                  (syscall args 0..5)
//! OP      := '==' '=' '!=' '!' '>' '<' '>=' '<='
//! ACTION  := ':k' (kill) | ':e' (EPERM) | ':a' (allow)
//! NAME    := syscall name or decimal syscall number
//! ```
//!
//! The mode decides what happens to unlisted syscalls: whitelist mode denies
//! them with EPERM, blacklist mode allows them. A rule without an explicit
//! action takes the mode default (allow in whitelist mode, EPERM in
//! blacklist mode).
//!
//! Compilation groups rules by action into up to three stacked BPF filters.
//! The kernel runs every installed filter and applies the strongest verdict
//! (KILL beats ERRNO beats ALLOW), which resolves overlapping rules the way
//! the grammar intends.

use std::collections::BTreeMap;

use seccompiler::{
    apply_filter, BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition,
    SeccompFilter, SeccompRule,
};
use syscalls::Sysno;
use thiserror::Error;

use crate::config::SyscallAction;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown syscall `{0}`")]
    UnknownSyscall(String),

    #[error("bad argument rule `{0}`")]
    BadArgRule(String),

    #[error("bad action suffix `{0}`")]
    BadAction(String),

    #[error("empty syscall rule")]
    EmptyRule,

    #[error("filter allows no syscalls")]
    AllowsNothing,

    #[error("can not compile filter: {0}")]
    Compile(String),
}

/// Per-rule verdict once the mode default is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Allow,
    Eperm,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    MaskedEq(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArgRule {
    index: u8,
    op: ArgOp,
    value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedRule {
    sysno: i64,
    conds: Vec<ArgRule>,
    action: Option<RuleAction>,
}

/// Compile filter text into the BPF programs to install in the child.
///
/// The programs only reference preallocated memory once built, so they are
/// compiled in the parent and carried across `clone` inside the child spec.
pub fn compile(mode: SyscallAction, text: &str) -> Result<Vec<BpfProgram>, FilterError> {
    let rules = parse_filter(text)?;

    // None = unconditional match; a conditional rule for the same syscall is
    // then redundant and dropped.
    let mut by_action: BTreeMap<RuleAction, BTreeMap<i64, Option<Vec<SeccompRule>>>> =
        BTreeMap::new();
    for rule in rules {
        let action = rule.action.unwrap_or(match mode {
            SyscallAction::DefaultEperm => RuleAction::Allow,
            SyscallAction::OthersEperm => RuleAction::Eperm,
        });
        let slot = by_action.entry(action).or_default();
        if rule.conds.is_empty() {
            slot.insert(rule.sysno, None);
        } else {
            let compiled = build_rule(&rule.conds)?;
            match slot.entry(rule.sysno).or_insert_with(|| Some(Vec::new())) {
                Some(list) => list.push(compiled),
                None => {}
            }
        }
    }

    let eperm = SeccompAction::Errno(libc::EPERM as u32);

    let mut programs = Vec::new();

    // Base filter carries the verdict for unlisted syscalls. In blacklist
    // mode that verdict is plain allow, which needs no filter at all; allow
    // rules there are the ambient default and install nothing.
    if mode == SyscallAction::DefaultEperm {
        let allowed = finish(by_action.remove(&RuleAction::Allow));
        if allowed.is_empty() {
            return Err(FilterError::AllowsNothing);
        }
        programs.push(build_program(allowed, eperm.clone(), SeccompAction::Allow)?);
    } else {
        by_action.remove(&RuleAction::Allow);
    }

    if let Some(denied) = by_action.remove(&RuleAction::Eperm) {
        let denied = finish(Some(denied));
        if !denied.is_empty() {
            programs.push(build_program(denied, SeccompAction::Allow, eperm)?);
        }
    }

    if let Some(killed) = by_action.remove(&RuleAction::Kill) {
        let killed = finish(Some(killed));
        if !killed.is_empty() {
            programs.push(build_program(
                killed,
                SeccompAction::Allow,
                SeccompAction::KillProcess,
            )?);
        }
    }

    Ok(programs)
}

/// Install compiled programs in the current thread. Requires no-new-privs
/// (or CAP_SYS_ADMIN) to already be in effect.
pub fn install(programs: &[BpfProgram]) -> Result<(), FilterError> {
    for program in programs {
        apply_filter(program).map_err(|e| FilterError::Compile(e.to_string()))?;
    }
    Ok(())
}

fn finish(map: Option<BTreeMap<i64, Option<Vec<SeccompRule>>>>) -> BTreeMap<i64, Vec<SeccompRule>> {
    map.unwrap_or_default()
        .into_iter()
        .map(|(sysno, rules)| (sysno, rules.unwrap_or_default()))
        .collect()
}

fn build_program(
    rules: BTreeMap<i64, Vec<SeccompRule>>,
    mismatch: SeccompAction,
    matched: SeccompAction,
) -> Result<BpfProgram, FilterError> {
    let arch: seccompiler::TargetArch = std::env::consts::ARCH
        .try_into()
        .map_err(|e| FilterError::Compile(format!("unsupported arch: {e:?}")))?;
    let filter = SeccompFilter::new(rules, mismatch, matched, arch)
        .map_err(|e| FilterError::Compile(e.to_string()))?;
    filter
        .try_into()
        .map_err(|e| FilterError::Compile(format!("{e}")))
}

fn build_rule(conds: &[ArgRule]) -> Result<SeccompRule, FilterError> {
    let mut out = Vec::with_capacity(conds.len());
    for cond in conds {
        let op = match cond.op {
            ArgOp::Eq => SeccompCmpOp::Eq,
            ArgOp::Ne => SeccompCmpOp::Ne,
            ArgOp::Gt => SeccompCmpOp::Gt,
            ArgOp::Lt => SeccompCmpOp::Lt,
            ArgOp::Ge => SeccompCmpOp::Ge,
            ArgOp::Le => SeccompCmpOp::Le,
            ArgOp::MaskedEq(mask) => SeccompCmpOp::MaskedEq(mask),
        };
        out.push(
            SeccompCondition::new(cond.index, SeccompCmpArgLen::Qword, op, cond.value)
                .map_err(|e| FilterError::Compile(e.to_string()))?,
        );
    }
    SeccompRule::new(out).map_err(|e| FilterError::Compile(e.to_string()))
}

fn parse_filter(text: &str) -> Result<Vec<ParsedRule>, FilterError> {
    split_rules(text)
        .into_iter()
        .filter(|chunk| !chunk.is_empty())
        .map(parse_rule)
        .collect()
}

/// Split on commas that sit outside `[...]`.
fn split_rules(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(text[start..].trim());
    out
}

fn parse_rule(chunk: &str) -> Result<ParsedRule, FilterError> {
    let (head, action) = match chunk.rfind(':') {
        Some(pos) if !chunk[pos..].contains(']') => {
            let action = match &chunk[pos + 1..] {
                "k" => RuleAction::Kill,
                "e" => RuleAction::Eperm,
                "a" => RuleAction::Allow,
                other => return Err(FilterError::BadAction(other.to_string())),
            };
            (&chunk[..pos], Some(action))
        }
        _ => (chunk, None),
    };

    let (name, conds) = match head.find('[') {
        Some(open) => {
            let close = head
                .rfind(']')
                .ok_or_else(|| FilterError::BadArgRule(head.to_string()))?;
            if close < open {
                return Err(FilterError::BadArgRule(head.to_string()));
            }
            let conds = head[open + 1..close]
                .split(',')
                .filter(|c| !c.is_empty())
                .map(parse_arg_rule)
                .collect::<Result<Vec<_>, _>>()?;
            (&head[..open], conds)
        }
        None => (head, Vec::new()),
    };

    if name.is_empty() {
        return Err(FilterError::EmptyRule);
    }

    Ok(ParsedRule {
        sysno: resolve_syscall(name)?,
        conds,
        action,
    })
}

fn resolve_syscall(name: &str) -> Result<i64, FilterError> {
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return name
            .parse()
            .map_err(|_| FilterError::UnknownSyscall(name.to_string()));
    }
    name.parse::<Sysno>()
        .map(|sysno| sysno.id() as i64)
        .map_err(|_| FilterError::UnknownSyscall(name.to_string()))
}

fn parse_arg_rule(text: &str) -> Result<ArgRule, FilterError> {
    let bad = || FilterError::BadArgRule(text.to_string());
    let mut chars = text.chars();
    let letter = chars.next().ok_or_else(bad)?;
    if !('a'..='f').contains(&letter) {
        return Err(bad());
    }
    let index = (letter as u8) - b'a';
    let rest = chars.as_str();

    if let Some(mask_and_value) = rest.strip_prefix('&') {
        // a&MASK==VALUE (bitwise-and, then compare)
        let eq = mask_and_value.find('=').ok_or_else(bad)?;
        let mask: u64 = mask_and_value[..eq].parse().map_err(|_| bad())?;
        let value_text = mask_and_value[eq..]
            .strip_prefix("==")
            .or_else(|| mask_and_value[eq..].strip_prefix('='))
            .ok_or_else(bad)?;
        let value: u64 = value_text.parse().map_err(|_| bad())?;
        return Ok(ArgRule {
            index,
            op: ArgOp::MaskedEq(mask),
            value,
        });
    }

    let (op, value_text) = if let Some(v) = rest.strip_prefix(">=") {
        (ArgOp::Ge, v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (ArgOp::Le, v)
    } else if let Some(v) = rest.strip_prefix("==") {
        (ArgOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix("!=") {
        (ArgOp::Ne, v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (ArgOp::Gt, v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (ArgOp::Lt, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (ArgOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix('!') {
        (ArgOp::Ne, v)
    } else {
        return Err(bad());
    };

    let value: u64 = value_text.parse().map_err(|_| bad())?;
    Ok(ArgRule { index, op, value })
}

// RuleAction keys a BTreeMap.
impl PartialOrd for RuleAction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RuleAction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}
