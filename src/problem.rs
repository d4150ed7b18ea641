//! Structured diagnostics: typed subject references and a user callback
//! (spec §4.2).
//!
//! The reporter never allocates while reporting — every `Problem` is built
//! in place inside a fixed-size, reused buffer, mirroring the original's
//! preallocated `ctx->problem_refs` array. Subject references are `Copy`
//! (ids, or a fixed-capacity interface-name buffer) for the same reason;
//! resolving an id to a human-readable name happens later, in `format`,
//! against a live `Context`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::Id;
use crate::{Net, Phys, Virt};

/// Bound on subject refs per problem. The widest diagnostic in the original
/// (`VIRT_DUPATTR`: attr name, two virts, the net) needs four.
pub const MAX_PROBLEM_REFS: usize = 4;

/// `IF_NAMESIZE` on Linux, matching the original's `namebuf` sizing.
pub const IF_NAME_SIZE: usize = 16;

/// A small, `Copy` interface-name buffer — avoids allocating on the
/// diagnostic hot path just to report an interface's name.
#[derive(Debug, Clone, Copy)]
pub struct IfName {
    bytes: [u8; IF_NAME_SIZE],
    len: u8,
}

impl IfName {
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; IF_NAME_SIZE];
        let truncated = &name.as_bytes()[..name.len().min(IF_NAME_SIZE)];
        bytes[..truncated.len()].copy_from_slice(truncated);
        IfName {
            bytes,
            len: truncated.len() as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemCode {
    /// A locally explicitly-attached phys has no `iface` attribute set.
    PhysNoAttr,
    /// A virt is connected through a `pa` that was never explicitly attached.
    PhysNotAttached,
    /// Two physicals share the same `ip` attribute.
    PhysDupAttr,
    /// A virt's `connected_if` name could not be resolved to an ifindex.
    VirtNoIf,
    /// Two virts in the same network share a MAC.
    VirtDupAttr,
    /// Two networks share `(nettype, vnet_id)`.
    NetDupId,
    /// Two locally-attached VXLAN networks, one `STATIC_E2E`, collide on UDP port.
    NetBadNetType,
}

impl ProblemCode {
    /// Format template referencing `%o` subject slots, one-to-one with codes.
    pub fn format_template(self) -> &'static str {
        match self {
            ProblemCode::PhysNoAttr => "phys %o is missing attribute %o (network %o)",
            ProblemCode::PhysNotAttached => {
                "virt %o is connected through phys %o on net %o, which was never attached"
            }
            ProblemCode::PhysDupAttr => "phys %o and phys %o share attribute %o",
            ProblemCode::VirtNoIf => "virt %o's interface %o could not be resolved",
            ProblemCode::VirtDupAttr => {
                "virt %o and virt %o in net %o share attribute %o"
            }
            ProblemCode::NetDupId => "net %o and net %o share the same vnet id %o",
            ProblemCode::NetBadNetType => {
                "net %o and net %o use incompatible vxlan switching on the same port"
            }
        }
    }
}

/// A typed reference to whatever the diagnostic is about (spec §3 Problem:
/// `{IF, NET, VIRT, PHYS, ATTR-name, NETID}`; the `END` sentinel from the
/// original's variadic call is replaced by the fixed-size array's length).
#[derive(Debug, Clone, Copy)]
pub enum SubjectRef {
    If(IfName),
    Net(Id<Net>),
    Virt(Id<Virt>),
    Phys(Id<Phys>),
    Attr(&'static str),
    VNetId(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct Problem {
    pub code: ProblemCode,
    refs: [Option<SubjectRef>; MAX_PROBLEM_REFS],
    refs_count: usize,
}

impl Problem {
    fn empty(code: ProblemCode) -> Self {
        Problem {
            code,
            refs: [None; MAX_PROBLEM_REFS],
            refs_count: 0,
        }
    }

    pub fn refs(&self) -> &[Option<SubjectRef>] {
        &self.refs[..self.refs_count]
    }
}

/// Something that can turn a subject ref into readable text, by looking up
/// the live name of whatever object it refers to. `Context` implements
/// this; tests can implement it for a bare name table.
pub trait SubjectNameResolver {
    fn net_name(&self, id: Id<Net>) -> Option<&str>;
    fn virt_name(&self, id: Id<Virt>) -> Option<&str>;
    fn phys_name(&self, id: Id<Phys>) -> Option<&str>;
}

fn format_subject(
    out: &mut impl fmt::Write,
    resolver: &impl SubjectNameResolver,
    subj: &SubjectRef,
) -> fmt::Result {
    match subj {
        SubjectRef::If(name) => write!(out, "{}", name),
        SubjectRef::Net(id) => match resolver.net_name(*id) {
            Some(name) => out.write_str(name),
            None => write!(out, "<net {:?}>", id),
        },
        SubjectRef::Virt(id) => match resolver.virt_name(*id) {
            Some(name) => out.write_str(name),
            None => write!(out, "<virt {:?}>", id),
        },
        SubjectRef::Phys(id) => match resolver.phys_name(*id) {
            Some(name) => out.write_str(name),
            None => write!(out, "<phys {:?}>", id),
        },
        SubjectRef::Attr(name) => out.write_str(name),
        SubjectRef::VNetId(id) => write!(out, "{}", id),
    }
}

/// Substitute each `%o` in the code's template with its stringified subject.
pub fn format(
    out: &mut impl fmt::Write,
    resolver: &impl SubjectNameResolver,
    problem: &Problem,
) -> fmt::Result {
    let mut refs = problem.refs().iter();
    let mut chars = problem.code.format_template().chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            let marker = chars.next();
            debug_assert_eq!(marker, Some('o'));
            if let Some(Some(subj)) = refs.next() {
                format_subject(out, resolver, subj)?;
            }
        } else {
            out.write_char(c)?;
        }
    }
    Ok(())
}

pub type ProblemCallback<'a> = dyn FnMut(&Problem) + 'a;

/// Owns the reused problem buffer and the running count for the current
/// `validate`/`commit` call (spec §4.2, §5 "owned by the context").
pub struct ProblemReporter {
    count: usize,
}

impl ProblemReporter {
    pub fn new() -> Self {
        ProblemReporter { count: 0 }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Append `refs` into a fresh problem and invoke `cb`. `refs.len()` must
    /// not exceed `MAX_PROBLEM_REFS` — over-reporting is a programming error
    /// in the original too (an unchecked buffer overrun there), so this
    /// asserts rather than silently truncating.
    pub fn report(&mut self, cb: &mut ProblemCallback<'_>, code: ProblemCode, refs: &[SubjectRef]) {
        assert!(
            refs.len() <= MAX_PROBLEM_REFS,
            "over-reported problem refs for {:?}",
            code
        );
        let mut problem = Problem::empty(code);
        for (slot, r) in problem.refs.iter_mut().zip(refs) {
            *slot = Some(*r);
        }
        problem.refs_count = refs.len();
        cb(&problem);
        self.count += 1;
    }
}

impl Default for ProblemReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Default problem callback: formats the problem and writes it to stderr
/// (matches `lsdn_problem_stderr_handler`).
pub fn stderr_handler(resolver: &impl SubjectNameResolver, problem: &Problem) {
    let mut text = String::new();
    if format(&mut text, resolver, problem).is_ok() {
        eprintln!("{}", text);
    }
}
