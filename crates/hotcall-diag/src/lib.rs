//! Call-time failures and trace frames for hotcall.
//!
//! A [`Failure`] is the error value every invoker returns from a call. It
//! carries a kind, an optional message, an optional cause, and the trace that
//! was live on the calling thread when the failure was created.
//!
//! Traces come from a per-thread shadow stack of [`TraceFrame`]s. Code that
//! wants to appear in traces pushes a frame for the duration of its work
//! (see [`FrameGuard`]); generated code uses [`push_frame`]/[`pop_frame`]
//! directly because it cannot hold a guard across the native boundary.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Failure kinds
// ---------------------------------------------------------------------------

/// What went wrong, independent of the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A call contract was violated (missing receiver, arity mismatch).
    IllegalState,
    /// A value could not be narrowed to the declared type.
    ClassCast,
    /// A missing value was used where one is required.
    NullPointer,
    /// A dynamic handle was invoked with the wrong argument shape.
    WrongMethodType,
    /// Generic carrier wrapping a failure raised by the target routine.
    InvocationTarget,
    /// Any kind defined by target code, e.g. `NotFound`.
    Custom(Arc<str>),
}

impl FailureKind {
    pub const BUILTIN: [FailureKind; 5] = [
        FailureKind::IllegalState,
        FailureKind::ClassCast,
        FailureKind::NullPointer,
        FailureKind::WrongMethodType,
        FailureKind::InvocationTarget,
    ];

    pub fn custom(name: impl Into<Arc<str>>) -> Self {
        FailureKind::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::IllegalState => "IllegalState",
            FailureKind::ClassCast => "ClassCast",
            FailureKind::NullPointer => "NullPointer",
            FailureKind::WrongMethodType => "WrongMethodType",
            FailureKind::InvocationTarget => "InvocationTarget",
            FailureKind::Custom(name) => name.as_ref(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::IllegalState => "A call contract was violated before dispatch.",
            FailureKind::ClassCast => "A value does not match the declared parameter type.",
            FailureKind::NullPointer => "A missing value was used where one is required.",
            FailureKind::WrongMethodType => {
                "A dynamic handle was invoked with the wrong argument count."
            }
            FailureKind::InvocationTarget => "The invoked routine raised a failure.",
            FailureKind::Custom(_) => "Failure raised by target code.",
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, FailureKind::Custom(_))
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Trace frames
// ---------------------------------------------------------------------------

/// One entry of a failure trace: the owner (class, unit, or component) and
/// the routine running in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceFrame {
    owner: Arc<str>,
    routine: Arc<str>,
}

impl TraceFrame {
    pub fn new(owner: impl Into<Arc<str>>, routine: impl Into<Arc<str>>) -> Self {
        Self {
            owner: owner.into(),
            routine: routine.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.routine)
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<TraceFrame>> = const { RefCell::new(Vec::new()) };
}

/// Push a frame onto the current thread's shadow stack.
pub fn push_frame(frame: TraceFrame) {
    FRAMES.with(|frames| frames.borrow_mut().push(frame));
}

/// Pop the innermost frame of the current thread's shadow stack.
pub fn pop_frame() {
    FRAMES.with(|frames| {
        frames.borrow_mut().pop();
    });
}

/// Number of frames currently on this thread's shadow stack.
pub fn frame_depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Snapshot of the current thread's shadow stack, innermost frame first.
pub fn capture_trace() -> Vec<TraceFrame> {
    FRAMES.with(|frames| frames.borrow().iter().rev().cloned().collect())
}

/// Keeps a frame on the shadow stack until dropped.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    depth: usize,
}

impl FrameGuard {
    pub fn enter(frame: TraceFrame) -> Self {
        push_frame(frame);
        Self {
            depth: frame_depth(),
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| frames.borrow_mut().truncate(self.depth - 1));
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// A failure observed by a caller.
///
/// The trace is captured when the failure is created and can be edited in
/// place afterwards; kind, message and cause are fixed at construction.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", render_headline(.kind, .message.as_deref()))]
pub struct Failure {
    kind: FailureKind,
    message: Option<String>,
    #[source]
    cause: Option<Box<Failure>>,
    trace: Vec<TraceFrame>,
}

fn render_headline(kind: &FailureKind, message: Option<&str>) -> String {
    match message {
        Some(message) => format!("{kind}: {message}"),
        None => kind.to_string(),
    }
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            cause: None,
            trace: capture_trace(),
        }
    }

    /// A failure without a message of its own, e.g. a carrier.
    pub fn bare(kind: FailureKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
            trace: capture_trace(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(FailureKind::IllegalState, message)
    }

    /// Wrap a failure raised by a target routine in an `InvocationTarget`
    /// carrier.
    pub fn invocation_target(cause: Failure) -> Self {
        Self::bare(FailureKind::InvocationTarget).with_cause(cause)
    }

    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Self {
        self.trace = trace;
        self
    }

    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// Take the cause out of this failure, dropping the failure itself.
    pub fn into_cause(self) -> Option<Failure> {
        self.cause.map(|cause| *cause)
    }

    /// The failure an `InvocationTarget` carrier wraps, or `self` for any
    /// other failure.
    pub fn unwrap_carrier(self) -> Failure {
        match self {
            Failure {
                kind: FailureKind::InvocationTarget,
                cause: Some(cause),
                ..
            } => *cause,
            failure => failure,
        }
    }

    pub fn trace(&self) -> &[TraceFrame] {
        &self.trace
    }

    pub fn set_trace(&mut self, trace: Vec<TraceFrame>) {
        self.trace = trace;
    }

    /// This failure followed by every failure in its cause chain.
    pub fn chain(&self) -> impl Iterator<Item = &Failure> {
        std::iter::successors(Some(self), |failure| failure.cause())
    }

    /// Keep only the frames accepted by `keep`, in this failure and,
    /// recursively, in every cause.
    pub fn retain_frames(&mut self, keep: &mut impl FnMut(&TraceFrame) -> bool) {
        if let Some(cause) = self.cause.as_deref_mut() {
            cause.retain_frames(keep);
        }
        self.trace.retain(|frame| keep(frame));
    }

    /// Multi-line rendering with trace and causes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (depth, failure) in self.chain().enumerate() {
            if depth > 0 {
                out.push_str("caused by: ");
            }
            out.push_str(&render_headline(&failure.kind, failure.message()));
            out.push('\n');
            for frame in &failure.trace {
                out.push_str("    at ");
                out.push_str(&frame.to_string());
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_captures_live_frames_innermost_first() {
        let _outer = FrameGuard::enter(TraceFrame::new("app.Main", "main"));
        let failure = {
            let _inner = FrameGuard::enter(TraceFrame::new("demo.Repo", "find"));
            Failure::new(FailureKind::custom("NotFound"), "x")
        };

        let owners: Vec<&str> = failure.trace().iter().map(TraceFrame::owner).collect();
        assert_eq!(owners, ["demo.Repo", "app.Main"]);
        assert_eq!(failure.to_string(), "NotFound: x");
    }

    #[test]
    fn guards_restore_depth_when_dropped_out_of_order() {
        let base = frame_depth();
        let outer = FrameGuard::enter(TraceFrame::new("a", "x"));
        let inner = FrameGuard::enter(TraceFrame::new("b", "y"));
        drop(outer);
        assert_eq!(frame_depth(), base);
        drop(inner);
        assert_eq!(frame_depth(), base);
    }

    #[test]
    fn retain_frames_walks_the_cause_chain() {
        let cause = Failure::new(FailureKind::custom("Io"), "disk")
            .with_trace(vec![TraceFrame::new("gen", "call"), TraceFrame::new("a", "b")]);
        let mut failure = Failure::invocation_target(cause)
            .with_trace(vec![TraceFrame::new("gen", "call"), TraceFrame::new("c", "d")]);

        failure.retain_frames(&mut |frame: &TraceFrame| frame.owner() != "gen");

        let remaining: Vec<Vec<String>> = failure
            .chain()
            .map(|f| f.trace().iter().map(ToString::to_string).collect())
            .collect();
        assert_eq!(remaining, [vec!["c::d".to_string()], vec!["a::b".to_string()]]);
    }

    #[test]
    fn carrier_unwraps_to_original_failure() {
        let original = Failure::new(FailureKind::custom("NotFound"), "x");
        let carrier = Failure::invocation_target(original);
        assert_eq!(carrier.to_string(), "InvocationTarget");
        assert!(std::error::Error::source(&carrier).is_some());

        let unwrapped = carrier.clone().unwrap_carrier();
        assert_eq!(unwrapped.kind(), &FailureKind::custom("NotFound"));
        assert_eq!(unwrapped.message(), Some("x"));
        assert_eq!(
            carrier.into_cause().map(|cause| cause.to_string()),
            Some("NotFound: x".to_string())
        );

        let plain = Failure::illegal_state("kept").unwrap_carrier();
        assert_eq!(plain.kind(), &FailureKind::IllegalState);
    }

    #[test]
    fn render_lists_causes_and_frames() {
        let failure = Failure::illegal_state("outer")
            .with_trace(vec![TraceFrame::new("app.Main", "main")])
            .with_cause(Failure::new(FailureKind::NullPointer, "inner").with_trace(Vec::new()));
        assert_eq!(
            failure.render(),
            "IllegalState: outer\n    at app.Main::main\ncaused by: NullPointer: inner\n"
        );
    }

    #[test]
    fn builtin_kinds_are_named_uniquely() {
        let mut names = std::collections::BTreeSet::new();
        for kind in FailureKind::BUILTIN {
            assert!(kind.is_builtin());
            assert!(!kind.description().is_empty());
            assert!(
                names.insert(kind.as_str().to_string()),
                "duplicate failure kind name: {kind}"
            );
        }
        assert!(!FailureKind::custom("NotFound").is_builtin());
    }
}
