//! Read-only view of the host runtime's call frames.
//!
//! The stack walker only sees the runtime through these two traits, so all
//! knowledge of a particular interpreter's frame layout lives in one
//! implementation per supported runtime version.

/// A pointer-sized output word. Object references, class handles and
/// method identifiers are all written as raw words.
pub type Slot = usize;

/// Number of slots written for every emitted frame.
pub const SLOTS_PER_FRAME: usize = 3;

/// One interpreter activation record, borrowed for the duration of a walk.
pub trait CallFrame: Copy {
    /// The class or module that defines the executing method.
    fn defining_class(&self) -> Slot;

    /// The receiver (`self`) of the call, if the frame has one.
    fn receiver(&self) -> Option<Slot>;

    /// The method identifier, or `None` for frames without one.
    fn method_id(&self) -> Option<Slot>;

    /// The caller's frame, or `None` at the root of the chain.
    fn previous(&self) -> Option<Self>;

    /// Whether this frame corresponds to an actual method dispatch
    /// (as opposed to a block, `eval` or top-level frame).
    fn is_real_call(&self) -> bool;

    /// An opaque token for the source position the frame is executing.
    /// Two frames compare equal here when they sit at the same position.
    fn source_position(&self) -> Slot;
}

/// Identifiers the symbolizer needs to recognise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Symbols {
    /// The runtime's internal object-construction method identifier.
    pub allocator: Slot,
    /// The canonical `allocate` symbol construction frames are reported as.
    pub allocate: Slot,
    pub send: Slot,
    pub underscore_send: Slot,
}

impl Symbols {
    /// `send` and `__send__` only forward a call; they are never recorded.
    pub fn is_forwarding(&self, method: Slot) -> bool {
        method == self.send || method == self.underscore_send
    }
}

/// Access to the host runtime's global state.
pub trait Runtime {
    type Frame<'a>: CallFrame
    where
        Self: 'a;

    /// Whether the frame chain may be observed in an inconsistent state at
    /// an arbitrary interrupt point. Walks over such runtimes run under the
    /// fault guard.
    const NEEDS_FAULT_GUARD: bool;

    /// The currently executing frame on the calling thread.
    fn current_frame(&self) -> Option<Self::Frame<'_>>;

    /// Whether a garbage collection cycle is in progress.
    fn during_gc(&self) -> bool;

    /// The single word reported as the whole stack while collecting.
    fn gc_sentinel(&self) -> Slot;

    fn symbols(&self) -> &Symbols;

    /// Whether `receiver` is a class or module object being invoked through
    /// its own singleton class `defining_class`.
    fn is_singleton_receiver(&self, receiver: Slot, defining_class: Slot) -> bool;
}
