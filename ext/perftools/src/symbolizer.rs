use crate::frame::{CallFrame, Runtime, Slot, SLOTS_PER_FRAME};

/// The `(singleton_marker, class, method)` identification of one frame.
///
/// `singleton_marker` is the receiver itself when a class or module is
/// called through its singleton class (`Foo.bar`), and zero otherwise
/// (`Foo#bar`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolTriple {
    pub singleton_marker: Slot,
    pub class: Slot,
    pub method: Slot,
}

impl SymbolTriple {
    /// Writes the triple into the first three slots of `out`.
    pub fn write_to(&self, out: &mut [Slot]) {
        debug_assert!(out.len() >= SLOTS_PER_FRAME);
        out[0] = self.singleton_marker;
        out[1] = self.class;
        out[2] = self.method;
    }
}

/// Decides whether `frame` is worth recording and, if so, how it is named.
///
/// Frames without a method, and frames of the call-forwarding primitives
/// (`send`, `__send__`), yield `None`. The runtime's internal construction
/// method is reported as `allocate` so construction sites aggregate across
/// classes.
pub fn symbolize<R: Runtime>(runtime: &R, frame: &R::Frame<'_>) -> Option<SymbolTriple> {
    let symbols = runtime.symbols();
    let method = frame.method_id().filter(|&m| m != 0)?;
    if symbols.is_forwarding(method) {
        return None;
    }

    let class = frame.defining_class();
    let singleton_marker = match frame.receiver() {
        Some(receiver) if receiver != 0 && runtime.is_singleton_receiver(receiver, class) => {
            receiver
        }
        _ => 0,
    };
    let method = if method == symbols.allocator {
        symbols.allocate
    } else {
        method
    };

    Some(SymbolTriple {
        singleton_marker,
        class,
        method,
    })
}
