#![deny(unsafe_op_in_unsafe_fn)]

//! The frame accessor for CRuby, reading the control-frame stack of the
//! current execution context by raw layout.

use std::ffi::{c_int, c_void};
use std::sync::{Arc, OnceLock};

use rb_sys::*;

use crate::engine::StackCapture;
use crate::frame::{CallFrame, Runtime, Slot, Symbols};
// Named imports: several of these share names with rb_sys's glob exports.
use crate::ruby_internal::{
    rb_callable_method_entry_t, rb_control_frame_t, rb_thread_t, RBASIC_FLAGS, RB_BUILTIN_TYPE,
    RB_SPECIAL_CONST_P, ID_ALLOCATOR, IMEMO_MASK, IMEMO_MENT, RUBY_FL_SINGLETON, RUBY_FL_USHIFT,
    RUBY_T_CLASS, RUBY_T_IMEMO, RUBY_T_MASK, RUBY_T_MODULE, VM_ENV_DATA_INDEX_FLAGS,
    VM_ENV_DATA_INDEX_ME_CREF, VM_FRAME_MAGIC_CFUNC, VM_FRAME_MAGIC_MASK, VM_FRAME_MAGIC_METHOD,
};
use crate::util::cstr;
use crate::walker;

pub static RUBY_RUNTIME: OnceLock<RubyRuntime> = OnceLock::new();

pub struct RubyRuntime {
    symbols: Symbols,
}

impl RubyRuntime {
    /// Interns the symbols the symbolizer matches against. Must be called
    /// from a Ruby thread.
    pub unsafe fn new() -> Self {
        let symbols = unsafe {
            Symbols {
                allocator: ID_ALLOCATOR as Slot,
                allocate: rb_intern(cstr!("allocate")) as Slot,
                send: rb_intern(cstr!("send")) as Slot,
                underscore_send: rb_intern(cstr!("__send__")) as Slot,
            }
        };
        Self { symbols }
    }
}

impl Runtime for RubyRuntime {
    type Frame<'a> = RubyFrame;

    const NEEDS_FAULT_GUARD: bool = true;

    fn current_frame(&self) -> Option<RubyFrame> {
        unsafe {
            let thread = rb_thread_current();
            if RB_SPECIAL_CONST_P(thread) {
                return None;
            }
            let th = (*(thread as *const RTypedData)).data as *const rb_thread_t;
            if th.is_null() || (*th).ec.is_null() {
                return None;
            }
            let ec = &*(*th).ec;
            let end = ec.vm_stack.add(ec.vm_stack_size) as *const rb_control_frame_t;
            RubyFrame::new(ec.cfp, end)
        }
    }

    fn during_gc(&self) -> bool {
        unsafe { rb_during_gc() != 0 }
    }

    fn gc_sentinel(&self) -> Slot {
        rb_gc as usize
    }

    fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    fn is_singleton_receiver(&self, receiver: Slot, defining_class: Slot) -> bool {
        let receiver = receiver as VALUE;
        let defining_class = defining_class as VALUE;
        if RB_SPECIAL_CONST_P(receiver) || RB_SPECIAL_CONST_P(defining_class) {
            return false;
        }
        unsafe {
            RBASIC_FLAGS(defining_class) & RUBY_FL_SINGLETON != 0
                && matches!(RB_BUILTIN_TYPE(receiver), RUBY_T_CLASS | RUBY_T_MODULE)
        }
    }
}

#[derive(Clone, Copy)]
pub struct RubyFrame {
    cfp: *const rb_control_frame_t,
    end: *const rb_control_frame_t,
}

impl RubyFrame {
    fn new(cfp: *const rb_control_frame_t, end: *const rb_control_frame_t) -> Option<Self> {
        (!cfp.is_null() && cfp < end).then_some(Self { cfp, end })
    }

    fn frame_type(&self) -> VALUE {
        unsafe {
            let ep = (*self.cfp).ep;
            if ep.is_null() {
                return 0;
            }
            *ep.offset(VM_ENV_DATA_INDEX_FLAGS) & VM_FRAME_MAGIC_MASK
        }
    }

    // Method and cfunc frames keep their callable method entry in the
    // environment, next to the frame flags.
    fn method_entry(&self) -> Option<&rb_callable_method_entry_t> {
        unsafe {
            let ep = (*self.cfp).ep;
            if ep.is_null() {
                return None;
            }
            let me = *ep.offset(VM_ENV_DATA_INDEX_ME_CREF);
            if RB_SPECIAL_CONST_P(me) {
                return None;
            }
            let flags = RBASIC_FLAGS(me);
            if flags & RUBY_T_MASK != RUBY_T_IMEMO
                || (flags >> RUBY_FL_USHIFT) & IMEMO_MASK != IMEMO_MENT
            {
                return None;
            }
            Some(&*(me as *const rb_callable_method_entry_t))
        }
    }
}

impl CallFrame for RubyFrame {
    fn defining_class(&self) -> Slot {
        self.method_entry().map_or(0, |me| me.owner as Slot)
    }

    fn receiver(&self) -> Option<Slot> {
        Some(unsafe { (*self.cfp).self_ } as Slot)
    }

    fn method_id(&self) -> Option<Slot> {
        self.method_entry().map(|me| me.called_id as Slot)
    }

    fn previous(&self) -> Option<Self> {
        Self::new(unsafe { self.cfp.add(1) }, self.end)
    }

    fn is_real_call(&self) -> bool {
        matches!(
            self.frame_type(),
            VM_FRAME_MAGIC_METHOD | VM_FRAME_MAGIC_CFUNC
        )
    }

    fn source_position(&self) -> Slot {
        // cfunc frames have no pc; their own address keeps them distinct
        let pc = unsafe { (*self.cfp).pc };
        if pc.is_null() {
            self.cfp as Slot
        } else {
            pc as Slot
        }
    }
}

/// The symbol the profiling library calls from its sampling signal handler
/// to obtain the Ruby stack: `int rb_stack_trace(void **result, int max_depth)`.
#[no_mangle]
pub unsafe extern "C" fn rb_stack_trace(result: *mut *mut c_void, max_depth: c_int) -> c_int {
    let Some(runtime) = RUBY_RUNTIME.get() else {
        return 0;
    };
    let Ok(max_depth) = usize::try_from(max_depth) else {
        return 0;
    };
    if result.is_null() || max_depth == 0 {
        return 0;
    }

    let out = unsafe { std::slice::from_raw_parts_mut(result as *mut Slot, max_depth) };
    walker::walk(runtime, out, max_depth) as c_int
}

/// The Ruby stack walker, for engines that take their capture callback
/// directly.
pub fn stack_capture() -> StackCapture {
    Arc::new(|out: &mut [Slot], max_depth: usize| {
        RUBY_RUNTIME
            .get()
            .map_or(0, |runtime| walker::walk(runtime, out, max_depth))
    })
}
