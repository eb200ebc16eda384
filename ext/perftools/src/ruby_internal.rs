#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use rb_sys::VALUE;

use std::ffi::{c_char, c_void};

// Types and structs from Ruby 3.3 / 3.4 (vm_core.h, method.h).

#[repr(C)]
pub struct rb_thread_struct {
    _padding_lt_node: [c_char; 16], // struct ccan_list_node
    _padding_self: VALUE,
    _padding_ractor: *mut c_void, // rb_ractor_t
    _padding_vm: *mut c_void,     // rb_vm_t
    _padding_nt: *mut c_void,     // struct rb_native_thread
    pub ec: *mut rb_execution_context_struct,
    // ...
}
pub type rb_thread_t = rb_thread_struct;

#[repr(C)]
pub struct rb_execution_context_struct {
    pub vm_stack: *mut VALUE,
    pub vm_stack_size: usize,
    pub cfp: *mut rb_control_frame_struct,
    // ...
}

#[repr(C)]
pub struct rb_control_frame_struct {
    pub pc: *const VALUE,
    _padding_sp: *mut VALUE,
    _padding_iseq: *const c_void,
    pub self_: VALUE,
    pub ep: *const VALUE,
    _padding_block_code: *const c_void,
    _padding_jit_return: *mut c_void,
}
pub type rb_control_frame_t = rb_control_frame_struct;

#[repr(C)]
pub struct rb_callable_method_entry_struct {
    pub flags: VALUE,
    _padding_defined_class: VALUE,
    _padding_def: *mut c_void, // rb_method_definition_t
    pub called_id: VALUE,      // ID
    pub owner: VALUE,
}
pub type rb_callable_method_entry_t = rb_callable_method_entry_struct;

pub const VM_FRAME_MAGIC_MASK: VALUE = 0x7fff0001;
pub const VM_FRAME_MAGIC_METHOD: VALUE = 0x11110001;
pub const VM_FRAME_MAGIC_CFUNC: VALUE = 0x55550001;

/// `ep[VM_ENV_DATA_INDEX_ME_CREF]`
pub const VM_ENV_DATA_INDEX_ME_CREF: isize = -2;
/// `ep[VM_ENV_DATA_INDEX_FLAGS]`
pub const VM_ENV_DATA_INDEX_FLAGS: isize = 0;

pub const RUBY_T_MASK: VALUE = 0x1f;
pub const RUBY_T_CLASS: VALUE = 0x02;
pub const RUBY_T_MODULE: VALUE = 0x03;
pub const RUBY_T_IMEMO: VALUE = 0x1a;
pub const RUBY_FL_SINGLETON: VALUE = 1 << 13;

pub const RUBY_FL_USHIFT: u32 = 12;
pub const IMEMO_MASK: VALUE = 0x0f;
pub const IMEMO_MENT: VALUE = 6;

/// `idAlloc`, the ID of a class's allocator function.
pub const ID_ALLOCATOR: VALUE = 1;

/// Reimplementation of the RB_SPECIAL_CONST_P macro (flonum-enabled builds).
pub fn RB_SPECIAL_CONST_P(obj: VALUE) -> bool {
    const QFALSE: VALUE = 0x00;
    const QNIL: VALUE = 0x04;
    const IMMEDIATE_MASK: VALUE = 0x07;
    (obj & IMMEDIATE_MASK) != 0 || obj == QFALSE || obj == QNIL
}

/// Reads RBasic::flags. `obj` must be a heap object.
pub unsafe fn RBASIC_FLAGS(obj: VALUE) -> VALUE {
    unsafe { std::ptr::read_volatile(obj as *const VALUE) }
}

pub unsafe fn RB_BUILTIN_TYPE(obj: VALUE) -> VALUE {
    unsafe { RBASIC_FLAGS(obj) & RUBY_T_MASK }
}
