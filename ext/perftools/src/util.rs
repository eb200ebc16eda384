use core::mem::transmute;
use rb_sys::*;

// Convert str literal to C string literal
macro_rules! cstr {
    ($s:expr) => {
        concat!($s, "\0").as_ptr() as *const std::ffi::c_char
    };
}
pub(crate) use cstr;

pub type RubyCFunc = unsafe extern "C" fn() -> VALUE;

pub fn to_ruby_cfunc_with_no_args<T>(f: unsafe extern "C" fn(T) -> VALUE) -> RubyCFunc {
    unsafe { transmute::<unsafe extern "C" fn(T) -> VALUE, RubyCFunc>(f) }
}
pub fn to_ruby_cfunc_with_one_arg<T, U>(f: unsafe extern "C" fn(T, U) -> VALUE) -> RubyCFunc {
    unsafe { transmute::<unsafe extern "C" fn(T, U) -> VALUE, RubyCFunc>(f) }
}

pub fn to_rb_bool(value: bool) -> VALUE {
    if value {
        Qtrue.into()
    } else {
        Qfalse.into()
    }
}
