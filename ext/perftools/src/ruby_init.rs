#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::Arc;

use rb_sys::*;

use crate::configuration::Configuration;
use crate::controller::SamplingController;
use crate::cpu_profiler::{CpuProfiler, CONTROLLER};
use crate::engine::gperftools::Gperftools;
use crate::ruby_runtime::{self, RubyRuntime, RUBY_RUNTIME};
use crate::util::*;

#[allow(non_snake_case)]
#[no_mangle]
extern "C" fn Init_perftools() {
    #[cfg(feature = "debug")]
    {
        env_logger::builder()
            .format_timestamp(None)
            .format_module_path(false)
            .init();
    }

    RUBY_RUNTIME.get_or_init(|| unsafe { RubyRuntime::new() });
    let controller = CONTROLLER.get_or_init(|| {
        let configuration = Configuration::from_env();
        log::debug!("{:?}", configuration);
        let controller = SamplingController::new(
            configuration,
            Arc::new(Gperftools),
            ruby_runtime::stack_capture(),
        );
        // rb_obj_alloc is the exported allocation entry. Class#new reaches
        // the allocator through an internal path and is not counted here.
        unsafe { controller.with_allocation_entry(rb_obj_alloc as *const u8) }
    });

    unsafe {
        let rb_cPerfTools: VALUE = rb_define_class(cstr!("PerfTools"), rb_cObject);
        let rb_cCpuProfiler =
            rb_define_class_under(rb_cPerfTools, cstr!("CpuProfiler"), rb_cObject);

        rb_define_singleton_method(
            rb_cCpuProfiler,
            cstr!("running?"),
            Some(to_ruby_cfunc_with_no_args(CpuProfiler::rb_running_p)),
            0,
        );
        rb_define_singleton_method(
            rb_cCpuProfiler,
            cstr!("start"),
            Some(to_ruby_cfunc_with_one_arg(CpuProfiler::rb_start)),
            1,
        );
        rb_define_singleton_method(
            rb_cCpuProfiler,
            cstr!("stop"),
            Some(to_ruby_cfunc_with_no_args(CpuProfiler::rb_stop)),
            0,
        );

        CpuProfiler::install_gc_hook(rb_cCpuProfiler, controller);
    }

    if controller.configuration().autostart_object_tracing() {
        controller.enable_allocation_tracing();
    }
}
