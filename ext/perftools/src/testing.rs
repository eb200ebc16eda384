use std::cell::RefCell;
use std::ffi::{c_int, c_void};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::allocation_tracer::code_patcher::CodePatcher;
use crate::engine::{MarkFn, SamplingEngine, StackCapture};
use crate::error::{Error, Result};
use crate::frame::{CallFrame, Runtime, Slot, Symbols};

// Signal dispositions, the fault guard and the trap rotation are process-wide.
static GLOBAL_STATE_LOCK: Mutex<()> = Mutex::new(());

pub fn lock_global_state() -> MutexGuard<'static, ()> {
    GLOBAL_STATE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub const SYMBOLS: Symbols = Symbols {
    allocator: 1,
    allocate: 0xa110c,
    send: 0x5e4d,
    underscore_send: 0x5e4e,
};

pub const GC_SENTINEL: Slot = 0x6c;

#[derive(Clone, Debug)]
pub struct SyntheticFrame {
    pub defining_class: Slot,
    pub receiver: Option<Slot>,
    pub method_id: Option<Slot>,
    pub real_call: bool,
    pub source_position: Slot,
    // Address read when the class is requested; used to provoke a fault.
    pub poison: Option<usize>,
}

impl SyntheticFrame {
    pub fn method(defining_class: Slot, method_id: Slot, source_position: Slot) -> Self {
        Self {
            defining_class,
            receiver: Some(0xbeef),
            method_id: Some(method_id),
            real_call: true,
            source_position,
            poison: None,
        }
    }

    pub fn block(source_position: Slot) -> Self {
        Self {
            defining_class: 0,
            receiver: None,
            method_id: None,
            real_call: false,
            source_position,
            poison: None,
        }
    }

    pub fn with_receiver(mut self, receiver: Option<Slot>) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn with_method_id(mut self, method_id: Option<Slot>) -> Self {
        self.method_id = method_id;
        self
    }

    pub fn poisoned(mut self, address: usize) -> Self {
        self.poison = Some(address);
        self
    }
}

#[derive(Clone, Copy)]
pub struct SyntheticFrameRef<'a> {
    frames: &'a [SyntheticFrame],
    index: usize,
}

impl<'a> SyntheticFrameRef<'a> {
    fn frame(&self) -> &'a SyntheticFrame {
        &self.frames[self.index]
    }
}

impl CallFrame for SyntheticFrameRef<'_> {
    fn defining_class(&self) -> Slot {
        if let Some(address) = self.frame().poison {
            return unsafe { std::ptr::read_volatile(address as *const Slot) };
        }
        self.frame().defining_class
    }

    fn receiver(&self) -> Option<Slot> {
        self.frame().receiver
    }

    fn method_id(&self) -> Option<Slot> {
        self.frame().method_id
    }

    fn previous(&self) -> Option<Self> {
        let index = self.index + 1;
        (index < self.frames.len()).then_some(Self {
            frames: self.frames,
            index,
        })
    }

    fn is_real_call(&self) -> bool {
        self.frame().real_call
    }

    fn source_position(&self) -> Slot {
        self.frame().source_position
    }
}

/// A runtime whose stack is a plain list, innermost frame first.
#[derive(Clone, Debug, Default)]
pub struct SyntheticRuntime {
    pub frames: Vec<SyntheticFrame>,
    pub during_gc: bool,
    // (receiver, singleton class) pairs
    pub singletons: Vec<(Slot, Slot)>,
}

impl SyntheticRuntime {
    pub fn new(frames: Vec<SyntheticFrame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// A stack `depth` method frames deep, each at its own source position.
    pub fn with_depth(depth: usize) -> Self {
        Self::new(
            (0..depth)
                .map(|i| SyntheticFrame::method(0x1000 + i, 0x2000 + i, 0x3000 + i))
                .collect(),
        )
    }
}

impl Runtime for SyntheticRuntime {
    type Frame<'a> = SyntheticFrameRef<'a>;

    const NEEDS_FAULT_GUARD: bool = false;

    fn current_frame(&self) -> Option<Self::Frame<'_>> {
        (!self.frames.is_empty()).then_some(SyntheticFrameRef {
            frames: &self.frames,
            index: 0,
        })
    }

    fn during_gc(&self) -> bool {
        self.during_gc
    }

    fn gc_sentinel(&self) -> Slot {
        GC_SENTINEL
    }

    fn symbols(&self) -> &Symbols {
        &SYMBOLS
    }

    fn is_singleton_receiver(&self, receiver: Slot, defining_class: Slot) -> bool {
        self.singletons.contains(&(receiver, defining_class))
    }
}

/// The same stack, walked as if its frame chain could be inconsistent.
pub struct GuardedRuntime(pub SyntheticRuntime);

impl Runtime for GuardedRuntime {
    type Frame<'a> = SyntheticFrameRef<'a>;

    const NEEDS_FAULT_GUARD: bool = true;

    fn current_frame(&self) -> Option<Self::Frame<'_>> {
        self.0.current_frame()
    }

    fn during_gc(&self) -> bool {
        self.0.during_gc()
    }

    fn gc_sentinel(&self) -> Slot {
        self.0.gc_sentinel()
    }

    fn symbols(&self) -> &Symbols {
        self.0.symbols()
    }

    fn is_singleton_receiver(&self, receiver: Slot, defining_class: Slot) -> bool {
        self.0.is_singleton_receiver(receiver, defining_class)
    }
}

/// An anonymous page mapped with the given protection.
pub struct MappedPage {
    address: *mut c_void,
    len: usize,
}

impl MappedPage {
    pub fn new(protection: c_int) -> Self {
        let len = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let address = unsafe {
            libc::mmap(
                null_mut(),
                len,
                protection,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(address, libc::MAP_FAILED, "mmap failed: {}", io::Error::last_os_error());
        Self { address, len }
    }

    pub fn address(&self) -> usize {
        self.address as usize
    }
}

impl Drop for MappedPage {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.address, self.len);
        }
    }
}

/// A callable stand-in for the allocation routine: `nop; nop; ret`.
/// Both leading instructions are one byte long, so every trap slot sits on
/// an instruction boundary.
pub struct TrapTarget {
    page: MappedPage,
}

pub const TRAP_TARGET_CODE: [u8; 3] = [0x90, 0x90, 0xc3];

impl TrapTarget {
    pub fn new() -> Self {
        let page = MappedPage::new(libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC);
        unsafe {
            std::ptr::copy_nonoverlapping(
                TRAP_TARGET_CODE.as_ptr(),
                page.address() as *mut u8,
                TRAP_TARGET_CODE.len(),
            );
        }
        Self { page }
    }

    pub fn entry(&self) -> *const u8 {
        self.page.address() as *const u8
    }

    pub fn code(&self) -> [u8; 3] {
        let mut code = [0; 3];
        for (i, byte) in code.iter_mut().enumerate() {
            *byte = unsafe { std::ptr::read_volatile(self.entry().add(i)) };
        }
        code
    }

    pub fn call(&self) {
        let routine: extern "C" fn() = unsafe { std::mem::transmute(self.entry()) };
        std::hint::black_box(routine)();
    }
}

/// Byte-addressed fake code memory for exercising the trap rotation
/// without touching real instructions.
pub struct FakeCode {
    pub base: usize,
    bytes: RefCell<Vec<u8>>,
    read_only: RefCell<Vec<usize>>,
}

impl FakeCode {
    pub const BASE: usize = 0x40_0000;

    pub fn new(bytes: &[u8]) -> Self {
        Self {
            base: Self::BASE,
            bytes: RefCell::new(bytes.to_vec()),
            read_only: RefCell::new(vec![]),
        }
    }

    pub fn with_read_only(self, offset: usize) -> Self {
        self.make_read_only(offset);
        self
    }

    pub fn make_read_only(&self, offset: usize) {
        self.read_only.borrow_mut().push(self.base + offset);
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.bytes.borrow()[offset]
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    fn write(&self, address: usize, byte: u8) -> Result<()> {
        if self.read_only.borrow().contains(&address) {
            return Err(Error::Protect {
                address,
                source: io::Error::from_raw_os_error(libc::EACCES),
            });
        }
        self.bytes.borrow_mut()[address - self.base] = byte;
        Ok(())
    }
}

impl CodePatcher for FakeCode {
    fn read_byte(&self, address: usize) -> u8 {
        self.bytes.borrow()[address - self.base]
    }

    fn patch_byte(&self, address: usize, new_byte: u8) -> Result<u8> {
        let original = self.read_byte(address);
        self.write(address, new_byte)?;
        Ok(original)
    }

    fn restore_byte(&self, address: usize, original_byte: u8) -> Result<()> {
        self.write(address, original_byte)
    }
}

/// Counts every call made into the engine boundary.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub flushes: AtomicUsize,
    pub records: AtomicUsize,
    pub gc_marks: AtomicUsize,
    pub refuse_start: AtomicBool,
    pub last_path: Mutex<Option<PathBuf>>,
}

impl RecordingEngine {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl SamplingEngine for RecordingEngine {
    fn start(&self, output_path: &Path, _capture: StackCapture) -> Result<()> {
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(Error::EngineStart {
                path: output_path.to_path_buf(),
                reason: "refused by test engine".to_owned(),
            });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock().unwrap() = Some(output_path.to_path_buf());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, _signal: c_int, _info: *mut libc::siginfo_t, _context: *mut c_void) {
        self.records.fetch_add(1, Ordering::SeqCst);
    }

    fn gc_mark(&self, _mark: MarkFn) {
        self.gc_marks.fetch_add(1, Ordering::SeqCst);
    }
}
