// SPDX-License-Identifier: MPL-2.0

//! Platform doubles for unit tests.
//!
//! Every collaborator records how it was called and can be told to fail.
//! Blocking is backed by std threads.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    sync::{
        RwLock,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    thread::{self, Thread},
};

use zerocopy::{Immutable, IntoBytes};

use crate::{
    capability::CapSet,
    irq::IrqFlags,
    platform::{
        Console, Credentials, IrqChip, IrqCookie, IrqHandler, IrqReturn, MiscRegistry, PageProt,
        PhysMemPlatform, Task, UserSpace, VmArea,
    },
    prelude::*,
};

pub struct MockCredentials {
    capset: CapSet,
}

impl MockCredentials {
    pub fn new(capset: CapSet) -> Self {
        Self { capset }
    }
}

impl Credentials for MockCredentials {
    fn effective_capset(&self) -> CapSet {
        self.capset
    }
}

/// A sparse user address space where only written bytes are readable.
pub struct MockUserSpace {
    memory: Mutex<BTreeMap<Vaddr, u8>>,
}

impl MockUserSpace {
    pub fn new() -> Self {
        Self {
            memory: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn write_bytes(&self, dst: Vaddr, src: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, byte) in src.iter().enumerate() {
            memory.insert(dst + i, *byte);
        }
    }

    pub fn write_val<T: IntoBytes + Immutable>(&self, dst: Vaddr, val: &T) {
        self.write_bytes(dst, val.as_bytes());
    }
}

impl UserSpace for MockUserSpace {
    fn read_bytes(&self, src: Vaddr, dst: &mut [u8]) -> Result<()> {
        let memory = self.memory.lock();
        for (i, byte) in dst.iter_mut().enumerate() {
            let Some(val) = memory.get(&(src + i)) else {
                return_errno_with_message!(Errno::EFAULT, "unmapped user address");
            };
            *byte = *val;
        }
        Ok(())
    }
}

/// A task backed by a std thread.
pub struct ThreadTask {
    thread: Thread,
    signal: AtomicBool,
}

impl ThreadTask {
    /// Creates a task for the calling thread.
    pub fn current() -> Arc<Self> {
        Arc::new(Self {
            thread: thread::current(),
            signal: AtomicBool::new(false),
        })
    }

    /// Delivers a signal to the task, waking it up if it is parked.
    pub fn raise_signal(&self) {
        self.signal.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

impl Task for ThreadTask {
    fn park(&self) {
        assert_eq!(thread::current().id(), self.thread.id());
        thread::park();
    }

    fn unpark(&self) {
        self.thread.unpark();
    }

    fn has_pending_signal(&self) -> bool {
        self.signal.load(Ordering::Acquire)
    }
}

struct Registration {
    cookie: IrqCookie,
    flags: IrqFlags,
    handler: Arc<dyn IrqHandler>,
}

#[derive(Default)]
struct IrqChipState {
    lines: BTreeMap<u32, Vec<Registration>>,
    freed: BTreeMap<u32, usize>,
    rejected: BTreeSet<u32>,
    next_cookie: u64,
    num_registered: usize,
}

thread_local! {
    // Every test thread plays the role of a CPU.
    static LOCAL_IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns whether interrupts are enabled on the CPU of the calling thread.
pub fn local_irq_enabled() -> bool {
    LOCAL_IRQ_ENABLED.with(Cell::get)
}

/// An interrupt controller whose interrupts are raised by [`MockIrqChip::fire`].
pub struct MockIrqChip {
    state: Mutex<IrqChipState>,
    // Held for reading while handlers run, so that `free_irq` can wait for them.
    dispatch: RwLock<()>,
    num_local_disables: AtomicUsize,
}

impl MockIrqChip {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(IrqChipState::default()),
            dispatch: RwLock::new(()),
            num_local_disables: AtomicUsize::new(0),
        }
    }

    /// Returns how many times local interrupts went from enabled to disabled.
    pub fn num_local_disables(&self) -> usize {
        self.num_local_disables.load(Ordering::Relaxed)
    }

    /// Makes every later registration on `irq_num` fail with `EBUSY`.
    pub fn reject_line(&self, irq_num: u32) {
        self.state.lock().rejected.insert(irq_num);
    }

    pub fn num_handlers(&self, irq_num: u32) -> usize {
        self.state.lock().lines.get(&irq_num).map_or(0, Vec::len)
    }

    pub fn flags_of(&self, irq_num: u32) -> Option<IrqFlags> {
        let state = self.state.lock();
        state.lines.get(&irq_num)?.first().map(|reg| reg.flags)
    }

    /// Returns the number of successful registrations on all lines.
    pub fn num_registered(&self) -> usize {
        self.state.lock().num_registered
    }

    pub fn num_freed(&self, irq_num: u32) -> usize {
        self.state.lock().freed.get(&irq_num).copied().unwrap_or(0)
    }

    /// Raises `irq_num` on the calling thread's CPU, calling every handler registered on it
    /// in interrupt context.
    pub fn fire(&self, irq_num: u32) -> Vec<IrqReturn> {
        assert!(local_irq_enabled(), "interrupt raised while masked");
        let _dispatch = self.dispatch.read().unwrap();
        let handlers: Vec<_> = self
            .state
            .lock()
            .lines
            .get(&irq_num)
            .map(|regs| regs.iter().map(|reg| reg.handler.clone()).collect())
            .unwrap_or_default();

        LOCAL_IRQ_ENABLED.with(|enabled| enabled.set(false));
        let returns = handlers
            .iter()
            .map(|handler| handler.handle_irq(irq_num))
            .collect();
        LOCAL_IRQ_ENABLED.with(|enabled| enabled.set(true));
        returns
    }
}

impl IrqChip for MockIrqChip {
    fn request_irq(
        &self,
        irq_num: u32,
        flags: IrqFlags,
        _name: &'static str,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<IrqCookie> {
        let mut state = self.state.lock();
        if state.rejected.contains(&irq_num) {
            return_errno_with_message!(Errno::EBUSY, "the line is taken");
        }
        let regs = state.lines.entry(irq_num).or_default();
        let shareable = regs
            .iter()
            .all(|reg| reg.flags.contains(IrqFlags::SHARED) && flags.contains(IrqFlags::SHARED));
        if !shareable {
            return_errno_with_message!(Errno::EBUSY, "the line is not shared");
        }

        state.next_cookie += 1;
        let cookie = IrqCookie(state.next_cookie);
        state.lines.entry(irq_num).or_default().push(Registration {
            cookie,
            flags,
            handler,
        });
        state.num_registered += 1;
        Ok(cookie)
    }

    fn free_irq(&self, irq_num: u32, cookie: IrqCookie) {
        let mut state = self.state.lock();
        let regs = state.lines.get_mut(&irq_num).expect("freeing an unknown line");
        let len = regs.len();
        regs.retain(|reg| reg.cookie != cookie);
        assert_eq!(regs.len() + 1, len, "freeing an unknown handler");
        *state.freed.entry(irq_num).or_default() += 1;
        drop(state);

        // Wait for handlers that are still running on other CPUs.
        drop(self.dispatch.write().unwrap());
    }

    fn is_local_enabled(&self) -> bool {
        local_irq_enabled()
    }

    fn disable_local(&self) {
        self.num_local_disables.fetch_add(1, Ordering::Relaxed);
        LOCAL_IRQ_ENABLED.with(|enabled| enabled.set(false));
    }

    fn enable_local(&self) {
        LOCAL_IRQ_ENABLED.with(|enabled| enabled.set(true));
    }
}

/// The policy checks of [`PhysMemPlatform`], in the order they are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysMemCheck {
    ValidRange,
    PrivateMapping,
    Allowed,
    AccessProt,
}

/// A recorded call to [`PhysMemPlatform::remap_pfn_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapCall {
    pub vaddr: Vaddr,
    pub pfn: usize,
    pub size: usize,
    pub prot: PageProt,
}

/// A physical memory platform that permits everything unless told otherwise.
pub struct MockPhysMem {
    denied: Mutex<Vec<PhysMemCheck>>,
    consulted: Mutex<Vec<PhysMemCheck>>,
    extra_prot: Mutex<PageProt>,
    has_ioremap_prot: AtomicBool,
    fail_remap: AtomicBool,
    remap_calls: Mutex<Vec<RemapCall>>,
    num_generic_accesses: AtomicUsize,
}

impl MockPhysMem {
    pub fn new() -> Self {
        Self {
            denied: Mutex::new(Vec::new()),
            consulted: Mutex::new(Vec::new()),
            extra_prot: Mutex::new(PageProt::empty()),
            has_ioremap_prot: AtomicBool::new(true),
            fail_remap: AtomicBool::new(false),
            remap_calls: Mutex::new(Vec::new()),
            num_generic_accesses: AtomicUsize::new(0),
        }
    }

    pub fn deny(&self, check: PhysMemCheck) {
        self.denied.lock().push(check);
    }

    /// Returns the policy checks consulted so far, in order.
    pub fn consulted(&self) -> Vec<PhysMemCheck> {
        self.consulted.lock().clone()
    }

    /// Makes the protection derivation add `prot` to the requested protection.
    pub fn set_extra_prot(&self, prot: PageProt) {
        *self.extra_prot.lock() = prot;
    }

    pub fn set_has_ioremap_prot(&self, has_ioremap_prot: bool) {
        self.has_ioremap_prot
            .store(has_ioremap_prot, Ordering::Relaxed);
    }

    pub fn fail_remap(&self) {
        self.fail_remap.store(true, Ordering::Relaxed);
    }

    pub fn remap_calls(&self) -> Vec<RemapCall> {
        self.remap_calls.lock().clone()
    }

    pub fn num_generic_accesses(&self) -> usize {
        self.num_generic_accesses.load(Ordering::Relaxed)
    }

    fn consult(&self, check: PhysMemCheck) -> bool {
        self.consulted.lock().push(check);
        !self.denied.lock().contains(&check)
    }
}

impl PhysMemPlatform for MockPhysMem {
    fn valid_mmap_phys_addr_range(&self, _pfn: usize, _size: usize) -> bool {
        self.consult(PhysMemCheck::ValidRange)
    }

    fn private_mapping_ok(&self, _vma: &VmArea) -> bool {
        self.consult(PhysMemCheck::PrivateMapping)
    }

    fn range_is_allowed(&self, _pfn: usize, _size: usize) -> bool {
        self.consult(PhysMemCheck::Allowed)
    }

    fn phys_mem_access_prot_allowed(
        &self,
        _pfn: usize,
        _size: usize,
        prot: &mut PageProt,
    ) -> bool {
        if !self.consult(PhysMemCheck::AccessProt) {
            return false;
        }
        *prot |= *self.extra_prot.lock();
        true
    }

    fn has_ioremap_prot(&self) -> bool {
        self.has_ioremap_prot.load(Ordering::Relaxed)
    }

    fn remap_pfn_range(
        &self,
        _vma: &VmArea,
        vaddr: Vaddr,
        pfn: usize,
        size: usize,
        prot: PageProt,
    ) -> Result<()> {
        self.remap_calls.lock().push(RemapCall {
            vaddr,
            pfn,
            size,
            prot,
        });
        if self.fail_remap.load(Ordering::Relaxed) {
            return_errno_with_message!(Errno::ENOMEM, "out of page table memory");
        }
        Ok(())
    }

    fn generic_access_phys(
        &self,
        _vma: &VmArea,
        _addr: Vaddr,
        buf: &mut [u8],
        _write: bool,
    ) -> Result<usize> {
        self.num_generic_accesses.fetch_add(1, Ordering::Relaxed);
        Ok(buf.len())
    }
}

/// A misc device registry that hands out increasing minor numbers.
pub struct MockMiscRegistry {
    registered: Mutex<Vec<(u32, String)>>,
    next_minor: AtomicU32,
    fail: AtomicBool,
    num_deregistered: AtomicUsize,
}

impl MockMiscRegistry {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            next_minor: AtomicU32::new(60),
            fail: AtomicBool::new(false),
            num_deregistered: AtomicUsize::new(0),
        }
    }

    pub fn fail_registration(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    /// Returns the minor numbers and names of the registered devices.
    pub fn registered(&self) -> Vec<(u32, String)> {
        self.registered.lock().clone()
    }

    pub fn num_deregistered(&self) -> usize {
        self.num_deregistered.load(Ordering::Relaxed)
    }
}

impl MiscRegistry for MockMiscRegistry {
    fn misc_register(&self, name: &str) -> Result<u32> {
        if self.fail.load(Ordering::Relaxed) {
            return_errno_with_message!(Errno::EBUSY, "no free minor number");
        }
        let minor = self.next_minor.fetch_add(1, Ordering::Relaxed);
        self.registered.lock().push((minor, name.to_string()));
        Ok(minor)
    }

    fn misc_deregister(&self, minor: u32) {
        self.registered.lock().retain(|(m, _)| *m != minor);
        self.num_deregistered.fetch_add(1, Ordering::Relaxed);
    }
}

/// A console that keeps everything sent to it.
pub struct MockConsole {
    output: Mutex<Vec<u8>>,
}

impl MockConsole {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.output.lock())
            .lines()
            .map(ToString::to_string)
            .collect()
    }
}

impl Console for MockConsole {
    fn send(&self, buf: &[u8]) {
        self.output.lock().extend_from_slice(buf);
    }
}

thread_local! {
    static CAPTURED_LOGS: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED_LOGS.with(|logs| {
            if let Some(logs) = logs.borrow_mut().as_mut() {
                logs.push(record.args().to_string());
            }
        });
    }

    fn flush(&self) {}
}

static CAPTURE_LOGGER: CaptureLogger = CaptureLogger;

/// Runs `f` and returns the messages it logged on the current thread at level info or above.
pub fn capture_logs<F: FnOnce()>(f: F) -> Vec<String> {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        let _ = log::set_logger(&CAPTURE_LOGGER);
    });
    log::set_max_level(log::LevelFilter::Info);

    CAPTURED_LOGS.with(|logs| *logs.borrow_mut() = Some(Vec::new()));
    f();
    CAPTURED_LOGS
        .with(|logs| logs.borrow_mut().take())
        .unwrap_or_default()
}
