use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The machine-wide live/running flag.
///
/// Cloning yields another handle to the same flag. Unlike the rest of the
/// core this handle is `Send`, so a front end or a stop request on another
/// thread can flip it while the CPU thread owns the memory.
#[derive(Clone, Debug, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        RunFlag(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

/// Returns false once there is nothing left to reset.
type ResetHook = Rc<dyn Fn() -> bool>;

struct MachineInner {
    name: String,
    run: RunFlag,
    reset_hooks: RefCell<Rc<Vec<ResetHook>>>,
}

/// Per-machine state shared by every address space and register of one
/// emulated machine: the running flag and the reset event.
///
/// Several machines can coexist in one process; nothing here is global.
#[derive(Clone)]
pub struct Machine {
    inner: Rc<MachineInner>,
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        log::debug!("machine `{}` created", name);
        Machine {
            inner: Rc::new(MachineInner {
                name,
                run: RunFlag::new(),
                reset_hooks: RefCell::new(Rc::new(Vec::new())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a thread-safe handle to this machine's running flag.
    pub fn run_flag(&self) -> RunFlag {
        self.inner.run.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.is_running()
    }

    /// Enters the live state; read-only cells are enforced from here on.
    pub fn start(&self) {
        log::debug!("machine `{}` running", self.inner.name);
        self.inner.run.set_running(true);
    }

    /// Leaves the live state so setup writes reach protected cells again.
    pub fn stop(&self) {
        log::debug!("machine `{}` stopped", self.inner.name);
        self.inner.run.set_running(false);
    }

    /// Registers a callback fired on every machine reset.
    ///
    /// Hooks should hold weak references to what they reset, since the
    /// machine usually outlives nothing it is attached to.
    pub fn on_reset(&self, hook: impl Fn() + 'static) {
        self.on_reset_while(move || {
            hook();
            true
        });
    }

    /// Like [Machine::on_reset], but the hook is dropped after the first
    /// reset on which it returns false, typically once the weak reference
    /// it holds can no longer be upgraded.
    pub fn on_reset_while(&self, hook: impl Fn() -> bool + 'static) {
        let mut hooks = self.inner.reset_hooks.borrow_mut();
        Rc::make_mut(&mut hooks).push(Rc::new(hook));
    }

    pub fn reset_hook_count(&self) -> usize {
        self.inner.reset_hooks.borrow().len()
    }

    /// Fires the reset event. The running flag is left as it is; the CPU
    /// lifecycle decides whether execution resumes.
    pub fn reset(&self) {
        log::debug!("machine `{}` reset", self.inner.name);
        let hooks = self.inner.reset_hooks.borrow().clone();
        let mut finished: Vec<ResetHook> = Vec::new();
        for hook in hooks.iter() {
            if !hook() {
                finished.push(hook.clone());
            }
        }
        if finished.is_empty() {
            return;
        }
        let mut current = self.inner.reset_hooks.borrow_mut();
        Rc::make_mut(&mut current).retain(|hook| !finished.iter().any(|f| Rc::ptr_eq(f, hook)));
        log::trace!(
            "machine `{}`: dropped {} finished reset hooks",
            self.inner.name,
            finished.len()
        );
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.inner.name)
            .field("running", &self.inner.run.is_running())
            .finish()
    }
}
