// tests/common/mod.rs

//! Shared simulation doubles for the integration suites.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use vepoll::{
    Descriptor, DescriptorBase, DescriptorHandle, Epoll, Host, Process, Scheduler, SimTime,
    Status, Task,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A simulation descriptor whose status the test flips by hand.
pub struct TestDescriptor {
    base: DescriptorBase,
}

impl TestDescriptor {
    pub fn new(handle: DescriptorHandle) -> Rc<Self> {
        let descriptor = Rc::new(Self {
            base: DescriptorBase::new(handle),
        });
        descriptor.base.adjust_status(Status::ACTIVE, true);
        descriptor
    }

    pub fn set_readable(&self, on: bool) {
        self.base.adjust_status(Status::READABLE, on);
    }

    pub fn set_writable(&self, on: bool) {
        self.base.adjust_status(Status::WRITABLE, on);
    }

    pub fn set_closed(&self) {
        self.base.adjust_status(Status::CLOSED, true);
    }
}

impl Descriptor for TestDescriptor {
    fn base(&self) -> &DescriptorBase {
        &self.base
    }
}

/// Manual scheduler: queues tasks, the test drains them.
#[derive(Default)]
pub struct TestScheduler {
    queue: RefCell<VecDeque<Task>>,
}

impl TestScheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run the next queued task, if any.
    pub fn run_next(&self) -> bool {
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) {
        while self.run_next() {}
    }
}

impl Scheduler for TestScheduler {
    fn schedule(&self, task: Task, _delay: SimTime) -> bool {
        self.queue.borrow_mut().push_back(task);
        true
    }
}

/// Process double; a continuation closure may be installed per test.
pub struct TestProcess {
    running: Cell<bool>,
    notify_wanted: Cell<bool>,
    resumed: Cell<usize>,
    continuation: RefCell<Option<Box<dyn Fn()>>>,
}

impl TestProcess {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            running: Cell::new(true),
            notify_wanted: Cell::new(true),
            resumed: Cell::new(0),
            continuation: RefCell::new(None),
        })
    }

    pub fn on_resume(&self, f: impl Fn() + 'static) {
        *self.continuation.borrow_mut() = Some(Box::new(f));
    }

    pub fn resumed(&self) -> usize {
        self.resumed.get()
    }

    pub fn set_running(&self, on: bool) {
        self.running.set(on);
    }

    pub fn set_wants_notify(&self, on: bool) {
        self.notify_wanted.set(on);
    }
}

impl Process for TestProcess {
    fn wants_notify(&self, _epoll_handle: DescriptorHandle) -> bool {
        self.notify_wanted.get()
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn resume(&self) {
        self.resumed.set(self.resumed.get() + 1);
        if let Some(continuation) = self.continuation.borrow().as_ref() {
            continuation();
        }
    }
}

/// Host double that records which descriptor handles were released.
#[derive(Default)]
pub struct TestHost {
    closed: RefCell<Vec<DescriptorHandle>>,
}

impl TestHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn closed(&self) -> Vec<DescriptorHandle> {
        self.closed.borrow().clone()
    }
}

impl Host for TestHost {
    fn close_descriptor(&self, handle: DescriptorHandle) {
        self.closed.borrow_mut().push(handle);
    }
}

/// One simulated host's worth of collaborators plus an epoll instance.
pub struct Sim {
    pub process: Rc<TestProcess>,
    pub scheduler: Rc<TestScheduler>,
    pub host: Rc<TestHost>,
    pub epoll: Rc<Epoll>,
}

pub const EPOLL_HANDLE: DescriptorHandle = 100;

impl Sim {
    pub fn new() -> Self {
        init_logging();
        let process = TestProcess::new();
        let scheduler = TestScheduler::new();
        let host = TestHost::new();
        let epoll = Epoll::new(
            EPOLL_HANDLE,
            process.clone(),
            scheduler.clone(),
            host.clone(),
        );
        Self {
            process,
            scheduler,
            host,
            epoll,
        }
    }
}
