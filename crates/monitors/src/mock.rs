//! Simple MockVM used in tests

use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU16, AtomicUsize, Ordering},
        Arc, LazyLock, Weak,
    },
};

use parking_lot::Mutex;

use crate::{
    objectmodel::header::{HeapObjectHeader, ThinLockId},
    runtime::{
        threads::{TLSData, Thread},
        SourceLocation,
    },
    sync::describe::StackVisitor,
    Runtime,
};

#[derive(Default)]
pub struct MockVM;

impl Runtime for MockVM {
    type Thread = MockThread;
    type ObjectRef = MockObjectRef;
    type Method = MockMethod;

    fn header<'a>(obj: MockObjectRef) -> &'a HeapObjectHeader<Self> {
        &obj.0.header
    }

    fn object_address(obj: MockObjectRef) -> usize {
        obj.0 as *const MockObject as usize
    }

    fn pretty_type_of(obj: MockObjectRef) -> String {
        obj.0.type_name.to_string()
    }

    fn thread_name(id: ThinLockId) -> Option<String> {
        MockThread::lookup(id).map(|thread| thread.name.clone())
    }

    fn current_frame(thread: &MockThread) -> Option<(MockMethod, u32)> {
        *thread.frame.lock()
    }

    fn current_frame_of(id: ThinLockId) -> Option<(MockMethod, u32)> {
        MockThread::lookup(id).and_then(|thread| *thread.frame.lock())
    }

    fn translate_location(method: MockMethod, dex_pc: u32) -> Option<SourceLocation> {
        if method.file.is_empty() {
            return None;
        }

        Some(SourceLocation {
            file: method.file.to_string(),
            line: method.first_line + dex_pc,
        })
    }
}

/// Mock heap objects are leaked: they live for the rest of the test binary.
pub struct MockObject {
    header: HeapObjectHeader<MockVM>,
    type_name: &'static str,
}

impl MockObject {
    pub fn allocate(type_name: &'static str) -> MockObjectRef {
        MockObjectRef(Box::leak(Box::new(Self {
            header: HeapObjectHeader::new(),
            type_name,
        })))
    }
}

#[derive(Copy, Clone)]
pub struct MockObjectRef(&'static MockObject);

impl PartialEq for MockObjectRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for MockObjectRef {}

impl Hash for MockObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl fmt::Debug for MockObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

/// A method with a single line per bytecode pc. An empty `file` has no line table.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MockMethod {
    pub file: &'static str,
    pub first_line: u32,
}

static NEXT_THREAD_ID: AtomicU16 = AtomicU16::new(1);
static THREADS: LazyLock<Mutex<HashMap<u16, Weak<MockThread>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub struct MockThread {
    id: ThinLockId,
    name: String,
    tls: TLSData<MockVM>,
    frame: Mutex<Option<(MockMethod, u32)>>,
    parked: AtomicUsize,
}

impl MockThread {
    pub fn new(name: &str) -> Arc<Self> {
        let id = loop {
            if let Some(id) = ThinLockId::new(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)) {
                break id;
            }
        };

        let thread = Arc::new(Self {
            id,
            name: name.to_string(),
            tls: TLSData::new(),
            frame: Mutex::new(None),
            parked: AtomicUsize::new(0),
        });
        THREADS.lock().insert(id.as_u16(), Arc::downgrade(&thread));
        thread
    }

    fn lookup(id: ThinLockId) -> Option<Arc<Self>> {
        THREADS.lock().get(&id.as_u16()).and_then(Weak::upgrade)
    }

    /// Set the innermost managed frame reported to the monitors.
    pub fn set_frame(&self, frame: Option<(MockMethod, u32)>) {
        *self.frame.lock() = frame;
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Relaxed) != 0
    }
}

impl Drop for MockThread {
    fn drop(&mut self) {
        THREADS.lock().remove(&self.id.as_u16());
    }
}

impl Thread<MockVM> for MockThread {
    fn thin_lock_id(&self) -> ThinLockId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn tls(&self) -> &TLSData<MockVM> {
        &self.tls
    }

    fn enter_parked(&self) {
        self.parked.fetch_add(1, Ordering::Relaxed);
    }

    fn leave_parked(&self) {
        self.parked.fetch_sub(1, Ordering::Relaxed);
    }

    fn attempt_leave_parked_no_block(&self) -> bool {
        self.leave_parked();
        true
    }
}

/// A stack frame for thread dump tests.
#[derive(Default)]
pub struct MockFrame {
    pub method: Option<MockMethod>,
    pub native: bool,
    pub synchronized: bool,
    pub this: Option<MockObjectRef>,
    pub locked: Vec<MockObjectRef>,
}

impl StackVisitor<MockVM> for MockFrame {
    fn method(&self) -> Option<MockMethod> {
        self.method
    }

    fn is_native(&self) -> bool {
        self.native
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    fn this_object(&self) -> Option<MockObjectRef> {
        self.this
    }

    fn locked_objects(&self) -> Vec<MockObjectRef> {
        self.locked.clone()
    }
}
