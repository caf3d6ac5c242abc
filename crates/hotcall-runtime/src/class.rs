//! Classes, methods and the types that describe their shapes.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use hotcall_diag::TraceFrame;

use crate::scope::ExecutionScope;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Unboxed value kinds a routine can take or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Int,
    Long,
    Double,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Double => "double",
        }
    }

    /// The class of the boxed form.
    pub fn boxed_class(self) -> &'static ClassRef {
        let builtins = builtins();
        match self {
            Primitive::Bool => &builtins.bool,
            Primitive::Int => &builtins.int,
            Primitive::Long => &builtins.long,
            Primitive::Double => &builtins.double,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a parameter or return slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Void,
    Primitive(Primitive),
    Reference(ClassRef),
}

impl TypeRef {
    pub fn bool() -> Self {
        TypeRef::Primitive(Primitive::Bool)
    }

    pub fn int() -> Self {
        TypeRef::Primitive(Primitive::Int)
    }

    pub fn long() -> Self {
        TypeRef::Primitive(Primitive::Long)
    }

    pub fn double() -> Self {
        TypeRef::Primitive(Primitive::Double)
    }

    pub fn string() -> Self {
        TypeRef::Reference(builtins().string.clone())
    }

    pub fn object() -> Self {
        TypeRef::Reference(builtins().object.clone())
    }

    pub fn reference(class: &ClassRef) -> Self {
        TypeRef::Reference(class.clone())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Primitive(kind) => write!(f, "{kind}"),
            TypeRef::Reference(class) => f.write_str(class.qualified_name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Package => "package",
            Visibility::Private => "private",
        })
    }
}

// ---------------------------------------------------------------------------
// Native entries
// ---------------------------------------------------------------------------

/// Address of an `extern "C"` routine implementing a method.
///
/// The calling convention follows the declared shape: the receiver (instance
/// methods) and reference parameters arrive as `*const Value`, `bool` as
/// `bool`, `int` as `i32`, `long` as `i64`, `double` as `f64`. Reference
/// returns are `*mut Value` produced by [`Value::into_native`]; void routines
/// return nothing. Routines report failures through [`crate::raise`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NativeEntry(*const u8);

// SAFETY: the pointer addresses immutable code, never data.
unsafe impl Send for NativeEntry {}
// SAFETY: see above.
unsafe impl Sync for NativeEntry {}

impl NativeEntry {
    /// # Safety
    /// `ptr` must address an `extern "C"` function whose signature matches
    /// the shape of every method it is attached to.
    pub unsafe fn from_raw(ptr: *const u8) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const u8 {
        self.0
    }
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeEntry({:p})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

/// Process-unique class identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(0);

impl ClassId {
    fn fresh() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type ClassRef = Arc<Class>;

#[derive(Clone)]
pub(crate) struct VtableSlot {
    key: String,
    entry: NativeEntry,
}

pub struct Class {
    id: ClassId,
    name: Arc<str>,
    package: Arc<str>,
    qualified_name: Arc<str>,
    superclass: Option<ClassRef>,
    scope: Arc<ExecutionScope>,
    sealed: bool,
    vtable: Vec<VtableSlot>,
}

impl Class {
    pub(crate) fn new(
        package: &str,
        name: &str,
        superclass: Option<ClassRef>,
        scope: Arc<ExecutionScope>,
        sealed: bool,
        vtable: Vec<VtableSlot>,
    ) -> Self {
        let qualified_name: Arc<str> = if package.is_empty() {
            name.into()
        } else {
            format!("{package}.{name}").into()
        };
        Self {
            id: ClassId::fresh(),
            name: name.into(),
            package: package.into(),
            qualified_name,
            superclass,
            scope,
            sealed,
            vtable,
        }
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn superclass(&self) -> Option<&ClassRef> {
        self.superclass.as_ref()
    }

    /// The execution scope that defined this class.
    pub fn scope(&self) -> &Arc<ExecutionScope> {
        &self.scope
    }

    /// Sealed classes refuse access overrides.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.id == other.id {
                return true;
            }
            current = class.superclass.as_deref();
        }
        false
    }

    /// Whether `value` may be used where this class is declared. `Null` is
    /// accepted by every reference type.
    pub fn accepts(&self, value: &Value) -> bool {
        match value.class() {
            None => true,
            Some(_) if self.id == builtins().object.id => true,
            Some(class) => class.is_subclass_of(self),
        }
    }

    pub fn vtable_len(&self) -> usize {
        self.vtable.len()
    }

    pub fn vtable_entry(&self, slot: usize) -> Option<NativeEntry> {
        self.vtable.get(slot).map(|slot| slot.entry)
    }

    pub(crate) fn slot_of(&self, key: &str) -> Option<usize> {
        self.vtable.iter().position(|slot| slot.key == key)
    }

    pub(crate) fn inherited_vtable(&self) -> Vec<VtableSlot> {
        self.vtable.clone()
    }
}

impl VtableSlot {
    pub(crate) fn new(key: String, entry: NativeEntry) -> Self {
        Self { key, entry }
    }

    pub(crate) fn set_entry(&mut self, entry: NativeEntry) {
        self.entry = entry;
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.qualified_name)
            .field("superclass", &self.superclass.as_ref().map(|c| c.qualified_name()))
            .field("scope", &self.scope.name())
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name)
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

pub type MethodRef = Arc<Method>;

/// A routine owned by a class.
pub struct Method {
    owner: ClassRef,
    name: Arc<str>,
    params: Vec<TypeRef>,
    ret: TypeRef,
    is_static: bool,
    visibility: Visibility,
    entry: NativeEntry,
    slot: Option<usize>,
    frame: TraceFrame,
}

impl Method {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        owner: ClassRef,
        name: Arc<str>,
        params: Vec<TypeRef>,
        ret: TypeRef,
        is_static: bool,
        visibility: Visibility,
        entry: NativeEntry,
        slot: Option<usize>,
    ) -> Self {
        let frame = TraceFrame::new(owner.qualified_name(), name.clone());
        Self {
            owner,
            name,
            params,
            ret,
            is_static,
            visibility,
            entry,
            slot,
            frame,
        }
    }

    pub fn owner(&self) -> &ClassRef {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeRef] {
        &self.params
    }

    pub fn ret(&self) -> &TypeRef {
        &self.ret
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Vtable slot for overridable instance methods.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// The frame this method contributes to failure traces.
    pub fn frame(&self) -> &TraceFrame {
        &self.frame
    }

    /// The entry that runs for `receiver`, following overrides.
    pub fn resolve_entry(&self, receiver: &Value) -> NativeEntry {
        let overridden = match (self.slot, receiver.as_object()) {
            (Some(slot), Some(object)) => object.class().vtable_entry(slot),
            _ => None,
        };
        overridden.unwrap_or(self.entry)
    }

    pub(crate) fn entry(&self) -> NativeEntry {
        self.entry
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({self})")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.owner.qualified_name(), self.name)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Key identifying an overridable method across a class hierarchy.
pub(crate) fn signature_key(name: &str, params: &[TypeRef]) -> String {
    let params: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("{name}({})", params.join(","))
}

// ---------------------------------------------------------------------------
// Builtin classes
// ---------------------------------------------------------------------------

/// Classes every runtime shares: the root class and the boxed forms of
/// strings and primitives.
pub struct Builtins {
    pub object: ClassRef,
    pub string: ClassRef,
    pub bool: ClassRef,
    pub int: ClassRef,
    pub long: ClassRef,
    pub double: ClassRef,
}

static BUILTINS: OnceLock<Builtins> = OnceLock::new();

pub fn builtins() -> &'static Builtins {
    BUILTINS.get_or_init(|| {
        let scope = ExecutionScope::bootstrap();
        let object = Arc::new(Class::new("core", "Object", None, scope.clone(), true, Vec::new()));
        let boxed = |name: &str| {
            Arc::new(Class::new(
                "core",
                name,
                Some(object.clone()),
                scope.clone(),
                true,
                Vec::new(),
            ))
        };
        Builtins {
            string: boxed("String"),
            bool: boxed("Bool"),
            int: boxed("Int"),
            long: boxed("Long"),
            double: boxed("Double"),
            object,
        }
    })
}
