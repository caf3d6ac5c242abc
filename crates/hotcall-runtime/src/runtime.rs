//! The class registry, linking and access overrides.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::class::{
    Class, ClassId, ClassRef, Method, MethodRef, NativeEntry, TypeRef, Visibility, VtableSlot,
    builtins, signature_key,
};
use crate::handle::DynamicHandle;
use crate::scope::ExecutionScope;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReflectError {
    #[error("cannot link {visibility} method `{method}`")]
    Inaccessible {
        method: String,
        visibility: Visibility,
    },
    #[error("access to `{method}` denied: {reason}")]
    AccessDenied { method: String, reason: String },
    #[error("class `{name}` is already defined")]
    DuplicateClass { name: String },
    #[error("unknown class `{name}`")]
    UnknownClass { name: String },
    #[error("class `{class}` has no method `{name}`")]
    UnknownMethod { class: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Allow generated code to link package-scoped methods directly.
    pub package_linking: bool,
    /// Allow dynamic handles to bypass visibility on unsealed classes.
    pub access_override: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            package_linking: true,
            access_override: true,
        }
    }
}

/// Description of a method to define.
#[derive(Debug, Clone)]
pub struct MethodDef {
    name: Arc<str>,
    entry: NativeEntry,
    params: Vec<TypeRef>,
    ret: TypeRef,
    is_static: bool,
    visibility: Visibility,
}

impl MethodDef {
    /// A public instance method taking no parameters and returning nothing.
    pub fn new(name: &str, entry: NativeEntry) -> Self {
        Self {
            name: name.into(),
            entry,
            params: Vec::new(),
            ret: TypeRef::Void,
            is_static: false,
            visibility: Visibility::Public,
        }
    }

    pub fn params(mut self, params: impl IntoIterator<Item = TypeRef>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    pub fn returns(mut self, ret: TypeRef) -> Self {
        self.ret = ret;
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    fn is_virtual(&self) -> bool {
        !self.is_static && self.visibility != Visibility::Private
    }
}

/// Description of a class to define.
#[derive(Debug, Clone)]
pub struct ClassDef {
    package: String,
    name: String,
    superclass: Option<ClassRef>,
    scope: Option<Arc<ExecutionScope>>,
    sealed: bool,
    methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(package: &str, name: &str) -> Self {
        Self {
            package: package.to_string(),
            name: name.to_string(),
            superclass: None,
            scope: None,
            sealed: false,
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: &ClassRef) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    pub fn in_scope(mut self, scope: &Arc<ExecutionScope>) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }
}

/// A reflective runtime: classes, their methods and the scopes that own them.
pub struct Runtime {
    options: RuntimeOptions,
    default_scope: Arc<ExecutionScope>,
    classes: RwLock<HashMap<Arc<str>, ClassRef>>,
    methods: DashMap<ClassId, Vec<MethodRef>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    pub fn with_options(options: RuntimeOptions) -> Self {
        let builtins = builtins();
        let classes = [
            &builtins.object,
            &builtins.string,
            &builtins.bool,
            &builtins.int,
            &builtins.long,
            &builtins.double,
        ]
        .into_iter()
        .map(|class| (Arc::from(class.qualified_name()), class.clone()))
        .collect();
        Self {
            options,
            default_scope: ExecutionScope::new("default"),
            classes: RwLock::new(classes),
            methods: DashMap::new(),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn new_scope(&self, name: &str) -> Arc<ExecutionScope> {
        ExecutionScope::new(name)
    }

    /// Scope used for classes defined without an explicit one.
    pub fn default_scope(&self) -> &Arc<ExecutionScope> {
        &self.default_scope
    }

    pub fn define_class(&self, def: ClassDef) -> Result<ClassRef, ReflectError> {
        let mut classes = self.classes.write();
        let qualified = if def.package.is_empty() {
            def.name.clone()
        } else {
            format!("{}.{}", def.package, def.name)
        };
        if classes.contains_key(qualified.as_str()) {
            return Err(ReflectError::DuplicateClass { name: qualified });
        }

        let superclass = def
            .superclass
            .unwrap_or_else(|| builtins().object.clone());
        let mut vtable = superclass.inherited_vtable();
        for method in def.methods.iter().filter(|method| method.is_virtual()) {
            let key = signature_key(&method.name, &method.params);
            match superclass.slot_of(&key) {
                Some(slot) => vtable[slot].set_entry(method.entry),
                None => vtable.push(VtableSlot::new(key, method.entry)),
            }
        }

        let scope = def.scope.unwrap_or_else(|| self.default_scope.clone());
        let class = Arc::new(Class::new(
            &def.package,
            &def.name,
            Some(superclass),
            scope,
            def.sealed,
            vtable,
        ));

        let methods = def
            .methods
            .into_iter()
            .map(|method| {
                let slot = if method.is_virtual() {
                    class.slot_of(&signature_key(&method.name, &method.params))
                } else {
                    None
                };
                Arc::new(Method::new(
                    class.clone(),
                    method.name,
                    method.params,
                    method.ret,
                    method.is_static,
                    method.visibility,
                    method.entry,
                    slot,
                ))
            })
            .collect();
        self.methods.insert(class.id(), methods);
        classes.insert(Arc::from(class.qualified_name()), class.clone());
        tracing::debug!(class = class.qualified_name(), scope = class.scope().name(), "defined class");
        Ok(class)
    }

    pub fn class(&self, qualified_name: &str) -> Option<ClassRef> {
        self.classes.read().get(qualified_name).cloned()
    }

    pub fn require_class(&self, qualified_name: &str) -> Result<ClassRef, ReflectError> {
        self.class(qualified_name)
            .ok_or_else(|| ReflectError::UnknownClass {
                name: qualified_name.to_string(),
            })
    }

    /// The first method of `class` named `name`, not searching superclasses.
    pub fn method(&self, class: &ClassRef, name: &str) -> Option<MethodRef> {
        self.methods
            .get(&class.id())?
            .iter()
            .find(|method| method.name() == name)
            .cloned()
    }

    pub fn require_method(&self, class: &ClassRef, name: &str) -> Result<MethodRef, ReflectError> {
        self.method(class, name)
            .ok_or_else(|| ReflectError::UnknownMethod {
                class: class.qualified_name().to_string(),
                name: name.to_string(),
            })
    }

    pub fn methods(&self, class: &ClassRef) -> Vec<MethodRef> {
        self.methods
            .get(&class.id())
            .map(|methods| methods.clone())
            .unwrap_or_default()
    }

    /// The native entry generated code may call directly.
    ///
    /// Private methods never link; package-scoped ones link only with
    /// [`RuntimeOptions::package_linking`].
    pub fn link(&self, method: &Method) -> Result<NativeEntry, ReflectError> {
        let linkable = match method.visibility() {
            Visibility::Private => false,
            Visibility::Package => self.options.package_linking,
            Visibility::Public | Visibility::Protected => true,
        };
        if linkable {
            Ok(method.entry())
        } else {
            Err(ReflectError::Inaccessible {
                method: method.to_string(),
                visibility: method.visibility(),
            })
        }
    }

    /// A dynamic handle for `method`, overriding visibility when needed.
    pub fn unreflect(&self, method: &MethodRef) -> Result<DynamicHandle, ReflectError> {
        if method.visibility() != Visibility::Public {
            let reason = if method.owner().is_sealed() {
                Some("owner class is sealed")
            } else if !self.options.access_override {
                Some("access override is disabled")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ReflectError::AccessDenied {
                    method: method.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(DynamicHandle::new(method.clone()))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .field("classes", &self.classes.read().len())
            .finish()
    }
}
