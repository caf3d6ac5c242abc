//! Descriptor resolution: the facts about a target that invoker generation
//! depends on.

use std::fmt;

use hotcall_runtime::{ClassRef, MethodRef, TypeRef, Visibility};

/// Identity and shape of one target routine.
///
/// Parameters are in call-argument order and exclude the receiver.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    method: MethodRef,
    owner: ClassRef,
    name: String,
    params: Vec<TypeRef>,
    ret: TypeRef,
    is_static: bool,
    visibility: Visibility,
}

impl MethodDescriptor {
    pub fn resolve(method: &MethodRef) -> Self {
        Self {
            method: method.clone(),
            owner: method.owner().clone(),
            name: method.name().to_string(),
            params: method.params().to_vec(),
            ret: method.ret().clone(),
            is_static: method.is_static(),
            visibility: method.visibility(),
        }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
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

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.visibility != Visibility::Public {
            write!(f, "{} ", self.visibility)?;
        }
        if self.is_static {
            f.write_str("static ")?;
        }
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
