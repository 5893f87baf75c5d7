// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Types carried on every expression of the typed tree.

use std::fmt;

/// Whether a named type is a class, a struct or an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
}

/// A resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    Void,
    Bool,
    Int,
    String,
    Object,
    /// Class, struct or interface, possibly generic.
    Named {
        name: String,
        args: Vec<Type>,
        kind: TypeKind,
    },
    Array(Box<Type>),
    /// Unsubstituted generic parameter.
    Param(String),
}

impl Type {
    pub fn named(name: impl Into<String>, args: Vec<Type>, kind: TypeKind) -> Type {
        Type::Named { name: name.into(), args, kind }
    }

    pub fn class(name: impl Into<String>) -> Type {
        Type::named(name, Vec::new(), TypeKind::Class)
    }

    pub fn structure(name: impl Into<String>) -> Type {
        Type::named(name, Vec::new(), TypeKind::Struct)
    }

    pub fn param(name: impl Into<String>) -> Type {
        Type::Param(name.into())
    }

    pub fn exception() -> Type {
        Type::class("Exception")
    }

    pub fn task() -> Type {
        Type::class("Task")
    }

    pub fn task_of(result: Type) -> Type {
        Type::named("Task", vec![result], TypeKind::Class)
    }

    pub fn value_task() -> Type {
        Type::structure("ValueTask")
    }

    pub fn value_task_of(result: Type) -> Type {
        Type::named("ValueTask", vec![result], TypeKind::Struct)
    }

    pub fn async_enumerable(element: Type) -> Type {
        Type::named("IAsyncEnumerable", vec![element], TypeKind::Interface)
    }

    pub fn async_enumerator(element: Type) -> Type {
        Type::named("IAsyncEnumerator", vec![element], TypeKind::Interface)
    }

    /// Base name of a named type, `None` for builtins.
    pub fn name(&self) -> Option<&str> {
        match self {
            Type::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Generic arguments of a named type.
    pub fn type_args(&self) -> &[Type] {
        match self {
            Type::Named { args, .. } => args,
            _ => &[],
        }
    }

    /// True when `self` is the named type `name` with `arity` type arguments.
    pub fn is_named(&self, name: &str, arity: usize) -> bool {
        matches!(self, Type::Named { name: n, args, .. } if n == name && args.len() == arity)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_value_type(&self) -> bool {
        match self {
            Type::Bool | Type::Int => true,
            Type::Named { kind, .. } => *kind == TypeKind::Struct,
            Type::Void | Type::String | Type::Object | Type::Array(_) | Type::Param(_) => false,
        }
    }

    pub fn is_reference_type(&self) -> bool {
        match self {
            Type::String | Type::Object | Type::Array(_) => true,
            Type::Named { kind, .. } => *kind != TypeKind::Struct,
            Type::Void | Type::Bool | Type::Int | Type::Param(_) => false,
        }
    }

    /// Replace generic parameters by name.
    pub fn substitute(&self, map: &[(String, Type)]) -> Type {
        match self {
            Type::Param(name) => map
                .iter()
                .find(|(p, _)| p == name)
                .map(|(_, t)| t.clone())
                .unwrap_or_else(|| self.clone()),
            Type::Named { name, args, kind } => Type::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(map)).collect(),
                kind: *kind,
            },
            Type::Array(elem) => Type::Array(Box::new(elem.substitute(map))),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::String => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Named { name, args, .. } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Array(elem) => write!(f, "{}[]", elem),
            Type::Param(name) => write!(f, "{}", name),
        }
    }
}
