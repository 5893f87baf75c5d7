// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Symbols referenced by the typed tree.

use std::fmt;

use crate::types::Type;

/// Identity of a local variable within one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalId(pub u32);

/// Identity of a label within one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(pub u32);

/// Where a local came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalKind {
    /// Declared in source.
    User,
    /// Temporary holding a spilled sub-expression.
    Spill,
    /// Any other compiler-generated local.
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalSymbol {
    pub id: LocalId,
    pub name: String,
    pub ty: Type,
    pub kind: LocalKind,
    /// A `ref` local aliases storage instead of owning a value.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_ref: bool,
}

impl LocalSymbol {
    pub fn is_synthesized(&self) -> bool {
        self.kind != LocalKind::User
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelSymbol {
    pub id: LabelId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamSymbol {
    pub index: u32,
    pub name: String,
    pub ty: Type,
}

/// A method as seen from a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodRef {
    pub container: Type,
    pub name: String,
    /// Method type arguments. Open definitions carry `Type::Param` placeholders.
    #[cfg_attr(feature = "serde", serde(default))]
    pub type_args: Vec<Type>,
    pub params: Vec<Type>,
    pub ret: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_static: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub returns_ref: bool,
}

impl MethodRef {
    pub fn instance(container: Type, name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        MethodRef {
            container,
            name: name.into(),
            type_args: Vec::new(),
            params,
            ret,
            is_static: false,
            returns_ref: false,
        }
    }

    pub fn static_method(
        container: Type,
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
    ) -> Self {
        MethodRef { is_static: true, ..MethodRef::instance(container, name, params, ret) }
    }

    pub fn generic(mut self, params: &[&str]) -> Self {
        self.type_args = params.iter().map(|p| Type::param(*p)).collect();
        self
    }

    /// Substitute positional method type arguments for the placeholders of an
    /// open definition.
    pub fn instantiate(&self, args: Vec<Type>) -> MethodRef {
        let map: Vec<(String, Type)> = self
            .type_args
            .iter()
            .zip(args.iter())
            .filter_map(|(open, arg)| match open {
                Type::Param(name) => Some((name.clone(), arg.clone())),
                _ => None,
            })
            .collect();
        let mut method = self.substitute(&map);
        method.type_args = args;
        method
    }

    /// Substitute generic parameters of the containing type and the method.
    pub fn substitute(&self, map: &[(String, Type)]) -> MethodRef {
        MethodRef {
            container: self.container.substitute(map),
            name: self.name.clone(),
            type_args: self.type_args.iter().map(|t| t.substitute(map)).collect(),
            params: self.params.iter().map(|t| t.substitute(map)).collect(),
            ret: self.ret.substitute(map),
            is_static: self.is_static,
            returns_ref: self.returns_ref,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.container, self.name)?;
        if !self.type_args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.type_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

/// A field as seen from an access site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldRef {
    pub container: Type,
    pub name: String,
    pub ty: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_static: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_readonly: bool,
}

impl FieldRef {
    pub fn new(container: Type, name: impl Into<String>, ty: Type) -> Self {
        FieldRef { container, name: name.into(), ty, is_static: false, is_readonly: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_generic_method() {
        let open = MethodRef::instance(
            Type::structure("AsyncTaskMethodBuilder"),
            "AwaitOnCompleted",
            vec![Type::param("TAwaiter"), Type::param("TStateMachine")],
            Type::Void,
        )
        .generic(&["TAwaiter", "TStateMachine"]);
        let closed = open.instantiate(vec![Type::structure("TaskAwaiter"), Type::class("<F>d__0")]);
        assert_eq!(closed.params[0], Type::structure("TaskAwaiter"));
        assert_eq!(closed.params[1], Type::class("<F>d__0"));
        assert_eq!(closed.to_string(), "AsyncTaskMethodBuilder.AwaitOnCompleted<TaskAwaiter, <F>d__0>");
    }
}
