// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The synthesized state machine type.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use tern_ast::{Block, FieldRef, LocalId, LocalKind, LocalSymbol, MethodRef, ParamSymbol, Type};

use super::states::StateMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMachineKind {
    AsyncMethod,
    AsyncIterator {
        /// Returns `IAsyncEnumerable<T>` rather than `IAsyncEnumerator<T>`.
        enumerable: bool,
    },
}

/// What a field of the machine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    State,
    Builder,
    InitialThreadId,
    This,
    /// Working copy of the parameter with this index.
    Parameter(u32),
    /// Pristine copy of a parameter, for enumerables that hand out fresh
    /// enumerators.
    ParameterProxy(u32),
    Hoisted(LocalId),
    /// Awaiter kept across a suspension; shared by all awaits of one type.
    Awaiter,
    Current,
    DisposeMode,
    Promise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub field: FieldRef,
    pub role: FieldRole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedMethod {
    pub name: String,
    pub params: Vec<ParamSymbol>,
    pub ret: Type,
    pub body: Block,
    /// Interface member this method implements.
    pub implements: Option<MethodRef>,
}

#[derive(Debug, Clone)]
pub struct StateMachineDescriptor {
    pub name: String,
    pub ty: Type,
    pub kind: StateMachineKind,
    /// Structs are used for non-iterator machines in release builds; the
    /// builder boxes them on first suspension.
    pub is_value_type: bool,
    pub interfaces: Vec<Type>,
    pub fields: Vec<FieldDef>,
    /// Takes the initial state as its only parameter.
    pub constructor: SynthesizedMethod,
    pub methods: Vec<SynthesizedMethod>,
    pub state_map: StateMap,
}

impl StateMachineDescriptor {
    pub fn field(&self, role: FieldRole) -> Option<&FieldRef> {
        self.fields.iter().find(|f| f.role == role).map(|f| &f.field)
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.field.name == name)
    }

    pub fn awaiter_fields(&self) -> impl Iterator<Item = &FieldRef> {
        self.fields.iter().filter(|f| f.role == FieldRole::Awaiter).map(|f| &f.field)
    }

    pub fn method(&self, name: &str) -> Option<&SynthesizedMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// The step function.
    pub fn move_next(&self) -> Option<&SynthesizedMethod> {
        self.method("MoveNext")
    }

    pub fn is_iterator(&self) -> bool {
        matches!(self.kind, StateMachineKind::AsyncIterator { .. })
    }
}

impl fmt::Display for StateMachineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_value_type { "struct" } else { "class" };
        write!(f, "{} {}", keyword, self.name)?;
        for (i, iface) in self.interfaces.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { " :" } else { "," }, iface)?;
        }
        writeln!(f, " {{")?;
        for def in &self.fields {
            writeln!(f, "    {} {};", def.field.ty, def.field.name)?;
        }
        for method in std::iter::once(&self.constructor).chain(&self.methods) {
            writeln!(f)?;
            write!(f, "    {} {}(", method.ret, method.name)?;
            for (i, p) in method.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} {}", p.ty, p.name)?;
            }
            writeln!(f, ")")?;
            for line in method.body.to_string().lines() {
                writeln!(f, "    {}", line)?;
            }
        }
        writeln!(f, "}}")
    }
}

// ── Layout under construction ───────────────────────────────────────────

/// Field allocation while the machine is being built.
pub(crate) struct FieldLayout {
    owner: Type,
    fields: Vec<FieldDef>,
    hoisted: HashMap<LocalId, FieldRef>,
    awaiters: IndexMap<Type, FieldRef>,
    next_ordinal: u32,
}

impl FieldLayout {
    pub fn new(owner: Type) -> Self {
        FieldLayout { owner, fields: Vec::new(), hoisted: HashMap::new(), awaiters: IndexMap::new(), next_ordinal: 1 }
    }

    pub fn owner(&self) -> &Type {
        &self.owner
    }

    pub fn add(&mut self, name: impl Into<String>, ty: Type, role: FieldRole) -> FieldRef {
        let field = FieldRef::new(self.owner.clone(), name, ty);
        self.fields.push(FieldDef { field: field.clone(), role });
        field
    }

    fn ordinal(&mut self) -> u32 {
        self.next_ordinal += 1;
        self.next_ordinal - 1
    }

    pub fn add_hoisted(&mut self, local: &LocalSymbol) -> FieldRef {
        let ordinal = self.ordinal();
        let name = match local.kind {
            LocalKind::User => format!("<{}>5__{}", local.name, ordinal),
            LocalKind::Spill => format!("<>s__{}", ordinal),
            LocalKind::Synthesized => format!("<>7__wrap{}", ordinal),
        };
        let field = self.add(name, local.ty.clone(), FieldRole::Hoisted(local.id));
        self.hoisted.insert(local.id, field.clone());
        field
    }

    pub fn hoisted(&self, id: LocalId) -> Option<&FieldRef> {
        self.hoisted.get(&id)
    }

    /// The awaiter field for `ty`, allocated on first use.
    pub fn awaiter(&mut self, ty: &Type) -> FieldRef {
        if let Some(field) = self.awaiters.get(ty) {
            return field.clone();
        }
        let ordinal = self.awaiters.len() + 1;
        let field = self.add(format!("<>u__{}", ordinal), ty.clone(), FieldRole::Awaiter);
        self.awaiters.insert(ty.clone(), field.clone());
        field
    }

    pub fn role(&self, role: FieldRole) -> Option<&FieldRef> {
        self.fields.iter().find(|f| f.role == role).map(|f| &f.field)
    }

    /// Hoisted fields that may keep a reference alive after completion.
    pub fn hoisted_references(&self) -> Vec<FieldRef> {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::Hoisted(_)) && !f.field.ty.is_value_type())
            .map(|f| f.field.clone())
            .collect()
    }

    pub fn into_fields(self) -> Vec<FieldDef> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn awaiter_fields_are_shared_per_type() {
        let mut layout = FieldLayout::new(Type::class("<F>d__0"));
        let a = layout.awaiter(&Type::structure("TaskAwaiter"));
        let b = layout.awaiter(&Type::structure("ValueTaskAwaiter"));
        let c = layout.awaiter(&Type::structure("TaskAwaiter"));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.name, "<>u__1");
        assert_eq!(b.name, "<>u__2");
    }

    #[test]
    fn hoisted_names_follow_local_kind() {
        let mut layout = FieldLayout::new(Type::class("<F>d__0"));
        let user = LocalSymbol { id: LocalId(1), name: "x".into(), ty: Type::Int, kind: LocalKind::User, is_ref: false };
        let spill = LocalSymbol { id: LocalId(2), name: "spill0".into(), kind: LocalKind::Spill, ..user.clone() };
        assert_eq!(layout.add_hoisted(&user).name, "<x>5__1");
        assert_eq!(layout.add_hoisted(&spill).name, "<>s__2");
        assert!(layout.hoisted(LocalId(1)).is_some());
        assert!(layout.hoisted_references().is_empty());
    }
}
