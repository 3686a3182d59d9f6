/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

// The type oracle: everything the external checker tells the builder about
// a package. Objects are the checker's named entities (vars, funcs, consts,
// type names, package names, universe builtins); TypeInfo carries the
// per-node maps. The builder treats a missing entry for a node it needs as a
// checker bug and panics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ast::{Expr, ExprKind, Ident, NodeId, unparen};
use crate::types::{TypeId, T_INVALID};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjKind {
    Var,
    Func,
    Const,
    TypeName,
    Pkg,
    Builtin,
}

#[derive(Clone, Debug)]
pub struct Object {
    pub name: String,
    pub kind: ObjKind,
    pub ty: TypeId,
    /// Declaring package path; None for universe and package-name objects.
    pub pkg: Option<String>,
}

/// Names of the universal built-in functions, in universe order.
pub const BUILTINS: &[&str] = &[
    "len", "cap", "make", "new", "panic", "append", "copy", "delete", "close", "print",
];

struct ObjTable {
    objects: Vec<Object>,
    universe: HashMap<String, ObjId>,
}

/// Shared handle to the program-wide object table.
#[derive(Clone)]
pub struct Objects {
    inner: Arc<Mutex<ObjTable>>,
}

impl Default for Objects {
    fn default() -> Self {
        Self::new()
    }
}

impl Objects {
    /// A fresh table with the universe built-ins preallocated.
    pub fn new() -> Self {
        let mut t = ObjTable {
            objects: Vec::new(),
            universe: HashMap::new(),
        };
        for &name in BUILTINS {
            let id = ObjId(t.objects.len() as u32);
            t.objects.push(Object {
                name: name.to_string(),
                kind: ObjKind::Builtin,
                ty: T_INVALID,
                pkg: None,
            });
            t.universe.insert(name.to_string(), id);
        }
        Self {
            inner: Arc::new(Mutex::new(t)),
        }
    }

    pub fn insert(&self, obj: Object) -> ObjId {
        let mut t = self.inner.lock().unwrap();
        let id = ObjId(t.objects.len() as u32);
        t.objects.push(obj);
        id
    }

    pub fn get(&self, id: ObjId) -> Object {
        self.inner.lock().unwrap().objects[id.0 as usize].clone()
    }

    pub fn universe(&self, name: &str) -> Option<ObjId> {
        self.inner.lock().unwrap().universe.get(name).copied()
    }

    pub fn is_builtin(&self, id: ObjId) -> bool {
        self.get(id).kind == ObjKind::Builtin
    }
}

/// A folded constant: a value paired with its (possibly untyped) type.
#[derive(Clone, Debug, PartialEq)]
pub struct Lit {
    pub value: ConstValue,
    pub ty: TypeId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Nil,
}

impl Lit {
    pub fn new(value: ConstValue, ty: TypeId) -> Self {
        Self { value, ty }
    }

    pub fn int(v: i64) -> Self {
        Self::new(ConstValue::Int(v), crate::types::T_INT)
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ConstValue::Bool(v), crate::types::T_BOOL)
    }

    pub fn nil(ty: TypeId) -> Self {
        Self::new(ConstValue::Nil, ty)
    }

    /// Re-type the constant, e.g. when an untyped constant meets a typed
    /// context.
    pub fn retyped(&self, ty: TypeId) -> Self {
        Self::new(self.value.clone(), ty)
    }

    pub fn as_int(&self) -> i64 {
        match self.value {
            ConstValue::Int(v) => v,
            _ => panic!("constant is not an integer: {:?}", self.value),
        }
    }

    pub fn as_bool(&self) -> bool {
        match self.value {
            ConstValue::Bool(v) => v,
            _ => panic!("constant is not a bool: {:?}", self.value),
        }
    }
}

/// Per-package answers of the type checker, keyed by AST node identity.
#[derive(Clone, Debug, Default)]
pub struct TypeInfo {
    /// Static type of every expression.
    pub types: HashMap<NodeId, TypeId>,
    /// Resolved object of every ident (defining and using occurrences).
    pub uses: HashMap<NodeId, ObjId>,
    /// Folded constant value of constant expressions.
    pub consts: HashMap<NodeId, Lit>,
}

impl TypeInfo {
    pub fn type_of(&self, id: NodeId) -> TypeId {
        match self.types.get(&id) {
            Some(&t) => t,
            None => panic!("no type recorded for node {:?}", id),
        }
    }

    pub fn object_of(&self, ident: &Ident) -> ObjId {
        match self.uses.get(&ident.id) {
            Some(&o) => o,
            None => panic!("no object recorded for ident '{}'", ident.name),
        }
    }

    pub fn try_object_of(&self, ident: &Ident) -> Option<ObjId> {
        self.uses.get(&ident.id).copied()
    }

    pub fn value_of(&self, id: NodeId) -> Option<Lit> {
        self.consts.get(&id).cloned()
    }

    /// Does this expression denote a type?
    pub fn is_type(&self, e: &Expr, objects: &Objects) -> bool {
        match &unparen(e).kind {
            ExprKind::TypeLit => true,
            ExprKind::Ident(_) => self.node_is_type_name(unparen(e).id, objects),
            ExprKind::Selector { sel, .. } => self.node_is_type_name(sel.id, objects),
            ExprKind::Star(x) => self.is_type(x, objects),
            _ => false,
        }
    }

    fn node_is_type_name(&self, id: NodeId, objects: &Objects) -> bool {
        self.uses
            .get(&id)
            .map(|&o| objects.get(o).kind == ObjKind::TypeName)
            .unwrap_or(false)
    }

    /// For `p.M` where `p` names an imported package: the object of `M`.
    pub fn is_package_ref(&self, e: &Expr, objects: &Objects) -> Option<ObjId> {
        let ExprKind::Selector { x, sel } = &unparen(e).kind else {
            return None;
        };
        let ExprKind::Ident(_) = &unparen(x).kind else {
            return None;
        };
        let base = self.uses.get(&unparen(x).id)?;
        if objects.get(*base).kind != ObjKind::Pkg {
            return None;
        }
        self.uses.get(&sel.id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_has_the_builtins() {
        let objs = Objects::new();
        for &name in BUILTINS {
            let id = objs.universe(name).unwrap();
            assert!(objs.is_builtin(id), "{} should be a builtin", name);
        }
        assert!(objs.universe("no_such_builtin").is_none());
    }

    #[test]
    fn retyped_keeps_the_value() {
        let lit = Lit::new(ConstValue::Int(42), crate::types::T_UNTYPED_INT);
        let typed = lit.retyped(crate::types::T_INT);
        assert_eq!(typed.as_int(), 42);
        assert_eq!(typed.ty, crate::types::T_INT);
    }
}
