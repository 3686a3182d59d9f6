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

// The interning type store shared by the checker, the oracle and the SSA
// builder. Structural types are interned, so type identity is TypeId
// equality; named types are identity types with a side table for their
// declared method list. The store is a clonable handle: lookups lock per
// call, which lets thunk synthesis intern pointer and signature types while
// packages build in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::oracle::ObjId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NamedId(pub u32);

// Base table indices. Must match `Tables::new_base()`.
pub const T_INVALID: TypeId = TypeId(0);
pub const T_BOOL: TypeId = TypeId(1);
pub const T_INT: TypeId = TypeId(2);
pub const T_BYTE: TypeId = TypeId(3);
pub const T_FLOAT64: TypeId = TypeId(4);
pub const T_STR: TypeId = TypeId(5);
pub const T_UNTYPED_BOOL: TypeId = TypeId(6);
pub const T_UNTYPED_INT: TypeId = TypeId(7);
pub const T_UNTYPED_FLOAT: TypeId = TypeId(8);
pub const T_UNTYPED_STR: TypeId = TypeId(9);
pub const T_UNTYPED_NIL: TypeId = TypeId(10);
/// The opaque type of every `range` iterator.
pub const T_RANGE_ITER: TypeId = TypeId(11);
/// The empty interface.
pub const T_EFACE: TypeId = TypeId(12);
/// The empty tuple (result type of a void call).
pub const T_UNIT: TypeId = TypeId(13);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChanDir {
    SendRecv,
    SendOnly,
    RecvOnly,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    /// Declaring package path for unexported fields; None when exported.
    pub pkg: Option<String>,
    pub ty: TypeId,
    pub embedded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IMethod {
    pub name: String,
    pub pkg: Option<String>,
    pub sig: TypeId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SigData {
    pub recv: Option<TypeId>,
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
    pub variadic: bool,
}

impl SigData {
    pub fn func(params: Vec<TypeId>, results: Vec<TypeId>) -> Self {
        Self {
            recv: None,
            params,
            results,
            variadic: false,
        }
    }
}

/// A method declared directly on a named type.
#[derive(Clone, Debug)]
pub struct MethodDecl {
    pub name: String,
    pub pkg: Option<String>,
    pub sig: TypeId,
    /// The checker object of the method; keys `Program.concrete_methods`.
    pub obj: ObjId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Invalid,
    Bool,
    Int,
    Byte,
    Float64,
    Str,
    UntypedBool,
    UntypedInt,
    UntypedFloat,
    UntypedStr,
    UntypedNil,
    RangeIter,
    Pointer(TypeId),
    Slice(TypeId),
    Array { elem: TypeId, len: i64 },
    Map { key: TypeId, value: TypeId },
    Chan { dir: ChanDir, elem: TypeId },
    Struct(Vec<Field>),
    Tuple(Vec<TypeId>),
    Signature(SigData),
    Interface(Vec<IMethod>),
    Named(NamedId),
}

#[derive(Clone, Debug)]
struct NamedInfo {
    name: String,
    pkg: Option<String>,
    underlying: TypeId,
    methods: Vec<MethodDecl>,
}

struct Tables {
    kinds: Vec<TypeKind>,
    interned: HashMap<TypeKind, TypeId>,
    named: Vec<NamedInfo>,
}

impl Tables {
    fn new_base() -> Self {
        let kinds = vec![
            TypeKind::Invalid,      // 0
            TypeKind::Bool,         // 1
            TypeKind::Int,          // 2
            TypeKind::Byte,         // 3
            TypeKind::Float64,      // 4
            TypeKind::Str,          // 5
            TypeKind::UntypedBool,  // 6
            TypeKind::UntypedInt,   // 7
            TypeKind::UntypedFloat, // 8
            TypeKind::UntypedStr,   // 9
            TypeKind::UntypedNil,   // 10
            TypeKind::RangeIter,    // 11
            TypeKind::Interface(Vec::new()), // 12
            TypeKind::Tuple(Vec::new()),     // 13
        ];
        let mut interned = HashMap::new();
        for (i, k) in kinds.iter().enumerate() {
            interned.insert(k.clone(), TypeId(i as u32));
        }
        Self {
            kinds,
            interned,
            named: Vec::new(),
        }
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&t) = self.interned.get(&kind) {
            return t;
        }
        let t = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, t);
        t
    }
}

#[derive(Clone)]
pub struct TypeStore {
    inner: Arc<Mutex<Tables>>,
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Tables::new_base())),
        }
    }

    // ── Construction ─────────────────────────────────────────────

    pub fn intern(&self, kind: TypeKind) -> TypeId {
        self.inner.lock().unwrap().intern(kind)
    }

    pub fn pointer_to(&self, t: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(t))
    }

    pub fn slice_of(&self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Slice(elem))
    }

    pub fn array_of(&self, elem: TypeId, len: i64) -> TypeId {
        self.intern(TypeKind::Array { elem, len })
    }

    pub fn map_of(&self, key: TypeId, value: TypeId) -> TypeId {
        self.intern(TypeKind::Map { key, value })
    }

    pub fn chan_of(&self, dir: ChanDir, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Chan { dir, elem })
    }

    pub fn tuple_of(&self, elems: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Tuple(elems))
    }

    pub fn sig_of(&self, sig: SigData) -> TypeId {
        self.intern(TypeKind::Signature(sig))
    }

    /// Declare a new named type. The underlying type may be patched later
    /// (self-referential declarations).
    pub fn new_named(
        &self,
        name: impl Into<String>,
        pkg: Option<String>,
        underlying: TypeId,
    ) -> TypeId {
        let mut tb = self.inner.lock().unwrap();
        let nid = NamedId(tb.named.len() as u32);
        tb.named.push(NamedInfo {
            name: name.into(),
            pkg,
            underlying,
            methods: Vec::new(),
        });
        let t = TypeId(tb.kinds.len() as u32);
        tb.kinds.push(TypeKind::Named(nid));
        t
    }

    pub fn set_underlying(&self, named: TypeId, underlying: TypeId) {
        let mut tb = self.inner.lock().unwrap();
        let TypeKind::Named(nid) = tb.kinds[named.0 as usize].clone() else {
            panic!("set_underlying on non-named type");
        };
        tb.named[nid.0 as usize].underlying = underlying;
    }

    pub fn add_method(&self, named: TypeId, m: MethodDecl) {
        let mut tb = self.inner.lock().unwrap();
        let TypeKind::Named(nid) = tb.kinds[named.0 as usize].clone() else {
            panic!("add_method on non-named type");
        };
        tb.named[nid.0 as usize].methods.push(m);
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn kind(&self, t: TypeId) -> TypeKind {
        self.inner.lock().unwrap().kinds[t.0 as usize].clone()
    }

    /// The underlying (declared) type of a named type; `t` itself otherwise.
    pub fn underlying(&self, t: TypeId) -> TypeId {
        let tb = self.inner.lock().unwrap();
        match &tb.kinds[t.0 as usize] {
            TypeKind::Named(nid) => tb.named[nid.0 as usize].underlying,
            _ => t,
        }
    }

    pub fn under_kind(&self, t: TypeId) -> TypeKind {
        let u = self.underlying(t);
        self.kind(u)
    }

    /// Strip one pointer: the pointee if `t`'s underlying is a pointer.
    pub fn deref(&self, t: TypeId) -> TypeId {
        match self.under_kind(t) {
            TypeKind::Pointer(e) => e,
            _ => t,
        }
    }

    pub fn is_pointer(&self, t: TypeId) -> bool {
        matches!(self.under_kind(t), TypeKind::Pointer(_))
    }

    pub fn is_interface(&self, t: TypeId) -> bool {
        matches!(self.under_kind(t), TypeKind::Interface(_))
    }

    pub fn is_untyped(&self, t: TypeId) -> bool {
        matches!(
            self.kind(t),
            TypeKind::UntypedBool
                | TypeKind::UntypedInt
                | TypeKind::UntypedFloat
                | TypeKind::UntypedStr
                | TypeKind::UntypedNil
        )
    }

    /// The type an untyped constant assumes in a typed context with no
    /// other information. Typed types map to themselves.
    pub fn default_type(&self, t: TypeId) -> TypeId {
        match self.kind(t) {
            TypeKind::UntypedBool => T_BOOL,
            TypeKind::UntypedInt => T_INT,
            TypeKind::UntypedFloat => T_FLOAT64,
            TypeKind::UntypedStr => T_STR,
            _ => t,
        }
    }

    /// Element type of a slice, array, channel or pointer.
    pub fn elem(&self, t: TypeId) -> TypeId {
        match self.under_kind(t) {
            TypeKind::Slice(e)
            | TypeKind::Pointer(e)
            | TypeKind::Array { elem: e, .. }
            | TypeKind::Chan { elem: e, .. } => e,
            TypeKind::Map { value, .. } => value,
            k => panic!("elem of non-container type: {:?}", k),
        }
    }

    pub fn map_key(&self, t: TypeId) -> TypeId {
        match self.under_kind(t) {
            TypeKind::Map { key, .. } => key,
            k => panic!("map_key of non-map type: {:?}", k),
        }
    }

    pub fn sig(&self, t: TypeId) -> SigData {
        match self.under_kind(t) {
            TypeKind::Signature(s) => s,
            k => panic!("sig of non-function type: {:?}", k),
        }
    }

    pub fn tuple_elems(&self, t: TypeId) -> Vec<TypeId> {
        match self.under_kind(t) {
            TypeKind::Tuple(elems) => elems,
            k => panic!("tuple_elems of non-tuple type: {:?}", k),
        }
    }

    pub fn struct_fields(&self, t: TypeId) -> Vec<Field> {
        match self.under_kind(t) {
            TypeKind::Struct(fs) => fs,
            k => panic!("struct_fields of non-struct type: {:?}", k),
        }
    }

    pub fn interface_methods(&self, t: TypeId) -> Vec<IMethod> {
        match self.under_kind(t) {
            TypeKind::Interface(ms) => ms,
            k => panic!("interface_methods of non-interface type: {:?}", k),
        }
    }

    /// Declared methods of a named type (empty for anything else).
    pub fn methods_of(&self, t: TypeId) -> Vec<MethodDecl> {
        let tb = self.inner.lock().unwrap();
        match &tb.kinds[t.0 as usize] {
            TypeKind::Named(nid) => tb.named[nid.0 as usize].methods.clone(),
            _ => Vec::new(),
        }
    }

    pub fn named_name(&self, t: TypeId) -> Option<String> {
        let tb = self.inner.lock().unwrap();
        match &tb.kinds[t.0 as usize] {
            TypeKind::Named(nid) => Some(tb.named[nid.0 as usize].name.clone()),
            _ => None,
        }
    }

    /// Render a type for dumps and diagnostics.
    pub fn type_string(&self, t: TypeId) -> String {
        match self.kind(t) {
            TypeKind::Invalid => "invalid".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int => "int".to_string(),
            TypeKind::Byte => "byte".to_string(),
            TypeKind::Float64 => "float64".to_string(),
            TypeKind::Str => "string".to_string(),
            TypeKind::UntypedBool => "untyped bool".to_string(),
            TypeKind::UntypedInt => "untyped int".to_string(),
            TypeKind::UntypedFloat => "untyped float".to_string(),
            TypeKind::UntypedStr => "untyped string".to_string(),
            TypeKind::UntypedNil => "untyped nil".to_string(),
            TypeKind::RangeIter => "iter".to_string(),
            TypeKind::Pointer(e) => format!("*{}", self.type_string(e)),
            TypeKind::Slice(e) => format!("[]{}", self.type_string(e)),
            TypeKind::Array { elem, len } => format!("[{}]{}", len, self.type_string(elem)),
            TypeKind::Map { key, value } => {
                format!("map[{}]{}", self.type_string(key), self.type_string(value))
            }
            TypeKind::Chan { dir, elem } => {
                let arrow = match dir {
                    ChanDir::SendRecv => "chan ",
                    ChanDir::SendOnly => "chan<- ",
                    ChanDir::RecvOnly => "<-chan ",
                };
                format!("{}{}", arrow, self.type_string(elem))
            }
            TypeKind::Struct(fs) => {
                let fields: Vec<String> = fs
                    .iter()
                    .map(|f| format!("{} {}", f.name, self.type_string(f.ty)))
                    .collect();
                format!("struct{{{}}}", fields.join("; "))
            }
            TypeKind::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(|&e| self.type_string(e)).collect();
                format!("({})", parts.join(", "))
            }
            TypeKind::Signature(s) => {
                let params: Vec<String> = s.params.iter().map(|&p| self.type_string(p)).collect();
                let res: Vec<String> = s.results.iter().map(|&r| self.type_string(r)).collect();
                match res.len() {
                    0 => format!("func({})", params.join(", ")),
                    1 => format!("func({}) {}", params.join(", "), res[0]),
                    _ => format!("func({}) ({})", params.join(", "), res.join(", ")),
                }
            }
            TypeKind::Interface(ms) => {
                if ms.is_empty() {
                    "any".to_string()
                } else {
                    let names: Vec<&str> = ms.iter().map(|m| m.name.as_str()).collect();
                    format!("interface{{{}}}", names.join("; "))
                }
            }
            TypeKind::Named(_) => self.named_name(t).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_intern_to_one_id() {
        let ts = TypeStore::new();
        let p1 = ts.pointer_to(T_INT);
        let p2 = ts.pointer_to(T_INT);
        assert_eq!(p1, p2);
        assert_ne!(p1, ts.pointer_to(T_BOOL));

        let s1 = ts.sig_of(SigData::func(vec![T_INT], vec![T_BOOL]));
        let s2 = ts.sig_of(SigData::func(vec![T_INT], vec![T_BOOL]));
        assert_eq!(s1, s2);
    }

    #[test]
    fn named_types_are_identity_types() {
        let ts = TypeStore::new();
        let st = ts.intern(TypeKind::Struct(vec![]));
        let a = ts.new_named("A", None, st);
        let b = ts.new_named("A", None, st);
        assert_ne!(a, b);
        assert_eq!(ts.underlying(a), st);
        assert_eq!(ts.deref(ts.pointer_to(a)), a);
    }

    #[test]
    fn deref_sees_through_named_pointers() {
        let ts = TypeStore::new();
        let p = ts.pointer_to(T_INT);
        let named = ts.new_named("IntPtr", None, p);
        assert_eq!(ts.deref(named), T_INT);
        assert!(ts.is_pointer(named));
    }

    #[test]
    fn default_types_for_untyped_constants() {
        let ts = TypeStore::new();
        assert_eq!(ts.default_type(T_UNTYPED_INT), T_INT);
        assert_eq!(ts.default_type(T_UNTYPED_STR), T_STR);
        assert_eq!(ts.default_type(T_INT), T_INT);
    }
}
