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

// The method-set engine. For a type X it computes Id -> method, including
// methods promoted through anonymous embedded fields: breadth-first over the
// embedding graph, shallowest declaration wins, and a tie at equal depth is
// ambiguous and produces no entry. Promoted methods get a synthesized bridge
// that forwards through the field chain. The engine also reifies bound
// methods (`x.m`) and interface methods (`I.m`) as thunk functions.
//
// The cache (sets, thunks, and the synthetic-function arena) is shared by
// all build workers and guarded by one mutex.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ast::Span;
use crate::ir::{CallCommon, FuncRef, Function, InstrKind, Value};
use crate::prog::Tables;
use crate::types::{Field, IMethod, MethodDecl, SigData, TypeId, TypeKind, T_UNIT};

/// An identifier qualified by its declaring package when unexported, the key
/// of all method maps. Two packages may declare distinct unexported `m`s.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pub name: String,
    pub pkg: Option<String>,
}

impl Id {
    pub fn new(name: &str, pkg: Option<&str>) -> Self {
        if is_exported(name) {
            Self {
                name: name.to_string(),
                pkg: None,
            }
        } else {
            Self {
                name: name.to_string(),
                pkg: pkg.map(str::to_string),
            }
        }
    }
}

pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

pub fn field_id(f: &Field) -> Id {
    Id::new(&f.name, f.pkg.as_deref())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub func: FuncRef,
    /// Signature of the entry as callable on the set's type (receiver
    /// included), so callers never need to read the Function itself.
    pub sig: TypeId,
}

pub type MethodSet = BTreeMap<Id, MethodInfo>;

/// The mutex-guarded method state: computed sets, thunk caches, and the
/// arena holding every synthesized function.
#[derive(Default)]
pub struct MethodIndex {
    pub sets: HashMap<TypeId, MethodSet>,
    bound_thunks: HashMap<FuncRef, u32>,
    iface_thunks: HashMap<(TypeId, Id), u32>,
    pub synthetics: Vec<Function>,
}

/// The method set of `x`, computed once and cached.
pub fn method_set(tables: &Tables, x: TypeId) -> MethodSet {
    let mut idx = tables.methods.lock().unwrap();
    if let Some(ms) = idx.sets.get(&x) {
        return ms.clone();
    }
    let ms = compute_method_set(tables, &mut idx, x);
    idx.sets.insert(x, ms.clone());
    ms
}

/// Index of a method in an interface's method table.
pub fn interface_method_index(tables: &Tables, iface: TypeId, id: &Id) -> Option<(u32, IMethod)> {
    tables
        .types
        .interface_methods(iface)
        .into_iter()
        .enumerate()
        .find(|(_, m)| Id::new(&m.name, m.pkg.as_deref()) == *id)
        .map(|(i, m)| (i as u32, m))
}

/// The SSA type of a call producing `results`: the sole result, or a tuple.
pub fn call_result_ty(tables: &Tables, results: &[TypeId]) -> TypeId {
    match results.len() {
        0 => T_UNIT,
        1 => results[0],
        _ => tables.types.tuple_of(results.to_vec()),
    }
}

// ── Set computation ───────────────────────────────────────────────

struct Candidate {
    decl: MethodDecl,
    path: Vec<PathStep>,
    /// The receiver chain passed through a pointer (initial *X or an
    /// embedded pointer field), making pointer-receiver methods reachable.
    via_pointer: bool,
}

#[derive(Clone, Copy)]
struct PathStep {
    field_index: u32,
    field_ty: TypeId,
}

fn compute_method_set(tables: &Tables, idx: &mut MethodIndex, x: TypeId) -> MethodSet {
    let types = &tables.types;
    let indirect = types.is_pointer(x);
    let base = types.deref(x);

    let mut set = MethodSet::new();
    let mut done: HashSet<Id> = HashSet::new();
    let mut visited: HashSet<TypeId> = HashSet::new();
    let mut level: Vec<(TypeId, Vec<PathStep>, bool)> = vec![(base, Vec::new(), indirect)];

    while !level.is_empty() {
        // Gather this depth's candidates; shallower entries already claimed
        // their ids.
        let mut found: BTreeMap<Id, Vec<Candidate>> = BTreeMap::new();
        for (t, path, via_ptr) in &level {
            for decl in types.methods_of(*t) {
                let id = Id::new(&decl.name, decl.pkg.as_deref());
                if done.contains(&id) {
                    continue;
                }
                let recv = types
                    .sig(decl.sig)
                    .recv
                    .unwrap_or_else(|| panic!("method '{}' has no receiver", decl.name));
                if types.is_pointer(recv) && !*via_ptr {
                    // MS(T) has no pointer-receiver methods unless the chain
                    // can produce an address.
                    continue;
                }
                found.entry(id).or_default().push(Candidate {
                    decl,
                    path: path.clone(),
                    via_pointer: *via_ptr,
                });
            }
        }

        for (id, cands) in found {
            done.insert(id.clone());
            if cands.len() > 1 {
                // Ambiguous at this depth: no entry; the checker reports
                // any actual use.
                continue;
            }
            let c = &cands[0];
            let target = *tables
                .concrete_methods
                .get(&c.decl.obj)
                .unwrap_or_else(|| panic!("method '{}' has no function", c.decl.name));
            let info = if c.path.is_empty() {
                MethodInfo {
                    func: target,
                    sig: c.decl.sig,
                }
            } else {
                make_bridge(tables, idx, x, c, target)
            };
            set.insert(id, info);
        }

        // Descend one embedding level.
        let mut next = Vec::new();
        for (t, path, via_ptr) in level {
            let TypeKind::Struct(fields) = types.under_kind(t) else {
                continue;
            };
            for (i, f) in fields.iter().enumerate() {
                if !f.embedded {
                    continue;
                }
                let fvia = via_ptr || types.is_pointer(f.ty);
                let inner = types.deref(f.ty);
                if !visited.insert(inner) {
                    continue; // embedding cycles only arise through pointers
                }
                let mut p = path.clone();
                p.push(PathStep {
                    field_index: i as u32,
                    field_ty: f.ty,
                });
                next.push((inner, p, fvia));
            }
        }
        level = next;
    }
    set
}

// ── Bridge methods ────────────────────────────────────────────────

/// Synthesize the forwarding function for a method promoted through the
/// embedded-field chain `c.path`, callable with receiver type `x`.
fn make_bridge(
    tables: &Tables,
    idx: &mut MethodIndex,
    x: TypeId,
    c: &Candidate,
    target: FuncRef,
) -> MethodInfo {
    let types = &tables.types;
    let target_sig = types.sig(c.decl.sig);
    let bridge_sig = types.sig_of(SigData {
        recv: Some(x),
        params: target_sig.params.clone(),
        results: target_sig.results.clone(),
        variadic: target_sig.variadic,
    });

    let mut f = Function::new(
        format!("{}.{}$bridge", types.type_string(x), c.decl.name),
        bridge_sig,
        Span::point(0),
        None,
        None,
    );
    let recv = f.add_param("recv", x, None);
    let mut args = Vec::with_capacity(1 + target_sig.params.len());
    for (i, &pt) in target_sig.params.iter().enumerate() {
        f.add_param(format!("arg{}", i), pt, None);
    }
    f.start_body();

    let want_ptr = types.is_pointer(target_sig.recv.expect("method receiver"));
    let recv_val = walk_field_path(tables, &mut f, recv, x, &c.path, want_ptr);
    args.push(recv_val);
    for i in 0..target_sig.params.len() {
        args.push(Value::Param(i as u32 + 1));
    }

    emit_forwarding_call(tables, &mut f, Value::Func(target), args, &target_sig.results);
    f.finish_body();

    let i = idx.synthetics.len() as u32;
    idx.synthetics.push(f);
    MethodInfo {
        func: FuncRef::Synth(i),
        sig: c.decl.sig,
    }
}

/// Emit field selections along `path` starting from the bridge's receiver,
/// producing the promoted receiver as a pointer (`want_ptr`) or a value.
fn walk_field_path(
    tables: &Tables,
    f: &mut Function,
    recv: Value,
    recv_ty: TypeId,
    path: &[PathStep],
    want_ptr: bool,
) -> Value {
    let types = &tables.types;
    let span = Span::point(0);

    // Invariant: `cur` is the address of a struct when `cur_is_addr`, else a
    // struct value; embedded pointer fields re-establish addressability.
    let mut cur = recv;
    let mut cur_is_addr = types.is_pointer(recv_ty);

    for (k, step) in path.iter().enumerate() {
        let last = k + 1 == path.len();
        let field_is_ptr = types.is_pointer(step.field_ty);
        if cur_is_addr {
            let faddr = f.emit(
                InstrKind::FieldAddr {
                    x: cur,
                    field: step.field_index,
                },
                Some(types.pointer_to(step.field_ty)),
                span,
            );
            if last {
                if want_ptr && !field_is_ptr {
                    return faddr;
                }
                let v = f.emit(
                    InstrKind::UnOp {
                        op: crate::ir::UnOpKind::Deref,
                        x: faddr,
                        comma_ok: false,
                    },
                    Some(step.field_ty),
                    span,
                );
                return finish_receiver(tables, f, v, step.field_ty, want_ptr);
            }
            if field_is_ptr {
                cur = f.emit(
                    InstrKind::UnOp {
                        op: crate::ir::UnOpKind::Deref,
                        x: faddr,
                        comma_ok: false,
                    },
                    Some(step.field_ty),
                    span,
                );
                cur_is_addr = true; // the field's value is itself an address
            } else {
                cur = faddr;
                cur_is_addr = true;
            }
        } else {
            let v = f.emit(
                InstrKind::Field {
                    x: cur,
                    field: step.field_index,
                },
                Some(step.field_ty),
                span,
            );
            if last {
                return finish_receiver(tables, f, v, step.field_ty, want_ptr);
            }
            cur = v;
            cur_is_addr = field_is_ptr;
        }
    }
    finish_receiver(tables, f, cur, recv_ty, want_ptr)
}

fn finish_receiver(
    tables: &Tables,
    f: &mut Function,
    v: Value,
    ty: TypeId,
    want_ptr: bool,
) -> Value {
    let types = &tables.types;
    let have_ptr = types.is_pointer(ty);
    if have_ptr == want_ptr {
        return v;
    }
    if have_ptr {
        // Load a copy for a value receiver.
        return f.emit(
            InstrKind::UnOp {
                op: crate::ir::UnOpKind::Deref,
                x: v,
                comma_ok: false,
            },
            Some(types.deref(ty)),
            Span::point(0),
        );
    }
    panic!("promoted pointer-receiver method on unaddressable chain");
}

fn emit_forwarding_call(
    tables: &Tables,
    f: &mut Function,
    callee: Value,
    args: Vec<Value>,
    results: &[TypeId],
) {
    let span = Span::point(0);
    let call_ty = call_result_ty(tables, results);
    let call = f.emit(
        InstrKind::Call(CallCommon {
            func: Some(callee),
            method: None,
            recv: None,
            args,
            has_ellipsis: false,
        }),
        Some(call_ty),
        span,
    );
    let rets = match results.len() {
        0 => Vec::new(),
        1 => vec![call],
        n => (0..n)
            .map(|i| {
                f.emit(
                    InstrKind::Extract {
                        tuple: call,
                        index: i as u32,
                    },
                    Some(results[i]),
                    span,
                )
            })
            .collect(),
    };
    f.emit(InstrKind::RunDefers, None, span);
    f.emit(InstrKind::Ret(rets), None, span);
}

// ── Thunks ────────────────────────────────────────────────────────

/// The zero-capture wrapper reifying bound method `x.m`: a function whose
/// sole free variable is the receiver. The caller wraps it in MakeClosure.
pub fn bound_method_thunk(tables: &Tables, target: FuncRef, method_sig: TypeId) -> FuncRef {
    let mut idx = tables.methods.lock().unwrap();
    if let Some(&i) = idx.bound_thunks.get(&target) {
        return FuncRef::Synth(i);
    }
    let types = &tables.types;
    let sig = types.sig(method_sig);
    let recv_ty = sig.recv.expect("bound method must have a receiver");
    let thunk_sig = types.sig_of(SigData {
        recv: None,
        params: sig.params.clone(),
        results: sig.results.clone(),
        variadic: sig.variadic,
    });

    let mut f = Function::new("bound$m", thunk_sig, Span::point(0), None, None);
    f.free_vars.push(crate::ir::FreeVar {
        name: "recv".to_string(),
        ty: recv_ty,
        outer: None,
    });
    for (i, &pt) in sig.params.iter().enumerate() {
        f.add_param(format!("arg{}", i), pt, None);
    }
    f.start_body();
    let mut args = vec![Value::Capture(0)];
    for i in 0..sig.params.len() {
        args.push(Value::Param(i as u32));
    }
    emit_forwarding_call(tables, &mut f, Value::Func(target), args, &sig.results);
    f.finish_body();

    let i = idx.synthetics.len() as u32;
    idx.synthetics.push(f);
    idx.bound_thunks.insert(target, i);
    FuncRef::Synth(i)
}

/// The reified function value for a method expression `I.m` on an interface:
/// an explicit receiver parameter followed by the method's parameters,
/// dispatching dynamically.
pub fn imethod_thunk(tables: &Tables, iface: TypeId, id: &Id) -> FuncRef {
    let mut idx = tables.methods.lock().unwrap();
    if let Some(&i) = idx.iface_thunks.get(&(iface, id.clone())) {
        return FuncRef::Synth(i);
    }
    let types = &tables.types;
    let (mindex, im) = interface_method_index(tables, iface, id)
        .unwrap_or_else(|| panic!("interface has no method '{}'", id.name));
    let msig = types.sig(im.sig);

    let mut params = vec![iface];
    params.extend(msig.params.iter().copied());
    let thunk_sig = types.sig_of(SigData {
        recv: None,
        params,
        results: msig.results.clone(),
        variadic: msig.variadic,
    });

    let mut f = Function::new(format!("thunk${}", id.name), thunk_sig, Span::point(0), None, None);
    f.add_param("recv", iface, None);
    for (i, &pt) in msig.params.iter().enumerate() {
        f.add_param(format!("arg{}", i), pt, None);
    }
    f.start_body();
    let call_ty = call_result_ty(tables, &msig.results);
    let call = f.emit(
        InstrKind::Call(CallCommon {
            func: None,
            method: Some(mindex),
            recv: Some(Value::Param(0)),
            args: (0..msig.params.len())
                .map(|i| Value::Param(i as u32 + 1))
                .collect(),
            has_ellipsis: false,
        }),
        Some(call_ty),
        Span::point(0),
    );
    let rets = match msig.results.len() {
        0 => Vec::new(),
        1 => vec![call],
        n => (0..n)
            .map(|i| {
                f.emit(
                    InstrKind::Extract {
                        tuple: call,
                        index: i as u32,
                    },
                    Some(msig.results[i]),
                    Span::point(0),
                )
            })
            .collect(),
    };
    f.emit(InstrKind::RunDefers, None, Span::point(0));
    f.emit(InstrKind::Ret(rets), None, Span::point(0));
    f.finish_body();

    let i = idx.synthetics.len() as u32;
    idx.synthetics.push(f);
    idx.iface_thunks.insert((iface, id.clone()), i);
    FuncRef::Synth(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexported_ids_carry_their_package() {
        let a = Id::new("m", Some("p/a"));
        let b = Id::new("m", Some("p/b"));
        assert_ne!(a, b);
        assert_eq!(Id::new("M", Some("p/a")), Id::new("M", Some("p/b")));
    }

    #[test]
    fn exported_check_is_first_char_case() {
        assert!(is_exported("Method"));
        assert!(!is_exported("method"));
        assert!(!is_exported("_m"));
        assert!(!is_exported(""));
    }
}
