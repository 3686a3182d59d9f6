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

// End-to-end lowering tests. The checker is out of scope, so a small kit
// plays its role: it assembles typed ASTs by hand, registering node types,
// resolved objects and folded constants as a real checker would. Every
// build runs with the sanity checker enabled.

use crate::ast::*;
use crate::build::Builder;
use crate::ir::{Function, Instr, InstrKind, PkgId, UnOpKind, Value};
use crate::oracle::{ConstValue, Lit, ObjId, ObjKind, Object, Objects, TypeInfo};
use crate::prog::{BuilderMode, Context, Program, SourceLoader, INIT_FUNC};
use crate::types::{
    ChanDir, SigData, TypeId, TypeKind, TypeStore, T_BOOL, T_EFACE, T_INT, T_UNTYPED_INT,
    T_UNTYPED_NIL,
};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_builder() -> Builder {
    init_logging();
    Builder::new(Context {
        mode: BuilderMode::SANITY_CHECK | BuilderMode::BUILD_SERIALLY,
        ..Context::default()
    })
}

fn sp() -> Span {
    Span::point(0)
}

/// Plays the type checker for one package.
struct P {
    path: String,
    types: TypeStore,
    objects: Objects,
    info: TypeInfo,
    next: u32,
    decls: Vec<Decl>,
    imports: Vec<String>,
}

impl P {
    fn new(b: &Builder, path: &str) -> P {
        P {
            path: path.to_string(),
            types: b.types(),
            objects: b.objects(),
            info: TypeInfo::default(),
            next: 0,
            decls: Vec::new(),
            imports: Vec::new(),
        }
    }

    fn nid(&mut self) -> NodeId {
        self.next += 1;
        NodeId(self.next)
    }

    fn obj(&mut self, name: &str, kind: ObjKind, ty: TypeId) -> ObjId {
        self.objects.insert(Object {
            name: name.to_string(),
            kind,
            ty,
            pkg: Some(self.path.clone()),
        })
    }

    fn var(&mut self, name: &str, ty: TypeId) -> ObjId {
        self.obj(name, ObjKind::Var, ty)
    }

    fn fobj(&mut self, name: &str, params: Vec<TypeId>, results: Vec<TypeId>) -> ObjId {
        let sig = self.types.sig_of(SigData::func(params, results));
        self.obj(name, ObjKind::Func, sig)
    }

    /// A defining or using occurrence of `obj` as a bare ident node.
    fn def(&mut self, name: &str, obj: ObjId) -> Ident {
        let id = self.nid();
        self.info.uses.insert(id, obj);
        Ident {
            id,
            span: sp(),
            name: name.to_string(),
        }
    }

    /// An expression node with no recorded type (e.g. struct literal keys).
    fn raw(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.nid(),
            span: sp(),
            kind,
        }
    }

    fn e(&mut self, kind: ExprKind, ty: TypeId) -> Expr {
        let e = self.raw(kind);
        self.info.types.insert(e.id, ty);
        e
    }

    fn konst(&mut self, kind: ExprKind, lit: Lit) -> Expr {
        let e = self.e(kind, lit.ty);
        self.info.consts.insert(e.id, lit);
        e
    }

    fn int(&mut self, v: i64) -> Expr {
        self.konst(
            ExprKind::Lit(LitKind::Int(v)),
            Lit::new(ConstValue::Int(v), T_UNTYPED_INT),
        )
    }

    fn bool_(&mut self, v: bool) -> Expr {
        self.konst(ExprKind::Ident(format!("{}", v)), Lit::bool(v))
    }

    fn nil(&mut self) -> Expr {
        self.konst(
            ExprKind::Ident("nil".to_string()),
            Lit::new(ConstValue::Nil, T_UNTYPED_NIL),
        )
    }

    fn use_(&mut self, name: &str, obj: ObjId) -> Expr {
        let ty = self.objects.get(obj).ty;
        let e = self.e(ExprKind::Ident(name.to_string()), ty);
        self.info.uses.insert(e.id, obj);
        e
    }

    fn call(&mut self, func: Expr, args: Vec<Expr>, ty: TypeId) -> Expr {
        self.e(
            ExprKind::Call {
                func: Box::new(func),
                args,
                ellipsis: false,
            },
            ty,
        )
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt { span: sp(), kind }
    }

    fn block(stmts: Vec<Stmt>) -> Block {
        Block { stmts, span: sp() }
    }

    fn ret(&mut self, exprs: Vec<Expr>) -> Stmt {
        Self::stmt(StmtKind::Return(exprs))
    }

    /// Declare a function; `params` pairs names with their (Var) objects.
    fn fdecl(
        &mut self,
        name: &str,
        obj: ObjId,
        recv: Option<(&str, ObjId)>,
        params: Vec<(&str, ObjId)>,
        nresults: usize,
        body: Option<Vec<Stmt>>,
    ) {
        let name_ident = self.def(name, obj);
        let recv_ident = recv.map(|(n, o)| self.def(n, o));
        let param_idents = params.into_iter().map(|(n, o)| self.def(n, o)).collect();
        self.decls.push(Decl::Func(FuncDecl {
            span: sp(),
            recv: recv_ident,
            name: name_ident,
            params: param_idents,
            results: vec![None; nresults],
            body: body.map(Self::block),
        }));
    }

    fn var_decl(&mut self, name: &str, obj: ObjId, value: Option<Expr>) {
        let ident = self.def(name, obj);
        let spec_id = self.nid();
        self.decls.push(Decl::Var(vec![ValueSpec {
            id: spec_id,
            span: sp(),
            names: vec![ident],
            values: value.into_iter().collect(),
        }]));
    }

    fn create(self, b: &mut Builder) -> PkgId {
        let name = self
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
            .to_string();
        let file = File {
            package: name,
            imports: self
                .imports
                .iter()
                .map(|p| ImportSpec {
                    span: sp(),
                    path: p.clone(),
                })
                .collect(),
            decls: self.decls,
        };
        b.create_package_with_info(&self.path, vec![file], self.info)
            .expect("create package")
    }
}

fn fn_by_name<'a>(prog: &'a Program, pkg: PkgId, name: &str) -> &'a Function {
    prog.package(pkg)
        .funcs
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no function '{}'", name))
}

fn ordered_instrs(f: &Function) -> Vec<&Instr> {
    f.blocks
        .iter()
        .flat_map(|b| b.instrs.iter().map(|&i| f.instr(i)))
        .collect()
}

fn count_calls(f: &Function) -> usize {
    ordered_instrs(f)
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Call(_)))
        .count()
}

fn count_phis(f: &Function) -> usize {
    ordered_instrs(f)
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Phi { .. }))
        .count()
}

// ── Short circuits ────────────────────────────────────────────────

#[test]
fn true_and_call_reduces_to_the_call() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let g = p.fobj("g", vec![], vec![T_BOOL]);
    let h = p.fobj("h", vec![], vec![T_BOOL]);
    p.fdecl("g", g, None, vec![], 1, None);

    let lhs = p.bool_(true);
    let gi = p.use_("g", g);
    let call = p.call(gi, vec![], T_BOOL);
    let and = p.e(
        ExprKind::Binary {
            op: BinaryOp::LAnd,
            x: Box::new(lhs),
            y: Box::new(call),
        },
        T_BOOL,
    );
    let ret = p.ret(vec![and]);
    p.fdecl("h", h, None, vec![], 1, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "h");
    // No branch on the constant, no phi; just the call and its return.
    assert_eq!(count_calls(f), 1);
    assert_eq!(count_phis(f), 0);
}

#[test]
fn false_and_call_never_evaluates_the_call() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let g = p.fobj("g", vec![], vec![T_BOOL]);
    let h = p.fobj("h", vec![], vec![T_BOOL]);
    p.fdecl("g", g, None, vec![], 1, None);

    let lhs = p.bool_(false);
    let gi = p.use_("g", g);
    let call = p.call(gi, vec![], T_BOOL);
    let and = p.e(
        ExprKind::Binary {
            op: BinaryOp::LAnd,
            x: Box::new(lhs),
            y: Box::new(call),
        },
        T_BOOL,
    );
    let ret = p.ret(vec![and]);
    p.fdecl("h", h, None, vec![], 1, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "h");
    assert_eq!(count_calls(f), 0);
    assert_eq!(count_phis(f), 0);
    // The returned value is the folded constant false.
    let ret = ordered_instrs(f)
        .into_iter()
        .find_map(|i| match &i.kind {
            InstrKind::Ret(vs) if !vs.is_empty() => Some(vs[0]),
            _ => None,
        })
        .unwrap();
    match ret {
        Value::Lit(l) => assert_eq!(f.lits[l.0 as usize].value, ConstValue::Bool(false)),
        v => panic!("expected a literal return, got {:?}", v),
    }
}

#[test]
fn mixed_short_circuit_builds_a_phi() {
    // a && b with both operands non-constant needs a join.
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let a = p.var("a", T_BOOL);
    let c = p.var("c", T_BOOL);
    let h = p.fobj("h", vec![T_BOOL, T_BOOL], vec![T_BOOL]);

    let ai = p.use_("a", a);
    let ci = p.use_("c", c);
    let and = p.e(
        ExprKind::Binary {
            op: BinaryOp::LAnd,
            x: Box::new(ai),
            y: Box::new(ci),
        },
        T_BOOL,
    );
    let ret = p.ret(vec![and]);
    p.fdecl("h", h, None, vec![("a", a), ("c", c)], 1, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "h");
    assert_eq!(count_phis(f), 1);
}

// ── Range ─────────────────────────────────────────────────────────

#[test]
fn range_over_slice_emits_len_index_and_element_load() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let slice_int = p.types.slice_of(T_INT);
    let s = p.var("s", slice_int);
    let i = p.var("i", T_INT);
    let v = p.var("v", T_INT);
    let f = p.fobj("f", vec![slice_int], vec![]);

    let ki = p.use_("i", i);
    let vi = p.use_("v", v);
    let si = p.use_("s", s);
    let body = P::block(vec![]);
    let range = P::stmt(StmtKind::Range {
        key: Some(ki),
        value: Some(vi),
        define: true,
        x: si,
        body,
    });
    p.fdecl("f", f, None, vec![("s", s)], 0, Some(vec![range]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    let instrs = ordered_instrs(f);
    // len(s) through the builtin.
    assert!(instrs.iter().any(|i| matches!(
        &i.kind,
        InstrKind::Call(c) if matches!(c.func, Some(Value::Builtin(_)))
    )));
    // The hidden index slot, seeded with -1.
    assert!(f
        .locals
        .iter()
        .any(|&l| matches!(&f.instr(l).kind, InstrKind::Alloc { name, .. } if name == "rangeindex")));
    // Increment, compare, element fetch.
    assert!(instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::BinOp { op: BinaryOp::Add, .. })));
    assert!(instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::BinOp { op: BinaryOp::Lt, .. })));
    assert!(instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::IndexAddr { .. })));
}

// ── Multi-result calls and returns ────────────────────────────────

#[test]
fn multi_result_return_expands_through_extracts() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let g = p.fobj("g", vec![], vec![T_INT, T_INT]);
    let f = p.fobj("f", vec![], vec![T_INT, T_INT]);
    p.fdecl("g", g, None, vec![], 2, None);

    let gi = p.use_("g", g);
    let tuple_t = p.types.tuple_of(vec![T_INT, T_INT]);
    let call = p.call(gi, vec![], tuple_t);
    let ret = p.ret(vec![call]);
    p.fdecl("f", f, None, vec![], 2, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    let instrs = ordered_instrs(f);
    assert_eq!(count_calls(f), 1);
    let extracts = instrs
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Extract { .. }))
        .count();
    assert_eq!(extracts, 2);
    let rundefers = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::RunDefers))
        .expect("missing rundefers");
    let ret_at = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::Ret(_)))
        .expect("missing ret");
    assert!(rundefers < ret_at);
    match &instrs[ret_at].kind {
        InstrKind::Ret(vs) => assert_eq!(vs.len(), 2),
        _ => unreachable!(),
    }
}

// ── len/cap of arrays ─────────────────────────────────────────────

#[test]
fn len_of_array_folds_but_still_evaluates_the_operand() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let arr4 = p.types.array_of(T_INT, 4);
    let g = p.fobj("g", vec![], vec![arr4]);
    let f = p.fobj("f", vec![], vec![T_INT]);
    p.fdecl("g", g, None, vec![], 1, None);
    let len_obj = p.objects.universe("len").unwrap();

    let gi = p.use_("g", g);
    let garr = p.call(gi, vec![], arr4);
    let len_ident = p.use_("len", len_obj);
    let len_call = p.call(len_ident, vec![garr], T_INT);
    let ret = p.ret(vec![len_call]);
    p.fdecl("f", f, None, vec![], 1, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    // g() survives for its effects even though len folded to 4.
    assert_eq!(count_calls(f), 1);
    let ret = ordered_instrs(f)
        .into_iter()
        .find_map(|i| match &i.kind {
            InstrKind::Ret(vs) if !vs.is_empty() => Some(vs[0]),
            _ => None,
        })
        .unwrap();
    match ret {
        Value::Lit(l) => assert_eq!(f.lits[l.0 as usize].value, ConstValue::Int(4)),
        v => panic!("expected a literal return, got {:?}", v),
    }
}

// ── make ──────────────────────────────────────────────────────────

#[test]
fn make_slice_with_one_size_shares_len_and_cap() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let slice_int = p.types.slice_of(T_INT);
    let f = p.fobj("f", vec![], vec![slice_int]);
    let make_obj = p.objects.universe("make").unwrap();

    let make_ident = p.use_("make", make_obj);
    let ty_arg = p.e(ExprKind::TypeLit, slice_int);
    let n = p.int(5);
    let call = p.call(make_ident, vec![ty_arg, n], slice_int);
    let ret = p.ret(vec![call]);
    p.fdecl("f", f, None, vec![], 1, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let ms = ordered_instrs(f)
        .into_iter()
        .find_map(|i| match &i.kind {
            InstrKind::MakeSlice { len, cap } => Some((*len, *cap)),
            _ => None,
        })
        .expect("missing makeslice");
    assert_eq!(ms.0, ms.1);
}

// ── Variadic marshalling ──────────────────────────────────────────

#[test]
fn variadic_call_builds_one_array_three_stores_one_slice() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let vsig = p.types.sig_of(SigData {
        recv: None,
        params: vec![T_INT],
        results: vec![],
        variadic: true,
    });
    let g = p.obj("g", ObjKind::Func, vsig);
    let f = p.fobj("f", vec![], vec![]);
    p.fdecl("g", g, None, vec![], 0, None);

    let gi = p.use_("g", g);
    let (a1, a2, a3) = (p.int(1), p.int(2), p.int(3));
    let call = p.call(gi, vec![a1, a2, a3], crate::types::T_UNIT);
    let st = P::stmt(StmtKind::Expr(call));
    p.fdecl("f", f, None, vec![], 0, Some(vec![st]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    let heap_allocs = instrs
        .iter()
        .filter(|i| matches!(&i.kind, InstrKind::Alloc { heap: true, .. }))
        .count();
    let stores = instrs
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Store { .. }))
        .count();
    let slices = instrs
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Slice { .. }))
        .count();
    assert_eq!(heap_allocs, 1);
    assert_eq!(stores, 3);
    assert_eq!(slices, 1);
}

#[test]
fn variadic_forwarding_allocates_nothing() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let slice_int = p.types.slice_of(T_INT);
    let vsig = p.types.sig_of(SigData {
        recv: None,
        params: vec![T_INT],
        results: vec![],
        variadic: true,
    });
    let g = p.obj("g", ObjKind::Func, vsig);
    let xs = p.var("xs", slice_int);
    let f = p.fobj("f", vec![slice_int], vec![]);
    p.fdecl("g", g, None, vec![], 0, None);

    let gi = p.use_("g", g);
    let xsi = p.use_("xs", xs);
    let call = p.e(
        ExprKind::Call {
            func: Box::new(gi),
            args: vec![xsi],
            ellipsis: true,
        },
        crate::types::T_UNIT,
    );
    let st = P::stmt(StmtKind::Expr(call));
    p.fdecl("f", f, None, vec![("xs", xs)], 0, Some(vec![st]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);
    assert!(!instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::Alloc { heap: true, .. })));
    assert!(!instrs.iter().any(|i| matches!(i.kind, InstrKind::Slice { .. })));
}

// ── Select ────────────────────────────────────────────────────────

#[test]
fn select_with_default_is_nonblocking_with_one_state() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let chan_int = p.types.chan_of(ChanDir::SendRecv, T_INT);
    let ch = p.var("ch", chan_int);
    let v = p.var("v", T_INT);
    let f = p.fobj("f", vec![chan_int], vec![]);

    let chi = p.use_("ch", ch);
    let vi = p.def("v", v);
    let recv_case = CommClause {
        span: sp(),
        comm: Some(CommOp::Recv {
            key: Some(vi),
            ok: None,
            define: true,
            chan: chi,
        }),
        body: vec![],
    };
    let dflt = CommClause {
        span: sp(),
        comm: None,
        body: vec![],
    };
    let sel = P::stmt(StmtKind::Select {
        cases: vec![recv_case, dflt],
    });
    p.fdecl("f", f, None, vec![("ch", ch)], 0, Some(vec![sel]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    let selects: Vec<_> = instrs
        .iter()
        .filter_map(|i| match &i.kind {
            InstrKind::Select { states, blocking } => Some((states.len(), *blocking)),
            _ => None,
        })
        .collect();
    assert_eq!(selects, vec![(1, false)]);
    // The received value is asserted back to the element type.
    assert!(instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::TypeAssert { comma_ok: true, .. })));
    // Dispatch happens on idx == 0.
    assert!(instrs
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::BinOp { op: BinaryOp::Eq, .. })));
}

// ── Type switch ───────────────────────────────────────────────────

#[test]
fn type_switch_shadows_and_restores_the_binding() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let x = p.var("x", T_EFACE);
    let y = p.var("y", T_EFACE);
    let f = p.fobj("f", vec![T_EFACE], vec![]);

    let xi = p.use_("x", x);
    let yi = p.def("y", y);
    let int_ty = p.e(ExprKind::Ident("int".to_string()), T_INT);
    let nil_e = p.nil();
    let cases = vec![
        TypeCaseClause {
            span: sp(),
            types: vec![int_ty],
            body: vec![],
        },
        TypeCaseClause {
            span: sp(),
            types: vec![nil_e],
            body: vec![],
        },
    ];
    let sw = P::stmt(StmtKind::TypeSwitch {
        init: None,
        bind: Some(yi),
        x: xi,
        cases,
    });
    p.fdecl("f", f, None, vec![("x", x)], 0, Some(vec![sw]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    // The outer y slot and the shadowing y' slot of the int case.
    let alloc_names: Vec<&str> = f
        .locals
        .iter()
        .filter_map(|&l| match &f.instr(l).kind {
            InstrKind::Alloc { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert!(alloc_names.contains(&"y"));
    assert!(alloc_names.contains(&"y'"));
    // The comma-ok test precedes the branch.
    assert!(ordered_instrs(f)
        .iter()
        .any(|i| matches!(&i.kind, InstrKind::TypeAssert { comma_ok: true, .. })));
}

// ── Labels ────────────────────────────────────────────────────────

#[test]
fn labelled_break_targets_the_outer_loop() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let f = p.fobj("f", vec![], vec![]);

    let brk = P::stmt(StmtKind::Branch {
        kind: BranchKind::Break,
        label: Some(Ident {
            id: p.nid(),
            span: sp(),
            name: "L".to_string(),
        }),
    });
    let inner = P::stmt(StmtKind::For {
        init: None,
        cond: None,
        post: None,
        body: P::block(vec![brk]),
    });
    let outer = P::stmt(StmtKind::For {
        init: None,
        cond: None,
        post: None,
        body: P::block(vec![inner]),
    });
    let labelled = P::stmt(StmtKind::Labeled {
        label: Ident {
            id: p.nid(),
            span: sp(),
            name: "L".to_string(),
        },
        stmt: Box::new(outer),
    });
    p.fdecl("f", f, None, vec![], 0, Some(vec![labelled]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    // The break must reach the outer loop's done block: some surviving
    // block jumps to a for.done even though the inner loop is endless.
    let done_targets: usize = f
        .blocks
        .iter()
        .filter_map(|b| {
            let term = f.instr(*b.instrs.last().unwrap());
            match term.kind {
                InstrKind::Jump(t) => Some(t),
                _ => None,
            }
        })
        .filter(|t| f.blocks[t.0 as usize].name == "for.done")
        .count();
    assert!(done_targets >= 1);
    // And the done block survives (it is reachable through the label).
    assert!(f.blocks.iter().any(|b| b.name == "for.done"));
}

// ── defer / go ────────────────────────────────────────────────────

#[test]
fn defer_and_go_freeze_calls_and_rundefers_precedes_ret() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let g = p.fobj("g", vec![], vec![]);
    let f = p.fobj("f", vec![], vec![]);
    p.fdecl("g", g, None, vec![], 0, None);

    let g1 = p.use_("g", g);
    let c1 = p.call(g1, vec![], crate::types::T_UNIT);
    let g2 = p.use_("g", g);
    let c2 = p.call(g2, vec![], crate::types::T_UNIT);
    let d = P::stmt(StmtKind::Defer(c1));
    let go = P::stmt(StmtKind::Go(c2));
    let ret = p.ret(vec![]);
    p.fdecl("f", f, None, vec![], 0, Some(vec![d, go, ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    assert!(instrs.iter().any(|i| matches!(i.kind, InstrKind::Defer(_))));
    assert!(instrs.iter().any(|i| matches!(i.kind, InstrKind::Go(_))));
    let rd = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::RunDefers))
        .unwrap();
    let ret_at = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::Ret(_)))
        .unwrap();
    assert!(rd < ret_at);
}

// ── Closures ──────────────────────────────────────────────────────

#[test]
fn closure_capture_heap_allocates_the_variable() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let fn_int = p.types.sig_of(SigData::func(vec![], vec![T_INT]));
    let x = p.var("x", T_INT);
    let f = p.fobj("f", vec![], vec![fn_int]);

    // x := 1; return func() int { return x }
    let one = p.int(1);
    let xd = p.use_("x", x);
    let decl = P::stmt(StmtKind::Assign {
        op: AssignKind::Define,
        lhs: vec![xd],
        rhs: vec![one],
    });
    let xu = p.use_("x", x);
    let inner_ret = p.ret(vec![xu]);
    let lit = p.e(
        ExprKind::FuncLit {
            params: vec![],
            results: vec![None],
            body: P::block(vec![inner_ret]),
        },
        fn_int,
    );
    let ret = p.ret(vec![lit]);
    p.fdecl("f", f, None, vec![], 1, Some(vec![decl, ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    let closure = ordered_instrs(f)
        .into_iter()
        .find_map(|i| match &i.kind {
            InstrKind::MakeClosure { bindings, .. } => Some(bindings.clone()),
            _ => None,
        })
        .expect("missing closure");
    assert_eq!(closure.len(), 1);
    // The captured slot escaped to the heap.
    match closure[0] {
        Value::Instr(i) => match &f.instr(i).kind {
            InstrKind::Alloc { heap, name } => {
                assert_eq!(name, "x");
                assert!(*heap, "captured local must be heap-allocated");
            }
            k => panic!("binding is not an alloc: {:?}", k),
        },
        v => panic!("binding is not an instruction: {:?}", v),
    }
    // The anonymous function was built alongside.
    assert!(b
        .prog
        .package(pkg)
        .funcs
        .iter()
        .any(|func| func.name.starts_with("func@") && !func.blocks.is_empty()));
}

// ── Methods ───────────────────────────────────────────────────────

#[test]
fn pointer_method_on_value_receiver_takes_an_escaping_address() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let st = p.types.intern(TypeKind::Struct(vec![]));
    let t = p.types.new_named("T", Some("main".to_string()), st);
    let ptr_t = p.types.pointer_to(t);
    let msig = p.types.sig_of(SigData {
        recv: Some(ptr_t),
        params: vec![],
        results: vec![],
        variadic: false,
    });
    let m_obj = p.obj("M", ObjKind::Func, msig);
    p.types.add_method(
        t,
        crate::types::MethodDecl {
            name: "M".to_string(),
            pkg: None,
            sig: msig,
            obj: m_obj,
        },
    );
    let t_obj = p.obj("T", ObjKind::TypeName, t);
    let recv_obj = p.var("r", ptr_t);
    let x = p.var("x", t);
    let f = p.fobj("f", vec![], vec![]);

    // type T ...; func (r *T) M() {}
    let t_ident = p.def("T", t_obj);
    p.decls.push(Decl::Type(vec![TypeSpec {
        span: sp(),
        name: t_ident,
    }]));
    p.fdecl("M", m_obj, Some(("r", recv_obj)), vec![], 0, Some(vec![]));

    // func f() { var x T; x.M() }
    let x_def = p.def("x", x);
    let vardecl = P::stmt(StmtKind::Decl(Decl::Var(vec![ValueSpec {
        id: p.nid(),
        span: sp(),
        names: vec![x_def],
        values: vec![],
    }])));
    let xi = p.use_("x", x);
    let sel_ident = p.def("M", m_obj);
    let no_recv_sig = p.types.sig_of(SigData::func(vec![], vec![]));
    let sel = p.e(
        ExprKind::Selector {
            x: Box::new(xi),
            sel: sel_ident,
        },
        no_recv_sig,
    );
    let call = p.call(sel, vec![], crate::types::T_UNIT);
    let st2 = P::stmt(StmtKind::Expr(call));
    p.fdecl("f", f, None, vec![], 0, Some(vec![vardecl, st2]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");

    let call = ordered_instrs(f)
        .into_iter()
        .find_map(|i| match &i.kind {
            InstrKind::Call(c) if matches!(c.func, Some(Value::Func(_))) => Some(c.clone()),
            _ => None,
        })
        .expect("missing method call");
    assert_eq!(call.args.len(), 1);
    // The implicit &x escapes.
    match call.args[0] {
        Value::Instr(i) => match &f.instr(i).kind {
            InstrKind::Alloc { heap, name } => {
                assert_eq!(name, "x");
                assert!(*heap);
            }
            k => panic!("receiver is not x's slot: {:?}", k),
        },
        v => panic!("receiver is not an alloc: {:?}", v),
    }
}

#[test]
fn promoted_method_gets_a_bridge_and_ambiguity_gets_none() {
    let mut b = test_builder();
    let types = b.types();
    let objects = b.objects();

    // Inner with value-receiver M; Outer embeds Inner.
    let inner_st = types.intern(TypeKind::Struct(vec![]));
    let inner = types.new_named("Inner", Some("p".to_string()), inner_st);
    let msig = types.sig_of(SigData {
        recv: Some(inner),
        params: vec![],
        results: vec![T_INT],
        variadic: false,
    });
    let m_obj = objects.insert(Object {
        name: "M".to_string(),
        kind: ObjKind::Func,
        ty: msig,
        pkg: Some("p".to_string()),
    });
    types.add_method(
        inner,
        crate::types::MethodDecl {
            name: "M".to_string(),
            pkg: None,
            sig: msig,
            obj: m_obj,
        },
    );
    let outer_st = types.intern(TypeKind::Struct(vec![crate::types::Field {
        name: "Inner".to_string(),
        pkg: None,
        ty: inner,
        embedded: true,
    }]));
    let outer = types.new_named("Outer", Some("p".to_string()), outer_st);

    // Register a stand-in function for the concrete method.
    let stub = {
        let mut idx = b.prog.tables.methods.lock().unwrap();
        let i = idx.synthetics.len() as u32;
        idx.synthetics
            .push(Function::new("M", msig, sp(), None, None));
        crate::ir::FuncRef::Synth(i)
    };
    b.prog.tables.concrete_methods.insert(m_obj, stub);

    let ms = crate::methods::method_set(&b.prog.tables, outer);
    let entry = ms
        .get(&crate::methods::Id::new("M", None))
        .expect("promoted method missing");
    assert!(matches!(entry.func, crate::ir::FuncRef::Synth(_)));
    assert_ne!(entry.func, stub, "promotion must synthesize a bridge");
    b.prog.with_func(entry.func, |bridge| {
        assert_eq!(bridge.params.len(), 1, "receiver only");
        assert!(bridge
            .instrs
            .iter()
            .any(|i| matches!(i.kind, InstrKind::Call(_))));
    });

    // Two embedded types with an M at equal depth: no entry.
    let inner2_st = types.intern(TypeKind::Struct(vec![]));
    let inner2 = types.new_named("Inner2", Some("p".to_string()), inner2_st);
    let msig2 = types.sig_of(SigData {
        recv: Some(inner2),
        params: vec![],
        results: vec![T_INT],
        variadic: false,
    });
    let m2_obj = objects.insert(Object {
        name: "M".to_string(),
        kind: ObjKind::Func,
        ty: msig2,
        pkg: Some("p".to_string()),
    });
    types.add_method(
        inner2,
        crate::types::MethodDecl {
            name: "M".to_string(),
            pkg: None,
            sig: msig2,
            obj: m2_obj,
        },
    );
    b.prog.tables.concrete_methods.insert(m2_obj, stub);
    let amb_st = types.intern(TypeKind::Struct(vec![
        crate::types::Field {
            name: "Inner".to_string(),
            pkg: None,
            ty: inner,
            embedded: true,
        },
        crate::types::Field {
            name: "Inner2".to_string(),
            pkg: None,
            ty: inner2,
            embedded: true,
        },
    ]));
    let amb = types.new_named("Both", Some("p".to_string()), amb_st);
    let ms = crate::methods::method_set(&b.prog.tables, amb);
    assert!(ms.get(&crate::methods::Id::new("M", None)).is_none());
}

// ── Composite literals ────────────────────────────────────────────

#[test]
fn struct_literal_initializes_fields_in_place() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let st = p.types.intern(TypeKind::Struct(vec![
        crate::types::Field {
            name: "A".to_string(),
            pkg: None,
            ty: T_INT,
            embedded: false,
        },
        crate::types::Field {
            name: "B".to_string(),
            pkg: None,
            ty: T_INT,
            embedded: false,
        },
    ]));
    let s_named = p.types.new_named("S", Some("main".to_string()), st);
    let x = p.var("x", s_named);
    let f = p.fobj("f", vec![], vec![]);

    // var x S = S{B: 2, A: 1}
    let key_b = p.raw(ExprKind::Ident("B".to_string()));
    let two = p.int(2);
    let kv_b = p.raw(ExprKind::KeyValue {
        key: Box::new(key_b),
        value: Box::new(two),
    });
    let key_a = p.raw(ExprKind::Ident("A".to_string()));
    let one = p.int(1);
    let kv_a = p.raw(ExprKind::KeyValue {
        key: Box::new(key_a),
        value: Box::new(one),
    });
    let lit = p.e(ExprKind::CompositeLit { elts: vec![kv_b, kv_a] }, s_named);
    let x_def = p.def("x", x);
    let decl = P::stmt(StmtKind::Decl(Decl::Var(vec![ValueSpec {
        id: p.nid(),
        span: sp(),
        names: vec![x_def],
        values: vec![lit],
    }])));
    p.fdecl("f", f, None, vec![], 0, Some(vec![decl]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    let field_addrs: Vec<u32> = instrs
        .iter()
        .filter_map(|i| match &i.kind {
            InstrKind::FieldAddr { field, .. } => Some(*field),
            _ => None,
        })
        .collect();
    // Keyed order preserved: B (index 1) first, then A (index 0).
    assert_eq!(field_addrs, vec![1, 0]);
    assert_eq!(
        instrs
            .iter()
            .filter(|i| matches!(i.kind, InstrKind::Store { .. }))
            .count(),
        2
    );
}

#[test]
fn slice_literal_builds_a_backing_array() {
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let slice_int = p.types.slice_of(T_INT);
    let x = p.var("x", slice_int);
    let f = p.fobj("f", vec![], vec![]);

    let elts = vec![p.int(1), p.int(2), p.int(3)];
    let lit = p.e(ExprKind::CompositeLit { elts }, slice_int);
    let x_def = p.def("x", x);
    let decl = P::stmt(StmtKind::Decl(Decl::Var(vec![ValueSpec {
        id: p.nid(),
        span: sp(),
        names: vec![x_def],
        values: vec![lit],
    }])));
    p.fdecl("f", f, None, vec![], 0, Some(vec![decl]));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    assert_eq!(
        instrs
            .iter()
            .filter(|i| matches!(&i.kind, InstrKind::Alloc { heap: true, .. }))
            .count(),
        1
    );
    assert_eq!(
        instrs
            .iter()
            .filter(|i| matches!(i.kind, InstrKind::IndexAddr { .. }))
            .count(),
        3
    );
    assert!(instrs.iter().any(|i| matches!(i.kind, InstrKind::Slice { .. })));
}

// ── Package initialization ────────────────────────────────────────

fn two_package_program(mode: BuilderMode) -> (Builder, PkgId, PkgId) {
    let mut b = Builder::new(Context {
        mode,
        ..Context::default()
    });

    let mut pb = P::new(&b, "b");
    let b1 = pb.var("B1", T_INT);
    let one = pb.int(1);
    pb.var_decl("B1", b1, Some(one));
    let pkg_b = pb.create(&mut b);

    let mut pa = P::new(&b, "a");
    pa.imports.push("b".to_string());
    let a1 = pa.var("A1", T_INT);
    let two = pa.int(2);
    pa.var_decl("A1", a1, Some(two));
    let pkg_a = pa.create(&mut b);

    (b, pkg_b, pkg_a)
}

#[test]
fn importer_init_calls_the_imported_init_before_its_own_initializers() {
    let (mut b, pkg_b, pkg_a) =
        two_package_program(BuilderMode::SANITY_CHECK | BuilderMode::BUILD_SERIALLY);
    b.build_all();

    let a1 = b.prog.package(pkg_a).var("A1").unwrap();
    let init = &b.prog.package(pkg_a).funcs[INIT_FUNC as usize];
    let instrs = ordered_instrs(init);
    let call_b = instrs
        .iter()
        .position(|i| match &i.kind {
            InstrKind::Call(c) => {
                matches!(c.func, Some(Value::Func(crate::ir::FuncRef::Decl(p, idx))) if p == pkg_b && idx == INIT_FUNC)
            }
            _ => false,
        })
        .expect("missing call to the imported Init");
    let store_a1 = instrs
        .iter()
        .position(|i| matches!(&i.kind, InstrKind::Store { addr: Value::Global(g), .. } if *g == a1))
        .expect("missing store to A1");
    assert!(call_b < store_a1);

    // The guard prologue: load, branch, store true.
    let entry = &init.blocks[0];
    let term = init.instr(*entry.instrs.last().unwrap());
    assert!(matches!(term.kind, InstrKind::If { .. }));
}

#[test]
fn building_twice_changes_nothing() {
    let (mut b, _, pkg_a) =
        two_package_program(BuilderMode::SANITY_CHECK | BuilderMode::BUILD_SERIALLY);
    b.build_all();
    let count_before: usize = b
        .prog
        .package(pkg_a)
        .funcs
        .iter()
        .map(|f| f.instrs.len())
        .sum();
    b.build_all();
    let count_after: usize = b
        .prog
        .package(pkg_a)
        .funcs
        .iter()
        .map(|f| f.instrs.len())
        .sum();
    assert_eq!(count_before, count_after);
}

#[test]
fn serial_and_parallel_builds_are_isomorphic() {
    let (mut serial, _, _) =
        two_package_program(BuilderMode::SANITY_CHECK | BuilderMode::BUILD_SERIALLY);
    serial.build_all();
    let (mut parallel, _, _) = two_package_program(BuilderMode::SANITY_CHECK);
    parallel.build_all();

    for (ps, pp) in serial.prog.packages.iter().zip(&parallel.prog.packages) {
        assert_eq!(ps.funcs.len(), pp.funcs.len());
        for (fs, fp) in ps.funcs.iter().zip(&pp.funcs) {
            assert_eq!(fs.name, fp.name);
            assert_eq!(fs.blocks.len(), fp.blocks.len());
            assert_eq!(fs.instrs.len(), fp.instrs.len());
        }
    }
}

#[test]
fn reference_order_beats_declaration_order_for_globals() {
    // var a = b + 1
    // var b = g()
    // a's initializer references b, so b's effects land in Init first.
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let g = p.fobj("g", vec![], vec![T_INT]);
    let a_obj = p.var("a", T_INT);
    let b_obj = p.var("b", T_INT);
    p.fdecl("g", g, None, vec![], 1, None);

    let bi = p.use_("b", b_obj);
    let one = p.int(1);
    let sum = p.e(
        ExprKind::Binary {
            op: BinaryOp::Add,
            x: Box::new(bi),
            y: Box::new(one),
        },
        T_INT,
    );
    p.var_decl("a", a_obj, Some(sum));
    let gi = p.use_("g", g);
    let call = p.call(gi, vec![], T_INT);
    p.var_decl("b", b_obj, Some(call));

    let pkg = p.create(&mut b);
    b.build_all();
    let init = &b.prog.package(pkg).funcs[INIT_FUNC as usize];
    let instrs = ordered_instrs(init);

    let stores: Vec<u32> = instrs
        .iter()
        .filter_map(|i| match &i.kind {
            InstrKind::Store {
                addr: Value::Global(g),
                ..
            } => Some(g.index),
            _ => None,
        })
        .collect();
    let gb = b.prog.package(pkg).var("b").unwrap().index;
    let ga = b.prog.package(pkg).var("a").unwrap().index;
    let pos_b = stores.iter().position(|&s| s == gb).expect("store to b");
    let pos_a = stores.iter().position(|&s| s == ga).expect("store to a");
    assert!(pos_b < pos_a, "b must initialize before a");
}

#[test]
fn init_block_return_jumps_to_the_next_init_block() {
    // func init() { return }  -- must not emit a Ret into Init's body.
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let init_obj = p.fobj("init", vec![], vec![]);
    let ret = p.ret(vec![]);
    p.fdecl("init", init_obj, None, vec![], 0, Some(vec![ret]));

    let pkg = p.create(&mut b);
    b.build_all();
    let init = &b.prog.package(pkg).funcs[INIT_FUNC as usize];
    // Exactly one Ret: the function's own epilogue.
    let rets = ordered_instrs(init)
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Ret(_)))
        .count();
    assert_eq!(rets, 1);
    crate::sanity::check_function(init, &b.prog.tables.types, "main.init").unwrap();
}

// ── Whole-program checks ──────────────────────────────────────────

#[test]
fn every_built_function_passes_the_sanity_checker() {
    let (mut b, _, _) = two_package_program(BuilderMode::BUILD_SERIALLY);
    b.build_all();
    crate::sanity::check_program(&b.prog).unwrap();
}

#[test]
fn named_result_return_stores_then_reloads() {
    // func f() (r int) { return 7 }
    let mut b = test_builder();
    let mut p = P::new(&b, "main");
    let r = p.var("r", T_INT);
    let f = p.fobj("f", vec![], vec![T_INT]);

    let seven = p.int(7);
    let ret = p.ret(vec![seven]);
    let name_ident = p.def("f", f);
    let r_ident = p.def("r", r);
    p.decls.push(Decl::Func(FuncDecl {
        span: sp(),
        recv: None,
        name: name_ident,
        params: vec![],
        results: vec![Some(r_ident)],
        body: Some(P::block(vec![ret])),
    }));

    let pkg = p.create(&mut b);
    b.build_all();
    let f = fn_by_name(&b.prog, pkg, "f");
    let instrs = ordered_instrs(f);

    // Store into r, rundefers, reload, return the reloaded value.
    let store = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::Store { .. }))
        .expect("store to named result");
    let rd = instrs
        .iter()
        .position(|i| matches!(i.kind, InstrKind::RunDefers))
        .unwrap();
    let reload = instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i.kind, InstrKind::UnOp { op: UnOpKind::Deref, .. }))
        .map(|(k, _)| k)
        .next_back()
        .expect("reload of named result");
    assert!(store < rd && rd < reload);
    match &instrs.last().unwrap().kind {
        InstrKind::Ret(vs) => assert!(matches!(vs[0], Value::Instr(_))),
        k => panic!("expected ret, got {:?}", k),
    }
}

// ── Import errors ─────────────────────────────────────────────────

struct FailingLoader;

impl SourceLoader for FailingLoader {
    fn load(&self, path: &str) -> Result<Vec<File>, String> {
        Err(format!("cannot find package {:?}", path))
    }
}

#[test]
fn import_failures_are_cached() {
    let mut b = Builder::new(Context {
        loader: Some(Box::new(FailingLoader)),
        ..Context::default()
    });
    let e1 = b.load_package("no/such/pkg").unwrap_err().to_string();
    let e2 = b.load_package("no/such/pkg").unwrap_err().to_string();
    assert_eq!(e1, e2);
    assert!(e1.contains("no/such/pkg"), "{}", e1);
}
