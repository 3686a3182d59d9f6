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

// The two-phase orchestrator. CREATE runs serially in topological import
// order, populating package members and method sets from checker output.
// BUILD runs in parallel across packages (serial within one): each worker
// gates on the package's atomic flag, emits the init guard and import init
// calls, then walks declarations in source order, letting the reference
// graph pull initializers forward as needed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::debug;

use crate::ast::{self, Span};
use crate::error::CreateError;
use crate::ir::{CallCommon, FuncRef, FuncSyntax, Function, GlobalRef, InstrKind, PkgId, Value};
use crate::lower::PackageBuilder;
use crate::methods::{self, MethodIndex};
use crate::oracle::{Lit, ObjId, ObjKind, Objects, TypeInfo, BUILTINS};
use crate::prog::{
    BuilderMode, Context, Global, ImportView, Member, Package, Program, Tables, INIT_FUNC,
};
use crate::types::{SigData, TypeStore, T_BOOL, T_UNIT};

/// Creates the SSA representation of a program. A typical client creates
/// packages in topological import order (directly or through
/// `load_package`), builds them all, and then discards the Builder, keeping
/// the Program.
pub struct Builder {
    pub prog: Program,
    ctx: Context,
    /// Import failures, cached so repeated lookups agree.
    import_errs: HashMap<String, String>,
}

impl Builder {
    pub fn new(mut ctx: Context) -> Self {
        let types = TypeStore::new();
        let objects = Objects::new();
        let mut globals = HashMap::new();
        for &name in BUILTINS {
            let o = objects.universe(name).expect("universe builtin");
            globals.insert(o, Value::Builtin(o));
        }
        let positions = std::mem::take(&mut ctx.positions);
        let prog = Program {
            packages: Vec::new(),
            tables: Tables {
                types,
                objects,
                positions,
                by_path: IndexMap::new(),
                globals,
                concrete_methods: HashMap::new(),
                func_sigs: HashMap::new(),
                global_tys: HashMap::new(),
                methods: Mutex::new(MethodIndex::default()),
                mode: ctx.mode,
            },
        };
        Self {
            prog,
            ctx,
            import_errs: HashMap::new(),
        }
    }

    /// Shared handle to the program's type store (the checker interns
    /// through it).
    pub fn types(&self) -> TypeStore {
        self.prog.tables.types.clone()
    }

    pub fn objects(&self) -> Objects {
        self.prog.tables.objects.clone()
    }

    /// Consume the builder once building is done; the Program lives on.
    pub fn finish(self) -> Program {
        self.prog
    }

    // ── CREATE ───────────────────────────────────────────────────

    /// Load, check and create `path` and (first) all of its imports.
    pub fn load_package(&mut self, path: &str) -> Result<PkgId, CreateError> {
        if let Some(&id) = self.prog.tables.by_path.get(path) {
            return Ok(id);
        }
        if let Some(reason) = self.import_errs.get(path) {
            return Err(CreateError::Import {
                path: path.to_string(),
                reason: reason.clone(),
            });
        }
        if self.ctx.loader.is_none() {
            return self.import_fail(path, "no source loader configured");
        }
        let loaded = self.ctx.loader.as_ref().unwrap().load(path);
        let files = match loaded {
            Ok(files) => files,
            Err(reason) => return self.import_fail(path, &reason),
        };
        for file in &files {
            for imp in &file.imports {
                if imp.path == "unsafe" {
                    continue;
                }
                let dep = imp.path.clone();
                if let Err(e) = self.load_package(&dep) {
                    return self.import_fail(path, &format!("indirect: {}", e));
                }
            }
        }
        self.create_package(path, files)
    }

    fn import_fail(&mut self, path: &str, reason: &str) -> Result<PkgId, CreateError> {
        self.import_errs
            .insert(path.to_string(), reason.to_string());
        Err(CreateError::Import {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Type-check `files` with the configured checker and create the
    /// package. Imports must already exist.
    pub fn create_package(
        &mut self,
        path: &str,
        files: Vec<ast::File>,
    ) -> Result<PkgId, CreateError> {
        let checker = self
            .ctx
            .checker
            .as_ref()
            .expect("no type checker configured");
        let view = ImportView {
            packages: &self.prog.packages,
            by_path: &self.prog.tables.by_path,
        };
        let info = checker
            .check(
                path,
                &files,
                &self.prog.tables.types,
                &self.prog.tables.objects,
                &view,
            )
            .map_err(|first| CreateError::Check {
                path: path.to_string(),
                first,
            })?;
        self.create_package_with_info(path, files, info)
    }

    /// Create a package from already-checked inputs. The order of files
    /// determines initialization order.
    pub fn create_package_with_info(
        &mut self,
        path: &str,
        files: Vec<ast::File>,
        info: TypeInfo,
    ) -> Result<PkgId, CreateError> {
        for file in &files {
            for imp in &file.imports {
                if imp.path != "unsafe" && !self.prog.tables.by_path.contains_key(&imp.path) {
                    return self.import_fail(&imp.path, "package has not been created");
                }
            }
        }
        let name = files
            .first()
            .map(|f| f.package.clone())
            .unwrap_or_else(|| path.to_string());

        let id = PkgId(self.prog.packages.len() as u32);
        let mut pkg = Package {
            id,
            path: path.to_string(),
            name,
            members: IndexMap::new(),
            exports: IndexMap::new(),
            funcs: Vec::new(),
            globals: Vec::new(),
            files,
            info,
            started: std::sync::atomic::AtomicBool::new(false),
            nto1_done: HashSet::new(),
        };

        // The synthesized Init; not a member, clients can't reference it.
        let init_sig = self
            .prog
            .tables
            .types
            .sig_of(SigData::func(Vec::new(), Vec::new()));
        pkg.funcs
            .push(Function::new("init", init_sig, Span::point(0), Some(id), None));
        self.prog
            .tables
            .func_sigs
            .insert(FuncRef::Decl(id, INIT_FUNC), init_sig);

        // Allocate every member: vars, funcs, consts, types.
        let decls: Vec<ast::Decl> = pkg
            .files
            .iter()
            .flat_map(|f| f.decls.iter().cloned())
            .collect();
        for decl in &decls {
            self.member_from_decl(&mut pkg, decl);
        }

        // Compute method sets for every declared named type, T and *T.
        let type_members: Vec<String> = pkg
            .members
            .iter()
            .filter(|(_, m)| matches!(m, Member::Type { .. }))
            .map(|(n, _)| n.clone())
            .collect();
        for name in type_members {
            let Some(Member::Type { ty, .. }) = pkg.members.get(&name).cloned() else {
                continue;
            };
            let ms = methods::method_set(&self.prog.tables, ty);
            let ptr_t = self.prog.tables.types.pointer_to(ty);
            let pms = methods::method_set(&self.prog.tables, ptr_t);
            pkg.members.insert(
                name,
                Member::Type {
                    ty,
                    methods: ms,
                    ptr_methods: pms,
                },
            );
        }

        // The initializer guard.
        let guard_obj = self.prog.tables.objects.insert(crate::oracle::Object {
            name: "init$guard".to_string(),
            kind: ObjKind::Var,
            ty: T_BOOL,
            pkg: Some(path.to_string()),
        });
        self.add_global(&mut pkg, "init$guard", T_BOOL, Span::point(0), guard_obj, None);

        if self.ctx.mode.contains(BuilderMode::LOG_PACKAGES) {
            debug!(
                package = %pkg.path,
                inventory = %crate::dump::package_to_string(&pkg, &self.prog.tables.types),
                "created package"
            );
        }

        self.prog.tables.by_path.insert(path.to_string(), id);
        self.prog.packages.push(pkg);
        Ok(id)
    }

    /// Create a metadata-only package (the binary-import path): members
    /// come from an export list, and no code will ever be built for it.
    pub fn create_metadata_package(
        &mut self,
        path: &str,
        exports: Vec<(ObjId, Option<Lit>)>,
    ) -> PkgId {
        assert!(
            self.ctx.mode.contains(BuilderMode::BINARY_IMPORTS),
            "metadata packages require the BINARY_IMPORTS mode"
        );
        let id = PkgId(self.prog.packages.len() as u32);
        let mut pkg = Package {
            id,
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            members: IndexMap::new(),
            exports: IndexMap::new(),
            funcs: Vec::new(),
            globals: Vec::new(),
            files: Vec::new(),
            info: TypeInfo::default(),
            started: std::sync::atomic::AtomicBool::new(false),
            nto1_done: HashSet::new(),
        };
        let init_sig = self
            .prog
            .tables
            .types
            .sig_of(SigData::func(Vec::new(), Vec::new()));
        pkg.funcs
            .push(Function::new("init", init_sig, Span::point(0), Some(id), None));
        self.prog
            .tables
            .func_sigs
            .insert(FuncRef::Decl(id, INIT_FUNC), init_sig);

        for (obj, lit) in exports {
            let o = self.prog.tables.objects.get(obj);
            match o.kind {
                ObjKind::Var => {
                    self.add_global(&mut pkg, &o.name, o.ty, Span::point(0), obj, None);
                    pkg.exports.insert(o.name.clone(), obj);
                }
                ObjKind::Func => {
                    let fi = pkg.funcs.len() as u32;
                    // A stub: no syntax, parameters populated on demand.
                    pkg.funcs
                        .push(Function::new(o.name.clone(), o.ty, Span::point(0), Some(id), None));
                    let r = FuncRef::Decl(id, fi);
                    self.prog.tables.func_sigs.insert(r, o.ty);
                    let is_method = self.prog.tables.types.sig(o.ty).recv.is_some();
                    if is_method {
                        self.prog.tables.concrete_methods.insert(obj, r);
                    } else {
                        pkg.members.insert(o.name.clone(), Member::Func(fi));
                        self.prog.tables.globals.insert(obj, Value::Func(r));
                        pkg.exports.insert(o.name.clone(), obj);
                    }
                }
                ObjKind::Const => {
                    let lit = lit.unwrap_or_else(|| panic!("constant '{}' without value", o.name));
                    pkg.members.insert(o.name.clone(), Member::Const { lit });
                    pkg.exports.insert(o.name.clone(), obj);
                }
                ObjKind::TypeName => {
                    let ms = methods::method_set(&self.prog.tables, o.ty);
                    let ptr_t = self.prog.tables.types.pointer_to(o.ty);
                    let pms = methods::method_set(&self.prog.tables, ptr_t);
                    pkg.members.insert(
                        o.name.clone(),
                        Member::Type {
                            ty: o.ty,
                            methods: ms,
                            ptr_methods: pms,
                        },
                    );
                    pkg.exports.insert(o.name.clone(), obj);
                }
                k => panic!("unexpected export kind {:?}", k),
            }
        }

        self.prog.tables.by_path.insert(path.to_string(), id);
        self.prog.packages.push(pkg);
        id
    }

    fn add_global(
        &mut self,
        pkg: &mut Package,
        name: &str,
        ty: crate::types::TypeId,
        span: Span,
        obj: ObjId,
        spec: Option<ast::ValueSpec>,
    ) -> u32 {
        let gx = pkg.globals.len() as u32;
        pkg.globals.push(Global {
            name: name.to_string(),
            ty,
            span,
            obj,
            spec,
        });
        let r = GlobalRef {
            pkg: pkg.id,
            index: gx,
        };
        pkg.members.insert(name.to_string(), Member::Global(gx));
        self.prog.tables.globals.insert(obj, Value::Global(r));
        self.prog.tables.global_tys.insert(r, ty);
        gx
    }

    /// Populate `pkg` with members for one top-level declaration.
    fn member_from_decl(&mut self, pkg: &mut Package, decl: &ast::Decl) {
        match decl {
            ast::Decl::Var(specs) => {
                for spec in specs {
                    for ident in &spec.names {
                        if ident.is_blank() {
                            continue;
                        }
                        let obj = pkg.info.object_of(ident);
                        let ty = self.prog.tables.objects.get(obj).ty;
                        self.add_global(pkg, &ident.name, ty, ident.span, obj, Some(spec.clone()));
                        if methods::is_exported(&ident.name) {
                            pkg.exports.insert(ident.name.clone(), obj);
                        }
                    }
                }
            }

            ast::Decl::Const(specs) => {
                for spec in specs {
                    for ident in &spec.names {
                        if ident.is_blank() {
                            continue;
                        }
                        let obj = pkg.info.object_of(ident);
                        let lit = pkg
                            .info
                            .value_of(ident.id)
                            .unwrap_or_else(|| panic!("constant '{}' without value", ident.name));
                        pkg.members
                            .insert(ident.name.clone(), Member::Const { lit });
                        if methods::is_exported(&ident.name) {
                            pkg.exports.insert(ident.name.clone(), obj);
                        }
                    }
                }
            }

            ast::Decl::Type(specs) => {
                for spec in specs {
                    if spec.name.is_blank() {
                        continue;
                    }
                    let obj = pkg.info.object_of(&spec.name);
                    let ty = self.prog.tables.objects.get(obj).ty;
                    pkg.members.insert(
                        spec.name.name.clone(),
                        Member::Type {
                            ty,
                            methods: methods::MethodSet::new(),
                            ptr_methods: methods::MethodSet::new(),
                        },
                    );
                    if methods::is_exported(&spec.name.name) {
                        pkg.exports.insert(spec.name.name.clone(), obj);
                    }
                }
            }

            ast::Decl::Func(fd) => {
                if fd.name.is_blank() {
                    return;
                }
                if fd.recv.is_none() && fd.name.name == "init" {
                    return; // init blocks aren't members
                }
                let obj = pkg.info.object_of(&fd.name);
                let sig = self.prog.tables.objects.get(obj).ty;
                let fi = pkg.funcs.len() as u32;
                pkg.funcs.push(Function::new(
                    fd.name.name.clone(),
                    sig,
                    fd.span,
                    Some(pkg.id),
                    Some(FuncSyntax {
                        recv: fd.recv.clone(),
                        params: fd.params.clone(),
                        results: fd.results.clone(),
                        body: fd.body.clone(),
                    }),
                ));
                let r = FuncRef::Decl(pkg.id, fi);
                self.prog.tables.func_sigs.insert(r, sig);
                if fd.recv.is_none() {
                    pkg.members.insert(fd.name.name.clone(), Member::Func(fi));
                    self.prog.tables.globals.insert(obj, Value::Func(r));
                    if methods::is_exported(&fd.name.name) {
                        pkg.exports.insert(fd.name.name.clone(), obj);
                    }
                } else {
                    self.prog.tables.concrete_methods.insert(obj, r);
                }
            }
        }
    }

    // ── BUILD ────────────────────────────────────────────────────

    /// Build SSA for every created package, in parallel unless a serial
    /// mode bit is set. Idempotent and thread-safe.
    pub fn build_all(&mut self) {
        if self.prog.tables.mode.forces_serial() {
            for i in 0..self.prog.packages.len() {
                self.build_package(PkgId(i as u32));
            }
            return;
        }
        let Program { packages, tables } = &mut self.prog;
        let retain = self.ctx.retain_ast.as_deref();
        // Lowering recurses with the AST; give workers room for deeply
        // nested expressions.
        match rayon::ThreadPoolBuilder::new()
            .stack_size(BUILD_STACK_SIZE)
            .build()
        {
            Ok(pool) => pool.install(|| build_parallel(tables, packages, retain)),
            Err(_) => build_parallel(tables, packages, retain),
        }
    }

    /// Build SSA for all functions and vars of one package. Idempotent.
    pub fn build_package(&mut self, id: PkgId) {
        let Program { packages, tables } = &mut self.prog;
        build_package_impl(
            tables,
            &mut packages[id.0 as usize],
            self.ctx.retain_ast.as_deref(),
        );
    }
}

type RetainFn = dyn Fn(&Package) -> bool + Send + Sync;

const BUILD_STACK_SIZE: usize = 16 << 20;

fn build_parallel(tables: &Tables, packages: &mut [Package], retain: Option<&RetainFn>) {
    packages
        .par_iter_mut()
        .for_each(|pkg| build_package_impl(tables, pkg, retain));
}

fn build_package_impl(tables: &Tables, pkg: &mut Package, retain: Option<&RetainFn>) {
    if pkg.started.swap(true, Ordering::SeqCst) {
        return; // already started
    }
    if pkg.files.is_empty() {
        return; // metadata-only: nothing to do
    }
    if tables.mode.contains(BuilderMode::LOG_SOURCE) {
        debug!(package = %pkg.path, "build package");
    }
    let files = pkg.files.clone();
    let guard = pkg.var("init$guard").expect("missing init guard");

    {
        let mut b = PackageBuilder {
            tables,
            pkg: &mut *pkg,
        };
        b.f(INIT_FUNC).start_body();

        // Skip everything when already initialized.
        let doinit = b.f(INIT_FUNC).new_basic_block("init.start");
        let done = b.f(INIT_FUNC).new_basic_block("init.done");
        let gaddr = Value::Global(guard);
        let flag = b.emit_load(INIT_FUNC, gaddr);
        b.emit_if(INIT_FUNC, flag, done, doinit);
        b.f(INIT_FUNC).current = Some(doinit);
        let t = b.f(INIT_FUNC).lit(Lit::bool(true));
        b.emit_store(INIT_FUNC, gaddr, t, Span::point(0));

        // Call the Init of each import once, in file order. The raw-memory
        // primitive package has no initializer.
        let mut seen: HashSet<String> = HashSet::new();
        for file in &files {
            for imp in &file.imports {
                if imp.path == "unsafe" || !seen.insert(imp.path.clone()) {
                    continue;
                }
                let Some(&dep) = b.tables.by_path.get(&imp.path) else {
                    panic!(
                        "building {}: create has not run for package {}",
                        b.pkg.path, imp.path
                    );
                };
                let callee = Value::Func(FuncRef::Decl(dep, INIT_FUNC));
                b.f(INIT_FUNC).emit(
                    InstrKind::Call(CallCommon {
                        func: Some(callee),
                        method: None,
                        recv: None,
                        args: Vec::new(),
                        has_ellipsis: false,
                    }),
                    Some(T_UNIT),
                    imp.span,
                );
            }
        }

        // Vars, init blocks, types and functions in source order; the
        // reference graph may pull var initializers forward.
        for file in &files {
            for decl in &file.decls {
                build_decl(&mut b, decl);
            }
        }

        // Close Init.
        b.emit_jump(INIT_FUNC, done);
        b.f(INIT_FUNC).current = Some(done);
        b.f(INIT_FUNC)
            .emit(InstrKind::RunDefers, None, Span::point(0));
        b.f(INIT_FUNC)
            .emit(InstrKind::Ret(Vec::new()), None, Span::point(0));
        b.finish_function(INIT_FUNC);
    }

    // Release the ASTs and type info unless the client retains them.
    let keep = retain.map_or(false, |r| r(pkg));
    if !keep {
        pkg.files = Vec::new();
        pkg.info = TypeInfo::default();
    }
    pkg.nto1_done = HashSet::new();
}

fn build_decl(b: &mut PackageBuilder<'_>, decl: &ast::Decl) {
    match decl {
        ast::Decl::Var(specs) => {
            for spec in specs {
                b.global_value_spec(spec, None);
            }
        }

        // Nothing to do for constants.
        ast::Decl::Const(_) => {}

        ast::Decl::Type(specs) => {
            // Building a type means building each of its methods.
            for spec in specs {
                if spec.name.is_blank() {
                    continue;
                }
                let obj = b.info().object_of(&spec.name);
                let ty = b.tables.objects.get(obj).ty;
                for m in b.tables.types.methods_of(ty) {
                    let r = *b
                        .tables
                        .concrete_methods
                        .get(&m.obj)
                        .unwrap_or_else(|| panic!("method '{}' has no function", m.name));
                    if let Some(fx) = b.local_fx(r) {
                        b.build_function(fx);
                    }
                }
            }
        }

        ast::Decl::Func(fd) => {
            if fd.name.is_blank() {
                return;
            }
            if fd.recv.is_none() && fd.name.name == "init" {
                // An init block is inlined into Init. Its `return` means
                // "jump to the next init block", parked in the outermost
                // break target.
                if b.mode().contains(BuilderMode::LOG_SOURCE) {
                    debug!(at = %b.tables.positions.describe(fd.span), "build init block");
                }
                let Some(body) = &fd.body else { return };
                let next = b.f(INIT_FUNC).new_basic_block("init.next");
                b.f(INIT_FUNC).targets.push(crate::ir::TargetFrame {
                    break_to: Some(next),
                    ..Default::default()
                });
                b.stmt_list(INIT_FUNC, &body.stmts);
                b.f(INIT_FUNC)
                    .emit(InstrKind::RunDefers, None, body.span);
                b.emit_jump(INIT_FUNC, next);
                b.f(INIT_FUNC).targets.pop();
                b.f(INIT_FUNC).current = Some(next);
                return;
            }
            if fd.recv.is_some() {
                return; // methods are built with their type declaration
            }
            let obj = b.info().object_of(&fd.name);
            if let Some(Value::Func(r)) = b.tables.globals.get(&obj).copied() {
                if let Some(fx) = b.local_fx(r) {
                    b.build_function(fx);
                }
            }
        }
    }
}
