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

// The program data model: Package members, the program-wide frozen tables,
// the mode bit-set and the client configuration surface. Everything here is
// populated during CREATE; during BUILD the tables are read-only except the
// mutex-guarded method index, and each package is mutated only by the worker
// that owns it.

use std::collections::{HashMap, HashSet};
use std::ops::BitOr;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::ast::{self, NodeId, Span};
use crate::error::CheckError;
use crate::ir::{FuncRef, Function, GlobalRef, PkgId, Value};
use crate::methods::{MethodIndex, MethodSet};
use crate::oracle::{Lit, ObjId, Objects, TypeInfo};
use crate::source::PosTable;
use crate::types::{TypeId, TypeStore};

/// Options controlling diagnostics and checking, a bit-set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuilderMode(pub u32);

impl BuilderMode {
    /// Dump the package inventory as packages are created.
    pub const LOG_PACKAGES: BuilderMode = BuilderMode(1 << 0);
    /// Dump each function's SSA code once built.
    pub const LOG_FUNCTIONS: BuilderMode = BuilderMode(1 << 1);
    /// Trace source entities as the builder progresses.
    pub const LOG_SOURCE: BuilderMode = BuilderMode(1 << 2);
    /// Run the sanity checker over every built function.
    pub const SANITY_CHECK: BuilderMode = BuilderMode(1 << 3);
    /// Accept metadata-only packages in place of source for imports.
    pub const BINARY_IMPORTS: BuilderMode = BuilderMode(1 << 4);
    /// Leave the naive form: downstream lifting is skipped.
    pub const NAIVE_FORM: BuilderMode = BuilderMode(1 << 5);
    /// Build packages serially rather than in parallel.
    pub const BUILD_SERIALLY: BuilderMode = BuilderMode(1 << 6);

    pub fn contains(self, other: BuilderMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any logging mode forces a serial build for deterministic output.
    pub fn forces_serial(self) -> bool {
        self.contains(Self::BUILD_SERIALLY)
            || self.0 & (Self::LOG_PACKAGES.0 | Self::LOG_FUNCTIONS.0 | Self::LOG_SOURCE.0) != 0
    }
}

impl BitOr for BuilderMode {
    type Output = BuilderMode;
    fn bitor(self, rhs: BuilderMode) -> BuilderMode {
        BuilderMode(self.0 | rhs.0)
    }
}

/// Finds and parses the source files of an import path.
pub trait SourceLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<Vec<ast::File>, String>;
}

/// Read-only view of already-created packages, handed to the checker so it
/// can resolve imported names to the objects the builder registered.
pub struct ImportView<'a> {
    pub(crate) packages: &'a [Package],
    pub(crate) by_path: &'a IndexMap<String, PkgId>,
}

impl ImportView<'_> {
    pub fn export(&self, path: &str, name: &str) -> Option<ObjId> {
        let pkg = *self.by_path.get(path)?;
        self.packages[pkg.0 as usize].exports.get(name).copied()
    }

    pub fn has_package(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }
}

/// The external type checker. Interns types into the shared store, creates
/// objects, and returns the per-node maps. Imports must already have been
/// created, in topological order.
pub trait TypeChecker: Send + Sync {
    fn check(
        &self,
        path: &str,
        files: &[ast::File],
        types: &TypeStore,
        objects: &Objects,
        imports: &ImportView<'_>,
    ) -> Result<TypeInfo, CheckError>;
}

/// The client context for SSA construction.
#[derive(Default)]
pub struct Context {
    pub mode: BuilderMode,
    /// Loads source for import paths on the `load_package` path. Ignored
    /// when BINARY_IMPORTS is set and a metadata package exists.
    pub loader: Option<Box<dyn SourceLoader>>,
    pub checker: Option<Box<dyn TypeChecker>>,
    /// Decides, per package, whether to keep the AST and type info after
    /// BUILD. None discards everything.
    pub retain_ast: Option<Box<dyn Fn(&Package) -> bool + Send + Sync>>,
    /// Source position table shared by every file of every package.
    pub positions: PosTable,
}

/// A named member of a package.
#[derive(Clone, Debug)]
pub enum Member {
    Func(u32),
    Global(u32),
    Const { lit: Lit },
    Type {
        ty: TypeId,
        methods: MethodSet,
        ptr_methods: MethodSet,
    },
}

/// A package-level variable. Its value is the address of the cell; `spec`
/// holds the declaring value spec until the initializer has been emitted
/// into Init (the fire-once contract).
#[derive(Clone, Debug)]
pub struct Global {
    pub name: String,
    pub ty: TypeId,
    pub span: Span,
    pub obj: ObjId,
    pub spec: Option<ast::ValueSpec>,
}

pub const INIT_FUNC: u32 = 0;

/// One compilation unit.
pub struct Package {
    pub id: PkgId,
    pub path: String,
    pub name: String,
    pub members: IndexMap<String, Member>,
    /// Exported member objects, for checkers resolving imports.
    pub exports: IndexMap<String, ObjId>,
    /// Functions owned by this package; index 0 is the synthesized Init.
    pub funcs: Vec<Function>,
    pub globals: Vec<Global>,
    /// Source files; released after BUILD unless the client retains them.
    pub files: Vec<ast::File>,
    pub info: TypeInfo,
    /// Gates the build so it runs at most once.
    pub started: AtomicBool,
    /// n:1 value specs whose initializer has already been evaluated.
    pub nto1_done: HashSet<NodeId>,
}

impl Package {
    pub fn init_ref(&self) -> FuncRef {
        FuncRef::Decl(self.id, INIT_FUNC)
    }

    pub fn func_ref(&self, index: u32) -> FuncRef {
        FuncRef::Decl(self.id, index)
    }

    /// The global named `name`, e.g. `init$guard`.
    pub fn var(&self, name: &str) -> Option<GlobalRef> {
        match self.members.get(name)? {
            Member::Global(i) => Some(GlobalRef {
                pkg: self.id,
                index: *i,
            }),
            _ => None,
        }
    }

    pub fn func_named(&self, name: &str) -> Option<&Function> {
        match self.members.get(name)? {
            Member::Func(i) => self.funcs.get(*i as usize),
            _ => None,
        }
    }
}

/// The frozen program tables shared by all build workers. The method index
/// is the sole structure mutated during BUILD, under its mutex.
pub struct Tables {
    pub types: TypeStore,
    pub objects: Objects,
    pub positions: PosTable,
    pub by_path: IndexMap<String, PkgId>,
    /// Package-level funcs and vars, plus the universal builtins.
    pub globals: HashMap<ObjId, Value>,
    /// Declared methods by checker object.
    pub concrete_methods: HashMap<ObjId, FuncRef>,
    /// Signature types of all declared functions, so a worker can type a
    /// cross-package function reference without reading its Function.
    pub func_sigs: HashMap<FuncRef, TypeId>,
    /// Pointee types of all globals, for the same reason.
    pub global_tys: HashMap<GlobalRef, TypeId>,
    pub methods: Mutex<MethodIndex>,
    pub mode: BuilderMode,
}

impl Tables {
    /// The signature type of any function reference.
    pub fn func_sig(&self, r: FuncRef) -> TypeId {
        if let Some(&t) = self.func_sigs.get(&r) {
            return t;
        }
        match r {
            FuncRef::Synth(i) => self.methods.lock().unwrap().synthetics[i as usize].sig,
            FuncRef::Decl(..) => panic!("unknown function reference {:?}", r),
        }
    }

    pub fn global_ty(&self, g: GlobalRef) -> TypeId {
        self.global_tys[&g]
    }
}

/// The root of the SSA representation for one analysis session.
pub struct Program {
    pub packages: Vec<Package>,
    pub tables: Tables,
}

impl Program {
    pub fn package(&self, id: PkgId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn package_by_path(&self, path: &str) -> Option<&Package> {
        let id = *self.tables.by_path.get(path)?;
        Some(self.package(id))
    }

    /// Run `f` against the referenced function. Synthetic functions live
    /// behind the method-index mutex, so access is callback-shaped.
    pub fn with_func<R>(&self, r: FuncRef, f: impl FnOnce(&Function) -> R) -> R {
        match r {
            FuncRef::Decl(pkg, i) => f(&self.packages[pkg.0 as usize].funcs[i as usize]),
            FuncRef::Synth(i) => {
                let idx = self.tables.methods.lock().unwrap();
                f(&idx.synthetics[i as usize])
            }
        }
    }

    /// Visit every function of the program, declared and synthetic.
    pub fn each_function(&self, mut f: impl FnMut(FuncRef, &Function)) {
        for pkg in &self.packages {
            for (i, func) in pkg.funcs.iter().enumerate() {
                f(FuncRef::Decl(pkg.id, i as u32), func);
            }
        }
        let idx = self.tables.methods.lock().unwrap();
        for (i, func) in idx.synthetics.iter().enumerate() {
            f(FuncRef::Synth(i as u32), func);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_modes_force_serial_build() {
        assert!(!BuilderMode::default().forces_serial());
        assert!(BuilderMode::BUILD_SERIALLY.forces_serial());
        assert!(BuilderMode::LOG_FUNCTIONS.forces_serial());
        assert!((BuilderMode::LOG_SOURCE | BuilderMode::SANITY_CHECK).forces_serial());
        assert!(!BuilderMode::SANITY_CHECK.forces_serial());
    }

    #[test]
    fn mode_bits_compose() {
        let m = BuilderMode::SANITY_CHECK | BuilderMode::NAIVE_FORM;
        assert!(m.contains(BuilderMode::SANITY_CHECK));
        assert!(m.contains(BuilderMode::NAIVE_FORM));
        assert!(!m.contains(BuilderMode::LOG_PACKAGES));
    }
}
