// ABOUTME: Module loading and import resolution with cycle detection

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::ast::{Expr, ImportNames, Pos};
use crate::builtins::Registry;
use crate::error::{compress_code, ErrorKind, NumFuError};
use crate::parser;
use crate::value::Value;

/// Magic prefix of persisted parse-tree files.
pub const TREE_MAGIC: &[u8; 13] = b"NFU-TREE-FILE";

/// The fixed standard library tags. `builtins` is implicitly imported by
/// every other module.
pub const STDLIB: &[&str] = &["builtins", "math", "std", "io", "sys", "random", "types"];

const STD_SOURCE: &str = include_str!("stdlib/std.nfu");

pub fn module_id(path: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(path.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A module-level binding: either a constant declaration awaiting
/// evaluation, or a ready value (stdlib groups, evaluated constants).
#[derive(Debug, Clone)]
pub enum Global {
    Const { value: Expr, index: usize },
    Value(Value),
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub path: String,
    pub id: String,
    /// zlib-compressed source, decompressed by the error reporter.
    pub code: Vec<u8>,
    /// Declarations only: Constant, Import, Export.
    pub tree: Vec<Expr>,
    pub exports: Vec<String>,
    /// Imported name (possibly `stem.`-prefixed) to source module id.
    pub imports: HashMap<String, String>,
    pub globals: HashMap<String, Global>,
    /// Import-stack depth at which this module was first loaded.
    pub depth: usize,
}

/// Outcome of resolving a program: the main module id plus the ids of
/// freshly loaded modules in dependency order (dependencies first).
#[derive(Debug)]
pub struct Resolved {
    pub main: String,
    pub order: Vec<String>,
}

#[derive(Default)]
pub struct ImportResolver {
    pub modules: HashMap<String, Module>,
    /// Full parse trees, kept for executing module bodies at load.
    pub bodies: HashMap<String, Vec<Expr>>,
    import_stack: Vec<String>,
    load_order: Vec<String>,
}

impl ImportResolver {
    pub fn new() -> Self {
        ImportResolver::default()
    }

    /// Resolve a parsed program rooted at `path`, loading every imported
    /// module transitively.
    pub fn resolve(
        &mut self,
        tree: Vec<Expr>,
        path: &str,
        code: &str,
        registry: &Registry,
    ) -> Result<Resolved, NumFuError> {
        self.ensure_builtins(registry);
        let first_new = self.load_order.len();
        let main = self.register_module(path, tree, code, true, registry)?;
        let order: Vec<String> = self.load_order[first_new..]
            .iter()
            .filter(|id| **id != main)
            .cloned()
            .collect();
        Ok(Resolved { main, order })
    }

    fn ensure_builtins(&mut self, registry: &Registry) {
        let id = module_id("builtins");
        if self.modules.contains_key(&id) {
            return;
        }
        let module = Module {
            path: "builtins".to_string(),
            id: id.clone(),
            exports: registry.core_names(),
            depth: 0,
            ..Module::default()
        };
        self.modules.insert(id.clone(), module);
        self.load_order.push(id);
    }

    /// Register a module from its parse tree. Re-registering an existing
    /// id (the REPL's main module) merges instead of replacing so
    /// accumulated globals survive.
    fn register_module(
        &mut self,
        path: &str,
        tree: Vec<Expr>,
        code: &str,
        with_builtins: bool,
        registry: &Registry,
    ) -> Result<String, NumFuError> {
        let id = module_id(path);

        let mut imports: HashMap<String, String> = HashMap::new();
        if with_builtins {
            let builtins_id = module_id("builtins");
            if let Some(b) = self.modules.get(&builtins_id) {
                for name in &b.exports {
                    imports.insert(name.clone(), builtins_id.clone());
                }
            }
        }

        // Names declared explicitly (not via the implicit builtins
        // prelude), with the index of their declaring node. Export
        // validation checks declaration order against these.
        let mut declared_at: HashMap<String, usize> = HashMap::new();

        // Resolve every import, then record its bindings.
        for node in &tree {
            if let Expr::Import {
                names,
                module,
                pos,
            } = node
            {
                let node_index = pos.index.unwrap_or(0);
                let target_path = self.resolve_import(module, path, *pos, registry)?;
                let target_id = module_id(&target_path);
                let target_exports: Vec<String> = self
                    .modules
                    .get(&target_id)
                    .map(|m| m.exports.clone())
                    .unwrap_or_default();
                match names {
                    ImportNames::Whole => {
                        let stem = Path::new(&target_path)
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_else(|| module.clone());
                        for name in &target_exports {
                            let qualified = format!("{stem}.{name}");
                            declared_at.entry(qualified.clone()).or_insert(node_index);
                            imports.insert(qualified, target_id.clone());
                        }
                    }
                    ImportNames::Star => {
                        for name in &target_exports {
                            declared_at.entry(name.clone()).or_insert(node_index);
                            imports.insert(name.clone(), target_id.clone());
                        }
                    }
                    ImportNames::Listed(listed) => {
                        for (name, name_pos) in listed {
                            if !target_exports.contains(name) {
                                let suggestion = if target_exports.is_empty() {
                                    " This module does not export anything.".to_string()
                                } else {
                                    let mut available = target_exports.clone();
                                    available.sort();
                                    format!(
                                        " Available exports are: {}",
                                        available.join(", ")
                                    )
                                };
                                return Err(NumFuError::at(
                                    ErrorKind::Import,
                                    format!(
                                        "Module '{module}' does not export an identifier named '{name}'.{suggestion}"
                                    ),
                                    *name_pos,
                                ));
                            }
                            declared_at.entry(name.clone()).or_insert(node_index);
                            imports.insert(name.clone(), target_id.clone());
                        }
                    }
                }
            }
        }

        let exports: Vec<String> = tree
            .iter()
            .filter_map(|n| match n {
                Expr::Export { names, .. } => {
                    Some(names.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>())
                }
                _ => None,
            })
            .flatten()
            .collect();

        let mut globals: HashMap<String, Global> = HashMap::new();
        for node in &tree {
            if let Expr::Constant { name, value, pos } = node {
                let index = pos.index.unwrap_or(0);
                declared_at.entry(name.clone()).or_insert(index);
                globals.insert(
                    name.clone(),
                    Global::Const {
                        value: (**value).clone(),
                        index,
                    },
                );
            }
        }

        // Every exported name must be declared by an earlier constant or
        // import; the implicit builtins prelude does not count.
        for node in &tree {
            if let Expr::Export { names, pos } = node {
                let export_index = pos.index.unwrap_or(usize::MAX);
                for (name, name_pos) in names {
                    match declared_at.get(name) {
                        Some(at) if *at < export_index => {}
                        _ => {
                            return Err(NumFuError::at(
                                ErrorKind::Name,
                                format!("Cannot export undefined identifier '{name}'"),
                                *name_pos,
                            ));
                        }
                    }
                }
            }
        }

        let declarations: Vec<Expr> = tree
            .iter()
            .filter(|n| {
                matches!(
                    n,
                    Expr::Constant { .. } | Expr::Import { .. } | Expr::Export { .. }
                )
            })
            .cloned()
            .collect();

        if let Some(existing) = self.modules.get_mut(&id) {
            existing.imports.extend(imports);
            existing.exports.extend(exports);
            existing.tree.extend(declarations);
            for (name, global) in globals {
                existing.globals.insert(name, global);
            }
            existing.code = compress_code(code);
        } else {
            self.modules.insert(
                id.clone(),
                Module {
                    path: path.to_string(),
                    id: id.clone(),
                    code: compress_code(code),
                    tree: declarations,
                    exports,
                    imports,
                    globals,
                    depth: self.import_stack.len(),
                },
            );
            self.load_order.push(id.clone());
        }
        self.bodies.insert(id.clone(), tree);
        Ok(id)
    }

    /// Precedence: sibling file, folder with an index file, stdlib tag.
    fn resolve_import(
        &mut self,
        name: &str,
        importer_path: &str,
        pos: Pos,
        registry: &Registry,
    ) -> Result<String, NumFuError> {
        validate_module_name(name, pos)?;
        if let Some(path) = self.try_file(name, importer_path, registry)? {
            return Ok(path);
        }
        if let Some(path) = self.try_folder(name, importer_path, registry)? {
            return Ok(path);
        }
        if let Some(path) = self.try_stdlib(name, registry)? {
            return Ok(path);
        }
        Err(NumFuError::at(
            ErrorKind::Import,
            format!("Cannot find module \"{name}\""),
            pos,
        ))
    }

    fn base_dir(importer_path: &str) -> PathBuf {
        let p = Path::new(importer_path);
        p.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    fn try_file(
        &mut self,
        name: &str,
        importer_path: &str,
        registry: &Registry,
    ) -> Result<Option<String>, NumFuError> {
        let candidate = Self::base_dir(importer_path).join(format!("{name}.nfu"));
        if !candidate.is_file() {
            return Ok(None);
        }
        self.load_path(&candidate, registry).map(Some)
    }

    fn try_folder(
        &mut self,
        name: &str,
        importer_path: &str,
        registry: &Registry,
    ) -> Result<Option<String>, NumFuError> {
        let folder = Self::base_dir(importer_path).join(name);
        if !folder.is_dir() {
            return Ok(None);
        }
        let candidate = folder.join("index.nfu");
        if !candidate.is_file() {
            return Ok(None);
        }
        self.load_path(&candidate, registry).map(Some)
    }

    fn load_path(&mut self, candidate: &Path, registry: &Registry) -> Result<String, NumFuError> {
        let canonical = candidate
            .canonicalize()
            .unwrap_or_else(|_| candidate.to_path_buf());
        let canonical_str = canonical.to_string_lossy().to_string();
        if self.modules.contains_key(&module_id(&canonical_str)) {
            return Ok(canonical_str);
        }
        if let Some(at) = self.import_stack.iter().position(|p| *p == canonical_str) {
            let mut cycle: Vec<&str> = self.import_stack[at..].iter().map(String::as_str).collect();
            cycle.push(&canonical_str);
            let rendered = cycle
                .iter()
                .map(|p| format!("'{p}'"))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(NumFuError::new(
                ErrorKind::Import,
                format!("Circular import detected:\n{rendered}"),
            ));
        }
        self.import_stack.push(canonical_str.clone());
        let result = self.load_file_contents(&canonical, &canonical_str, registry);
        self.import_stack.pop();
        result?;
        Ok(canonical_str)
    }

    fn load_file_contents(
        &mut self,
        path: &Path,
        canonical: &str,
        registry: &Registry,
    ) -> Result<(), NumFuError> {
        let bytes = std::fs::read(path).map_err(|e| {
            NumFuError::new(
                ErrorKind::Import,
                format!("Cannot read module '{}': {e}", path.display()),
            )
        })?;
        let (tree, code) = if bytes.starts_with(TREE_MAGIC) {
            let tree: Vec<Expr> = serde_json::from_slice(&bytes[TREE_MAGIC.len()..])
                .map_err(|e| {
                    NumFuError::new(
                        ErrorKind::Import,
                        format!("Corrupt parse-tree file '{}': {e}", path.display()),
                    )
                })?;
            (tree, String::new())
        } else {
            let code = String::from_utf8_lossy(&bytes).to_string();
            let tree = parser::parse(&code).map_err(|e| {
                NumFuError::new(
                    ErrorKind::Import,
                    format!("Cannot load module '{}': {e}", path.display()),
                )
            })?;
            (tree, code)
        };
        self.register_module(canonical, tree, &code, true, registry)?;
        Ok(())
    }

    fn try_stdlib(
        &mut self,
        name: &str,
        registry: &Registry,
    ) -> Result<Option<String>, NumFuError> {
        if !STDLIB.contains(&name) {
            return Ok(None);
        }
        let id = module_id(name);
        if self.modules.contains_key(&id) {
            return Ok(Some(name.to_string()));
        }
        match name {
            "builtins" => {
                self.ensure_builtins(registry);
            }
            "std" => {
                let tree = parser::parse(STD_SOURCE)
                    .map_err(|e| e.in_module(&module_id("std")))?;
                self.register_module("std", tree, STD_SOURCE, true, registry)?;
            }
            group => {
                let bindings = registry
                    .group_bindings(group)
                    .cloned()
                    .unwrap_or_default();
                let mut module = Module {
                    path: group.to_string(),
                    id: id.clone(),
                    exports: {
                        let mut names: Vec<String> = bindings.keys().cloned().collect();
                        names.sort();
                        names
                    },
                    depth: self.import_stack.len(),
                    ..Module::default()
                };
                for (name, value) in bindings {
                    module.globals.insert(name, Global::Value(value));
                }
                self.modules.insert(id.clone(), module);
                self.load_order.push(id);
            }
        }
        Ok(Some(name.to_string()))
    }
}

/// Module names are identifiers with an optional relative path prefix:
/// no absolute or home-relative paths, no file extensions.
fn validate_module_name(name: &str, pos: Pos) -> Result<(), NumFuError> {
    let invalid = |msg: &str| Err(NumFuError::at(ErrorKind::Import, msg.to_string(), pos));
    if name.starts_with('/') || name.starts_with('~') {
        return invalid("Module names must be relative");
    }
    if name.contains('.') {
        return invalid("Module names must not carry a file extension");
    }
    for segment in name.split('/') {
        let mut chars = segment.chars();
        let head_ok = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return invalid(&format!("Invalid module name \"{name}\""));
        }
    }
    Ok(())
}

/// Serialize a parse tree in the persisted tree-file format.
pub fn encode_tree_file(tree: &[Expr]) -> Result<Vec<u8>, NumFuError> {
    let mut out = TREE_MAGIC.to_vec();
    let body = serde_json::to_vec(tree).map_err(|e| {
        NumFuError::new(ErrorKind::Value, format!("Cannot serialize parse tree: {e}"))
    })?;
    out.extend(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_stable_and_unique() {
        let a = module_id("foo.nfu");
        let b = module_id("foo.nfu");
        let c = module_id("bar.nfu");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_validate_module_name() {
        let pos = Pos::default();
        assert!(validate_module_name("util", pos).is_ok());
        assert!(validate_module_name("lib/util", pos).is_ok());
        assert!(validate_module_name("_private", pos).is_ok());
        assert!(validate_module_name("/abs", pos).is_err());
        assert!(validate_module_name("~home", pos).is_err());
        assert!(validate_module_name("util.nfu", pos).is_err());
        assert!(validate_module_name("9lives", pos).is_err());
        assert!(validate_module_name("", pos).is_err());
    }

    #[test]
    fn test_tree_file_roundtrip() {
        let tree = parser::parse("1 + 2").unwrap();
        let encoded = encode_tree_file(&tree).unwrap();
        assert!(encoded.starts_with(TREE_MAGIC));
        let decoded: Vec<Expr> = serde_json::from_slice(&encoded[TREE_MAGIC.len()..]).unwrap();
        assert_eq!(tree, decoded);
    }

    #[test]
    fn test_resolver_registers_builtins_exports() {
        let registry = Registry::new(15);
        let mut resolver = ImportResolver::new();
        let tree = parser::parse("1 + 1").unwrap();
        let resolved = resolver.resolve(tree, "main.nfu", "1 + 1", &registry).unwrap();
        let main = resolver.modules.get(&resolved.main).unwrap();
        assert!(main.imports.contains_key("map"));
        assert_eq!(
            main.imports.get("map"),
            Some(&module_id("builtins"))
        );
    }

    #[test]
    fn test_stdlib_math_import() {
        let registry = Registry::new(15);
        let mut resolver = ImportResolver::new();
        let tree = parser::parse("import math\nsin(0)").unwrap();
        let resolved = resolver
            .resolve(tree, "main.nfu", "import math\nsin(0)", &registry)
            .unwrap();
        let main = resolver.modules.get(&resolved.main).unwrap();
        assert!(main.imports.contains_key("math.sin"));
    }

    #[test]
    fn test_star_import_from_math() {
        let registry = Registry::new(15);
        let mut resolver = ImportResolver::new();
        let tree = parser::parse("from math import *\nsin(0)").unwrap();
        let resolved = resolver
            .resolve(tree, "main.nfu", "", &registry)
            .unwrap();
        let main = resolver.modules.get(&resolved.main).unwrap();
        assert!(main.imports.contains_key("sin"));
        assert!(main.imports.contains_key("atan2"));
    }

    #[test]
    fn test_unknown_export_is_import_error() {
        let registry = Registry::new(15);
        let mut resolver = ImportResolver::new();
        let tree = parser::parse("from math import nosuch").unwrap();
        let err = resolver
            .resolve(tree, "main.nfu", "", &registry)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert!(err.message.contains("nosuch"));
        assert!(err.message.contains("Available exports"), "{}", err.message);
    }

    #[test]
    fn test_export_of_undeclared_name() {
        let registry = Registry::new(15);
        let mut resolver = ImportResolver::new();
        let tree = parser::parse("export ghost").unwrap();
        let err = resolver
            .resolve(tree, "main.nfu", "", &registry)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
    }
}
