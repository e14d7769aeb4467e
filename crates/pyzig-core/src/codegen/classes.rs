//! Class lowering.
//!
//! A Python class becomes a Zig struct with an `init` constructor returning a
//! heap-allocated instance, a `deinit` that releases dynamic fields, and one
//! plain function per method. There is no vtable: inheritance is single and
//! statically known, so overrides resolve at generation time and every
//! non-overridden base method is re-emitted retyped for the derived struct.

use indexmap::IndexMap;
use rustpython_ast::{self as ast};
use smallvec::SmallVec;

use crate::analysis::{function_needs_allocator, function_uses_error_operations};
use crate::codegen::helpers::{map_annotation, TypeTag};
use crate::codegen::ZigCodeGenerator;
use crate::error::{CompileError, CompileResult};

/// Signature of one class method.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub return_type: String,
    pub needs_allocator: bool,
    pub returns_error: bool,
}

/// Metadata for a class definition.
pub struct ClassDescriptor<'a> {
    pub name: String,
    pub base_class: Option<String>,
    /// field name -> Zig type, in discovery order
    pub fields: IndexMap<String, String>,
    pub methods: IndexMap<String, MethodSig>,
    pub method_nodes: IndexMap<String, &'a ast::StmtFunctionDef>,
    /// (name, Zig type) of constructor parameters, in order
    pub init_params: SmallVec<[(String, String); 4]>,
    pub init_node: Option<&'a ast::StmtFunctionDef>,
}

impl<'a> ClassDescriptor<'a> {
    /// Name-and-base-only registration so instantiation expressions resolve
    /// before the class body is generated.
    pub fn placeholder(name: String, base_class: Option<String>) -> Self {
        Self {
            name,
            base_class,
            fields: IndexMap::new(),
            methods: IndexMap::new(),
            method_nodes: IndexMap::new(),
            init_params: SmallVec::new(),
            init_node: None,
        }
    }
}

/// Whether the constructor takes dynamic parameters, which forces the
/// runtime to be linked.
pub(crate) fn class_has_dynamic_init_params(cls: &ast::StmtClassDef) -> bool {
    for item in &cls.body {
        if let ast::Stmt::FunctionDef(f) = item {
            if f.name.as_str() == "__init__" {
                for arg in f.args.args.iter().skip(1) {
                    if let Some(annotation) = &arg.def.annotation {
                        if let ast::Expr::Name(name) = annotation.as_ref() {
                            if matches!(name.id.as_str(), "str" | "list" | "dict") {
                                return true;
                            }
                        }
                    }
                }
            }
        }
    }
    false
}

fn method_sig(method: &ast::StmtFunctionDef) -> MethodSig {
    let return_type = match &method.returns {
        Some(annotation) => match annotation.as_ref() {
            ast::Expr::Name(name) => map_annotation(name.id.as_str(), true).to_string(),
            _ => "void".to_string(),
        },
        None => "void".to_string(),
    };
    let needs_allocator = function_needs_allocator(method, &[]);
    MethodSig {
        returns_error: needs_allocator || function_uses_error_operations(method),
        return_type,
        needs_allocator,
    }
}

fn stmt_mentions(stmt: &ast::Stmt, name: &str) -> bool {
    match stmt {
        ast::Stmt::Assign(a) => {
            a.targets.iter().any(|t| expr_mentions(t, name)) || expr_mentions(&a.value, name)
        }
        ast::Stmt::AugAssign(a) => {
            expr_mentions(&a.target, name) || expr_mentions(&a.value, name)
        }
        ast::Stmt::Expr(e) => expr_mentions(&e.value, name),
        ast::Stmt::Return(r) => r.value.as_deref().is_some_and(|v| expr_mentions(v, name)),
        ast::Stmt::If(i) => {
            expr_mentions(&i.test, name)
                || i.body.iter().chain(&i.orelse).any(|s| stmt_mentions(s, name))
        }
        ast::Stmt::While(w) => {
            expr_mentions(&w.test, name) || w.body.iter().any(|s| stmt_mentions(s, name))
        }
        ast::Stmt::For(f) => {
            expr_mentions(&f.iter, name) || f.body.iter().any(|s| stmt_mentions(s, name))
        }
        ast::Stmt::Try(t) => {
            t.body.iter().any(|s| stmt_mentions(s, name))
                || t.handlers.iter().any(|handler| {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    h.body.iter().any(|s| stmt_mentions(s, name))
                })
        }
        _ => false,
    }
}

fn expr_mentions(expr: &ast::Expr, name: &str) -> bool {
    match expr {
        ast::Expr::Name(n) => n.id.as_str() == name,
        ast::Expr::Attribute(a) => expr_mentions(&a.value, name),
        ast::Expr::Subscript(s) => expr_mentions(&s.value, name) || expr_mentions(&s.slice, name),
        ast::Expr::Call(c) => {
            expr_mentions(&c.func, name) || c.args.iter().any(|a| expr_mentions(a, name))
        }
        ast::Expr::BinOp(b) => expr_mentions(&b.left, name) || expr_mentions(&b.right, name),
        ast::Expr::Compare(c) => {
            expr_mentions(&c.left, name) || c.comparators.iter().any(|e| expr_mentions(e, name))
        }
        ast::Expr::BoolOp(b) => b.values.iter().any(|e| expr_mentions(e, name)),
        ast::Expr::UnaryOp(u) => expr_mentions(&u.operand, name),
        ast::Expr::List(l) => l.elts.iter().any(|e| expr_mentions(e, name)),
        ast::Expr::Tuple(t) => t.elts.iter().any(|e| expr_mentions(e, name)),
        ast::Expr::Slice(s) => {
            s.lower.as_deref().is_some_and(|e| expr_mentions(e, name))
                || s.upper.as_deref().is_some_and(|e| expr_mentions(e, name))
                || s.step.as_deref().is_some_and(|e| expr_mentions(e, name))
        }
        _ => false,
    }
}

impl<'a> ZigCodeGenerator<'a> {
    /// Find a method through the inheritance chain; overrides shadow base
    /// methods, everything else is fetched from the base descriptor.
    pub(crate) fn lookup_method(&self, class_name: &str, method: &str) -> Option<MethodSig> {
        let mut current = Some(class_name.to_string());
        while let Some(name) = current {
            let info = self.class_definitions.get(&name)?;
            if let Some(sig) = info.methods.get(method) {
                return Some(sig.clone());
            }
            current = info.base_class.clone();
        }
        None
    }

    pub(crate) fn generate_class(&mut self, cls: &'a ast::StmtClassDef) -> CompileResult<()> {
        if !cls.decorator_list.is_empty() {
            return Err(CompileError::unsupported("decorators"));
        }
        if cls.bases.len() > 1 {
            return Err(CompileError::unsupported("multiple inheritance"));
        }
        let class_name = cls.name.to_string();
        let base_class = match cls.bases.first() {
            Some(ast::Expr::Name(name)) => Some(name.id.to_string()),
            Some(_) => return Err(CompileError::unsupported("complex base class")),
            None => None,
        };

        let mut init_node: Option<&'a ast::StmtFunctionDef> = None;
        let mut methods: Vec<&'a ast::StmtFunctionDef> = Vec::new();
        for item in &cls.body {
            match item {
                ast::Stmt::FunctionDef(f) => {
                    if f.name.as_str() == "__init__" {
                        init_node = Some(f);
                    } else {
                        methods.push(f);
                    }
                }
                ast::Stmt::Expr(e) if super::is_docstring_expr(&e.value) => {}
                ast::Stmt::Pass(_) => {}
                _ => return Err(CompileError::unsupported("class-level statement")),
            }
        }

        let mut init_params: SmallVec<[(String, String); 4]> = SmallVec::new();
        let mut fields: IndexMap<String, String> = IndexMap::new();

        if let Some(init) = init_node {
            for arg in init.args.args.iter().skip(1) {
                let param_type = match &arg.def.annotation {
                    Some(annotation) => match annotation.as_ref() {
                        ast::Expr::Name(name) => map_annotation(name.id.as_str(), true),
                        _ => "i64",
                    },
                    None => "i64",
                };
                init_params.push((arg.def.arg.to_string(), param_type.to_string()));
            }
            collect_fields(init, &init_params, &mut fields);
        } else if let Some(base) = &base_class {
            // A derived class without its own constructor inherits the
            // base's constructor, parameters and fields.
            if let Some(base_info) = self.class_definitions.get(base) {
                init_params = base_info.init_params.clone();
                fields = base_info.fields.clone();
                init_node = base_info.init_node;
            }
        }

        let mut method_sigs = IndexMap::new();
        let mut method_nodes = IndexMap::new();
        for method in &methods {
            method_sigs.insert(method.name.to_string(), method_sig(method));
            method_nodes.insert(method.name.to_string(), *method);
        }

        // Collect non-overridden base methods before emitting anything; they
        // are re-emitted below, retyped for this struct.
        let mut inherited: Vec<&'a ast::StmtFunctionDef> = Vec::new();
        {
            let own: Vec<String> = method_nodes.keys().cloned().collect();
            let mut seen = own.clone();
            let mut current = base_class.clone();
            while let Some(base) = current {
                let Some(base_info) = self.class_definitions.get(&base) else {
                    break;
                };
                for (name, node) in &base_info.method_nodes {
                    if !seen.contains(name) {
                        seen.push(name.clone());
                        inherited.push(*node);
                        method_sigs.insert(name.clone(), method_sig(node));
                    }
                }
                current = base_info.base_class.clone();
            }
        }

        self.class_definitions.insert(
            class_name.clone(),
            ClassDescriptor {
                name: class_name.clone(),
                base_class,
                fields: fields.clone(),
                methods: method_sigs,
                method_nodes,
                init_params: init_params.clone(),
                init_node,
            },
        );

        self.emit(format!("const {class_name} = struct {{"));
        self.push_indent();

        for (field_name, field_type) in &fields {
            self.emit(format!("{field_name}: {field_type},"));
        }
        if !fields.is_empty() {
            self.emit("");
        }

        if let Some(init) = init_node {
            self.generate_init(&class_name, init, &init_params)?;
        }
        self.generate_deinit(&class_name, &fields);

        for &method in &methods {
            self.generate_method(&class_name, method)?;
        }
        for &method in &inherited {
            self.generate_method(&class_name, method)?;
        }

        self.pop_indent();
        self.emit("};");
        self.emit("");
        Ok(())
    }

    fn generate_init(
        &mut self,
        class_name: &str,
        init: &'a ast::StmtFunctionDef,
        init_params: &[(String, String)],
    ) -> CompileResult<()> {
        let mut params = vec!["allocator: std.mem.Allocator".to_string()];
        for (name, ty) in init_params {
            params.push(format!("{name}: {ty}"));
        }
        self.emit(format!(
            "pub fn init({}) !*{class_name} {{",
            params.join(", ")
        ));
        self.push_indent();
        self.emit(format!("const instance = try allocator.create({class_name});"));

        let saved_types = self.var_types.clone();
        for (name, ty) in init_params {
            let tag = match ty.as_str() {
                "*runtime.PyObject" => TypeTag::Str,
                "f64" => TypeTag::Float,
                "bool" => TypeTag::Bool,
                _ => TypeTag::Int,
            };
            self.var_types.insert(name.clone(), tag);
        }

        for stmt in &init.body {
            if let ast::Stmt::Assign(assign) = stmt {
                for target in &assign.targets {
                    if let ast::Expr::Attribute(attr) = target {
                        if let ast::Expr::Name(obj) = attr.value.as_ref() {
                            if obj.id.as_str() == "self" {
                                let lowered = self.lower_plain(&assign.value)?;
                                let (code, needs_try) = self.realize(lowered);
                                if needs_try {
                                    self.emit(format!(
                                        "instance.{} = try {code};",
                                        attr.attr
                                    ));
                                } else {
                                    self.emit(format!("instance.{} = {code};", attr.attr));
                                }
                            }
                        }
                    }
                }
            }
        }

        self.var_types = saved_types;
        self.emit("return instance;");
        self.pop_indent();
        self.emit("}");
        self.emit("");
        Ok(())
    }

    fn generate_deinit(&mut self, class_name: &str, fields: &IndexMap<String, String>) {
        self.emit(format!(
            "pub fn deinit(self: *{class_name}, allocator: std.mem.Allocator) void {{"
        ));
        self.push_indent();
        for (field_name, field_type) in fields {
            if field_type == "*runtime.PyObject" {
                self.emit(format!("runtime.decref(self.{field_name}, allocator);"));
            }
        }
        self.emit("allocator.destroy(self);");
        self.pop_indent();
        self.emit("}");
        self.emit("");
    }

    fn generate_method(
        &mut self,
        class_name: &str,
        method: &'a ast::StmtFunctionDef,
    ) -> CompileResult<()> {
        let sig = method_sig(method);
        let uses_self = method.body.iter().any(|s| stmt_mentions(s, "self"));

        let mut params = Vec::new();
        if uses_self {
            params.push(format!("self: *{class_name}"));
        } else {
            params.push(format!("_: *{class_name}"));
        }
        if sig.needs_allocator {
            params.push("allocator: std.mem.Allocator".to_string());
        }
        for arg in method.args.args.iter().skip(1) {
            let param_type = match &arg.def.annotation {
                Some(annotation) => match annotation.as_ref() {
                    ast::Expr::Name(name) => map_annotation(name.id.as_str(), true),
                    _ => "i64",
                },
                None => "i64",
            };
            params.push(format!("{}: {param_type}", arg.def.arg));
        }

        let return_type = if sig.returns_error {
            format!("!{}", sig.return_type)
        } else {
            sig.return_type.clone()
        };

        self.emit(format!(
            "pub fn {}({}) {return_type} {{",
            method.name,
            params.join(", ")
        ));
        self.push_indent();

        let saved_types = self.var_types.clone();
        let saved_params = std::mem::take(&mut self.function_params);
        let saved_declared = self.declared_vars.clone();
        let saved_returns_dynamic = self.current_fn_returns_dynamic;

        self.var_types
            .insert("self".to_string(), TypeTag::Instance(class_name.to_string()));
        self.current_fn_returns_dynamic = sig.return_type == "*runtime.PyObject";
        for arg in method.args.args.iter().skip(1) {
            let arg_name = arg.def.arg.to_string();
            self.function_params.insert(arg_name.clone());
            if let Some(annotation) = &arg.def.annotation {
                if let ast::Expr::Name(type_name) = annotation.as_ref() {
                    let tag = match type_name.id.as_str() {
                        "str" => Some(TypeTag::Str),
                        "list" => Some(TypeTag::List),
                        "dict" => Some(TypeTag::Dict),
                        "int" => Some(TypeTag::Int),
                        "float" => Some(TypeTag::Float),
                        "bool" => Some(TypeTag::Bool),
                        _ => None,
                    };
                    if let Some(tag) = tag {
                        self.var_types.insert(arg_name, tag);
                    }
                }
            }
        }

        for stmt in &method.body {
            self.emit_stmt(stmt)?;
        }

        self.var_types = saved_types;
        self.function_params = saved_params;
        self.declared_vars = saved_declared;
        self.current_fn_returns_dynamic = saved_returns_dynamic;

        self.pop_indent();
        self.emit("}");
        self.emit("");
        Ok(())
    }
}

fn collect_fields(
    init: &ast::StmtFunctionDef,
    init_params: &[(String, String)],
    fields: &mut IndexMap<String, String>,
) {
    for stmt in &init.body {
        if let ast::Stmt::Assign(assign) = stmt {
            for target in &assign.targets {
                if let ast::Expr::Attribute(attr) = target {
                    if let ast::Expr::Name(obj) = attr.value.as_ref() {
                        if obj.id.as_str() == "self" {
                            let field_type = infer_field_type(&assign.value, init_params);
                            fields.insert(attr.attr.to_string(), field_type);
                        }
                    }
                }
            }
        }
    }
}

/// Infer a field's Zig type from its constructor assignment.
fn infer_field_type(value: &ast::Expr, init_params: &[(String, String)]) -> String {
    match value {
        ast::Expr::Name(name) => {
            for (param_name, param_type) in init_params {
                if param_name == name.id.as_str() {
                    return param_type.clone();
                }
            }
            "i64".to_string()
        }
        ast::Expr::Constant(c) => match &c.value {
            ast::Constant::Str(_) => "*runtime.PyObject".to_string(),
            ast::Constant::Float(_) => "f64".to_string(),
            ast::Constant::Bool(_) => "bool".to_string(),
            _ => "i64".to_string(),
        },
        _ => "i64".to_string(),
    }
}
