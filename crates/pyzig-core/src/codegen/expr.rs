//! Expression lowering.
//!
//! The lowerer is pure: it never writes output lines. Everything that needs
//! statement-level scaffolding (boxed-integer temporaries, hoisted string
//! allocations, `in`-operator dispatch, statement methods, `sum` loops) is
//! returned as typed data — [`Hoist`] slots inside a [`Lowered`] rendering,
//! or a deferred [`LoweredExpr`] variant — and realized by the statement
//! lowerer just before the containing statement is emitted.

use rustpython_ast::{self as ast};

use crate::codegen::helpers::{cmp_op, render_bin_op, render_scalar, zig_escape, TypeTag};
use crate::codegen::ZigCodeGenerator;
use crate::error::{CompileError, CompileResult};
use crate::method_registry::{LoweredArg, MethodDescriptor, ReturnKind};

/// A rendered expression plus its pending statement-level scaffolding.
#[derive(Debug, Clone)]
pub(crate) struct Lowered {
    pub(crate) code: String,
    /// The rendering evaluates to an error union the caller must unwrap.
    pub(crate) needs_try: bool,
    pub(crate) hoists: Vec<Hoist>,
}

impl Lowered {
    pub(crate) fn plain(code: impl Into<String>, needs_try: bool) -> Self {
        Self {
            code: code.into(),
            needs_try,
            hoists: Vec::new(),
        }
    }

    fn absorb(&mut self, other: Lowered) -> (String, bool) {
        self.hoists.extend(other.hoists);
        (other.code, other.needs_try)
    }
}

/// A deferred temporary the statement lowerer must emit before the statement
/// that uses the rendering. The placeholder appears verbatim in the rendered
/// code and is substituted with the temporary's name.
#[derive(Debug, Clone)]
pub(crate) enum Hoist {
    /// Box a primitive integer into a scoped `PyInt` temporary.
    WrapInt { placeholder: String, value: String },
    /// Bind a freshly allocated dynamic object (usually a string literal) to
    /// a scoped temporary with a paired decrement.
    OwnedTemp { placeholder: String, create: String },
}

/// Result of lowering one expression.
#[derive(Debug, Clone)]
pub(crate) enum LoweredExpr {
    Plain(Lowered),
    /// `a in b` / `a not in b`; container dispatch happens at the statement
    /// level where the temporaries can be scoped.
    Contains(Box<ContainsTest>),
    /// Void registry method (`xs.append(3)`): expanded by the statement
    /// lowerer because it may need to box a primitive argument first.
    MethodStatement(Box<StatementCall>),
    /// `sum(xs)`: expanded into an unboxing while-loop.
    Sum { list_code: String },
}

impl LoweredExpr {
    fn plain(code: impl Into<String>, needs_try: bool) -> Self {
        LoweredExpr::Plain(Lowered::plain(code, needs_try))
    }
}

/// Operands of a deferred `in` test.
#[derive(Debug, Clone)]
pub(crate) struct ContainsTest {
    pub(crate) needle: Lowered,
    pub(crate) needle_is_dynamic: bool,
    /// Set when the needle is a string literal (dict-key contains).
    pub(crate) needle_literal: Option<String>,
    pub(crate) haystack: String,
    pub(crate) haystack_tag: Option<TypeTag>,
    pub(crate) negated: bool,
}

/// A statement method call captured for later expansion.
#[derive(Debug, Clone)]
pub(crate) struct StatementCall {
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) receiver: String,
    /// Pending temporaries for an allocating receiver expression.
    pub(crate) receiver_hoists: Vec<Hoist>,
    pub(crate) args: Vec<Lowered>,
    pub(crate) arg_dynamics: Vec<bool>,
}

impl<'a> ZigCodeGenerator<'a> {
    /// Lower an expression to `(text, needs-try)` or a deferred form.
    pub(crate) fn lower_expr(&mut self, node: &ast::Expr) -> CompileResult<LoweredExpr> {
        match node {
            ast::Expr::Name(name) => Ok(LoweredExpr::plain(name.id.to_string(), false)),

            ast::Expr::Constant(c) => match &c.value {
                ast::Constant::Str(s) => Ok(LoweredExpr::plain(
                    format!("runtime.PyString.create(allocator, \"{}\")", zig_escape(s)),
                    true,
                )),
                other => Ok(LoweredExpr::plain(render_scalar(other)?, false)),
            },

            ast::Expr::Compare(c) => self.lower_compare(c),
            ast::Expr::BinOp(b) => self.lower_binop(b),

            ast::Expr::List(l) => {
                if l.elts.is_empty() {
                    return Ok(LoweredExpr::plain("runtime.PyList.create(allocator)", true));
                }
                let mut out = Lowered::plain(String::new(), true);
                let mut elements = Vec::new();
                for elt in &l.elts {
                    let lowered = self.lower_plain(elt)?;
                    let (code, _) = out.absorb(lowered);
                    elements.push(format!(".{{ .int = {code} }}"));
                }
                out.code = format!(
                    "runtime.PyList.fromSlice(allocator, &[_]runtime.PyObject.Value{{ {} }})",
                    elements.join(", ")
                );
                Ok(LoweredExpr::Plain(out))
            }

            ast::Expr::Tuple(t) => {
                if t.elts.is_empty() {
                    return Ok(LoweredExpr::plain(
                        "runtime.PyTuple.create(allocator, 0)",
                        true,
                    ));
                }
                let mut out = Lowered::plain(String::new(), true);
                let mut elements = Vec::new();
                for elt in &t.elts {
                    let lowered = self.lower_plain(elt)?;
                    let (code, _) = out.absorb(lowered);
                    elements.push(format!(".{{ .int = {code} }}"));
                }
                out.code = format!(
                    "runtime.PyTuple.fromSlice(allocator, &[_]runtime.PyObject.Value{{ {} }})",
                    elements.join(", ")
                );
                Ok(LoweredExpr::Plain(out))
            }

            ast::Expr::Dict(d) => {
                if d.keys.is_empty() {
                    return Ok(LoweredExpr::plain("runtime.PyDict.create(allocator)", true));
                }
                Err(CompileError::unsupported(
                    "dict literal in expression position",
                ))
            }

            ast::Expr::ListComp(_) => Err(CompileError::unsupported(
                "list comprehension in expression position",
            )),

            ast::Expr::Subscript(s) => self.lower_subscript(s),

            ast::Expr::Attribute(attr) => {
                if let ast::Expr::Name(name) = attr.value.as_ref() {
                    if self.module_functions.contains_key(name.id.as_str()) {
                        return Err(CompileError::unsupported(
                            "module attribute outside a call",
                        ));
                    }
                }
                let obj = self.lower_plain(&attr.value)?;
                let needs_try = obj.needs_try;
                Ok(LoweredExpr::Plain(Lowered {
                    code: format!("{}.{}", obj.code, attr.attr),
                    needs_try,
                    hoists: obj.hoists,
                }))
            }

            ast::Expr::Call(c) => self.lower_call(c),

            ast::Expr::BoolOp(b) => {
                let joiner = match b.op {
                    ast::BoolOp::And => " and ",
                    ast::BoolOp::Or => " or ",
                };
                let mut out = Lowered::plain(String::new(), false);
                let mut parts = Vec::new();
                for value in &b.values {
                    let lowered = self.lower_plain(value)?;
                    let (code, _) = out.absorb(lowered);
                    parts.push(code);
                }
                out.code = parts.join(joiner);
                Ok(LoweredExpr::Plain(out))
            }

            ast::Expr::UnaryOp(u) => match u.op {
                ast::UnaryOp::USub => {
                    let operand = self.lower_plain(&u.operand)?;
                    Ok(LoweredExpr::Plain(Lowered {
                        code: format!("-{}", operand.code),
                        needs_try: operand.needs_try,
                        hoists: operand.hoists,
                    }))
                }
                ast::UnaryOp::UAdd => {
                    let operand = self.lower_plain(&u.operand)?;
                    Ok(LoweredExpr::Plain(operand))
                }
                ast::UnaryOp::Not => match self.lower_expr(&u.operand)? {
                    LoweredExpr::Contains(mut test) => {
                        test.negated = !test.negated;
                        Ok(LoweredExpr::Contains(test))
                    }
                    LoweredExpr::Plain(operand) => Ok(LoweredExpr::Plain(Lowered {
                        code: format!("!({})", operand.code),
                        needs_try: operand.needs_try,
                        hoists: operand.hoists,
                    })),
                    _ => Err(CompileError::unsupported("not on this operand")),
                },
                ast::UnaryOp::Invert => Err(CompileError::unsupported("unary invert")),
            },

            other => Err(CompileError::unsupported(expr_kind_name(other))),
        }
    }

    /// Lower an expression, rejecting deferred forms.
    pub(crate) fn lower_plain(&mut self, node: &ast::Expr) -> CompileResult<Lowered> {
        match self.lower_expr(node)? {
            LoweredExpr::Plain(lowered) => Ok(lowered),
            LoweredExpr::Contains(_) => Err(CompileError::unsupported(
                "in operator in this position",
            )),
            LoweredExpr::MethodStatement(call) => Err(CompileError::unsupported(format!(
                "{} in expression position",
                call.descriptor.name
            ))),
            LoweredExpr::Sum { .. } => {
                Err(CompileError::unsupported("sum() in expression position"))
            }
        }
    }

    fn lower_compare(&mut self, c: &ast::ExprCompare) -> CompileResult<LoweredExpr> {
        if c.ops.len() != 1 || c.comparators.len() != 1 {
            return Err(CompileError::unsupported("chained comparison"));
        }
        let op = &c.ops[0];
        let right_node = &c.comparators[0];

        if matches!(op, ast::CmpOp::In | ast::CmpOp::NotIn) {
            let needle = self.lower_plain(&c.left)?;
            let needle_is_dynamic = needle.needs_try
                || self
                    .name_tag(&c.left)
                    .is_some_and(|tag| tag.is_dynamic());
            let needle_literal = match c.left.as_ref() {
                ast::Expr::Constant(k) => match &k.value {
                    ast::Constant::Str(s) => Some(s.clone()),
                    _ => None,
                },
                _ => None,
            };
            let haystack = self.lower_plain(right_node)?;
            let haystack_tag = self.name_tag(right_node);
            return Ok(LoweredExpr::Contains(Box::new(ContainsTest {
                needle,
                needle_is_dynamic,
                needle_literal,
                haystack: haystack.code,
                haystack_tag,
                negated: matches!(op, ast::CmpOp::NotIn),
            })));
        }

        // String equality goes through the runtime; literal operands are
        // hoisted into scoped temporaries.
        if matches!(op, ast::CmpOp::Eq | ast::CmpOp::NotEq)
            && (self.expr_is_stringish(&c.left) || self.expr_is_stringish(right_node))
        {
            let mut out = Lowered::plain(String::new(), false);
            let left = self.lower_plain(&c.left)?;
            let left_code = self.as_dynamic_operand(left, &mut out.hoists);
            let right = self.lower_plain(right_node)?;
            let right_code = self.as_dynamic_operand(right, &mut out.hoists);
            let eql = format!("runtime.PyString.eql({left_code}, {right_code})");
            out.code = if matches!(op, ast::CmpOp::NotEq) {
                format!("!{eql}")
            } else {
                eql
            };
            return Ok(LoweredExpr::Plain(out));
        }

        let mut out = Lowered::plain(String::new(), false);
        let left = self.lower_plain(&c.left)?;
        let left_code = self.unwrap_int_operand(&c.left, &left);
        out.hoists.extend(left.hoists);
        let right = self.lower_plain(right_node)?;
        let right_code = self.unwrap_int_operand(right_node, &right);
        out.hoists.extend(right.hoists);
        out.code = format!("{left_code} {} {right_code}", cmp_op(op)?);
        Ok(LoweredExpr::Plain(out))
    }

    fn lower_binop(&mut self, b: &ast::ExprBinOp) -> CompileResult<LoweredExpr> {
        if matches!(b.op, ast::Operator::Add)
            && (self.expr_is_stringish(&b.left) || self.expr_is_stringish(&b.right))
        {
            let mut out = Lowered::plain(String::new(), true);
            let left = self.lower_plain(&b.left)?;
            let (left_code, left_try) = out.absorb(left);
            let right = self.lower_plain(&b.right)?;
            let (right_code, right_try) = out.absorb(right);
            let left_expr = if left_try {
                format!("try {left_code}")
            } else {
                left_code
            };
            let right_expr = if right_try {
                format!("try {right_code}")
            } else {
                right_code
            };
            out.code = format!("runtime.PyString.concat(allocator, {left_expr}, {right_expr})");
            return Ok(LoweredExpr::Plain(out));
        }

        let mut out = Lowered::plain(String::new(), false);
        let left = self.lower_plain(&b.left)?;
        let left_code = self.unwrap_int_operand(&b.left, &left);
        out.hoists.extend(left.hoists);
        let right = self.lower_plain(&b.right)?;
        let right_code = self.unwrap_int_operand(&b.right, &right);
        out.hoists.extend(right.hoists);
        out.code = render_bin_op(&b.op, &left_code, &right_code)?;
        Ok(LoweredExpr::Plain(out))
    }

    fn lower_subscript(&mut self, s: &ast::ExprSubscript) -> CompileResult<LoweredExpr> {
        let obj = self.lower_plain(&s.value)?;
        let obj_tag = self.name_tag(&s.value);
        let mut hoists = obj.hoists.clone();
        let obj_code = obj.code;

        if let ast::Expr::Slice(slice) = s.slice.as_ref() {
            let start = self.lower_slice_bound(slice.lower.as_deref(), &mut hoists)?;
            let end = self.lower_slice_bound(slice.upper.as_deref(), &mut hoists)?;
            let step = self.lower_slice_bound(slice.step.as_deref(), &mut hoists)?;

            let code = match obj_tag {
                Some(TypeTag::List) => format!(
                    "runtime.PyList.slice({obj_code}, allocator, {start}, {end}, {step})"
                ),
                Some(TypeTag::Str) => format!(
                    "runtime.PyString.slice({obj_code}, allocator, {start}, {end}, {step})"
                ),
                // Unknown receiver tag: dispatch on the runtime type id
                _ => format!("runtime.slice({obj_code}, allocator, {start}, {end}, {step})"),
            };
            return Ok(LoweredExpr::Plain(Lowered {
                code,
                needs_try: true,
                hoists,
            }));
        }

        // Dict lookup with a string-literal key returns a borrowed object
        if let ast::Expr::Constant(c) = s.slice.as_ref() {
            if let ast::Constant::Str(key) = &c.value {
                if matches!(obj_tag, Some(TypeTag::Dict) | None) {
                    return Ok(LoweredExpr::Plain(Lowered {
                        code: format!(
                            "runtime.PyDict.get({obj_code}, \"{}\").?",
                            zig_escape(key)
                        ),
                        needs_try: false,
                        hoists,
                    }));
                }
            }
        }

        let index = self.lower_plain(&s.slice)?;
        hoists.extend(index.hoists.clone());
        let mut index_code = index.code;
        if self
            .name_tag(&s.slice)
            .is_some_and(|tag| tag == TypeTag::PyInt)
        {
            index_code = format!("runtime.PyInt.getValue({index_code})");
        }

        let (code, needs_try) = match obj_tag {
            Some(TypeTag::List) => (
                format!("runtime.PyList.getItem({obj_code}, {index_code})"),
                true,
            ),
            Some(TypeTag::Tuple) => (
                format!("runtime.PyTuple.getItem({obj_code}, {index_code})"),
                true,
            ),
            Some(TypeTag::Str) => (
                format!("runtime.PyString.getItem(allocator, {obj_code}, {index_code})"),
                true,
            ),
            Some(TypeTag::Dict) => (
                format!(
                    "runtime.PyDict.get({obj_code}, runtime.PyString.getValue({index_code})).?"
                ),
                false,
            ),
            _ => (format!("{obj_code}[{index_code}]"), false),
        };
        Ok(LoweredExpr::Plain(Lowered {
            code,
            needs_try,
            hoists,
        }))
    }

    fn lower_call(&mut self, c: &ast::ExprCall) -> CompileResult<LoweredExpr> {
        if !c.keywords.is_empty() {
            return Err(CompileError::unsupported("keyword arguments"));
        }

        match c.func.as_ref() {
            ast::Expr::Name(name) => self.lower_name_call(name.id.as_str(), c),
            ast::Expr::Attribute(attr) => self.lower_method_call(attr, c),
            _ => Err(CompileError::unsupported("call on this expression")),
        }
    }

    fn lower_name_call(&mut self, func_name: &str, c: &ast::ExprCall) -> CompileResult<LoweredExpr> {
        match func_name {
            "print" => Err(CompileError::unsupported("print in expression position")),

            "len" => {
                let arg_node = require_arg(c, 0, "len")?;
                if let ast::Expr::Constant(k) = arg_node {
                    if let ast::Constant::Str(s) = &k.value {
                        return Ok(LoweredExpr::plain(s.chars().count().to_string(), false));
                    }
                }
                let arg = self.lower_plain(arg_node)?;
                let mut hoists = arg.hoists.clone();
                let code = match self.name_tag(arg_node) {
                    Some(TypeTag::List) => format!("runtime.PyList.len({})", arg.code),
                    Some(TypeTag::Tuple) => format!("runtime.PyTuple.len({})", arg.code),
                    Some(TypeTag::Dict) => format!("runtime.PyDict.len({})", arg.code),
                    Some(TypeTag::Str) => format!("runtime.PyString.len({})", arg.code),
                    _ if arg.needs_try => {
                        let operand = self.as_dynamic_operand(arg.clone(), &mut hoists);
                        format!("runtime.PyString.len({operand})")
                    }
                    _ => format!("{}.len", arg.code),
                };
                Ok(LoweredExpr::Plain(Lowered {
                    code,
                    needs_try: false,
                    hoists,
                }))
            }

            "min" | "max" => {
                let intrinsic = if func_name == "min" { "@min" } else { "@max" };
                if c.args.len() >= 2 {
                    let mut out = Lowered::plain(String::new(), false);
                    let mut codes = Vec::new();
                    for arg in &c.args {
                        let lowered = self.lower_plain(arg)?;
                        let (code, _) = out.absorb(lowered);
                        codes.push(code);
                    }
                    let mut expr = format!("{intrinsic}({}, {})", codes[0], codes[1]);
                    for code in &codes[2..] {
                        expr = format!("{intrinsic}({expr}, {code})");
                    }
                    out.code = expr;
                    return Ok(LoweredExpr::Plain(out));
                }
                let arg_node = require_arg(c, 0, func_name)?;
                if self.name_tag(arg_node) == Some(TypeTag::List) {
                    let arg = self.lower_plain(arg_node)?;
                    return Ok(LoweredExpr::Plain(Lowered {
                        code: format!("runtime.PyList.{func_name}({})", arg.code),
                        needs_try: false,
                        hoists: arg.hoists,
                    }));
                }
                Err(CompileError::unsupported(format!(
                    "{func_name}() over this argument"
                )))
            }

            "sum" => {
                let arg_node = require_arg(c, 0, "sum")?;
                if self.name_tag(arg_node) == Some(TypeTag::List) {
                    let arg = self.lower_plain(arg_node)?;
                    return Ok(LoweredExpr::Sum {
                        list_code: arg.code,
                    });
                }
                let arg = self.lower_plain(arg_node)?;
                Ok(LoweredExpr::Plain(Lowered {
                    code: format!("sum({})", arg.code),
                    needs_try: false,
                    hoists: arg.hoists,
                }))
            }

            "str" => {
                let arg_node = require_arg(c, 0, "str")?;
                let arg = self.lower_plain(arg_node)?;
                match self.name_tag(arg_node) {
                    Some(TypeTag::Str) => Ok(LoweredExpr::Plain(arg)),
                    Some(TypeTag::PyInt) => Ok(LoweredExpr::Plain(Lowered {
                        code: format!(
                            "runtime.PyString.fromInt(allocator, runtime.PyInt.getValue({}))",
                            arg.code
                        ),
                        needs_try: true,
                        hoists: arg.hoists,
                    })),
                    _ => Ok(LoweredExpr::Plain(Lowered {
                        code: format!("runtime.PyString.fromInt(allocator, {})", arg.code),
                        needs_try: true,
                        hoists: arg.hoists,
                    })),
                }
            }

            "range" => match c.args.len() {
                1 => {
                    let end = self.lower_plain(&c.args[0])?;
                    Ok(LoweredExpr::Plain(Lowered {
                        code: format!("runtime.range(allocator, 0, {})", end.code),
                        needs_try: true,
                        hoists: end.hoists,
                    }))
                }
                2 => {
                    let start = self.lower_plain(&c.args[0])?;
                    let end = self.lower_plain(&c.args[1])?;
                    let mut hoists = start.hoists;
                    hoists.extend(end.hoists);
                    Ok(LoweredExpr::Plain(Lowered {
                        code: format!("runtime.range(allocator, {}, {})", start.code, end.code),
                        needs_try: true,
                        hoists,
                    }))
                }
                _ => Err(CompileError::unsupported(
                    "range() with step outside a for loop",
                )),
            },

            "enumerate" => {
                let arg = self.lower_plain(require_arg(c, 0, "enumerate")?)?;
                Ok(LoweredExpr::Plain(Lowered {
                    code: format!("runtime.enumerate(allocator, {})", arg.code),
                    needs_try: true,
                    hoists: arg.hoists,
                }))
            }

            "zip" => {
                if c.args.len() != 2 {
                    return Err(CompileError::unsupported(
                        "zip() with other than two iterables outside a for loop",
                    ));
                }
                let a = self.lower_plain(&c.args[0])?;
                let b = self.lower_plain(&c.args[1])?;
                let mut hoists = a.hoists;
                hoists.extend(b.hoists);
                Ok(LoweredExpr::Plain(Lowered {
                    code: format!("runtime.zip(allocator, {}, {})", a.code, b.code),
                    needs_try: true,
                    hoists,
                }))
            }

            _ if self.class_definitions.contains_key(func_name) => {
                // Class instantiation: allocator prepended, ownership of
                // dynamic arguments transfers to the instance fields.
                let mut out = Lowered::plain(String::new(), true);
                let mut args = vec!["allocator".to_string()];
                for arg in &c.args {
                    let lowered = self.lower_plain(arg)?;
                    let (code, needs_try) = out.absorb(lowered);
                    args.push(if needs_try {
                        format!("try {code}")
                    } else {
                        code
                    });
                }
                out.code = format!("{func_name}.init({})", args.join(", "));
                Ok(LoweredExpr::Plain(out))
            }

            _ => {
                // User-defined function call
                let sig = self.function_signatures.get(func_name).cloned();
                let mut out = Lowered::plain(String::new(), false);
                let mut args = Vec::new();
                if let Some(sig) = &sig {
                    if sig.needs_allocator {
                        args.push("allocator".to_string());
                    }
                    out.needs_try = sig.returns_pyobject || sig.returns_error;
                }
                for arg in &c.args {
                    let lowered = self.lower_plain(arg)?;
                    if lowered.needs_try {
                        // Fresh dynamic arguments are caller-owned: bind them
                        // to scoped temporaries rather than leaking inline.
                        let code = self.as_dynamic_operand(lowered, &mut out.hoists);
                        args.push(code);
                    } else {
                        let (code, _) = out.absorb(lowered);
                        args.push(code);
                    }
                }
                out.code = format!("{func_name}({})", args.join(", "));
                Ok(LoweredExpr::Plain(out))
            }
        }
    }

    fn lower_method_call(
        &mut self,
        attr: &ast::ExprAttribute,
        c: &ast::ExprCall,
    ) -> CompileResult<LoweredExpr> {
        let method_name = attr.attr.as_str();

        // Module-qualified function call
        if let ast::Expr::Name(name) = attr.value.as_ref() {
            let module_name = name.id.as_str();
            if let Some(funcs) = self.module_functions.get(module_name) {
                let sig = funcs.get(method_name).map(|f| f.signature.clone());
                let Some(sig) = sig else {
                    return Err(CompileError::unsupported(format!(
                        "unknown function {module_name}.{method_name}"
                    )));
                };
                let mut out = Lowered::plain(String::new(), sig.returns_pyobject || sig.returns_error);
                let mut args = Vec::new();
                if sig.needs_allocator {
                    args.push("allocator".to_string());
                }
                for arg in &c.args {
                    let lowered = self.lower_plain(arg)?;
                    if lowered.needs_try {
                        let code = self.as_dynamic_operand(lowered, &mut out.hoists);
                        args.push(code);
                    } else {
                        let (code, _) = out.absorb(lowered);
                        args.push(code);
                    }
                }
                out.code = format!("{module_name}.{method_name}({})", args.join(", "));
                return Ok(LoweredExpr::Plain(out));
            }
        }

        let obj = self.lower_plain(&attr.value)?;
        let obj_tag = self.name_tag(&attr.value);

        // Direct method call on a user class instance
        if let Some(TypeTag::Instance(class_name)) = &obj_tag {
            if let Some(method_sig) = self.lookup_method(class_name, method_name) {
                let needs_allocator = method_sig.needs_allocator;
                let mut out = Lowered {
                    code: String::new(),
                    needs_try: method_sig.returns_error,
                    hoists: obj.hoists,
                };
                let mut args = Vec::new();
                if needs_allocator {
                    args.push("allocator".to_string());
                }
                for arg in &c.args {
                    let lowered = self.lower_plain(arg)?;
                    let (code, needs_try) = out.absorb(lowered);
                    args.push(if needs_try {
                        format!("try {code}")
                    } else {
                        code
                    });
                }
                out.code = format!("{}.{}({})", obj.code, method_name, args.join(", "));
                return Ok(LoweredExpr::Plain(out));
            }
        }

        let registry_key = obj_tag.as_ref().and_then(TypeTag::registry_key);
        if let Some(descriptor) = self.registry.get(method_name, registry_key).cloned() {
            let mut hoists = Vec::new();
            // A freshly allocated receiver (chained method calls) is bound to
            // a scoped temporary so its reference is released.
            let receiver_code = self.as_dynamic_operand(obj, &mut hoists);
            let mut lowered_args = Vec::new();
            let mut arg_dynamics = Vec::new();
            for arg in &c.args {
                let arg_lowered = self.lower_plain(arg)?;
                let is_dynamic = self
                    .name_tag(arg)
                    .is_some_and(|tag| tag.is_dynamic());
                arg_dynamics.push(is_dynamic || arg_lowered.needs_try);
                lowered_args.push(arg_lowered);
            }

            if descriptor.is_statement {
                return Ok(LoweredExpr::MethodStatement(Box::new(StatementCall {
                    descriptor,
                    receiver: receiver_code,
                    receiver_hoists: hoists,
                    args: lowered_args,
                    arg_dynamics,
                })));
            }

            let mut render_args = Vec::new();
            for (arg_lowered, is_dynamic) in lowered_args.into_iter().zip(&arg_dynamics) {
                if arg_lowered.needs_try {
                    // Hoist fresh dynamic arguments (string literals and
                    // nested allocating calls) into scoped temporaries.
                    let code = self.as_dynamic_operand(arg_lowered, &mut hoists);
                    render_args.push(LoweredArg {
                        code,
                        needs_try: false,
                        is_dynamic: true,
                    });
                } else {
                    hoists.extend(arg_lowered.hoists.clone());
                    render_args.push(LoweredArg {
                        code: arg_lowered.code,
                        needs_try: false,
                        is_dynamic: *is_dynamic,
                    });
                }
            }

            let rendered = descriptor.render_call(&receiver_code, &render_args);
            let mut code = rendered.code;
            for wrap in rendered.wraps {
                let unique = format!("__w{}__", self.next_id());
                code = code.replace(&wrap.placeholder, &unique);
                hoists.push(Hoist::WrapInt {
                    placeholder: unique,
                    value: wrap.value,
                });
            }
            return Ok(LoweredExpr::Plain(Lowered {
                code,
                needs_try: rendered.needs_try,
                hoists,
            }));
        }

        // Unknown method: direct attribute call
        let mut out = Lowered {
            code: String::new(),
            needs_try: obj.needs_try,
            hoists: obj.hoists,
        };
        let mut args = Vec::new();
        for arg in &c.args {
            let lowered = self.lower_plain(arg)?;
            let (code, needs_try) = out.absorb(lowered);
            args.push(if needs_try {
                format!("try {code}")
            } else {
                code
            });
        }
        out.code = format!("{}.{}({})", obj.code, method_name, args.join(", "));
        Ok(LoweredExpr::Plain(out))
    }

    fn lower_slice_bound(
        &mut self,
        node: Option<&ast::Expr>,
        hoists: &mut Vec<Hoist>,
    ) -> CompileResult<String> {
        match node {
            Some(expr) => {
                let lowered = self.lower_plain(expr)?;
                hoists.extend(lowered.hoists);
                Ok(lowered.code)
            }
            None => Ok("null".to_string()),
        }
    }

    /// Unwrap a boxed or error-propagating operand to its native payload for
    /// arithmetic and comparison.
    pub(crate) fn unwrap_int_operand(&self, node: &ast::Expr, lowered: &Lowered) -> String {
        match node {
            ast::Expr::Subscript(s) if !matches!(s.slice.as_ref(), ast::Expr::Slice(_)) => {
                if lowered.needs_try {
                    format!("runtime.PyInt.getValue(try {})", lowered.code)
                } else if matches!(self.name_tag(&s.value), Some(TypeTag::Dict)) {
                    format!("runtime.PyInt.getValue({})", lowered.code)
                } else {
                    lowered.code.clone()
                }
            }
            ast::Expr::Call(c) => {
                if let ast::Expr::Attribute(attr) = c.func.as_ref() {
                    if attr.attr.as_str() == "pop" && lowered.needs_try {
                        return format!("runtime.PyInt.getValue(try {})", lowered.code);
                    }
                }
                if lowered.needs_try {
                    format!("(try {})", lowered.code)
                } else {
                    lowered.code.clone()
                }
            }
            ast::Expr::Name(name) => {
                if self.var_types.get(name.id.as_str()) == Some(&TypeTag::PyInt) {
                    format!("runtime.PyInt.getValue({})", lowered.code)
                } else {
                    lowered.code.clone()
                }
            }
            _ if lowered.needs_try => format!("(try {})", lowered.code),
            _ => lowered.code.clone(),
        }
    }

    /// Turn a fresh dynamic rendering into a hoisted scoped temporary,
    /// returning the code that stands in for it (a placeholder name).
    pub(crate) fn as_dynamic_operand(
        &mut self,
        lowered: Lowered,
        hoists: &mut Vec<Hoist>,
    ) -> String {
        hoists.extend(lowered.hoists);
        if lowered.needs_try {
            let placeholder = format!("__h{}__", self.next_id());
            hoists.push(Hoist::OwnedTemp {
                placeholder: placeholder.clone(),
                create: lowered.code,
            });
            placeholder
        } else {
            lowered.code
        }
    }

    /// Tag of a plain-name expression, if tracked.
    pub(crate) fn name_tag(&self, node: &ast::Expr) -> Option<TypeTag> {
        match node {
            ast::Expr::Name(name) => self.var_types.get(name.id.as_str()).cloned(),
            _ => None,
        }
    }

    /// Whether an expression is contextually a string (drives `+` lowering).
    pub(crate) fn expr_is_stringish(&self, node: &ast::Expr) -> bool {
        match node {
            ast::Expr::Constant(c) => matches!(c.value, ast::Constant::Str(_)),
            ast::Expr::Name(name) => {
                self.var_types.get(name.id.as_str()) == Some(&TypeTag::Str)
            }
            ast::Expr::BinOp(b) => {
                matches!(b.op, ast::Operator::Add)
                    && (self.expr_is_stringish(&b.left) || self.expr_is_stringish(&b.right))
            }
            ast::Expr::Call(c) => match c.func.as_ref() {
                ast::Expr::Name(name) => name.id.as_str() == "str",
                ast::Expr::Attribute(attr) => {
                    let receiver_tag = self.name_tag(&attr.value);
                    match receiver_tag {
                        Some(TypeTag::Str) => self
                            .registry
                            .get(attr.attr.as_str(), Some("string"))
                            .is_some_and(|d| d.returns == ReturnKind::PyObject),
                        Some(TypeTag::Instance(class_name)) => self
                            .lookup_method(&class_name, attr.attr.as_str())
                            .is_some_and(|sig| sig.return_type == "*runtime.PyObject"),
                        _ => false,
                    }
                }
                _ => false,
            },
            ast::Expr::Attribute(attr) => {
                if let Some(TypeTag::Instance(class_name)) = self.name_tag(&attr.value) {
                    return self
                        .class_definitions
                        .get(&class_name)
                        .and_then(|info| info.fields.get(attr.attr.as_str()))
                        .is_some_and(|ty| ty == "*runtime.PyObject");
                }
                false
            }
            ast::Expr::Subscript(s) => {
                !matches!(s.slice.as_ref(), ast::Expr::Slice(_))
                    && self.name_tag(&s.value) == Some(TypeTag::Str)
            }
            _ => false,
        }
    }
}

fn require_arg<'c>(
    c: &'c ast::ExprCall,
    index: usize,
    builtin: &str,
) -> CompileResult<&'c ast::Expr> {
    c.args
        .get(index)
        .ok_or_else(|| CompileError::unsupported(format!("{builtin}() without arguments")))
}

fn expr_kind_name(expr: &ast::Expr) -> &'static str {
    match expr {
        ast::Expr::Lambda(_) => "lambda",
        ast::Expr::GeneratorExp(_) => "generator expression",
        ast::Expr::DictComp(_) => "dict comprehension",
        ast::Expr::SetComp(_) => "set comprehension",
        ast::Expr::IfExp(_) => "conditional expression",
        ast::Expr::NamedExpr(_) => "walrus operator",
        ast::Expr::JoinedStr(_) => "f-string",
        ast::Expr::Set(_) => "set literal",
        ast::Expr::Starred(_) => "starred expression",
        ast::Expr::Await(_) => "await",
        ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => "yield",
        ast::Expr::Slice(_) => "bare slice",
        _ => "expression",
    }
}
