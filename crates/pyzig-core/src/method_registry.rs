//! Method dispatch registry.
//!
//! A static, read-only table mapping Python method names (plus an optional
//! receiver kind for disambiguation) onto runtime calls with the correct
//! argument conventions. String methods take the allocator first, then the
//! receiver; list/dict methods take the receiver first and the allocator only
//! when needed.
//!
//! Primitive arguments to a wrap-primitive method are not boxed here: the
//! rendered call carries typed [`WrapSlot`]s that the statement lowerer
//! realizes as scoped `PyInt` temporaries before the statement is emitted.

use indexmap::IndexMap;

/// Runtime receiver type for a registered method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    PyString,
    PyList,
    PyDict,
}

impl RuntimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeType::PyString => "PyString",
            RuntimeType::PyList => "PyList",
            RuntimeType::PyDict => "PyDict",
        }
    }
}

/// Argument kind expected by a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Accept any value (primitive or dynamic object)
    Any,
    /// Requires a dynamic object
    PyObject,
    /// Requires a primitive (native int)
    Primitive,
}

/// Return category of a method call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Returns `!*PyObject` (error union, caller prefixes `try`)
    PyObject,
    /// Returns `*PyObject` directly (no error union)
    PyObjectDirect,
    /// Returns a native `i64`
    Int,
    /// Returns nothing (statement methods like `append`)
    Void,
}

/// Metadata for one dispatchable method
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub receiver: RuntimeType,
    pub runtime_fn: &'static str,
    pub needs_allocator: bool,
    pub returns: ReturnKind,
    pub arg_kinds: &'static [ArgKind],
    pub wrap_primitive_args: bool,
    pub is_statement: bool,
    /// Non-dynamic return that still propagates an error (`list.index`
    /// raising on a missing value).
    pub can_fail: bool,
}

/// One lowered argument handed to the registry for rendering
#[derive(Debug, Clone)]
pub struct LoweredArg {
    pub code: String,
    pub needs_try: bool,
    /// Whether the argument is already a dynamic object (a tagged variable or
    /// a hoisted temporary); dynamic arguments are never boxed.
    pub is_dynamic: bool,
}

/// A pending primitive boxing inside a rendered call.
///
/// `placeholder` appears verbatim in [`RenderedCall::code`]; the statement
/// lowerer emits a scoped `PyInt` temporary for `value` and substitutes the
/// temporary's name for the placeholder.
#[derive(Debug, Clone)]
pub struct WrapSlot {
    pub placeholder: String,
    pub value: String,
}

/// A rendered runtime call site
#[derive(Debug, Clone)]
pub struct RenderedCall {
    pub code: String,
    pub needs_try: bool,
    pub wraps: Vec<WrapSlot>,
}

impl MethodDescriptor {
    /// Render this method call for the given receiver and arguments.
    ///
    /// Statement methods are never rendered through here; the statement
    /// lowerer expands them directly so it can box primitive arguments.
    pub fn render_call(&self, receiver_code: &str, args: &[LoweredArg]) -> RenderedCall {
        let mut rendered: Vec<String> = Vec::new();

        if self.receiver == RuntimeType::PyString && self.needs_allocator {
            rendered.push("allocator".to_string());
            rendered.push(receiver_code.to_string());
        } else {
            rendered.push(receiver_code.to_string());
            if self.needs_allocator {
                rendered.push("allocator".to_string());
            }
        }

        let mut wraps = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let kind = self.arg_kinds.get(i).copied().unwrap_or(ArgKind::Any);
            if self.wrap_primitive_args
                && kind == ArgKind::Any
                && !arg.needs_try
                && !arg.is_dynamic
            {
                let placeholder = format!("__wrap{i}__");
                wraps.push(WrapSlot {
                    placeholder: placeholder.clone(),
                    value: arg.code.clone(),
                });
                rendered.push(placeholder);
            } else if arg.needs_try {
                rendered.push(format!("try {}", arg.code));
            } else {
                rendered.push(arg.code.clone());
            }
        }

        let code = format!(
            "runtime.{}.{}({})",
            self.receiver.as_str(),
            self.runtime_fn,
            rendered.join(", ")
        );

        RenderedCall {
            code,
            needs_try: self.returns == ReturnKind::PyObject || self.can_fail,
            wraps,
        }
    }
}

/// The method registry: `(method name, receiver kind)` with unqualified
/// fallback, exactly one descriptor per entry.
#[derive(Debug)]
pub struct MethodRegistry {
    methods: IndexMap<&'static str, MethodDescriptor>,
}

macro_rules! method {
    (
        $map:expr, $key:expr,
        name: $name:expr, receiver: $recv:expr, runtime_fn: $rt:expr,
        needs_allocator: $alloc:expr, returns: $ret:expr, args: $args:expr
        $(, wrap_primitives: $wrap:expr)? $(, statement: $stmt:expr)? $(, can_fail: $cf:expr)?
    ) => {{
        #[allow(unused_mut, unused_assignments)]
        let mut wrap = false;
        $(wrap = $wrap;)?
        #[allow(unused_mut, unused_assignments)]
        let mut stmt = false;
        $(stmt = $stmt;)?
        #[allow(unused_mut, unused_assignments)]
        let mut can_fail = false;
        $(can_fail = $cf;)?
        $map.insert(
            $key,
            MethodDescriptor {
                name: $name,
                receiver: $recv,
                runtime_fn: $rt,
                needs_allocator: $alloc,
                returns: $ret,
                arg_kinds: $args,
                wrap_primitive_args: wrap,
                is_statement: stmt,
                can_fail,
            },
        );
    }};
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        use ArgKind::{Any, Primitive};
        use ReturnKind::{Int, PyObject, PyObjectDirect, Void};
        use RuntimeType::{PyDict, PyList, PyString};

        let mut m: IndexMap<&'static str, MethodDescriptor> = IndexMap::new();

        // String methods
        method!(m, "upper", name: "upper", receiver: PyString, runtime_fn: "upper",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "lower", name: "lower", receiver: PyString, runtime_fn: "lower",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "split", name: "split", receiver: PyString, runtime_fn: "split",
            needs_allocator: true, returns: PyObject, args: &[ArgKind::PyObject]);
        method!(m, "strip", name: "strip", receiver: PyString, runtime_fn: "strip",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "replace", name: "replace", receiver: PyString, runtime_fn: "replace",
            needs_allocator: true, returns: PyObject, args: &[ArgKind::PyObject, ArgKind::PyObject]);
        method!(m, "startswith", name: "startswith", receiver: PyString, runtime_fn: "startswith",
            needs_allocator: false, returns: Int, args: &[ArgKind::PyObject]);
        method!(m, "endswith", name: "endswith", receiver: PyString, runtime_fn: "endswith",
            needs_allocator: false, returns: Int, args: &[ArgKind::PyObject]);
        method!(m, "find", name: "find", receiver: PyString, runtime_fn: "find",
            needs_allocator: false, returns: Int, args: &[ArgKind::PyObject]);
        // Different runtime name to avoid clashing with list.count
        method!(m, "string.count", name: "count", receiver: PyString, runtime_fn: "count_substr",
            needs_allocator: false, returns: Int, args: &[ArgKind::PyObject]);
        method!(m, "join", name: "join", receiver: PyString, runtime_fn: "join",
            needs_allocator: true, returns: PyObject, args: &[ArgKind::PyObject]);
        method!(m, "isdigit", name: "isdigit", receiver: PyString, runtime_fn: "isdigit",
            needs_allocator: false, returns: Int, args: &[]);
        method!(m, "isalpha", name: "isalpha", receiver: PyString, runtime_fn: "isalpha",
            needs_allocator: false, returns: Int, args: &[]);
        method!(m, "capitalize", name: "capitalize", receiver: PyString, runtime_fn: "capitalize",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "swapcase", name: "swapcase", receiver: PyString, runtime_fn: "swapcase",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "title", name: "title", receiver: PyString, runtime_fn: "title",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "center", name: "center", receiver: PyString, runtime_fn: "center",
            needs_allocator: true, returns: PyObject, args: &[Primitive]);

        // List methods
        method!(m, "append", name: "append", receiver: PyList, runtime_fn: "append",
            needs_allocator: false, returns: Void, args: &[Any],
            wrap_primitives: true, statement: true);
        method!(m, "pop", name: "pop", receiver: PyList, runtime_fn: "pop",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "extend", name: "extend", receiver: PyList, runtime_fn: "extend",
            needs_allocator: false, returns: Void, args: &[ArgKind::PyObject], statement: true);
        method!(m, "remove", name: "remove", receiver: PyList, runtime_fn: "remove",
            needs_allocator: true, returns: Void, args: &[Any],
            wrap_primitives: true, statement: true);
        method!(m, "reverse", name: "reverse", receiver: PyList, runtime_fn: "reverse",
            needs_allocator: false, returns: Void, args: &[], statement: true);
        method!(m, "list.count", name: "count", receiver: PyList, runtime_fn: "count",
            needs_allocator: false, returns: Int, args: &[Any], wrap_primitives: true);
        method!(m, "index", name: "index", receiver: PyList, runtime_fn: "index",
            needs_allocator: false, returns: Int, args: &[Any],
            wrap_primitives: true, can_fail: true);
        method!(m, "insert", name: "insert", receiver: PyList, runtime_fn: "insert",
            needs_allocator: true, returns: Void, args: &[Primitive, Any],
            wrap_primitives: true, statement: true);
        method!(m, "clear", name: "clear", receiver: PyList, runtime_fn: "clear",
            needs_allocator: true, returns: Void, args: &[], statement: true);
        method!(m, "sort", name: "sort", receiver: PyList, runtime_fn: "sort",
            needs_allocator: false, returns: Void, args: &[], statement: true);
        method!(m, "copy", name: "copy", receiver: PyList, runtime_fn: "copy",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "list.len", name: "len", receiver: PyList, runtime_fn: "len_method",
            needs_allocator: false, returns: Int, args: &[]);
        method!(m, "min", name: "min", receiver: PyList, runtime_fn: "min",
            needs_allocator: false, returns: Int, args: &[]);
        method!(m, "max", name: "max", receiver: PyList, runtime_fn: "max",
            needs_allocator: false, returns: Int, args: &[]);
        method!(m, "sum", name: "sum", receiver: PyList, runtime_fn: "sum",
            needs_allocator: false, returns: Int, args: &[]);

        // Dict methods
        method!(m, "keys", name: "keys", receiver: PyDict, runtime_fn: "keys",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "values", name: "values", receiver: PyDict, runtime_fn: "values",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "items", name: "items", receiver: PyDict, runtime_fn: "items",
            needs_allocator: true, returns: PyObject, args: &[]);
        method!(m, "dict.get", name: "get", receiver: PyDict, runtime_fn: "get_method",
            needs_allocator: true, returns: PyObjectDirect,
            args: &[ArgKind::PyObject, Any], wrap_primitives: true);
        method!(m, "dict.pop", name: "pop", receiver: PyDict, runtime_fn: "pop_method",
            needs_allocator: true, returns: PyObjectDirect, args: &[ArgKind::PyObject]);
        method!(m, "update", name: "update", receiver: PyDict, runtime_fn: "update",
            needs_allocator: false, returns: Void, args: &[ArgKind::PyObject], statement: true);
        method!(m, "dict.clear", name: "clear", receiver: PyDict, runtime_fn: "clear",
            needs_allocator: true, returns: Void, args: &[], statement: true);
        method!(m, "dict.copy", name: "copy", receiver: PyDict, runtime_fn: "copy",
            needs_allocator: true, returns: PyObject, args: &[]);

        Self { methods: m }
    }

    /// Look up a method by name, using the receiver kind for disambiguation.
    ///
    /// Tries the qualified key first (`"list.count"`), then falls back to the
    /// unqualified name for methods that need no disambiguation.
    pub fn get(&self, method_name: &str, receiver_kind: Option<&str>) -> Option<&MethodDescriptor> {
        if let Some(kind) = receiver_kind {
            let qualified = format!("{kind}.{method_name}");
            if let Some(info) = self.methods.get(qualified.as_str()) {
                return Some(info);
            }
        }
        self.methods.get(method_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(code: &str, needs_try: bool, is_dynamic: bool) -> LoweredArg {
        LoweredArg {
            code: code.to_string(),
            needs_try,
            is_dynamic,
        }
    }

    #[test]
    fn test_string_method_puts_allocator_first() {
        let registry = MethodRegistry::new();
        let upper = registry.get("upper", Some("string")).unwrap();
        let call = upper.render_call("text", &[]);
        assert_eq!(call.code, "runtime.PyString.upper(allocator, text)");
        assert!(call.needs_try);
    }

    #[test]
    fn test_list_method_puts_receiver_first() {
        let registry = MethodRegistry::new();
        let pop = registry.get("pop", Some("list")).unwrap();
        let call = pop.render_call("xs", &[]);
        assert_eq!(call.code, "runtime.PyList.pop(xs, allocator)");
        assert!(call.needs_try);
    }

    #[test]
    fn test_qualified_lookup_wins_over_unqualified() {
        let registry = MethodRegistry::new();
        let list_count = registry.get("count", Some("list")).unwrap();
        assert_eq!(list_count.receiver, RuntimeType::PyList);
        let str_count = registry.get("count", Some("string")).unwrap();
        assert_eq!(str_count.receiver, RuntimeType::PyString);
        assert_eq!(str_count.runtime_fn, "count_substr");
    }

    #[test]
    fn test_wrap_primitive_produces_slot() {
        let registry = MethodRegistry::new();
        let count = registry.get("count", Some("list")).unwrap();
        let call = count.render_call("xs", &[arg("3", false, false)]);
        assert_eq!(call.wraps.len(), 1);
        assert_eq!(call.wraps[0].value, "3");
        assert!(call.code.contains(&call.wraps[0].placeholder));
    }

    #[test]
    fn test_dynamic_argument_is_never_wrapped() {
        let registry = MethodRegistry::new();
        let count = registry.get("count", Some("list")).unwrap();
        let call = count.render_call("xs", &[arg("needle", false, true)]);
        assert!(call.wraps.is_empty());
        assert_eq!(call.code, "runtime.PyList.count(xs, needle)");
    }

    #[test]
    fn test_try_argument_is_prefixed() {
        let registry = MethodRegistry::new();
        let join = registry.get("join", Some("string")).unwrap();
        let call = join.render_call(
            "sep",
            &[arg("runtime.PyDict.keys(d, allocator)", true, false)],
        );
        assert_eq!(
            call.code,
            "runtime.PyString.join(allocator, sep, try runtime.PyDict.keys(d, allocator))"
        );
    }

    #[test]
    fn test_dict_get_returns_direct() {
        let registry = MethodRegistry::new();
        let get = registry.get("get", Some("dict")).unwrap();
        assert_eq!(get.returns, ReturnKind::PyObjectDirect);
        let call = get.render_call("d", &[arg("_key", false, true), arg("0", false, false)]);
        assert!(!call.needs_try);
        assert_eq!(call.wraps.len(), 1);
    }

    #[test]
    fn test_statement_methods_are_flagged() {
        let registry = MethodRegistry::new();
        for name in ["append", "extend", "remove", "reverse", "sort", "update"] {
            let info = registry.get(name, None).unwrap();
            assert!(info.is_statement, "{name} should be a statement method");
            assert_eq!(info.returns, ReturnKind::Void);
        }
    }
}
