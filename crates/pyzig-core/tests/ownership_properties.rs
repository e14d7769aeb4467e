//! Ownership-balance and determinism properties, checked by a conservative
//! static scan over the generated text.

use proptest::prelude::*;
use regex::Regex;

use pyzig_core::ZigPipeline;

fn transpile(source: &str) -> String {
    ZigPipeline::new()
        .with_cache(false)
        .transpile(source)
        .expect("transpilation should succeed")
}

/// Every binding created from an owning runtime call must have a matching
/// decrement somewhere in the same unit; borrowed bindings must not.
fn assert_ownership_balanced(zig: &str) {
    let creates = Regex::new(
        r"const (\w+) = try runtime\.Py(?:Int|String|List|Tuple|Dict)\.(?:create|fromInt|fromSlice|concat|upper|lower|strip|copy|slice)\(",
    )
    .unwrap();
    for capture in creates.captures_iter(zig) {
        let name = &capture[1];
        assert!(
            zig.contains(&format!("decref({name}, allocator)"))
                || zig.contains(&format!("return {name};")),
            "owned binding {name} has no paired decrement:\n{zig}"
        );
    }

    let borrows = Regex::new(r"const (\w+) = try runtime\.Py(?:List|Tuple)\.getItem\(").unwrap();
    for capture in borrows.captures_iter(zig) {
        let name = &capture[1];
        assert!(
            !zig.contains(&format!("decref({name}, allocator)")),
            "borrowed binding {name} must not be decremented:\n{zig}"
        );
    }
}

#[test]
fn ownership_balance_on_representative_programs() {
    let programs = [
        "a = \"hello\"\nb = \" \"\nc = \"world\"\nprint(a + b + c)\n",
        "xs = [1, 2, 3]\nprint(xs[1])\nxs.append(4)\nprint(xs)\n",
        "d = {\"name\": \"Alice\", \"age\": 30}\nprint(d[\"name\"])\nprint(d[\"age\"])\n",
        "s = \"MiXeD\"\nt = s.upper().lower()\nprint(t)\n",
        "xs = [1, 2, 3]\ntotal = sum(xs)\nprint(total)\n",
        "xs = [1, 2, 3, 4]\nevens = [x for x in xs if x % 2 == 0]\nprint(evens)\n",
    ];
    for program in programs {
        let zig = transpile(program);
        assert_ownership_balanced(&zig);
    }
}

#[test]
fn multiple_handlers_form_an_if_else_chain() {
    let zig = transpile(
        "xs = [1]\ntry:\n    print(xs[5])\nexcept IndexError:\n    print(\"a\")\nexcept ValueError:\n    print(\"b\")\n",
    );
    assert!(zig.contains("if (err == error.IndexError) {"));
    assert!(zig.contains("} else if (err == error.ValueError) {"));
    // Both handlers leave the labeled block
    assert_eq!(zig.matches("break :_try_catch_").count(), 2);
    // Unmatched errors re-propagate
    assert!(zig.contains("return err;"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A list literal of n primitives produces exactly n boxed appends.
    #[test]
    fn list_literal_appends_every_element(values in proptest::collection::vec(0i64..1000, 1..8)) {
        let literal = values
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let source = format!("xs = [{literal}]\nprint(xs)\n");
        let zig = transpile(&source);

        prop_assert_eq!(
            zig.matches("try runtime.PyList.append(xs, ").count(),
            values.len()
        );
        // Element temporaries balance: one boxing and one release each
        prop_assert_eq!(
            zig.matches("= try runtime.PyInt.create(allocator, ").count(),
            values.len()
        );
        prop_assert_eq!(
            zig.matches("runtime.decref(_temp_elem_").count(),
            values.len()
        );
    }

    /// Generation is deterministic: two runs produce byte-identical text.
    #[test]
    fn generation_is_deterministic(
        a in 0i64..100,
        b in 0i64..100,
        word in "[a-z]{1,8}",
    ) {
        let source = format!(
            "x = {a} + {b}\ns = \"{word}\"\nxs = [{a}, {b}]\nprint(s)\nprint(xs[0])\nprint(x)\n"
        );
        let first = transpile(&source);
        let second = transpile(&source);
        prop_assert_eq!(first, second);
    }

    /// A name assigned once is immutable; assigned twice it becomes `var`.
    #[test]
    fn reassignment_selects_binding_keyword(n in 1usize..4) {
        let mut source = String::new();
        for i in 0..n {
            source.push_str(&format!("x = {i}\n"));
        }
        source.push_str("print(x)\n");
        let zig = transpile(&source);
        if n == 1 {
            prop_assert!(zig.contains("const x = 0;"));
        } else {
            prop_assert!(zig.contains("var x: i64 = 0;"));
            prop_assert_eq!(zig.matches("\n    x = ").count(), n - 1);
        }
    }

    /// zip always bounds the loop by the minimum length of its inputs.
    #[test]
    fn zip_bounds_by_min(
        a in proptest::collection::vec(0i64..10, 1..5),
        b in proptest::collection::vec(0i64..10, 1..5),
    ) {
        let fmt = |v: &[i64]| v.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
        let source = format!(
            "a = [{}]\nb = [{}]\nfor x, y in zip(a, b):\n    print(x)\n",
            fmt(&a),
            fmt(&b)
        );
        let zig = transpile(&source);
        prop_assert!(zig.contains("@min(runtime.PyList.len(a), runtime.PyList.len(b))"));
    }
}
