use rustpython_vm::{
    AsObject, PyObjectRef, PyResult, VirtualMachine,
    builtins::{PyDict, PyFloat, PyInt, PyList, PyStr, PyTuple},
};
use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 256;

/// Renders a JSON value as an equivalent Python literal
pub(super) fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        // Exact digits, big integers included
        Value::Number(n) => n.to_string(),
        // JSON string escapes are valid Python escapes
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, item)| {
                    format!("{}: {}", Value::String(key.clone()), python_literal(item))
                })
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// List display holding the positional arguments of one call
pub(super) fn argument_list(args: &[Value]) -> String {
    let args: Vec<String> = args.iter().map(python_literal).collect();
    format!("[{}]", args.join(", "))
}

/// Reads a Python value into JSON straight from the object payloads.
///
/// No Python code runs during the conversion, so user-defined `__repr__`,
/// `__iter__` or patched builtins cannot influence the result. Dict keys must
/// be strings; anything outside None, bool, int, float, str, list, tuple and
/// dict raises `TypeError`.
pub(super) fn to_json(vm: &VirtualMachine, obj: &PyObjectRef) -> PyResult<Value> {
    convert(vm, obj, 0)
}

fn convert(vm: &VirtualMachine, obj: &PyObjectRef, depth: usize) -> PyResult<Value> {
    if depth > MAX_DEPTH {
        return Err(vm.new_value_error("returned value is nested too deeply".to_owned()));
    }
    if vm.is_none(obj) {
        return Ok(Value::Null);
    }
    // bool shares the int payload
    if obj.class().is(vm.ctx.types.bool_type) {
        return Ok(Value::Bool(obj.is(&vm.ctx.true_value)));
    }
    if let Some(int) = obj.downcast_ref::<PyInt>() {
        return int
            .as_bigint()
            .to_string()
            .parse::<Number>()
            .map(Value::Number)
            .map_err(|e| vm.new_value_error(format!("integer could not be read: {e}")));
    }
    if let Some(float) = obj.downcast_ref::<PyFloat>() {
        return Ok(float_value(float.to_f64()));
    }
    if let Some(text) = obj.downcast_ref::<PyStr>() {
        return Ok(Value::String(text.as_str().to_owned()));
    }
    if let Some(list) = obj.downcast_ref::<PyList>() {
        let items = list.borrow_vec().to_vec();
        return sequence(vm, &items, depth);
    }
    if let Some(tuple) = obj.downcast_ref::<PyTuple>() {
        return sequence(vm, tuple.as_slice(), depth);
    }
    if let Some(dict) = obj.downcast_ref::<PyDict>() {
        let mut map = Map::new();
        for (key, item) in dict {
            let Some(key) = key.downcast_ref::<PyStr>() else {
                return Err(vm.new_type_error(format!(
                    "cannot compare dict with key of type {}, keys must be str",
                    &*key.class().name()
                )));
            };
            map.insert(key.as_str().to_owned(), convert(vm, &item, depth + 1)?);
        }
        return Ok(Value::Object(map));
    }

    Err(vm.new_type_error(format!(
        "cannot compare value of type {}",
        &*obj.class().name()
    )))
}

fn sequence(vm: &VirtualMachine, items: &[PyObjectRef], depth: usize) -> PyResult<Value> {
    items
        .iter()
        .map(|item| convert(vm, item, depth + 1))
        .collect::<PyResult<Vec<_>>>()
        .map(Value::Array)
}

/// Finite floats stay numbers; nan and the infinities become their repr
fn float_value(value: f64) -> Value {
    match Number::from_f64(value) {
        Some(n) => Value::Number(n),
        None if value.is_nan() => Value::String("nan".to_string()),
        None if value > 0.0 => Value::String("inf".to_string()),
        None => Value::String("-inf".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rustpython_vm::{Interpreter, Settings, compiler::Mode};
    use serde_json::json;

    /// Evaluates `expression` in a bare interpreter and converts the result
    fn evaluate(expression: &str) -> Result<Value, String> {
        Interpreter::without_stdlib(Settings::default()).enter(|vm| {
            let scope = vm.new_scope_with_builtins();
            let code = vm
                .compile(expression, Mode::Eval, "<test>".to_owned())
                .unwrap();
            let obj = vm.run_code_obj(code, scope).unwrap();
            to_json(vm, &obj).map_err(|exc| {
                let mut trace = String::new();
                let _ = vm.write_exception(&mut trace, &exc);
                trace
            })
        })
    }

    #[test]
    fn test_primitives() {
        assert_eq!(python_literal(&json!(null)), "None");
        assert_eq!(python_literal(&json!(true)), "True");
        assert_eq!(python_literal(&json!(false)), "False");
        assert_eq!(python_literal(&json!(-12)), "-12");
        assert_eq!(python_literal(&json!(1.5)), "1.5");
        assert_eq!(python_literal(&json!("a\"b\n")), r#""a\"b\n""#);
    }

    #[test]
    fn test_nested() {
        let value = json!({"xs": [1, null, [true], {}]});
        assert_eq!(python_literal(&value), r#"{"xs": [1, None, [True], {}]}"#);
    }

    #[test]
    fn test_big_integer_literal_keeps_digits() {
        let value: Value = serde_json::from_str("1180591620717411303424").unwrap();
        assert_eq!(python_literal(&value), "1180591620717411303424");
    }

    #[test]
    fn test_argument_list() {
        assert_eq!(argument_list(&[json!(1), json!([2, 3])]), "[1, [2, 3]]");
        assert_eq!(argument_list(&[]), "[]");
    }

    #[test]
    fn test_converts_supported_values() {
        assert_eq!(evaluate("None").unwrap(), json!(null));
        assert_eq!(evaluate("True").unwrap(), json!(true));
        assert_eq!(evaluate("-7").unwrap(), json!(-7));
        assert_eq!(evaluate("2.0").unwrap(), json!(2.0));
        assert_eq!(evaluate("'hi'").unwrap(), json!("hi"));
        assert_eq!(
            evaluate("{'a': [1, (2, 3)], 'b': {'c': None}}").unwrap(),
            json!({"a": [1, [2, 3]], "b": {"c": null}})
        );
        assert_eq!(evaluate("float('nan')").unwrap(), json!("nan"));
        assert_eq!(evaluate("-float('inf')").unwrap(), json!("-inf"));
    }

    #[test]
    fn test_big_integers_are_exact() {
        let value = evaluate("2**70 + 1").unwrap();
        assert_eq!(value.to_string(), "1180591620717411303425");
        assert!(!value.as_number().unwrap().is_f64());
    }

    #[test]
    fn test_bool_is_not_int() {
        assert_eq!(evaluate("[True, 1]").unwrap(), json!([true, 1]));
    }

    #[test]
    fn test_non_string_keys_are_rejected() {
        let error = evaluate("{1: 'a'}").unwrap_err();
        assert!(error.contains("TypeError"), "{error}");
        assert!(evaluate("{1: 'x', '1': 'y'}").is_err());
    }

    #[test]
    fn test_unsupported_types_are_rejected() {
        let error = evaluate("object()").unwrap_err();
        assert!(error.contains("TypeError"), "{error}");
        assert!(evaluate("{1, 2}").is_err());
    }
}
