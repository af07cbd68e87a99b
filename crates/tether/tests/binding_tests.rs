//! End-to-end binding tests across the facade: expression text in, live
//! observer out, data mutations flowing back through the whole stack.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tether::{
    ArrayRef, Context, Formatter, FormatterRegistry, ObjectRef, SetError, Value, compile, parse,
};

fn model(pairs: &[(&str, Value)]) -> ObjectRef {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn registry() -> FormatterRegistry {
    FormatterRegistry::builtin()
        .with(
            "double",
            Formatter::pair(
                |v, _| Value::Number(v.coerce_number() * 2.0),
                |v, _| Value::Number(v.coerce_number() / 2.0),
            ),
        )
        .with(
            "prefix",
            Formatter::pull(|v, args| {
                let prefix = args
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                Value::str(format!("{prefix}{v}"))
            }),
        )
}

#[test]
fn double_round_trip() {
    let m = model(&[("value", Value::from(3))]);
    let ctx = Context::new(Value::from(m.clone())).unwrap();
    let observer = compile(&parse("value | double").unwrap(), &ctx, &registry()).unwrap();

    assert_eq!(observer.get(), Value::from(6));
    observer.set(Value::from(10)).unwrap();
    assert_eq!(m.get("value"), Value::from(5));
}

#[test]
fn nested_path_binding_survives_intermediate_swap() {
    let user = model(&[("name", Value::str("ada"))]);
    let m = model(&[("user", Value::from(user))]);
    let ctx = Context::new(Value::from(m.clone())).unwrap();
    let observer = compile(
        &parse("user.name | prefix 'dr. '").unwrap(),
        &ctx,
        &registry(),
    )
    .unwrap();
    assert_eq!(observer.get(), Value::str("dr. ada"));

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    observer.notify(Rc::new(move |new: &Value, _| {
        s.borrow_mut().push(new.clone());
    }));

    m.set("user", Value::from(model(&[("name", Value::str("grace"))])));
    assert_eq!(
        seen.borrow().last().cloned(),
        Some(Value::str("dr. grace"))
    );
}

#[test]
fn literal_and_builtin_formatters() {
    let m = model(&[("missing", Value::Undefined)]);
    let ctx = Context::new(Value::from(m)).unwrap();

    let fallback = compile(
        &parse("missing | default 'n/a'").unwrap(),
        &ctx,
        &registry(),
    )
    .unwrap();
    assert_eq!(fallback.get(), Value::str("n/a"));

    let constant = compile(&parse("42 | double").unwrap(), &ctx, &registry()).unwrap();
    assert_eq!(constant.get(), Value::from(84));
    assert_eq!(
        constant.set(Value::from(1)).unwrap_err(),
        SetError::ReadOnlyTarget
    );
}

#[test]
fn list_length_binding_tracks_mutations() {
    let items = ArrayRef::from_vec(vec![Value::str("a")]);
    let m = model(&[("items", Value::from(items.clone()))]);
    let ctx = Context::new(Value::from(m)).unwrap();
    let observer = compile(&parse("items | length").unwrap(), &ctx, &registry()).unwrap();
    assert_eq!(observer.get(), Value::from(1));

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    observer.notify(Rc::new(move |new: &Value, _| {
        s.borrow_mut().push(new.clone());
    }));

    items.push(Value::str("b"));
    items.splice(0, 0, vec![Value::str("c"), Value::str("d")]);
    assert_eq!(
        *seen.borrow(),
        vec![Value::from(2), Value::from(4)]
    );
}

#[test]
fn watch_clause_drives_reevaluation() {
    let m = model(&[
        ("greeting", Value::str("hello")),
        ("locale", Value::str("en")),
    ]);
    let ctx = Context::new(Value::from(m.clone())).unwrap();
    let observer = compile(
        &parse("greeting < locale").unwrap(),
        &ctx,
        &registry(),
    )
    .unwrap();

    let count = Rc::new(Cell::new(0u32));
    let c = Rc::clone(&count);
    observer.notify(Rc::new(move |_, _| c.set(c.get() + 1)));

    m.set("locale", Value::str("fr"));
    m.set("greeting", Value::str("bonjour"));
    assert_eq!(count.get(), 2);
}

#[test]
fn context_stop_gates_the_whole_binding() {
    let m = model(&[("n", Value::from(1))]);
    let ctx = Context::new(Value::from(m.clone())).unwrap();
    let observer = compile(&parse("n | double").unwrap(), &ctx, &registry()).unwrap();

    let seen: Rc<RefCell<Vec<(Value, Value)>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    observer.notify(Rc::new(move |new: &Value, old: &Value| {
        s.borrow_mut().push((new.clone(), old.clone()));
    }));

    ctx.stop();
    m.set("n", Value::from(2));
    assert!(seen.borrow().is_empty());

    ctx.start();
    m.set("n", Value::from(3));
    assert_eq!(seen.borrow().len(), 1);
    let (new, _old) = seen.borrow()[0].clone();
    assert_eq!(new, Value::from(6));
}

#[test]
fn view_locals_bind_alongside_the_shared_model() {
    let m = model(&[("label", Value::str("row"))]);
    let ctx = Context::with_locals(
        Value::from(m.clone()),
        [("index".to_string(), Value::from(0))],
    )
    .unwrap();

    let observer = compile(
        &parse("label | prefix index").unwrap(),
        &ctx,
        &registry(),
    )
    .unwrap();
    assert_eq!(observer.get(), Value::str("0row"));

    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    observer.notify(Rc::new(move |new: &Value, _| {
        s.borrow_mut().push(new.clone());
    }));

    // A local change re-evaluates, and the shared model never learns of
    // the local.
    ctx.assign(
        &tether::PathDescriptor::parse("index"),
        Value::from(3),
    )
    .unwrap();
    assert_eq!(seen.borrow().last().cloned(), Some(Value::str("3row")));
    assert_eq!(m.get("index"), Value::Undefined);
}

#[test]
fn unresolved_formatter_is_a_compile_failure() {
    let ctx = Context::new(Value::from(model(&[]))).unwrap();
    assert!(compile(&parse("x | ghost").unwrap(), &ctx, &registry()).is_err());
}
