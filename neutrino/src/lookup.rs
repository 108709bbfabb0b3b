//! Protocol-distance method dispatch.
//!
//! A method's score is the sum over its signature of the distance from
//! each argument's layout protocol up to the declared protocol. The
//! strictly lowest score wins.
use crate::{
    Layout, Method, Protocol, Roots, Selector, Signature, Tagged, Tuple, Value, ValueKind, deref,
};

/// Layout dispatch uses for any non-signal value.
pub fn layout_of(roots: &Roots, value: Value) -> Tagged<Layout> {
    match deref(value).kind() {
        ValueKind::SmallInteger(_) => roots.small_integer_layout(),
        ValueKind::Object(object) => object.layout(),
        ValueKind::Signal(signal) => panic!("dispatch on signal {signal}"),
    }
}

/// Steps from the layout's protocol up to `target`, or None if `target`
/// is not on the chain.
pub fn distance(layout: Tagged<Layout>, target: Tagged<Protocol>) -> Option<usize> {
    let mut current = layout.protocol().as_object::<Protocol>();
    let mut distance = 0;
    while let Some(protocol) = current {
        if protocol == target {
            return Some(distance);
        }
        distance += 1;
        current = protocol.super_protocol();
    }
    None
}

/// Scores a signature against actual arguments, receiver first.
///
/// Parameters that are not a Protocol accept anything and add nothing.
pub fn method_score(roots: &Roots, signature: Tagged<Signature>, arguments: &[Value]) -> Option<usize> {
    let parameters = signature.parameters();
    if parameters.len() > arguments.len() {
        return None;
    }
    let mut score = 0;
    for (&parameter, &argument) in parameters.elements().iter().zip(arguments) {
        if let Some(protocol) = parameter.as_object::<Protocol>() {
            score += distance(layout_of(roots, argument), protocol)?;
        }
    }
    Some(score)
}

/// One dispatch search.
pub struct MethodLookup {
    min_score: usize,
    score: Option<usize>,
    method: Option<Tagged<Method>>,
    ambiguous: bool,
}

impl MethodLookup {
    /// Only methods scoring at least `min_score` are candidates.
    pub fn new(min_score: usize) -> Self {
        Self {
            min_score,
            score: None,
            method: None,
            ambiguous: false,
        }
    }

    pub fn method(&self) -> Option<Tagged<Method>> {
        self.method
    }

    pub fn score(&self) -> Option<usize> {
        self.score
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    fn score_method(&mut self, roots: &Roots, method: Tagged<Method>, arguments: &[Value]) {
        let Some(score) = method_score(roots, method.signature(), arguments) else {
            return;
        };
        if score < self.min_score {
            return;
        }
        match self.score {
            Some(best) if score == best => self.ambiguous = true,
            Some(best) if score > best => {}
            _ => {
                self.score = Some(score);
                self.method = Some(method);
                self.ambiguous = false;
            }
        }
    }

    fn lookup_in_table(
        &mut self,
        roots: &Roots,
        methods: Tagged<Tuple>,
        selector: &Selector,
        arguments: &[Value],
    ) {
        for &method in methods.elements() {
            let method: Tagged<Method> = method.cast();
            if method.selector().selector_equals(selector) {
                self.score_method(roots, method, arguments);
            }
        }
    }

    /// Searches the receiver layout's own table, then every protocol on
    /// its super chain. `arguments[0]` is the receiver.
    pub fn lookup_method(&mut self, roots: &Roots, selector: Tagged<Selector>, arguments: &[Value]) {
        let layout = layout_of(roots, arguments[0]);
        self.lookup_in_table(roots, layout.methods(), &selector, arguments);
        let mut current = layout.protocol().as_object::<Protocol>();
        while let Some(protocol) = current {
            self.lookup_in_table(roots, protocol.methods(), &selector, arguments);
            current = protocol.super_protocol();
        }
    }
}

/// Finds the method an `invoke` dispatches to.
///
/// An exact tie is an invariant violation in debug builds. Release builds
/// keep the first candidate found.
pub fn lookup_method(
    roots: &Roots,
    selector: Tagged<Selector>,
    arguments: &[Value],
) -> Option<Tagged<Method>> {
    let mut lookup = MethodLookup::new(0);
    lookup.lookup_method(roots, selector, arguments);
    debug_assert!(!lookup.is_ambiguous(), "ambiguous method lookup");
    lookup.method()
}

/// Finds the next less specific method than the one with `current`.
pub fn lookup_super_method(
    roots: &Roots,
    selector: Tagged<Selector>,
    arguments: &[Value],
    current: Tagged<Signature>,
) -> Option<Tagged<Method>> {
    let previous = method_score(roots, current, arguments)?;
    let mut lookup = MethodLookup::new(previous + 1);
    lookup.lookup_method(roots, selector, arguments);
    debug_assert!(!lookup.is_ambiguous(), "ambiguous super lookup");
    lookup.method()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceType, LambdaInit, Runtime, RuntimeSettings};

    struct Fixture {
        runtime: Runtime,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                runtime: Runtime::new(RuntimeSettings::default()).unwrap(),
            }
        }

        fn protocol(&mut self, name: &str, parent: Value) -> Tagged<Protocol> {
            let mut factory = self.runtime.factory();
            let name = factory.new_string(name).unwrap();
            factory.new_protocol(name.value(), parent).unwrap()
        }

        fn selector(&mut self, name: &str, argc: usize) -> Tagged<Selector> {
            let empty = self.runtime.roots().empty_tuple.cast();
            let mut factory = self.runtime.factory();
            let name = factory.new_string(name).unwrap();
            factory.new_selector(name, argc, empty, false).unwrap()
        }

        fn method(&mut self, selector: Tagged<Selector>, parameters: &[Value]) -> Tagged<Method> {
            let roots = self.runtime.roots();
            let init = LambdaInit {
                argc: 0,
                max_stack_height: 0,
                code: roots.void,
                constant_pool: roots.void,
                outers: roots.empty_tuple,
                context: roots.empty_context,
                source: roots.null,
            };
            let mut factory = self.runtime.factory();
            let lambda = factory.new_lambda(init).unwrap();
            let signature = factory.new_signature(parameters).unwrap();
            factory.new_method(selector, signature, lambda).unwrap()
        }

        fn add(&mut self, protocol: Tagged<Protocol>, method: Tagged<Method>) {
            self.runtime.add_method(protocol.value(), method).unwrap();
        }

        fn instance_of(&mut self, protocol: Tagged<Protocol>) -> Value {
            let mut factory = self.runtime.factory();
            let layout = factory
                .new_layout(InstanceType::Instance, 0, protocol.value())
                .unwrap();
            factory.new_instance(layout).unwrap().value()
        }
    }

    #[test]
    fn distance_counts_super_steps() {
        let mut f = Fixture::new();
        let object = f.runtime.roots().object_protocol;
        let c = f.protocol("C", object);
        let b = f.protocol("B", c.value());
        let a = f.protocol("A", b.value());
        let receiver = f.instance_of(a);
        let layout = layout_of(f.runtime.roots(), receiver);
        assert_eq!(distance(layout, a), Some(0));
        assert_eq!(distance(layout, c), Some(2));
        assert_eq!(distance(layout, object.cast()), Some(3));
        let unrelated = f.protocol("D", object);
        assert_eq!(distance(layout, unrelated), None);
    }

    #[test]
    fn nearest_protocol_wins() {
        let mut f = Fixture::new();
        let object = f.runtime.roots().object_protocol;
        let c = f.protocol("C", object);
        let b = f.protocol("B", c.value());
        let a = f.protocol("A", b.value());
        let selector = f.selector("size", 0);
        let on_c = f.method(selector, &[c.value()]);
        let on_b = f.method(selector, &[b.value()]);
        f.add(c, on_c);
        f.add(b, on_b);
        let receiver = f.instance_of(a);
        let found = lookup_method(f.runtime.roots(), selector, &[receiver]);
        assert_eq!(found, Some(on_b));
        let next = lookup_super_method(f.runtime.roots(), selector, &[receiver], on_b.signature());
        assert_eq!(next, Some(on_c));
    }

    #[test]
    fn falls_back_to_general_method() {
        let mut f = Fixture::new();
        let object = f.runtime.roots().object_protocol;
        let c = f.protocol("C", object);
        let b = f.protocol("B", c.value());
        let a = f.protocol("A", b.value());
        let selector = f.selector("size", 0);
        let on_c = f.method(selector, &[c.value()]);
        f.add(c, on_c);
        let receiver = f.instance_of(a);
        assert_eq!(
            lookup_method(f.runtime.roots(), selector, &[receiver]),
            Some(on_c)
        );
    }

    #[test]
    fn unsatisfied_argument_eliminates_candidate() {
        let mut f = Fixture::new();
        let roots_object = f.runtime.roots().object_protocol;
        let integer = f.runtime.roots().protocol(InstanceType::SmallInteger);
        let string = f.runtime.roots().protocol(InstanceType::String);
        let selector = f.selector("+", 1);
        let method = f.method(selector, &[integer.value(), string.value()]);
        f.add(integer, method);
        let receiver = Value::from_i64(1);
        let roots = f.runtime.roots();
        assert_eq!(
            lookup_method(roots, selector, &[receiver, Value::from_i64(2)]),
            None
        );
        assert_eq!(method_score(roots, method.signature(), &[receiver]), None);
        assert!(roots_object.is::<Protocol>());
    }

    #[test]
    fn selector_arity_must_match() {
        let mut f = Fixture::new();
        let integer = f.runtime.roots().protocol(InstanceType::SmallInteger);
        let unary = f.selector("neg", 0);
        let binary = f.selector("neg", 1);
        let method = f.method(unary, &[integer.value()]);
        f.add(integer, method);
        let roots = f.runtime.roots();
        assert_eq!(
            lookup_method(roots, binary, &[Value::from_i64(1), Value::from_i64(2)]),
            None
        );
        assert_eq!(lookup_method(roots, unary, &[Value::from_i64(1)]), Some(method));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "ambiguous method lookup")]
    fn exact_tie_aborts() {
        let mut f = Fixture::new();
        let integer = f.runtime.roots().protocol(InstanceType::SmallInteger);
        let selector = f.selector("twice", 0);
        let first = f.method(selector, &[integer.value()]);
        let second = f.method(selector, &[integer.value()]);
        f.add(integer, first);
        f.add(integer, second);
        lookup_method(f.runtime.roots(), selector, &[Value::from_i64(1)]);
    }
}
