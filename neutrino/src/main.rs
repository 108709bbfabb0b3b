use clap::{ArgAction, Parser as ClapParser, ValueEnum};
use log::LevelFilter;
use std::process;

use neutrino::{
    InstanceType, Lambda, Runtime, RuntimeError, RuntimeSettings, Selector, Tagged, Value,
    bytecode::CodeBuilder, format::to_display_string,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Demo {
    /// 3 + 4
    Arithmetic,
    /// "a" "b" joined
    Concat,
    /// Recursive fib dispatched on Integer
    Fib,
    /// A generator task yielding to its attacher
    Tasks,
    /// A raised condition caught by a marker
    Conditions,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Demo::Arithmetic, help = "Program to run")]
    demo: Demo,

    #[arg(long, default_value = "main", help = "Toplevel name the program is bound to")]
    entry: String,

    #[arg(long, help = "Initial semi-space size in bytes")]
    heap_size: Option<usize>,

    #[arg(long, help = "Largest semi-space size in bytes")]
    max_heap_size: Option<usize>,

    #[arg(long, help = "Words in a fresh task stack")]
    stack_height: Option<usize>,

    /// Input for the fib and conditions demos
    #[arg(long, default_value_t = 20)]
    n: i64,

    #[arg(short, long, action = ArgAction::Count, help = "Log more (-v info, -vv debug, -vvv trace)")]
    verbose: u8,
}

impl Cli {
    fn settings(&self) -> RuntimeSettings {
        let mut settings = RuntimeSettings::default();
        if let Some(size) = self.heap_size {
            settings.heap.semi_space_size = size;
            settings.heap.max_semi_space_size = settings.heap.max_semi_space_size.max(size);
        }
        if let Some(size) = self.max_heap_size {
            settings.heap.max_semi_space_size = size;
        }
        if let Some(height) = self.stack_height {
            settings.initial_stack_height = height;
        }
        settings
    }
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    let level = match verbose {
        0 => None,
        1 => Some(LevelFilter::Info),
        2 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    };
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.init();
}

fn new_selector(runtime: &mut Runtime, name: &str, argc: usize) -> Result<Tagged<Selector>, RuntimeError> {
    runtime.gc_safe(|runtime| {
        let keywords = runtime.roots().empty_tuple.cast();
        let mut factory = runtime.factory();
        let name = factory.new_string(name)?;
        factory.new_selector(name, argc, keywords, false)
    })
}

fn arithmetic(runtime: &mut Runtime) -> Result<Tagged<Lambda>, RuntimeError> {
    let mut code = CodeBuilder::new();
    code.push(Value::from_i64(3));
    code.push(Value::from_i64(4));
    code.builtin(1, 10);
    code.slap(2);
    code.return_();
    runtime.assemble(code, 0)
}

fn concat(runtime: &mut Runtime) -> Result<Tagged<Lambda>, RuntimeError> {
    let refs = runtime.refs();
    let scope = refs.enter();
    let a = scope.new_ref(runtime.gc_safe(|runtime| runtime.new_string("a"))?);
    let b = scope.new_ref(runtime.gc_safe(|runtime| runtime.new_string("b"))?);
    let mut code = CodeBuilder::new();
    code.push(a.value());
    code.push(b.value());
    code.concat(2);
    code.return_();
    runtime.assemble(code, 0)
}

fn fib(runtime: &mut Runtime, n: i64) -> Result<Tagged<Lambda>, RuntimeError> {
    let refs = runtime.refs();
    let scope = refs.enter();
    let selector = scope.new_ref(new_selector(runtime, "fib", 0)?);
    let positional = runtime.roots().empty_tuple;
    let mut body = CodeBuilder::new();
    body.argument(0);
    body.push(Value::from_i64(2));
    body.builtin(1, 15);
    body.slap(2);
    let recurse = body.if_false();
    body.argument(0);
    body.return_();
    body.bind(recurse);
    for step in [1, 2] {
        body.argument(0);
        body.push(Value::from_i64(step));
        body.builtin(1, 11);
        body.slap(2);
        body.invoke(selector.value(), 0, positional);
    }
    body.builtin(1, 10);
    body.slap(2);
    body.return_();
    let lambda = scope.new_ref(runtime.assemble(body, 0)?);
    let method = runtime.gc_safe(|runtime| {
        let integer = runtime.roots().protocol(InstanceType::SmallInteger).value();
        let mut factory = runtime.factory();
        let signature = factory.new_signature(&[integer])?;
        factory.new_method(selector.get(), signature, lambda.get())
    })?;
    let integer = runtime.roots().protocol(InstanceType::SmallInteger).value();
    runtime.add_method(integer, method)?;

    let mut main = CodeBuilder::new();
    main.push(Value::from_i64(n));
    main.invoke(selector.value(), 0, runtime.roots().empty_tuple);
    main.return_();
    runtime.assemble(main, 0)
}

fn tasks(runtime: &mut Runtime) -> Result<Tagged<Lambda>, RuntimeError> {
    let mut generator = CodeBuilder::new();
    for i in 1..3 {
        generator.push(Value::from_i64(i));
        generator.yield_();
        generator.pop(1);
    }
    generator.push(Value::from_i64(3));
    generator.return_();
    let generator = runtime.assemble(generator, 0)?;
    let mut main = CodeBuilder::new();
    main.push(generator.value());
    main.task();
    for _ in 0..3 {
        main.load_local(0);
        main.attach();
    }
    main.tuple(3);
    main.slap(1);
    main.return_();
    runtime.assemble(main, 0)
}

fn conditions(runtime: &mut Runtime, n: i64) -> Result<Tagged<Lambda>, RuntimeError> {
    let refs = runtime.refs();
    let scope = refs.enter();
    let mut handler = CodeBuilder::new();
    handler.argument(0);
    handler.push(Value::from_i64(10));
    handler.builtin(1, 12);
    handler.slap(2);
    handler.return_();
    let handler = scope.new_ref(runtime.assemble(handler, 1)?);
    let name = scope.new_ref(runtime.gc_safe(|runtime| runtime.new_string("oops"))?);
    let table = runtime.gc_safe(|runtime| {
        runtime
            .factory()
            .new_tuple_from(&[name.value(), handler.value()])
    })?;
    let mut main = CodeBuilder::new();
    main.null();
    main.mark(table.value());
    main.null();
    main.push(Value::from_i64(n));
    main.raise(name.value(), 1);
    main.slap(1);
    main.store_local(0);
    main.pop(1);
    main.unmark();
    main.return_();
    runtime.assemble(main, 0)
}

fn build(runtime: &mut Runtime, demo: Demo, n: i64) -> Result<Tagged<Lambda>, RuntimeError> {
    match demo {
        Demo::Arithmetic => arithmetic(runtime),
        Demo::Concat => concat(runtime),
        Demo::Fib => fib(runtime, n),
        Demo::Tasks => tasks(runtime),
        Demo::Conditions => conditions(runtime, n),
    }
}

fn run(cli: &Cli) -> Result<String, RuntimeError> {
    let mut runtime = Runtime::new(cli.settings())?;
    let program = build(&mut runtime, cli.demo, cli.n)?;
    runtime.define_global(&cli.entry, program.value())?;
    let result = runtime.run_entry_point(&cli.entry)?;
    let text = to_display_string(result);
    let stats = runtime.heap().stats();
    log::info!(
        "{:?} done, {} collections, {} bytes copied",
        cli.demo,
        stats.collections,
        stats.total_bytes_copied
    );
    Ok(text)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            eprintln!("Error running {:?}: {}", cli.demo, err);
            process::exit(1);
        }
    }
}
