use criterion::{Criterion, criterion_group, criterion_main};
use scopelex::{Registry, TokenizerOptions};

const SAMPLE: &str = r#"#= Computes the first n Fibonacci numbers
   #= the naive way =#
=#
function fib(n::Int)
    xs = zeros(Int, n)
    xs[1] = 1
    for i in 3:n
        xs[i] = xs[i - 1] + xs[i - 2] # sum
    end
    println("fib($n) = $(xs[end])")
    @assert length(xs) == n
    return xs
end

doc = """
Multi-line docstring with $(interpolation)
"""
re = r"[a-z]+\d*"
"#;

fn julia_registry() -> Registry {
    let mut registry = Registry::default();
    for file in ["julia.json", "julia-console.json"] {
        registry
            .add_grammar_from_path(format!("src/fixtures/grammars/{file}"))
            .expect("Failed to load fixture grammar");
    }
    registry
}

fn tokenize_julia_benchmark(c: &mut Criterion) {
    let registry = julia_registry();
    let content = SAMPLE.repeat(20);

    c.bench_function("tokenize julia sample", |b| {
        b.iter(|| {
            let result = registry.tokenize("julia", &content).unwrap();
            std::hint::black_box(result);
        })
    });
}

fn tokenize_line_by_line_benchmark(c: &mut Criterion) {
    let registry = julia_registry();

    c.bench_function("tokenize julia sample line by line", |b| {
        b.iter(|| {
            // a single tokenizer keeps its pattern sets from one line to the next
            let mut tokenizer = registry
                .tokenizer("julia")
                .unwrap()
                .with_options(TokenizerOptions::default().max_steps_per_line(1_000));
            let mut stack = tokenizer.initial_stack();
            for line in SAMPLE.lines() {
                let result = tokenizer.tokenize_line(line, stack).unwrap();
                stack = result.stack;
                std::hint::black_box(result.tokens);
            }
        })
    });
}

criterion_group!(benches, tokenize_julia_benchmark, tokenize_line_by_line_benchmark);
criterion_main!(benches);
