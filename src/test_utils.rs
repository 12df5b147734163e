use crate::Registry;
use crate::tokenizer::Token;

pub(crate) const FIXTURES: &str = "src/fixtures/grammars";

pub(crate) fn get_registry() -> Registry {
    let mut registry = Registry::default();
    for file in ["julia.json", "julia-console.json"] {
        registry
            .add_grammar_from_path(format!("{FIXTURES}/{file}"))
            .unwrap();
    }
    registry
}

/// One `'text' scope scope...` entry per token, easy to compare in assertions
pub(crate) fn line_tokens(line: &str, tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| {
            let scopes: Vec<_> = t.scopes.iter().map(|s| s.build_string()).collect();
            format!("'{}' {}", &line[t.span.clone()], scopes.join(" "))
        })
        .collect()
}

/// Same format as the CLI: the span and text of each token followed by its scopes
pub(crate) fn format_tokens(text: &str, lines: &[Vec<Token>]) -> String {
    let mut out = String::new();

    for (line_no, (line, tokens)) in text.split('\n').zip(lines).enumerate() {
        for token in tokens {
            out.push_str(&format!(
                "{}: [{}..{}] '{}'\n",
                line_no + 1,
                token.span.start,
                token.span.end,
                &line[token.span.clone()]
            ));
            for scope in &token.scopes {
                out.push_str(&format!("  - {scope}\n"));
            }
        }
    }

    out
}
