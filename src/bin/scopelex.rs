use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use scopelex::{Registry, Scope, Token, normalize_string};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "scopelex")]
#[command(about = "Tokenizes a file with TextMate grammars and prints the scopes of every token")]
struct Args {
    /// Grammar JSON file, can be repeated to make included grammars available
    #[arg(short, long = "grammar", value_name = "FILE", required = true)]
    grammars: Vec<PathBuf>,

    /// Name or scope name of the grammar to tokenize with, the first grammar by default
    #[arg(short, long)]
    lang: Option<String>,

    /// Print the tokens as JSON
    #[arg(long)]
    json: bool,

    /// File to tokenize, stdin if missing
    input: Option<PathBuf>,
}

#[derive(Serialize)]
struct JsonToken<'a> {
    line: usize,
    start: usize,
    end: usize,
    text: &'a str,
    scopes: &'a [Scope],
}

fn read_input(input: Option<&PathBuf>) -> io::Result<String> {
    match input {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut content = String::new();
            io::stdin().read_to_string(&mut content)?;
            Ok(content)
        }
    }
}

fn print_text(lines: &[&str], tokens: &[Vec<Token>]) {
    for (line_no, (line, line_tokens)) in lines.iter().zip(tokens).enumerate() {
        for token in line_tokens {
            println!(
                "{}: [{}..{}] '{}'",
                line_no + 1,
                token.span.start,
                token.span.end,
                &line[token.span.clone()]
            );
            for scope in &token.scopes {
                println!("  - {scope}");
            }
        }
    }
}

fn print_json(lines: &[&str], tokens: &[Vec<Token>]) -> Result<(), serde_json::Error> {
    let mut out = Vec::new();
    for (line_no, (line, line_tokens)) in lines.iter().zip(tokens).enumerate() {
        for token in line_tokens {
            out.push(JsonToken {
                line: line_no + 1,
                start: token.span.start,
                end: token.span.end,
                text: &line[token.span.clone()],
                scopes: &token.scopes,
            });
        }
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut registry = Registry::default();
    let mut first_grammar = None;
    for path in &args.grammars {
        let grammar_id = registry.add_grammar_from_path(path)?;
        log::info!("Loaded grammar {}", path.display());
        first_grammar.get_or_insert(grammar_id);
    }

    let lang = match (args.lang, first_grammar) {
        (Some(lang), _) => lang,
        (None, Some(grammar_id)) => registry.grammar(grammar_id).name.clone(),
        (None, None) => return Err("no grammar given".into()),
    };

    let content = normalize_string(&read_input(args.input.as_ref())?);
    let tokens = registry.tokenize(&lang, &content)?;
    let lines: Vec<&str> = content.split('\n').collect();

    if args.json {
        print_json(&lines, &tokens)?;
    } else {
        print_text(&lines, &tokens);
    }

    Ok(())
}
