//! Import discovery that does not need a valid program.
//!
//! The executor checks imports before parsing, so an action that reaches
//! for a blocked module is reported as a security violation even when the
//! rest of it is not valid action code (`import os, sys`, `from os import *`,
//! a `try:` block further down).

use super::lexer::{Kw, Tok, tokenize};
use super::parser::dedent;

/// Every module named by an `import` or `from ... import` statement, in
/// source order.
///
/// Works on the token stream when the source tokenizes, and falls back to a
/// line scan when it does not.
pub fn scan_imports(source: &str) -> Vec<String> {
    let source = dedent(source);
    match tokenize(&source) {
        Ok(tokens) => {
            let toks: Vec<Tok> = tokens.into_iter().map(|t| t.tok).collect();
            from_tokens(&toks)
        }
        Err(_) => from_lines(&source),
    }
}

fn from_tokens(toks: &[Tok]) -> Vec<String> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        match toks[i] {
            Tok::Kw(Kw::From) => {
                let (module, next) = dotted(toks, i + 1);
                found.extend(module);
                i = next;
                // The imported names are plain identifiers; step over the
                // keyword so it is not read as a second statement.
                if matches!(toks.get(i), Some(Tok::Kw(Kw::Import))) {
                    i += 1;
                }
            }
            Tok::Kw(Kw::Import) => {
                i += 1;
                loop {
                    let (module, next) = dotted(toks, i);
                    let Some(module) = module else { break };
                    found.push(module);
                    i = next;
                    if matches!(toks.get(i), Some(Tok::Kw(Kw::As))) {
                        i += 2;
                    }
                    if !matches!(toks.get(i), Some(Tok::Comma)) {
                        break;
                    }
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    found
}

fn dotted(toks: &[Tok], mut i: usize) -> (Option<String>, usize) {
    let mut name = match toks.get(i) {
        Some(Tok::Ident(first)) => first.clone(),
        _ => return (None, i),
    };
    i += 1;
    while let (Some(Tok::Dot), Some(Tok::Ident(part))) = (toks.get(i), toks.get(i + 1)) {
        name.push('.');
        name.push_str(part);
        i += 2;
    }
    (Some(name), i)
}

fn from_lines(source: &str) -> Vec<String> {
    let mut found = Vec::new();
    for statement in source.lines().flat_map(|line| line.split(';')) {
        let statement = statement.split('#').next().unwrap_or_default().trim();
        let statement = statement
            .rsplit_once(':')
            .filter(|(head, _)| ["if ", "elif ", "else", "for ", "while "].iter().any(|k| head.starts_with(k)))
            .map_or(statement, |(_, tail)| tail.trim());
        if let Some(rest) = statement.strip_prefix("import ") {
            found.extend(
                rest.split(',')
                    .filter_map(|part| part.split_whitespace().next())
                    .map(|m| m.trim_matches(['(', ')']).to_string())
                    .filter(|m| !m.is_empty()),
            );
        } else if let Some(rest) = statement.strip_prefix("from ") {
            found.extend(rest.split_whitespace().next().map(str::to_string));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_imports_the_parser_rejects() {
        assert_eq!(scan_imports("import os, sys"), vec!["os", "sys"]);
        assert_eq!(scan_imports("import os.path as p, json"), vec!["os.path", "json"]);
        assert_eq!(scan_imports("from os import *"), vec!["os"]);
        assert_eq!(
            scan_imports("import subprocess\ntry:\n    subprocess.run('ls')\nexcept Exception:\n    pass"),
            vec!["subprocess"]
        );
    }

    #[test]
    fn from_import_names_are_not_modules() {
        assert_eq!(scan_imports("from math import sqrt, floor as f"), vec!["math"]);
        assert_eq!(scan_imports("from text import (upper,\n  lower)"), vec!["text"]);
    }

    #[test]
    fn nested_and_inline_imports_are_found() {
        let source = "def load():\n    import socket\n    return 1\nif True: import shutil";
        assert_eq!(scan_imports(source), vec!["socket", "shutil"]);
    }

    #[test]
    fn import_inside_a_string_is_ignored() {
        assert!(scan_imports("print('import os')").is_empty());
    }

    #[test]
    fn falls_back_to_lines_when_the_source_does_not_tokenize() {
        let source = "import os\nwith open('f) as f:\n    pass";
        assert_eq!(scan_imports(source), vec!["os"]);
        assert_eq!(scan_imports("x = 'open\nimport a, b # c"), vec!["a", "b"]);
    }
}
