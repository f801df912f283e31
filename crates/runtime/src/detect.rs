//! Unit-name detection and source normalization for WebAssembly text.
//!
//! Detection order:
//! 1. the module identifier, `(module $Name ...)`
//! 2. the first function identifier, `(func $name ...)`
//! 3. the caller-supplied fallback
//!
//! Normalization strips the module identifier so the compiled unit is
//! anonymous; the cache key carries the name instead.

/// Result of inspecting a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub unit_name: String,
    pub normalized: String,
}

/// Detect the unit name and normalize the source in one pass.
pub fn prepare(source: &str, fallback: &str) -> PreparedSource {
    let tokens = tokenize(source);
    let module_id = declared_id(&tokens, "module");

    let unit_name = module_id
        .map(|t| t.text)
        .or_else(|| declared_id(&tokens, "func").map(|t| t.text))
        .map(|id| id.trim_start_matches('$').to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| fallback.to_string());

    let normalized = match module_id {
        Some(t) => {
            let mut out = String::with_capacity(source.len());
            out.push_str(&source[..t.offset]);
            out.push_str(&source[t.offset + t.text.len()..]);
            out
        }
        None => source.to_string(),
    };

    PreparedSource {
        unit_name,
        normalized,
    }
}

pub fn detect_unit_name(source: &str, fallback: &str) -> String {
    prepare(source, fallback).unit_name
}

pub fn normalize(source: &str) -> String {
    prepare(source, "").normalized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token<'a> {
    offset: usize,
    text: &'a str,
}

/// `( keyword $id` at any depth; first match wins.
fn declared_id<'a>(tokens: &[Token<'a>], keyword: &str) -> Option<Token<'a>> {
    tokens.windows(3).find_map(|w| {
        (w[0].text == "(" && w[1].text == keyword && w[2].text.starts_with('$')).then_some(w[2])
    })
}

/// Split into parens and atoms, skipping whitespace, comments and strings.
fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b';' if bytes.get(i + 1) == Some(&b';') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' if bytes.get(i + 1) == Some(&b';') => {
                // Block comments nest.
                let mut depth = 0usize;
                while i < bytes.len() {
                    if bytes[i] == b'(' && bytes.get(i + 1) == Some(&b';') {
                        depth += 1;
                        i += 2;
                    } else if bytes[i] == b';' && bytes.get(i + 1) == Some(&b')') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
            b'(' | b')' => {
                tokens.push(Token {
                    offset: i,
                    text: &source[i..i + 1],
                });
                i += 1;
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'(' | b')' | b'"')
                    && !(bytes[i] == b';' && bytes.get(i + 1) == Some(&b';'))
                {
                    i += 1;
                }
                tokens.push(Token {
                    offset: start,
                    text: &source[start..i],
                });
            }
        }
    }

    tokens
}
