//! Redis-style glob matching for `MATCH` arguments of the scan family.
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^abc]` and `\` escapes.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Byte(u8),
    Class { members: Vec<u8>, negated: bool },
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile `pattern`.
    pub fn new(pattern: &[u8]) -> Self {
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < pattern.len() {
            match pattern[i] {
                b'*' => {
                    if tokens.last() != Some(&Token::Any) {
                        tokens.push(Token::Any);
                    }
                    i += 1;
                }
                b'?' => {
                    tokens.push(Token::One);
                    i += 1;
                }
                b'[' => {
                    let (token, used) = Self::class(&pattern[i + 1..]);
                    tokens.push(token);
                    i += 1 + used;
                }
                b'\\' if i + 1 < pattern.len() => {
                    tokens.push(Token::Byte(pattern[i + 1]));
                    i += 2;
                }
                byte => {
                    tokens.push(Token::Byte(byte));
                    i += 1;
                }
            }
        }

        Self { tokens }
    }

    // Parses the body of `[...]`, returning the token and the bytes consumed
    // including the closing bracket.
    fn class(body: &[u8]) -> (Token, usize) {
        let mut members = Vec::new();
        let mut i = 0;
        let negated = matches!(body.first(), Some(b'^') | Some(b'!'));
        if negated {
            i += 1;
        }

        while i < body.len() && body[i] != b']' {
            if body[i] == b'\\' && i + 1 < body.len() {
                members.push(body[i + 1]);
                i += 2;
            } else if i + 2 < body.len() && body[i + 1] == b'-' && body[i + 2] != b']' {
                let (lo, hi) = (body[i].min(body[i + 2]), body[i].max(body[i + 2]));
                members.extend(lo..=hi);
                i += 3;
            } else {
                members.push(body[i]);
                i += 1;
            }
        }

        let used = if i < body.len() { i + 1 } else { i };
        (Token::Class { members, negated }, used)
    }

    /// Whether `input` matches the whole pattern.
    pub fn matches(&self, input: &[u8]) -> bool {
        let (mut t, mut s) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while s < input.len() {
            let advanced = match self.tokens.get(t) {
                Some(Token::Any) => {
                    backtrack = Some((t, s));
                    t += 1;
                    continue;
                }
                Some(Token::One) => true,
                Some(Token::Byte(b)) => *b == input[s],
                Some(Token::Class { members, negated }) => {
                    !members.is_empty() && (members.contains(&input[s]) != *negated)
                }
                None => false,
            };

            if advanced {
                t += 1;
                s += 1;
            } else if let Some((star_t, star_s)) = backtrack {
                t = star_t + 1;
                s = star_s + 1;
                backtrack = Some((star_t, star_s + 1));
            } else {
                return false;
            }
        }

        self.tokens[t..].iter().all(|token| *token == Token::Any)
    }
}

/// One-shot match helper.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    GlobPattern::new(pattern.as_bytes()).matches(input.as_bytes())
}
