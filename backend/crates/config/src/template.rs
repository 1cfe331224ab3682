/// The only named parameter a source query may use.
pub const LAST_SYNC_TIME: &str = "last_sync_time";

/// A source query with its `:name` parameters rewritten to positional `?`
/// placeholders. `params` lists the names in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    pub sql: String,
    pub params: Vec<String>,
}

impl QueryTemplate {
    /// Scan the template; `:name` inside quotes, `::` casts and `a:b` are
    /// left untouched.
    pub fn parse(template: &str) -> Self {
        let chars: Vec<char> = template.chars().collect();
        let mut sql = String::with_capacity(template.len());
        let mut params = Vec::new();
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if let Some(q) = quote {
                sql.push(c);
                if c == '\\' && q != '`' {
                    if let Some(&next) = chars.get(i + 1) {
                        sql.push(next);
                        i += 1;
                    }
                } else if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }

            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    sql.push(c);
                    i += 1;
                }
                ':' if chars.get(i + 1) == Some(&':') => {
                    sql.push_str("::");
                    i += 2;
                }
                ':' if starts_param(&chars, i) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident(chars[end]) {
                        end += 1;
                    }
                    params.push(chars[start..end].iter().collect());
                    sql.push('?');
                    i = end;
                }
                _ => {
                    sql.push(c);
                    i += 1;
                }
            }
        }

        Self { sql, params }
    }

    /// Parameter names other than `last_sync_time`, deduplicated.
    pub fn unsupported_params(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for p in &self.params {
            if p != LAST_SYNC_TIME && !out.contains(&p.as_str()) {
                out.push(p);
            }
        }
        out
    }
}

fn starts_param(chars: &[char], colon: usize) -> bool {
    let follows_word = colon > 0 && is_ident(chars[colon - 1]);
    let next_is_start = chars
        .get(colon + 1)
        .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_');
    !follows_word && next_is_start
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
