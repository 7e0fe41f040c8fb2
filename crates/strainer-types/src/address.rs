//! Minimal RFC-5322-shaped address list parsing.
//!
//! Enough structure for the `address` test: display names, angle-bracket
//! routes, quoted strings, comments and group syntax are recognised;
//! anything unparseable yields no address rather than an error, matching
//! the test's "no match" behaviour on malformed headers.

/// One mailbox address split at the rightmost unquoted `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Part left of the `@`, unquoted.
    pub local_part: String,
    /// Part right of the `@`, empty for local-only addresses.
    pub domain: String,
}

impl Address {
    /// The full `local@domain` form (or just the local part).
    #[must_use]
    pub fn full(&self) -> String {
        if self.domain.is_empty() {
            self.local_part.clone()
        } else {
            format!("{}@{}", self.local_part, self.domain)
        }
    }
}

/// Parse a comma-separated address list header value.
pub fn parse_address_list(value: &str) -> Vec<Address> {
    let mut out = Vec::new();
    for item in split_addresses(value) {
        if let Some(addr) = parse_single(&item) {
            out.push(addr);
        }
    }
    out
}

/// Split on top-level commas, honouring quotes, comments and angle
/// brackets. Group syntax (`name: a, b;`) is flattened by treating `:` and
/// `;` at top level as separators too.
fn split_addresses(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut comment_depth = 0_u32;
    let mut in_angle = false;
    let mut escaped = false;

    for ch in value.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quote => {
                current.push(ch);
                escaped = true;
            }
            '"' if comment_depth == 0 => {
                current.push(ch);
                in_quote = !in_quote;
            }
            '(' if !in_quote => comment_depth += 1,
            ')' if !in_quote && comment_depth > 0 => comment_depth -= 1,
            '<' if !in_quote && comment_depth == 0 => {
                current.push(ch);
                in_angle = true;
            }
            '>' if !in_quote && comment_depth == 0 => {
                current.push(ch);
                in_angle = false;
            }
            ',' | ':' | ';' if !in_quote && comment_depth == 0 && !in_angle => {
                if !current.trim().is_empty() {
                    items.push(current.trim().to_owned());
                }
                current.clear();
            }
            _ if comment_depth > 0 => {}
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_owned());
    }
    items
}

fn parse_single(item: &str) -> Option<Address> {
    // Prefer the angle-bracket route when present.
    let spec = if let Some(open) = item.rfind('<') {
        let close = item[open..].find('>').map(|i| open + i)?;
        &item[open + 1..close]
    } else {
        item
    };
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }

    // Rightmost unquoted '@' splits local from domain.
    let mut in_quote = false;
    let mut split_at = None;
    for (i, ch) in spec.char_indices() {
        match ch {
            '"' => in_quote = !in_quote,
            '@' if !in_quote => split_at = Some(i),
            _ => {}
        }
    }

    match split_at {
        Some(at) => {
            let local = unquote(&spec[..at]);
            let domain = spec[at + 1..].trim().to_owned();
            if local.is_empty() {
                None
            } else {
                Some(Address {
                    local_part: local,
                    domain,
                })
            }
        }
        None => {
            let local = unquote(spec);
            if local.is_empty() || local.contains(char::is_whitespace) {
                None
            } else {
                Some(Address {
                    local_part: local,
                    domain: String::new(),
                })
            }
        }
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let mut out = String::with_capacity(s.len() - 2);
        let mut escaped = false;
        for ch in s[1..s.len() - 1].chars() {
            if escaped {
                out.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else {
                out.push(ch);
            }
        }
        out
    } else {
        s.to_owned()
    }
}
