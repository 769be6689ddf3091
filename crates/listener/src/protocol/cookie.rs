//! Request `Cookie` parsing and response `Set-Cookie` formatting.

use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub port: Option<String>,
    pub version: u32,
    pub max_age: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self { name: name.into(), value: value.into(), ..Self::default() }
    }

    /// Parses the value of a request `Cookie` header.
    ///
    /// Both `;` and `,` separate cookies. `$Version` applies to the cookies that follow it,
    /// `$Path`, `$Domain` and `$Port` apply to the cookie that precedes them.
    pub fn parse_header(value: &str) -> Vec<Cookie> {
        let mut cookies = Vec::new();
        let mut current: Option<Cookie> = None;
        let mut version = 0;

        for item in value.split([',', ';']).map(str::trim).filter(|item| !item.is_empty()) {
            if let Some(attribute) = item.strip_prefix('$') {
                let (key, attribute_value) = split_pair(attribute);
                let attribute_value = unquote(attribute_value);
                match key {
                    "Version" => version = attribute_value.parse().unwrap_or(0),
                    "Path" => set_attribute(&mut current, |c| c.path = Some(attribute_value.to_string())),
                    "Domain" => set_attribute(&mut current, |c| c.domain = Some(attribute_value.to_string())),
                    "Port" => set_attribute(&mut current, |c| c.port = Some(attribute_value.to_string())),
                    _ => {}
                }
                continue;
            }

            if let Some(cookie) = current.take() {
                cookies.push(cookie);
            }
            let (name, value) = split_pair(item);
            current = Some(Cookie { version, ..Cookie::new(name, value) });
        }

        cookies.extend(current);
        cookies
    }
}

fn set_attribute<F: FnOnce(&mut Cookie)>(current: &mut Option<Cookie>, f: F) {
    if let Some(cookie) = current.as_mut() {
        f(cookie);
    }
}

fn split_pair(item: &str) -> (&str, &str) {
    match item.find('=') {
        Some(idx) if idx > 0 => (item[..idx].trim(), item[idx + 1..].trim()),
        _ => (item.trim(), ""),
    }
}

fn unquote(value: &str) -> &str {
    value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value)
}

/// Formats the cookie as a `Set-Cookie` header value.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(port) = &self.port {
            write!(f, "; Port=\"{port}\"")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.version > 0 {
            write!(f, "; Version={}", self.version)?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}
