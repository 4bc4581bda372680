//! A case-insensitive header map with RFC 7230 list-field semantics and
//! cookie parsing (`spec.md` §3 "Headers").

use std::collections::HashMap;

/// A single field value. List-typed fields are folded into one comma
/// joined value on insert; [`Value::as_list`] splits them back apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value(pub String);

impl Value {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits on commas per RFC 7230 list-field rules, trimming
    /// optional whitespace around each element and dropping empties.
    pub fn as_list(&self) -> Vec<&str> {
        self.0
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn lower(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Case-insensitive multimap from header name to value. List-typed
/// fields (per [`Headers::LIST_TYPED`]) are comma-joined on repeated
/// insertion; others are overwritten.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    // Keyed by lowercased name; value keeps the first-seen casing for
    // re-emission, but lookups are always case-insensitive.
    entries: HashMap<String, (String, Value)>,
    order: Vec<String>,
    // `Set-Cookie` can't be comma-folded like other list-typed fields
    // (commas appear inside `Expires=`), so each value becomes its own
    // header line, kept separately from `entries` (`spec.md` §4.8
    // "four Set-Cookie headers").
    set_cookies: Vec<String>,
}

impl Headers {
    /// Fields whose repeated occurrences are folded together rather
    /// than overwritten, per RFC 7230 §3.2.2.
    const LIST_TYPED: &'static [&'static str] = &["accept", "cookie", "x-fz-action"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(&lower(name)).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> &str {
        self.get(name).map(Value::as_str).unwrap_or("")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&lower(name))
    }

    /// Inserts or folds `value` under `name`. Returns `Err` if the
    /// cumulative value for a list-typed field would exceed
    /// `max_value_size` once joined (`spec.md` §4.5).
    pub fn insert(&mut self, name: &str, value: &str, max_value_size: usize) -> Result<(), ()> {
        let key = lower(name);
        let is_list = Self::LIST_TYPED.contains(&key.as_str());

        match self.entries.get_mut(&key) {
            Some((_, existing)) if is_list => {
                let joined_len = existing.0.len() + 2 + value.len();
                if joined_len > max_value_size {
                    return Err(());
                }
                existing.0.push_str(", ");
                existing.0.push_str(value);
            }
            Some((_, existing)) => {
                existing.0 = value.to_string();
            }
            None => {
                if value.len() > max_value_size {
                    return Err(());
                }
                self.entries
                    .insert(key.clone(), (name.to_string(), Value(value.to_string())));
                self.order.push(key);
            }
        }
        Ok(())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = lower(name);
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries
            .insert(key, (name.to_string(), Value(value.into())));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|(name, v)| (name.as_str(), v))
    }

    /// Appends one `Set-Cookie` value, to be emitted as its own header
    /// line (`spec.md` §4.8, §6 "Set-Cookie attributes").
    pub fn add_set_cookie(&mut self, value: impl Into<String>) {
        self.set_cookies.push(value.into());
    }

    pub fn set_cookies(&self) -> &[String] {
        &self.set_cookies
    }

    /// Parses the `Cookie` header looking for `name`. `secure_only`
    /// gates whether a `__Secure-`/`__Host-` prefixed cookie name is
    /// honored outside TLS (mirrors the spec's `get_cookie(name,
    /// secure_only)`).
    pub fn get_cookie(&self, name: &str, is_secure: bool) -> Option<String> {
        let looking_for_secure_prefixed =
            name.starts_with("__Secure-") || name.starts_with("__Host-");
        if looking_for_secure_prefixed && !is_secure {
            return None;
        }

        let raw = self.get("cookie")?;
        for pair in raw.as_str().split(';') {
            let pair = pair.trim();
            if let Some((k, v)) = pair.split_once('=') {
                if k.trim() == name {
                    return Some(v.trim().to_string());
                }
            }
        }
        None
    }
}

/// Builds a `Set-Cookie` value per `spec.md` §6.
pub fn make_cookie(
    name: &str,
    value: &str,
    path: &str,
    secure: bool,
    http_only: bool,
    max_age: std::time::Duration,
) -> String {
    let expires = httpdate::fmt_http_date(std::time::SystemTime::now() + max_age);
    let mut s = format!(
        "{name}={value}; Path={path}; Max-Age={}; Expires={expires}",
        max_age.as_secs()
    );
    if secure {
        s.push_str("; Secure");
    }
    if http_only {
        s.push_str("; HttpOnly");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_typed_headers_fold() {
        let mut h = Headers::new();
        h.insert("Accept", "text/html", 4096).unwrap();
        h.insert("Accept", "application/json", 4096).unwrap();
        assert_eq!(h.get("accept").unwrap().as_list(), vec!["text/html", "application/json"]);
    }

    #[test]
    fn non_list_headers_overwrite() {
        let mut h = Headers::new();
        h.insert("Content-Length", "1", 4096).unwrap();
        h.insert("Content-Length", "2", 4096).unwrap();
        assert_eq!(h.get_str("content-length"), "2");
    }

    #[test]
    fn cookie_lookup_is_exact_name_match() {
        let mut h = Headers::new();
        h.insert("Cookie", "access_token=abc; refresh_token=def", 4096)
            .unwrap();
        assert_eq!(h.get_cookie("access_token", true).as_deref(), Some("abc"));
        assert_eq!(h.get_cookie("refresh_token", true).as_deref(), Some("def"));
        assert_eq!(h.get_cookie("missing", true), None);
    }

    #[test]
    fn oversized_list_value_is_rejected() {
        let mut h = Headers::new();
        h.insert("Accept", &"a".repeat(10), 12).unwrap();
        assert!(h.insert("Accept", &"b".repeat(10), 12).is_err());
    }
}
