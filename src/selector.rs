//! Selector classification and DOM query generation.
//!
//! A selector string produced by the translator is classified into exactly one
//! resolution strategy, in priority order:
//!
//! 1. `role=<role>[name="<name>"]`  role shorthand (name optional)
//! 2. `<role>[name="<name>"]`       bracketed role, for the roles in [`KNOWN_ROLES`]
//! 3. `text=<value>`                text, where value may be `"exact"` or `/pattern/flags`
//! 4. `/pattern/flags`              bare regular expression over element text
//! 5. `placeholder=`, `label=`, `testid=` prefixed attribute lookups
//! 6. anything else                 structural CSS selector
//!
//! Classification is total: the CSS arm is the single terminal fallback.
//! Every strategy compiles to a JavaScript expression that evaluates to the
//! first matching element (or `null`), preferring visible matches.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Roles accepted by the bracketed `<role>[name="..."]` form
pub const KNOWN_ROLES: &[&str] = &[
    "alert",
    "article",
    "banner",
    "button",
    "cell",
    "checkbox",
    "columnheader",
    "combobox",
    "complementary",
    "contentinfo",
    "dialog",
    "form",
    "grid",
    "heading",
    "img",
    "link",
    "list",
    "listbox",
    "listitem",
    "main",
    "menu",
    "menuitem",
    "navigation",
    "option",
    "progressbar",
    "radio",
    "region",
    "row",
    "searchbox",
    "slider",
    "spinbutton",
    "status",
    "switch",
    "tab",
    "table",
    "tablist",
    "tabpanel",
    "textbox",
];

static ROLE_SHORTHAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^role=([A-Za-z]+)\s*(?:\[\s*name\s*=\s*(?:"([^"]*)"|'([^']*)')\s*\])?$"#)
        .expect("role shorthand pattern")
});

static ROLE_BRACKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([a-z]+)\[\s*name\s*=\s*(?:"([^"]*)"|'([^']*)')\s*\]$"#)
        .expect("bracketed role pattern")
});

static REGEX_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(.+)/([dgimsuy]*)$").expect("regex literal pattern"));

/// How element text is compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TextMatch {
    /// Case-insensitive substring, whitespace-normalized
    Substring { value: String },
    /// Exact match after whitespace normalization
    Exact { value: String },
    /// JavaScript regular expression
    Regex { value: String, flags: String },
}

/// Attribute-prefixed lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Placeholder,
    Label,
    TestId,
}

/// A classified selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    RoleShorthand { role: String, name: Option<String> },
    RoleBracket { role: String, name: String },
    Text(TextMatch),
    Regex { pattern: String, flags: String },
    Attribute { kind: AttributeKind, value: String },
    Css(String),
}

/// The six resolution strategies, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    RoleShorthand,
    RoleBracket,
    Text,
    Regex,
    Attribute,
    Css,
}

impl Selector {
    /// Classify a raw selector string. Never fails.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(caps) = ROLE_SHORTHAND.captures(raw) {
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
            return Selector::RoleShorthand {
                role: caps[1].to_ascii_lowercase(),
                name,
            };
        }

        if let Some(caps) = ROLE_BRACKET.captures(raw) {
            if KNOWN_ROLES.contains(&&caps[1]) {
                let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
                return Selector::RoleBracket {
                    role: caps[1].to_string(),
                    name: name.unwrap_or_default().to_string(),
                };
            }
        }

        if let Some(value) = raw.strip_prefix("text=") {
            return Selector::Text(parse_text_value(value.trim()));
        }

        if let Some(caps) = REGEX_LITERAL.captures(raw) {
            return Selector::Regex {
                pattern: caps[1].to_string(),
                flags: caps[2].to_string(),
            };
        }

        for (prefix, kind) in [
            ("placeholder=", AttributeKind::Placeholder),
            ("label=", AttributeKind::Label),
            ("testid=", AttributeKind::TestId),
            ("test-id=", AttributeKind::TestId),
            ("data-testid=", AttributeKind::TestId),
        ] {
            if let Some(value) = raw.strip_prefix(prefix) {
                return Selector::Attribute {
                    kind,
                    value: unquote(value.trim()).to_string(),
                };
            }
        }

        Selector::Css(raw.to_string())
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Selector::RoleShorthand { .. } => Strategy::RoleShorthand,
            Selector::RoleBracket { .. } => Strategy::RoleBracket,
            Selector::Text(_) => Strategy::Text,
            Selector::Regex { .. } => Strategy::Regex,
            Selector::Attribute { .. } => Strategy::Attribute,
            Selector::Css(_) => Strategy::Css,
        }
    }

    /// JavaScript expression yielding the first matching element or `null`.
    ///
    /// Must be evaluated after [`DOM_HELPERS`] has defined `__sl`.
    pub fn to_query_js(&self) -> String {
        match self {
            Selector::RoleShorthand { role, name } => {
                format!("__sl.byRole({}, {})", js_str(role), js_opt(name.as_deref()))
            }
            Selector::RoleBracket { role, name } => {
                format!("__sl.byRole({}, {})", js_str(role), js_str(name))
            }
            Selector::Text(matcher) => format!("__sl.byText({})", js_value(matcher)),
            Selector::Regex { pattern, flags } => format!(
                "__sl.byText({})",
                js_value(&TextMatch::Regex {
                    value: pattern.clone(),
                    flags: flags.clone(),
                })
            ),
            Selector::Attribute { kind, value } => match kind {
                AttributeKind::Placeholder => format!("__sl.byPlaceholder({})", js_str(value)),
                AttributeKind::Label => format!("__sl.byLabel({})", js_str(value)),
                AttributeKind::TestId => format!("__sl.byTestId({})", js_str(value)),
            },
            Selector::Css(css) => format!("__sl.byCss({})", js_str(css)),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::RoleShorthand { role, name: Some(name) } => {
                write!(f, "role={}[name=\"{}\"]", role, name)
            }
            Selector::RoleShorthand { role, name: None } => write!(f, "role={}", role),
            Selector::RoleBracket { role, name } => write!(f, "{}[name=\"{}\"]", role, name),
            Selector::Text(TextMatch::Substring { value }) => write!(f, "text={}", value),
            Selector::Text(TextMatch::Exact { value }) => write!(f, "text=\"{}\"", value),
            Selector::Text(TextMatch::Regex { value, flags }) => {
                write!(f, "text=/{}/{}", value, flags)
            }
            Selector::Regex { pattern, flags } => write!(f, "/{}/{}", pattern, flags),
            Selector::Attribute { kind, value } => {
                let prefix = match kind {
                    AttributeKind::Placeholder => "placeholder",
                    AttributeKind::Label => "label",
                    AttributeKind::TestId => "testid",
                };
                write!(f, "{}={}", prefix, value)
            }
            Selector::Css(css) => f.write_str(css),
        }
    }
}

fn parse_text_value(value: &str) -> TextMatch {
    if let Some(caps) = REGEX_LITERAL.captures(value) {
        return TextMatch::Regex {
            value: caps[1].to_string(),
            flags: caps[2].to_string(),
        };
    }
    let unquoted = unquote(value);
    if unquoted.len() != value.len() {
        TextMatch::Exact {
            value: unquoted.to_string(),
        }
    } else {
        TextMatch::Substring {
            value: value.to_string(),
        }
    }
}

/// Strip one pair of matching surrounding quotes
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn js_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_opt(value: Option<&str>) -> String {
    value.map(js_str).unwrap_or_else(|| "null".to_string())
}

fn js_value<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Helper functions backing [`Selector::to_query_js`]
pub const DOM_HELPERS: &str = r#"
const __sl = (() => {
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    const st = window.getComputedStyle(el);
    return r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none';
  };
  const pick = (list) => list.find(visible) || list[0] || null;
  const textMatches = (text, m) => {
    const t = norm(text);
    if (m.kind === 'regex') { return new RegExp(m.value, m.flags).test(t); }
    if (m.kind === 'exact') { return t === norm(m.value); }
    return t.toLowerCase().includes(norm(m.value).toLowerCase());
  };
  const implicitRole = (el) => {
    const tag = el.tagName.toLowerCase();
    const type = (el.getAttribute('type') || '').toLowerCase();
    switch (tag) {
      case 'button': return 'button';
      case 'a': case 'area': return el.hasAttribute('href') ? 'link' : null;
      case 'h1': case 'h2': case 'h3': case 'h4': case 'h5': case 'h6': return 'heading';
      case 'input':
        if (['button', 'submit', 'reset', 'image'].includes(type)) return 'button';
        if (type === 'checkbox') return 'checkbox';
        if (type === 'radio') return 'radio';
        if (type === 'range') return 'slider';
        if (type === 'search') return 'searchbox';
        if (type === 'number') return 'spinbutton';
        if (type === 'hidden') return null;
        return 'textbox';
      case 'textarea': return 'textbox';
      case 'select': return (el.multiple || el.size > 1) ? 'listbox' : 'combobox';
      case 'option': return 'option';
      case 'img': return el.getAttribute('alt') === '' ? 'presentation' : 'img';
      case 'nav': return 'navigation';
      case 'main': return 'main';
      case 'header': return 'banner';
      case 'footer': return 'contentinfo';
      case 'aside': return 'complementary';
      case 'form': return 'form';
      case 'section': return 'region';
      case 'article': return 'article';
      case 'ul': case 'ol': return 'list';
      case 'li': return 'listitem';
      case 'table': return 'table';
      case 'tr': return 'row';
      case 'td': return 'cell';
      case 'th': return 'columnheader';
      case 'dialog': return 'dialog';
      case 'progress': return 'progressbar';
    }
    return null;
  };
  const roleOf = (el) => {
    const explicit = el.getAttribute('role');
    return explicit ? explicit.trim().split(/\s+/)[0].toLowerCase() : implicitRole(el);
  };
  const labelText = (el) => {
    if (el.id) {
      const l = document.querySelector('label[for="' + CSS.escape(el.id) + '"]');
      if (l) return norm(l.textContent);
    }
    const wrap = el.closest('label');
    return wrap && wrap !== el ? norm(wrap.textContent) : '';
  };
  const accName = (el) => {
    const ids = el.getAttribute('aria-labelledby');
    if (ids) {
      const t = norm(ids.split(/\s+/).map((id) => {
        const n = document.getElementById(id);
        return n ? n.textContent : '';
      }).join(' '));
      if (t) return t;
    }
    const aria = norm(el.getAttribute('aria-label'));
    if (aria) return aria;
    const tag = el.tagName.toLowerCase();
    if (['input', 'textarea', 'select'].includes(tag)) {
      const type = (el.getAttribute('type') || '').toLowerCase();
      if (['button', 'submit', 'reset'].includes(type)) return norm(el.value);
      const l = labelText(el);
      if (l) return l;
      return norm(el.getAttribute('placeholder') || el.getAttribute('title'));
    }
    if (tag === 'img') return norm(el.getAttribute('alt'));
    const text = norm(el.innerText || el.textContent);
    return text || norm(el.getAttribute('title'));
  };
  const deepest = (list) => list.filter((el) => !list.some((o) => o !== el && el.contains(o)));
  const all = () => Array.from(document.querySelectorAll('body *'))
    .filter((el) => !['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'].includes(el.tagName));
  return {
    isVisible: visible,
    byRole(role, name) {
      const list = all().filter((el) => roleOf(el) === role)
        .filter((el) => name === null || accName(el).toLowerCase().includes(norm(name).toLowerCase()));
      return pick(list);
    },
    byText(m) {
      return pick(deepest(all().filter((el) => textMatches(el.innerText || el.textContent, m))));
    },
    byPlaceholder(value) {
      const v = norm(value).toLowerCase();
      return pick(Array.from(document.querySelectorAll('[placeholder]'))
        .filter((el) => norm(el.getAttribute('placeholder')).toLowerCase().includes(v)));
    },
    byLabel(value) {
      const v = norm(value).toLowerCase();
      const controls = [];
      for (const l of document.querySelectorAll('label')) {
        if (!norm(l.textContent).toLowerCase().includes(v)) continue;
        const c = l.control || l.querySelector('input, textarea, select');
        if (c) controls.push(c);
      }
      for (const el of document.querySelectorAll('[aria-label]')) {
        if (norm(el.getAttribute('aria-label')).toLowerCase().includes(v)) controls.push(el);
      }
      return pick(controls);
    },
    byTestId(value) {
      return pick(Array.from(document.querySelectorAll('[data-testid="' + CSS.escape(value) + '"]')));
    },
    byCss(css) {
      try { return pick(Array.from(document.querySelectorAll(css))); } catch (e) { return null; }
    },
  };
})();
"#;
