//! Whitelist check for policy step bodies
//!
//! Step bodies are stored and never executed here, but a body is only accepted
//! when every import and call it makes is on the whitelist. The check is
//! lexical and runs over logical lines. String literals and comments are
//! blanked, then continuations and bracketed spans are joined.

use crate::policy::PolicyError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*import\s+(.+)$").expect("valid import pattern")
});

static FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*from\s+[\w.]+\s+import\s+\(?\s*(\w+)").expect("valid from-import pattern")
});

static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z_]\w*(?:\s*\.\s*[A-Za-z_]\w*)*)\s*\(").expect("valid call pattern")
});

static DUNDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"__\w+__").expect("valid dunder pattern"));

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "chr", "divmod", "enumerate", "float", "hash", "hex",
    "id", "int", "iter", "len", "list", "map", "max", "min", "next", "pow", "range", "round",
    "set", "slice", "sorted", "str", "sum", "tuple", "zip", "debug",
];

/// Functions on PolicyKit objects (proposal, action, datastore, users)
const POLICY_FUNCTIONS: &[&str] = &[
    "add", "count", "execute", "exists", "filter", "get", "get_yes_votes", "get_no_votes",
    "get_all_boolean_votes", "get_all_number_votes", "get_one_number_votes", "notify_action",
    "get_time_elapsed", "get_users", "remove", "set", "get_roles", "has_role", "all",
];

/// String methods without format-string behaviour
const STRING_FUNCTIONS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "encode", "endswith", "expandtabs", "find",
    "index", "isalnum", "isalpha", "isdecimal", "isdigit", "isidentifier", "islower",
    "isnumeric", "isprintable", "isspace", "istitle", "isupper", "join", "ljust", "lower",
    "lstrip", "maketrans", "partition", "replace", "rfind", "rindex", "rjust", "rpartition",
    "rsplit", "rstrip", "split", "splitlines", "startswith", "strip", "swapcase", "title",
    "translate", "upper", "zfill",
];

/// Keywords that may directly precede a parenthesis
const KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "in", "not", "and", "or", "is", "return", "yield", "lambda",
    "assert", "del", "with", "except", "else", "await",
];

static MODULES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            "metagov",
            &["start_process", "close_process", "get_process", "perform_action"] as &[&str],
        ),
        (
            "base64",
            &[
                "a85encode", "a85decode", "b16encode", "b16decode", "b32encode", "b32decode",
                "b64encode", "b64decode", "b85encode", "b85decode", "standard_b64encode",
                "standard_b64decode", "urlsafe_b64encode", "urlsafe_b64decode",
            ] as &[&str],
        ),
        (
            "calendar",
            &[
                "isleap", "leapdays", "month", "monthcalendar", "monthrange", "timegm",
                "weekday", "weekheader",
            ] as &[&str],
        ),
        ("copy", &["copy", "deepcopy"] as &[&str]),
        ("datetime", &["timedelta"] as &[&str]),
        (
            "datetime.datetime",
            &[
                "astimezone", "combine", "date", "fromisoformat", "fromtimestamp", "isoformat",
                "now", "replace", "time", "timestamp", "today", "utcfromtimestamp", "utcnow",
                "weekday",
            ] as &[&str],
        ),
        (
            "datetime.date",
            &["fromisoformat", "fromtimestamp", "isoformat", "replace", "today", "weekday"] as &[&str],
        ),
        ("datetime.timedelta", &["total_seconds"] as &[&str]),
        (
            "itertools",
            &[
                "accumulate", "chain", "combinations", "combinations_with_replacement",
                "compress", "count", "cycle", "dropwhile", "filterfalse", "groupby", "islice",
                "permutations", "product", "repeat", "starmap", "takewhile", "tee",
                "zip_longest",
            ] as &[&str],
        ),
        (
            "math",
            &[
                "ceil", "comb", "exp", "fabs", "factorial", "floor", "fsum", "gcd", "isclose",
                "isqrt", "log", "log2", "log10", "perm", "pow", "prod", "sqrt", "trunc",
            ] as &[&str],
        ),
        (
            "random",
            &[
                "choice", "choices", "randint", "random", "randrange", "sample", "seed",
                "shuffle", "uniform",
            ] as &[&str],
        ),
        ("re", &[] as &[&str]),
        ("time", &[] as &[&str]),
    ])
});

/// A single whitelist violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub code: String,
    pub lineno: usize,
}

impl From<Violation> for PolicyError {
    fn from(v: Violation) -> Self {
        PolicyError::NonWhitelistedCode {
            code: v.code,
            lineno: v.lineno,
        }
    }
}

/// Reject the first non-whitelisted construct in `code`
pub fn check(code: &str) -> Result<(), PolicyError> {
    match violations(code).into_iter().next() {
        Some(v) => Err(v.into()),
        None => Ok(()),
    }
}

/// All whitelist violations in `code`, in line order
pub fn violations(code: &str) -> Vec<Violation> {
    let mut found = Vec::new();

    for (lineno, line) in logical_lines(code) {
        let mut push = |code: &str| {
            found.push(Violation {
                code: code.to_string(),
                lineno,
            })
        };

        if let Some(caps) = FROM_IMPORT.captures(&line) {
            push(&caps[1]);
            continue;
        }

        if let Some(caps) = IMPORT.captures(&line) {
            for module in caps[1].split(',') {
                let name = module.split_whitespace().next().unwrap_or_default();
                if !MODULES.contains_key(name) {
                    push(name);
                }
            }
            continue;
        }

        for m in DUNDER.find_iter(&line) {
            push(m.as_str());
        }

        for caps in CALL.captures_iter(&line) {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or_default();
            let before = line[..whole].trim_end();
            // Calls on subscripts, literals or call results
            if before.ends_with('.') {
                continue;
            }
            if before.ends_with("def") || before.ends_with("class") {
                continue;
            }

            let chain: Vec<String> = caps[1]
                .split('.')
                .map(|part| part.trim().to_string())
                .collect();
            if let Some(code) = disallowed_call(&chain) {
                push(&code);
            }
        }
    }

    found
}

fn disallowed_call(chain: &[String]) -> Option<String> {
    let (function, receiver) = chain.split_last()?;

    if receiver.is_empty() {
        if KEYWORDS.contains(&function.as_str()) || BUILTINS.contains(&function.as_str()) {
            return None;
        }
        return Some(function.clone());
    }

    let module = receiver.join(".");
    let allowed = match MODULES.get(module.as_str()) {
        Some(functions) => functions.contains(&function.as_str()),
        None => {
            POLICY_FUNCTIONS.contains(&function.as_str())
                || STRING_FUNCTIONS.contains(&function.as_str())
        }
    };

    if allowed {
        None
    } else {
        let calling = receiver.last().map(String::as_str).unwrap_or_default();
        Some(format!("{}.{}", calling, function))
    }
}

/// Split `code` into logical lines numbered by their first physical line.
/// String literal contents become spaces and comments are dropped.
fn logical_lines(code: &str) -> Vec<(usize, String)> {
    let chars: Vec<char> = code.chars().collect();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 1;
    let mut lineno = 1;
    let mut depth = 0usize;
    let mut quote: Option<(char, bool)> = None;
    let mut escaped = false;
    let mut i = 0;

    let tripled = |i: usize, q: char| chars.get(i..i + 3).is_some_and(|s| s.iter().all(|&c| c == q));

    while i < chars.len() {
        let c = chars[i];
        if let Some((q, triple)) = quote {
            if c == '\n' && !triple && !escaped {
                // an unterminated string ends with its line
                quote = None;
                continue;
            }
            if c == '\n' {
                lineno += 1;
            }
            if escaped {
                escaped = false;
                current.push(' ');
            } else if c == '\\' {
                escaped = true;
                current.push(' ');
            } else if triple && tripled(i, q) {
                current.extend([q; 3]);
                quote = None;
                i += 3;
                continue;
            } else if !triple && c == q {
                current.push(q);
                quote = None;
            } else {
                current.push(' ');
            }
            i += 1;
            continue;
        }

        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '"' | '\'' if tripled(i, c) => {
                quote = Some((c, true));
                current.extend([c; 3]);
                i += 3;
                continue;
            }
            '"' | '\'' => {
                quote = Some((c, false));
                current.push(c);
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                current.push(' ');
                lineno += 1;
                i += 2;
                continue;
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '\n' => {
                lineno += 1;
                if depth > 0 {
                    current.push(' ');
                } else {
                    lines.push((start, std::mem::take(&mut current)));
                    start = lineno;
                }
            }
            _ => current.push(c),
        }
        i += 1;
    }

    lines.push((start, current));
    lines
}
