use rhai::{Dynamic, Engine, FLOAT, INT};

const JS_MARKERS: &[&str] = &[
    "var ", "const ", "===", "!==", "++", "--", "console.", "Math.", "null", "undefined", "for (",
    "'", ".length",
];

const MATH_FNS: &[&str] = &[
    "floor", "ceil", "round", "abs", "sqrt", "sin", "cos", "tan", "atan2", "pow", "min", "max",
    "random",
];

/// Best-effort rewrite of common JavaScript idioms in node bodies into the
/// script dialect. Returns `None` when the source shows no JS markers or
/// nothing changed.
pub(crate) fn transpile_js_compat(source: &str) -> Option<String> {
    if !JS_MARKERS.iter().any(|m| source.contains(m)) {
        return None;
    }

    let mut out = String::with_capacity(source.len() + 16);
    for raw in source.lines() {
        let line = map_code_segments(raw, convert_js_code);
        let line = convert_counting_for(&line).unwrap_or(line);
        out.push_str(&line);
        out.push('\n');
    }

    if out.trim_end() == source.trim_end() {
        None
    } else {
        Some(out)
    }
}

/// Applies `convert` to the code parts of a line, leaving string literals
/// and `//` comments alone. Single-quoted strings become double-quoted.
fn map_code_segments(line: &str, convert: impl Fn(&str) -> String) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut code = String::new();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '/' && chars.get(i + 1) == Some(&'/') {
            out.push_str(&convert(&code));
            code.clear();
            out.extend(&chars[i..]);
            return out;
        }
        if matches!(ch, '"' | '\'' | '`') {
            out.push_str(&convert(&code));
            code.clear();
            let end = closing_quote(&chars, i);
            let body: String = chars[(i + 1)..end].iter().collect();
            let closed = end < chars.len();
            if ch == '\'' && !body.contains('"') {
                out.push('"');
                out.push_str(&body.replace("\\'", "'"));
                if closed {
                    out.push('"');
                }
            } else {
                out.extend(&chars[i..(end + 1).min(chars.len())]);
            }
            i = end + 1;
            continue;
        }
        code.push(ch);
        i += 1;
    }
    out.push_str(&convert(&code));
    out
}

fn closing_quote(chars: &[char], open: usize) -> usize {
    let quote = chars[open];
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

fn convert_js_code(code: &str) -> String {
    let mut out = code.replace("!==", "!=").replace("===", "==");
    for method in ["log", "info", "warn", "error"] {
        out = out.replace(&format!("console.{method}("), "print(");
    }
    out = out.replace("console.debug(", "debug(");
    for name in MATH_FNS {
        out = out.replace(&format!("Math.{name}("), &format!("math_{name}("));
    }
    out = replace_word(&out, "Math.PI", "PI()");
    out = replace_word(&out, "var", "let");
    out = replace_word(&out, "null", "()");
    out = replace_word(&out, "undefined", "()");
    out = replace_word(&out, ".length", ".len");
    convert_increments(&out)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Replaces `word` only where it is not glued to identifier characters.
fn replace_word(input: &str, word: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut prev: Option<char> = None;
    while let Some(pos) = rest.find(word) {
        let before = rest[..pos].chars().last().or(prev);
        let after = rest[(pos + word.len())..].chars().next();
        let starts_ident = word.starts_with(is_ident_char);
        let bounded = !(starts_ident && before.is_some_and(is_ident_char))
            && !after.is_some_and(is_ident_char);
        out.push_str(&rest[..pos]);
        out.push_str(if bounded { replacement } else { word });
        prev = word.chars().last();
        rest = &rest[(pos + word.len())..];
    }
    out.push_str(rest);
    out
}

/// `x++` / `++x` / `x--` / `--x` as statements become compound assignments.
fn convert_increments(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len() + 8);
    let mut i = 0usize;
    while i < chars.len() {
        let op = match (chars[i], chars.get(i + 1)) {
            ('+', Some('+')) => Some("+="),
            ('-', Some('-')) => Some("-="),
            _ => None,
        };
        let Some(op) = op else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        let postfix = out
            .chars()
            .last()
            .is_some_and(|c| is_ident_char(c) || c == ']');
        if postfix {
            out.push_str(&format!(" {op} 1"));
            i += 2;
            continue;
        }
        let operand: String = chars[(i + 2)..]
            .iter()
            .take_while(|c| is_ident_char(**c) || **c == '.')
            .collect();
        if operand.is_empty() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        out.push_str(&format!("{operand} {op} 1"));
        i += 2 + operand.chars().count();
    }
    out
}

/// `for (let i = A; i < B; i += 1) {` → `for i in A..B {` (and `<=` → `..=`).
/// Any other loop shape is left untouched.
fn convert_counting_for(line: &str) -> Option<String> {
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
    let header = line.trim().strip_prefix("for")?.trim_start().strip_prefix('(')?;
    let (header, tail) = header.rsplit_once(')')?;
    let tail = tail.trim();
    if !(tail.is_empty() || tail == "{") {
        return None;
    }

    let mut parts = header.split(';').map(str::trim);
    let init = parts.next()?;
    let cond = parts.next()?;
    let step = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let init = init.strip_prefix("let ").unwrap_or(init);
    let (var, start) = init.split_once('=')?;
    let (var, start) = (var.trim(), start.trim());
    if var.is_empty() || !var.chars().all(is_ident_char) {
        return None;
    }
    if step.replace(' ', "") != format!("{var}+=1") {
        return None;
    }
    let (range, end) = if let Some(end) = cond.strip_prefix(var)?.trim().strip_prefix("<=") {
        ("..=", end)
    } else {
        ("..", cond.strip_prefix(var)?.trim().strip_prefix('<')?)
    };
    Some(format!(
        "{indent}for {var} in {start}{range}{end} {tail}",
        end = end.trim()
    ))
}

fn as_number(value: &Dynamic) -> FLOAT {
    value
        .as_float()
        .or_else(|_| value.as_int().map(|v| v as FLOAT))
        .unwrap_or(FLOAT::NAN)
}

fn int_or_float(value: FLOAT, ints: bool) -> Dynamic {
    if ints {
        Dynamic::from_int(value as INT)
    } else {
        Dynamic::from_float(value)
    }
}

/// Host functions the rewritten `Math.*` calls land on.
pub(crate) fn register_js_helpers(engine: &mut Engine) {
    engine.register_fn("math_floor", |v: Dynamic| as_number(&v).floor() as INT);
    engine.register_fn("math_ceil", |v: Dynamic| as_number(&v).ceil() as INT);
    engine.register_fn("math_round", |v: Dynamic| (as_number(&v) + 0.5).floor() as INT);
    engine.register_fn("math_abs", |v: Dynamic| {
        int_or_float(as_number(&v).abs(), v.is_int())
    });
    engine.register_fn("math_min", |a: Dynamic, b: Dynamic| {
        int_or_float(as_number(&a).min(as_number(&b)), a.is_int() && b.is_int())
    });
    engine.register_fn("math_max", |a: Dynamic, b: Dynamic| {
        int_or_float(as_number(&a).max(as_number(&b)), a.is_int() && b.is_int())
    });
    engine.register_fn("math_sqrt", |v: Dynamic| as_number(&v).sqrt());
    engine.register_fn("math_sin", |v: Dynamic| as_number(&v).sin());
    engine.register_fn("math_cos", |v: Dynamic| as_number(&v).cos());
    engine.register_fn("math_tan", |v: Dynamic| as_number(&v).tan());
    engine.register_fn("math_atan2", |y: Dynamic, x: Dynamic| {
        as_number(&y).atan2(as_number(&x))
    });
    engine.register_fn("math_pow", |b: Dynamic, e: Dynamic| {
        as_number(&b).powf(as_number(&e))
    });
    engine.register_fn("math_random", || rand::random::<FLOAT>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_common_js_idioms() {
        let source = r#"const speed = 2;
var hero = game.getSprite('hero');
if (hero === null || hero.x !== undefined) {
    console.log("moved " + Math.abs(hero.x));
    count++;
}"#;
        let out = transpile_js_compat(source).expect("converted");
        assert!(out.contains("const speed = 2;"));
        assert!(out.contains(r#"let hero = game.getSprite("hero");"#));
        assert!(out.contains("if (hero == () || hero.x != ()) {"));
        assert!(out.contains(r#"print("moved " + math_abs(hero.x));"#));
        assert!(out.contains("count += 1;"));
    }

    #[test]
    fn leaves_string_literals_and_comments_alone() {
        let source = r#"var label = "a === b; i++"; // var x === 1"#;
        let out = transpile_js_compat(source).expect("converted");
        assert_eq!(out.trim_end(), r#"let label = "a === b; i++"; // var x === 1"#);
    }

    #[test]
    fn skips_sources_without_js_markers() {
        assert!(transpile_js_compat("let a = 1; game.setGlobal(\"a\", a);").is_none());
    }

    #[test]
    fn counting_for_loops_become_ranges() {
        let out = transpile_js_compat("  for (let i = 0; i <= n; i++) {\n  }").expect("for");
        assert!(out.starts_with("  for i in 0..=n {"), "{out}");
        let out = transpile_js_compat("for (var k = 2; k < 10; ++k) {").expect("for");
        assert!(out.starts_with("for k in 2..10 {"), "{out}");
        // stepping by anything but one stays as written
        assert!(transpile_js_compat("for (let i = 0; i < 9; i += 3) {").is_none());
    }

    #[test]
    fn word_replacement_respects_identifiers() {
        assert_eq!(replace_word("nullable = null;", "null", "()"), "nullable = ();");
        assert_eq!(replace_word("items.length + s.lengthy", ".length", ".len"), "items.len + s.lengthy");
        assert_eq!(replace_word("variant; var v", "var", "let"), "variant; let v");
    }

    #[test]
    fn math_helpers_follow_js_rounding() {
        let mut engine = Engine::new();
        register_js_helpers(&mut engine);
        assert_eq!(engine.eval::<INT>("math_round(2.5)").expect("round"), 3);
        assert_eq!(engine.eval::<INT>("math_round(-2.5)").expect("round"), -2);
        assert_eq!(engine.eval::<INT>("math_max(3, 9)").expect("max"), 9);
        assert_eq!(engine.eval::<FLOAT>("math_min(3, 0.5)").expect("min"), 0.5);
        let r = engine.eval::<FLOAT>("math_random()").expect("random");
        assert!((0.0..1.0).contains(&r));
    }
}
