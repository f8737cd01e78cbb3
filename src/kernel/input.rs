//! Classification and rewriting of submitted code.

use crate::engine::ERROR_ECHO_MARKER;

/// Engine-side variable standing in for `_` (a function name in Scilab).
pub const LAST_VALUE_VAR: &str = "last_kernel_value";

/// What a trimmed submission asks the kernel to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    /// Empty input or a debugger breakpoint; nothing to run.
    Noop,
    Exit,
    Restart,
    Help(&'a str),
    Evaluate(&'a str),
}

impl<'a> Directive<'a> {
    pub fn classify(code: &'a str) -> Self {
        if code.is_empty() || is_keyword(code, "keyboard") || is_keyword(code, "pause") {
            Directive::Noop
        } else if is_keyword(code, "exit") || is_keyword(code, "quit") {
            Directive::Exit
        } else if is_keyword(code, "restart") {
            Directive::Restart
        } else if code.ends_with('?') || code.starts_with('?') {
            Directive::Help(code)
        } else {
            Directive::Evaluate(code)
        }
    }
}

/// Bare keyword or keyword followed by call syntax.
fn is_keyword(code: &str, keyword: &str) -> bool {
    code == keyword || code.strip_prefix(keyword).is_some_and(|rest| rest.starts_with('('))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replaces every standalone `_` with [`LAST_VALUE_VAR`].
///
/// An underscore touching a word character on either side belongs to an
/// identifier and is left alone.
pub fn substitute_last_value(code: &str) -> String {
    if !code.contains('_') {
        return code.to_string();
    }
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    for (i, &c) in chars.iter().enumerate() {
        let standalone = c == '_'
            && (i == 0 || !is_word_char(chars[i - 1]))
            && chars.get(i + 1).map_or(true, |&next| !is_word_char(next));
        if standalone {
            out.push_str(LAST_VALUE_VAR);
        } else {
            out.push(c);
        }
    }
    out
}

/// Reduces a raw engine error to the short message shown to the user.
pub fn categorize_error(raw: &str) -> String {
    if raw.contains("parse error:") {
        "Parse Error".to_string()
    } else if let Some(idx) = raw.find(ERROR_ECHO_MARKER) {
        raw[idx + ERROR_ECHO_MARKER.len()..].trim().to_string()
    } else if raw.contains("Syntax Error") {
        "Syntax Error".to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Last whitespace/semicolon delimited token of `code`.
pub fn last_token(code: &str) -> Option<&str> {
    code.split(|c: char| c.is_whitespace() || c == ';')
        .filter(|t| !t.is_empty())
        .next_back()
}

/// Token a help query asks about, with every `?` removed.
pub fn help_topic(query: &str) -> Option<String> {
    let cleaned = query.replace('?', "");
    last_token(&cleaned).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keywords_are_recognised_bare_or_called() {
        assert_eq!(Directive::classify(""), Directive::Noop);
        assert_eq!(Directive::classify("keyboard"), Directive::Noop);
        assert_eq!(Directive::classify("keyboard()"), Directive::Noop);
        assert_eq!(Directive::classify("exit"), Directive::Exit);
        assert_eq!(Directive::classify("quit(0)"), Directive::Exit);
        assert_eq!(Directive::classify("restart"), Directive::Restart);
        assert_eq!(Directive::classify("restart()"), Directive::Restart);
        assert_eq!(Directive::classify("exitcode = 1"), Directive::Evaluate("exitcode = 1"));
        assert_eq!(Directive::classify("restarts"), Directive::Evaluate("restarts"));
    }

    #[test]
    fn help_syntax_leading_or_trailing() {
        assert_eq!(Directive::classify("disp?"), Directive::Help("disp?"));
        assert_eq!(Directive::classify("?disp"), Directive::Help("?disp"));
        assert_eq!(help_topic("x = 1; disp??"), Some("disp".to_string()));
        assert_eq!(help_topic("??"), None);
    }

    #[test]
    fn underscore_substitution_respects_word_boundaries() {
        assert_eq!(substitute_last_value("x_y"), "x_y");
        assert_eq!(substitute_last_value("a = _ + 1"), "a = last_kernel_value + 1");
        assert_eq!(substitute_last_value("_"), "last_kernel_value");
        assert_eq!(substitute_last_value("_*2"), "last_kernel_value*2");
        assert_eq!(substitute_last_value("[_,_]"), "[last_kernel_value,last_kernel_value]");
        assert_eq!(substitute_last_value("_a + b_"), "_a + b_");
        assert_eq!(substitute_last_value("__"), "__");
    }

    #[test]
    fn errors_are_categorized() {
        assert_eq!(categorize_error("Scilab returned: Foo bar"), "Foo bar");
        assert_eq!(
            categorize_error("Scilab error while evaluating code\nScilab returned:   undefined variable: y\n"),
            "undefined variable: y"
        );
        assert_eq!(categorize_error("oops parse error: near x"), "Parse Error");
        assert_eq!(categorize_error("Syntax Error at line 1"), "Syntax Error");
        assert_eq!(categorize_error("  something else \n"), "something else");
    }

    #[test]
    fn last_token_splits_on_whitespace_and_semicolons() {
        assert_eq!(last_token("a = 1;dis"), Some("dis"));
        assert_eq!(last_token("x = ab"), Some("ab"));
        assert_eq!(last_token("  ; "), None);
    }
}
